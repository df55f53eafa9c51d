//! Types for marketplace operations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// The marketplace refused the credentials.
    #[error("authentication rejected: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// A 2xx answer without the token or user fields.
    #[error("malformed authentication response: {0}")]
    MalformedResponse(String),

    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum MarketplaceError {
    #[error("remote error: HTTP {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("HTTP client setup failed: {0}")]
    Client(String),
}

/// An authenticated marketplace session, held for the whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub user_login: String,
}

/// A license ticket. Unused while `activation_date` is null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub license_key: String,
    #[serde(default)]
    pub activation_date: Option<String>,
}

impl Ticket {
    pub fn is_unused(&self) -> bool {
        self.activation_date.is_none()
    }
}

#[async_trait]
pub trait Marketplace: Send + Sync {
    /// Log in once; the session is not refreshed.
    async fn authenticate(&self, username: &str, password: &str) -> Result<Session, AuthError>;

    /// All tickets of the session's user, used or not, in service order.
    async fn licenses(&self, session: &Session) -> Result<Vec<Ticket>, MarketplaceError>;

    /// Version string of the latest published core release.
    async fn latest_core_version(&self) -> Result<String, MarketplaceError>;
}

// Wire formats

#[derive(Debug, Serialize)]
pub(crate) struct AuthenticateRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
    #[serde(rename = "issueJWT")]
    pub issue_jwt: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AuthenticateResponse {
    jwt: Option<JwtEnvelope>,
    user: Option<UserEnvelope>,
}

#[derive(Debug, Deserialize)]
struct JwtEnvelope {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    data: Option<UserData>,
}

#[derive(Debug, Deserialize)]
struct UserData {
    user_login: Option<String>,
}

impl AuthenticateResponse {
    pub(crate) fn into_session(self) -> Result<Session, AuthError> {
        let token = self
            .jwt
            .and_then(|j| j.token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::MalformedResponse("missing jwt.token".to_string()))?;
        let user_login = self
            .user
            .and_then(|u| u.data)
            .and_then(|d| d.user_login)
            .ok_or_else(|| {
                AuthError::MalformedResponse("missing user.data.user_login".to_string())
            })?;
        Ok(Session { token, user_login })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct LicensesResponse {
    pub response: LicensesEnvelope,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LicensesEnvelope {
    #[serde(default)]
    pub licenses: Vec<Ticket>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authenticate_request_is_compact() {
        let body = serde_json::to_string(&AuthenticateRequest {
            username: "dev@example.com",
            password: "pw",
            issue_jwt: true,
        })
        .unwrap();
        assert_eq!(
            body,
            r#"{"username":"dev@example.com","password":"pw","issueJWT":true}"#
        );
    }

    #[test]
    fn test_authenticate_response_into_session() {
        let json = r#"{"jwt":{"token":"abc.def.ghi","token_expires":123},"user":{"data":{"user_login":"dev","ID":5}}}"#;
        let response: AuthenticateResponse = serde_json::from_str(json).unwrap();
        let session = response.into_session().unwrap();
        assert_eq!(session.token, "abc.def.ghi");
        assert_eq!(session.user_login, "dev");
    }

    #[test]
    fn test_authenticate_response_missing_user() {
        let json = r#"{"jwt":{"token":"abc"}}"#;
        let response: AuthenticateResponse = serde_json::from_str(json).unwrap();
        let err = response.into_session().unwrap_err();
        assert!(matches!(err, AuthError::MalformedResponse(_)));
    }

    #[test]
    fn test_authenticate_response_empty_token() {
        let json = r#"{"jwt":{"token":""},"user":{"data":{"user_login":"dev"}}}"#;
        let response: AuthenticateResponse = serde_json::from_str(json).unwrap();
        assert!(response.into_session().is_err());
    }

    #[test]
    fn test_licenses_response_decodes_null_activation() {
        let json = r#"{"response":{"licenses":[
            {"license_key":"AAAA-1111","activation_date":null},
            {"license_key":"BBBB-2222","activation_date":"2023-02-01 10:00:00"}
        ]}}"#;
        let response: LicensesResponse = serde_json::from_str(json).unwrap();
        let tickets = response.response.licenses;
        assert_eq!(tickets.len(), 2);
        assert!(tickets[0].is_unused());
        assert!(!tickets[1].is_unused());
    }
}
