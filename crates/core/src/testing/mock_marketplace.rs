//! Mock marketplace for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::marketplace::{AuthError, Marketplace, MarketplaceError, Session, Ticket};

#[derive(Debug, Clone)]
struct MockUser {
    password: String,
    user_login: String,
}

/// Mock implementation of the Marketplace trait.
///
/// Holds one ticket ledger shared by every user. Keys are handed out as
/// `LIC-0001`, `LIC-0002`, ... in the order tickets were added.
///
/// # Example
///
/// ```rust,ignore
/// let marketplace = MockMarketplace::new();
/// marketplace.add_user("dev@example.com", "pw", "dev").await;
/// marketplace.add_tickets(4).await;
///
/// let session = marketplace.authenticate("dev@example.com", "pw").await?;
/// assert_eq!(marketplace.unused_count().await, 4);
/// ```
#[derive(Debug)]
pub struct MockMarketplace {
    users: Arc<RwLock<HashMap<String, MockUser>>>,
    tickets: Arc<RwLock<Vec<Ticket>>>,
    /// Issued tokens, mapped to the user login they belong to.
    sessions: Arc<RwLock<HashMap<String, String>>>,
    published_version: Arc<RwLock<String>>,
    /// If set, the next licenses or version call fails with this error.
    next_error: Arc<RwLock<Option<MarketplaceError>>>,
    counter: Arc<RwLock<u32>>,
}

impl Default for MockMarketplace {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMarketplace {
    pub fn new() -> Self {
        Self {
            users: Arc::new(RwLock::new(HashMap::new())),
            tickets: Arc::new(RwLock::new(Vec::new())),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            published_version: Arc::new(RwLock::new("4.0.0-snowhare".to_string())),
            next_error: Arc::new(RwLock::new(None)),
            counter: Arc::new(RwLock::new(0)),
        }
    }

    pub async fn add_user(&self, username: &str, password: &str, user_login: &str) {
        self.users.write().await.insert(
            username.to_string(),
            MockUser {
                password: password.to_string(),
                user_login: user_login.to_string(),
            },
        );
    }

    /// Append `count` unused tickets to the ledger.
    pub async fn add_tickets(&self, count: usize) {
        let mut tickets = self.tickets.write().await;
        for _ in 0..count {
            let key = format!("LIC-{:04}", tickets.len() + 1);
            tickets.push(Ticket {
                license_key: key,
                activation_date: None,
            });
        }
    }

    /// Activate the first `count` unused tickets, as another client of the
    /// same account would.
    pub async fn consume_externally(&self, count: usize) {
        let mut tickets = self.tickets.write().await;
        for ticket in tickets.iter_mut().filter(|t| t.is_unused()).take(count) {
            ticket.activation_date = Some("2024-01-01 00:00:00".to_string());
        }
    }

    /// Mark `license_key` as used. Returns false for unknown or used keys.
    pub async fn activate(&self, license_key: &str) -> bool {
        let mut tickets = self.tickets.write().await;
        match tickets
            .iter_mut()
            .find(|t| t.license_key == license_key && t.is_unused())
        {
            Some(ticket) => {
                ticket.activation_date = Some(chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string());
                true
            }
            None => false,
        }
    }

    pub async fn is_unused(&self, license_key: &str) -> bool {
        self.tickets
            .read()
            .await
            .iter()
            .any(|t| t.license_key == license_key && t.is_unused())
    }

    pub async fn unused_count(&self) -> usize {
        self.tickets.read().await.iter().filter(|t| t.is_unused()).count()
    }

    pub async fn set_published_version(&self, version: &str) {
        *self.published_version.write().await = version.to_string();
    }

    pub async fn set_next_error(&self, error: MarketplaceError) {
        *self.next_error.write().await = Some(error);
    }

    async fn take_error(&self) -> Result<(), MarketplaceError> {
        match self.next_error.write().await.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Marketplace for MockMarketplace {
    async fn authenticate(&self, username: &str, password: &str) -> Result<Session, AuthError> {
        let user = self
            .users
            .read()
            .await
            .get(username)
            .filter(|u| u.password == password)
            .cloned()
            .ok_or_else(|| AuthError::Rejected {
                status: 403,
                body: "invalid username or password".to_string(),
            })?;

        let mut counter = self.counter.write().await;
        *counter += 1;
        let token = format!("token-{}", *counter);
        self.sessions
            .write()
            .await
            .insert(token.clone(), user.user_login.clone());

        Ok(Session {
            token,
            user_login: user.user_login,
        })
    }

    async fn licenses(&self, session: &Session) -> Result<Vec<Ticket>, MarketplaceError> {
        self.take_error().await?;
        if !self.sessions.read().await.contains_key(&session.token) {
            return Err(MarketplaceError::Remote {
                status: 401,
                body: "invalid token".to_string(),
            });
        }
        Ok(self.tickets.read().await.clone())
    }

    async fn latest_core_version(&self) -> Result<String, MarketplaceError> {
        self.take_error().await?;
        Ok(self.published_version.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_authenticate_checks_password() {
        let marketplace = MockMarketplace::new();
        marketplace.add_user("dev@example.com", "pw", "dev").await;

        let session = marketplace.authenticate("dev@example.com", "pw").await.unwrap();
        assert_eq!(session.user_login, "dev");
        assert!(session.token.starts_with("token-"));

        assert!(matches!(
            marketplace.authenticate("dev@example.com", "wrong").await,
            Err(AuthError::Rejected { status: 403, .. })
        ));
    }

    #[tokio::test]
    async fn test_activate_consumes_once() {
        let marketplace = MockMarketplace::new();
        marketplace.add_tickets(2).await;

        assert!(marketplace.activate("LIC-0001").await);
        assert!(!marketplace.activate("LIC-0001").await);
        assert!(!marketplace.activate("LIC-9999").await);
        assert_eq!(marketplace.unused_count().await, 1);
    }
}
