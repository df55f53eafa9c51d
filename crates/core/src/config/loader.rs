use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::Path;

use super::{
    types::{Config, Credentials, Profile},
    ConfigError,
};

const ENV_PREFIX: &str = "CORECHECK_";

/// Load configuration from file with environment variable overrides.
///
/// Defaults come from `profile`, then the TOML file, then `CORECHECK_*`
/// variables (nested keys separated by `__`, e.g. `CORECHECK_CORE__URL`).
pub fn load_config(path: &Path, profile: Profile) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    Figment::from(Serialized::defaults(Config::for_profile(profile)))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Load configuration from profile defaults and environment variables only
pub fn load_config_from_env(profile: Profile) -> Result<Config, ConfigError> {
    Figment::from(Serialized::defaults(Config::for_profile(profile)))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Read marketplace credentials from the variables `profile` names.
pub fn resolve_credentials(profile: Profile) -> Result<Credentials, ConfigError> {
    resolve_credentials_with(profile, |name| std::env::var(name).ok())
}

fn resolve_credentials_with<F>(profile: Profile, lookup: F) -> Result<Credentials, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let (user_var, password_var) = profile.credential_vars();
    let username = lookup(user_var).filter(|v| !v.is_empty());
    let password = lookup(password_var).filter(|v| !v.is_empty());

    match (username, password) {
        (Some(username), Some(password)) => Ok(Credentials { username, password }),
        (None, _) => Err(ConfigError::ValidationError(format!("{} is not set", user_var))),
        (_, None) => Err(ConfigError::ValidationError(format!(
            "{} is not set",
            password_var
        ))),
    }
}
