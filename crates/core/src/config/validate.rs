use std::collections::HashSet;

use super::{types::Config, ConfigError};
use crate::verify::is_valid_app_name;

/// Validate configuration
/// Currently validates:
/// - Service URLs use http or https
/// - Poll interval is not 0
/// - Scenario apps have valid names, non-empty versions and no duplicates
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    for (field, url) in [
        ("marketplace.url", &config.marketplace.url),
        ("core.url", &config.core.url),
        ("webapp.url", &config.webapp.url),
    ] {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "{} must be an http(s) URL, got {:?}",
                field, url
            )));
        }
    }

    if config.polling.interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "polling.interval_ms cannot be 0".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for app in &config.scenarios.user_apps {
        if !is_valid_app_name(&app.name) {
            return Err(ConfigError::ValidationError(format!(
                "scenarios.user_apps: invalid app name {:?}",
                app.name
            )));
        }
        if app.version.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "scenarios.user_apps: {} has an empty version",
                app.name
            )));
        }
        if !seen.insert((app.name.as_str(), app.version.as_str())) {
            return Err(ConfigError::ValidationError(format!(
                "scenarios.user_apps: {} {} listed twice",
                app.name, app.version
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserApp;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_poll_interval_zero_fails() {
        let mut config = Config::default();
        config.polling.interval_ms = 0;
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_rejects_non_http_url() {
        let mut config = Config::default();
        config.webapp.url = "localhost:80".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("webapp.url"));
    }

    #[test]
    fn test_validate_rejects_bad_app_name() {
        let mut config = Config::default();
        config.scenarios.user_apps = vec![UserApp::new("Tech.flecs.app-1", "1.0", None)];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_app() {
        let mut config = Config::default();
        config.scenarios.user_apps = vec![
            UserApp::new("org.mosquitto.broker", "2.0.15-openssl", None),
            UserApp::new("org.mosquitto.broker", "2.0.15-openssl", Some(1883)),
        ];
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("listed twice"));
    }
}
