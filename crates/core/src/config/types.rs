use serde::{Deserialize, Serialize};

use crate::core_client::AppKey;

/// Where the run executes; selects default ports and credential variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Inside the CI testing container.
    Container,
    /// On a developer host talking to a forwarded daemon.
    DeveloperHost,
}

impl Profile {
    /// Read `IS_TESTING_CONTAINER` from the process environment.
    pub fn from_env() -> Self {
        Self::from_flag(std::env::var("IS_TESTING_CONTAINER").ok().as_deref())
    }

    /// Any non-empty value, `0` included, selects the container.
    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag {
            Some(f) if !f.is_empty() => Profile::Container,
            _ => Profile::DeveloperHost,
        }
    }

    pub fn core_port(&self) -> u16 {
        match self {
            Profile::Container => 8951,
            Profile::DeveloperHost => 18951,
        }
    }

    /// Names of the environment variables holding marketplace credentials.
    pub fn credential_vars(&self) -> (&'static str, &'static str) {
        match self {
            Profile::Container => ("MP_USER", "MP_PASSWORD"),
            Profile::DeveloperHost => ("MP_USER_TEST", "MP_PASSWORD_TEST"),
        }
    }
}

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub marketplace: MarketplaceConfig,
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub webapp: WebappConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub assertions: AssertionConfig,
    #[serde(default)]
    pub scenarios: ScenarioConfig,
}

impl Config {
    /// Defaults for the given profile.
    pub fn for_profile(profile: Profile) -> Self {
        Self {
            marketplace: MarketplaceConfig::default(),
            core: CoreConfig::for_profile(profile),
            webapp: WebappConfig::default(),
            polling: PollingConfig::default(),
            assertions: AssertionConfig::default(),
            scenarios: ScenarioConfig::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::for_profile(Profile::DeveloperHost)
    }
}

/// Marketplace service configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarketplaceConfig {
    #[serde(default = "default_marketplace_url")]
    pub url: String,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            url: default_marketplace_url(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_marketplace_url() -> String {
    "https://marketplace.flecs.tech:8443".to_string()
}

fn default_timeout() -> u32 {
    30
}

/// How the install request carries the app key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallPayloadShape {
    /// `{"appKey":{"name":..,"version":..},"licenseKey":..}`
    #[default]
    Nested,
    /// `{"app":..,"version":..,"licenseKey":..}`
    Flat,
}

/// Core daemon configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CoreConfig {
    /// Base URL of the daemon's REST API (e.g., "http://localhost:8951")
    #[serde(default = "default_core_url")]
    pub url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
    #[serde(default)]
    pub install_payload: InstallPayloadShape,
}

impl CoreConfig {
    pub fn for_profile(profile: Profile) -> Self {
        Self {
            url: format!("http://localhost:{}", profile.core_port()),
            timeout_secs: default_timeout(),
            install_payload: InstallPayloadShape::default(),
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::for_profile(Profile::DeveloperHost)
    }
}

fn default_core_url() -> String {
    CoreConfig::default().url
}

/// Web app origin serving the import endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebappConfig {
    #[serde(default = "default_webapp_url")]
    pub url: String,
}

impl Default for WebappConfig {
    fn default() -> Self {
        Self {
            url: default_webapp_url(),
        }
    }
}

fn default_webapp_url() -> String {
    "http://localhost:80".to_string()
}

/// Job polling configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollingConfig {
    /// Fixed delay between two polls of the same job (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,
    /// Give up on a job after this many seconds. Unset polls forever.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval(),
            timeout_secs: None,
        }
    }
}

fn default_poll_interval() -> u64 {
    1000
}

/// How strictly ticket consumption is checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketMode {
    /// Consumed tickets must equal the batch size.
    #[default]
    Exact,
    /// Consumed tickets must be at least the batch size (shared account).
    AtLeast,
}

/// How the installed core version is compared with the published one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionMode {
    /// `X.Y.Z-release` against `X.Y.Z-release-abcdef0`.
    #[default]
    Structural,
    Exact,
}

/// Assertion strictness
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AssertionConfig {
    #[serde(default)]
    pub tickets: TicketMode,
    #[serde(default)]
    pub version: VersionMode,
}

/// An app exercised by the scenarios.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserApp {
    pub name: String,
    pub version: String,
    /// Host port the app's web UI listens on once started.
    #[serde(default)]
    pub port: Option<u16>,
}

impl UserApp {
    pub fn new(name: &str, version: &str, port: Option<u16>) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            port,
        }
    }

    pub fn app_key(&self) -> AppKey {
        AppKey::new(&self.name, &self.version)
    }
}

/// Scenario inputs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioConfig {
    /// Apps a fresh daemon ships with.
    #[serde(default = "default_system_apps")]
    pub system_apps: Vec<String>,
    #[serde(default = "default_user_apps")]
    pub user_apps: Vec<UserApp>,
    /// Host used to reach started apps.
    #[serde(default = "default_probe_host")]
    pub probe_host: String,
    /// Delay before probing started instances (seconds).
    #[serde(default = "default_settle")]
    pub instance_settle_secs: u64,
}

impl ScenarioConfig {
    pub fn user_app_keys(&self) -> Vec<AppKey> {
        self.user_apps.iter().map(UserApp::app_key).collect()
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            system_apps: default_system_apps(),
            user_apps: default_user_apps(),
            probe_host: default_probe_host(),
            instance_settle_secs: default_settle(),
        }
    }
}

fn default_system_apps() -> Vec<String> {
    vec![
        "tech.flecs.service-mesh".to_string(),
        "tech.flecs.mqtt-bridge".to_string(),
    ]
}

fn default_user_apps() -> Vec<UserApp> {
    vec![
        UserApp::new("org.mosquitto.broker", "2.0.15-openssl", None),
        UserApp::new("io.anyviz.cloudadapter", "0.9.6.0", Some(8888)),
        UserApp::new("com.grafana.grafana-oss", "9.3.1", Some(3000)),
        UserApp::new("com.influxdata.influxdb", "2.5.1", Some(8086)),
    ]
}

fn default_probe_host() -> String {
    "localhost".to_string()
}

fn default_settle() -> u64 {
    5
}

/// Marketplace login read from the environment.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Config summary for logs (no secrets are part of `Config`, but URLs may
/// carry userinfo).
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub marketplace_url: String,
    pub core_url: String,
    pub webapp_url: String,
    pub install_payload: InstallPayloadShape,
    pub poll_interval_ms: u64,
    pub poll_timeout_secs: Option<u64>,
    pub tickets: TicketMode,
    pub version: VersionMode,
    pub user_apps: usize,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            marketplace_url: strip_userinfo(&config.marketplace.url),
            core_url: strip_userinfo(&config.core.url),
            webapp_url: strip_userinfo(&config.webapp.url),
            install_payload: config.core.install_payload,
            poll_interval_ms: config.polling.interval_ms,
            poll_timeout_secs: config.polling.timeout_secs,
            tickets: config.assertions.tickets,
            version: config.assertions.version,
            user_apps: config.scenarios.user_apps.len(),
        }
    }
}

fn strip_userinfo(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}***@{}", &url[..scheme_end + 3], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}
