//! Testing utilities and mock implementations.
//!
//! In-memory stand-ins for the marketplace and the core daemon, so
//! scenarios can run end to end without a device.
//!
//! # Example
//!
//! ```rust,ignore
//! use corecheck_core::testing::{fixtures, MockCore, MockMarketplace};
//!
//! let marketplace = Arc::new(MockMarketplace::new());
//! marketplace.add_user("dev@example.com", "pw", "dev").await;
//! marketplace.add_tickets(4).await;
//!
//! let core = Arc::new(MockCore::with_marketplace(marketplace.clone()));
//! fixtures::preinstall_system_apps(&core).await;
//! ```

mod mock_core;
mod mock_marketplace;

pub use mock_core::MockCore;
pub use mock_marketplace::MockMarketplace;

/// Test fixtures and helper functions.
pub mod fixtures {
    use super::MockCore;
    use crate::config::ScenarioConfig;
    use crate::core_client::{AppKey, InstanceStatus};

    pub const USERNAME: &str = "dev@example.com";
    pub const PASSWORD: &str = "secret";
    pub const USER_LOGIN: &str = "dev";

    /// Version every preinstalled system app reports.
    pub const SYSTEM_APP_VERSION: &str = "4.0.0";

    pub fn mosquitto() -> AppKey {
        AppKey::new("org.mosquitto.broker", "2.0.15-openssl")
    }

    /// The default user app set.
    pub fn user_apps() -> Vec<AppKey> {
        ScenarioConfig::default().user_app_keys()
    }

    pub fn system_app_names() -> Vec<String> {
        ScenarioConfig::default().system_apps
    }

    /// Install each default system app with one running instance, as a
    /// freshly flashed device has them.
    pub async fn preinstall_system_apps(core: &MockCore) {
        for name in system_app_names() {
            let key = AppKey::new(name, SYSTEM_APP_VERSION);
            core.install_directly(&key).await;
            core.add_instance(&key, InstanceStatus::Running).await;
        }
    }
}
