pub mod config;
pub mod core_client;
pub mod marketplace;
pub mod metrics;
pub mod poller;
pub mod testing;
pub mod tickets;
pub mod verify;
pub mod workflow;

pub use config::{
    load_config, load_config_from_env, load_config_from_str, resolve_credentials,
    validate_config, AssertionConfig, Config, ConfigError, CoreConfig, Credentials,
    InstallPayloadShape, MarketplaceConfig, PollingConfig, Profile, SanitizedConfig,
    ScenarioConfig, TicketMode, UserApp, VersionMode, WebappConfig,
};
pub use core_client::{
    App, AppKey, AppStatus, CoreApi, CoreError, HttpCoreClient, ImportOutcome, Instance,
    InstanceStatus, Job, JobId, JobResult, JobStatus,
};
pub use marketplace::{AuthError, HttpMarketplace, Marketplace, MarketplaceError, Session, Ticket};
pub use poller::{JobOutcome, JobPoller, PollConfig, PollError};
pub use tickets::{TicketError, TicketLedger};
pub use verify::AssertionFailure;
pub use workflow::{
    run_scenario, AppProbe, CycleReport, InstallReport, InstanceStart, RunSummary, ScenarioError,
    ScenarioRecord, StartOutcome, StartReport, UninstallReport, Workflow,
};
