//! Workflow scenarios against the core daemon.
//!
//! Scenarios compose core client calls and job waits into ordered steps
//! with post-condition checks:
//! - **install_set**: one ticket per app, bulk-wait, ticket delta
//! - **create_and_start**: create an instance per app, then start it
//! - **uninstall_set**: bulk uninstall, app list shrinks by the batch
//! - **export_import_cycle**: export, uninstall, import, apps are back
//!
//! Only a `successful` job lets a dependent step run.

mod runner;
mod types;

pub use runner::{run_scenario, Workflow};
pub use types::{
    AppProbe, CycleReport, InstallReport, InstanceStart, RunSummary, ScenarioError,
    ScenarioRecord, StartOutcome, StartReport, UninstallReport,
};
