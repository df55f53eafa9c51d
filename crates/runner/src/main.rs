mod metrics;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use corecheck_core::{
    load_config, load_config_from_env, resolve_credentials, run_scenario, validate_config,
    AppProbe, Config, CoreApi, HttpCoreClient, HttpMarketplace, Marketplace, PollConfig,
    Profile, RunSummary, SanitizedConfig, Workflow,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_CONFIG_PATH: &str = "corecheck.toml";

#[tokio::main]
async fn main() {
    match run().await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("Fatal error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Returns whether every scenario passed.
async fn run() -> Result<bool> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("corecheck v{}", VERSION);

    let profile = Profile::from_env();
    let config = load(profile)?;
    validate_config(&config).context("Configuration validation failed")?;

    let sanitized = SanitizedConfig::from(&config);
    info!(profile = ?profile, "Configuration loaded successfully");
    info!(
        "Effective configuration: {}",
        serde_json::to_string(&sanitized).unwrap_or_default()
    );

    let credentials = resolve_credentials(profile).context("Marketplace credentials missing")?;

    let marketplace: Arc<dyn Marketplace> = Arc::new(
        HttpMarketplace::new(config.marketplace.clone())
            .context("Failed to create marketplace client")?,
    );
    let session = marketplace
        .authenticate(&credentials.username, &credentials.password)
        .await
        .context("Marketplace authentication failed")?;
    info!(user = %session.user_login, "Authenticated against marketplace");

    let core: Arc<dyn CoreApi> = Arc::new(
        HttpCoreClient::new(config.core.clone(), &config.webapp)
            .context("Failed to create core client")?,
    );
    info!("Using core backend: {}", core.name());

    let workflow = Workflow::new(
        session,
        marketplace,
        core,
        PollConfig::from(&config.polling),
        config.assertions.clone(),
    )
    .with_probe_timeout(Duration::from_secs(config.core.timeout_secs as u64));

    let summary = run_scenarios(&workflow, &config).await;

    println!("{}", summary.render());
    export_metrics();

    Ok(summary.all_passed())
}

/// Configuration file from `CORECHECK_CONFIG`, else `corecheck.toml` when
/// present, else profile defaults and environment only.
fn load(profile: Profile) -> Result<Config> {
    match std::env::var("CORECHECK_CONFIG") {
        Ok(path) => {
            let path = PathBuf::from(path);
            info!("Loading configuration from {:?}", path);
            load_config(&path, profile)
                .with_context(|| format!("Failed to load config from {:?}", path))
        }
        Err(_) => {
            let path = PathBuf::from(DEFAULT_CONFIG_PATH);
            if path.exists() {
                info!("Loading configuration from {:?}", path);
                load_config(&path, profile)
                    .with_context(|| format!("Failed to load config from {:?}", path))
            } else {
                info!("No configuration file, using defaults and environment");
                load_config_from_env(profile).context("Failed to load config from environment")
            }
        }
    }
}

async fn run_scenarios(workflow: &Workflow, config: &Config) -> RunSummary {
    let scenarios = &config.scenarios;
    let user_apps = scenarios.user_app_keys();
    let mut summary = RunSummary::default();

    run_scenario(&mut summary, "check_version", workflow.check_version()).await;
    run_scenario(
        &mut summary,
        "check_system_apps",
        workflow.check_system_apps(&scenarios.system_apps),
    )
    .await;
    run_scenario(&mut summary, "forward_login", workflow.forward_login()).await;

    let installed = run_scenario(&mut summary, "install_set", workflow.install_set(&user_apps))
        .await
        .is_some();

    if installed {
        if let Some(report) = run_scenario(
            &mut summary,
            "create_and_start",
            workflow.create_and_start(&user_apps),
        )
        .await
        {
            for (app, result) in report.failed_creates() {
                warn!(app = %app, code = result.code, message = %result.message, "Instance not created");
            }
        }

        run_scenario(
            &mut summary,
            "open_apps",
            workflow.open_apps(
                &AppProbe::for_user_apps(scenarios),
                Duration::from_secs(scenarios.instance_settle_secs),
            ),
        )
        .await;

        run_scenario(&mut summary, "uninstall_set", workflow.uninstall_set(&user_apps)).await;
    } else {
        warn!("Skipping instance and uninstall scenarios: install_set did not pass");
    }

    run_scenario(
        &mut summary,
        "export_import_cycle",
        workflow.export_import_cycle(&user_apps, &[]),
    )
    .await;

    summary
}

/// Write the metrics text to `CORECHECK_METRICS_PATH`, or log it.
fn export_metrics() {
    let text = metrics::encode_metrics();
    match std::env::var("CORECHECK_METRICS_PATH") {
        Ok(path) => match std::fs::write(&path, &text) {
            Ok(()) => info!("Metrics written to {}", path),
            Err(e) => warn!("Failed to write metrics to {}: {}", path, e),
        },
        Err(_) => info!("Run metrics:\n{}", text),
    }
}
