//! Wiring from configuration to a running engine.

use crate::agent::{LoopSettings, ToolCallingLoop};
use crate::config::TroubleshooterConfig;
use crate::events::EventEmitter;
use crate::inference::{
    HttpConnectivityProbe, OpenAiCompatibleClient, ProviderRouter, RemoteProvider,
    ResilientExecutor,
};
use crate::tools::{ProbeCatalog, ToolRegistry};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Build the tool registry from the probe catalog for the host OS.
pub fn build_registry(config: &TroubleshooterConfig, events: EventEmitter) -> Result<ToolRegistry> {
    let catalog_path = config.resolved_probes_file();
    let catalog = ProbeCatalog::load(Path::new(&catalog_path))?;

    let mut registry = ToolRegistry::new(events).with_default_timeout(config.tool_timeout());
    let registered = catalog
        .register_for_os(
            &mut registry,
            std::env::consts::OS,
            &config.resolved_probes_dir(),
        )
        .context("Failed to register probes")?;
    if registered == 0 {
        warn!("No probes available for {}", std::env::consts::OS);
    }
    Ok(registry)
}

/// Build provider clients and the connectivity probe.
///
/// Credentials are resolved here, once; a remote without one stays in the
/// list but is never selected.
pub fn build_router(config: &TroubleshooterConfig) -> ProviderRouter {
    let remotes = config
        .providers
        .iter()
        .map(|p| {
            let credential = p.resolve_credential();
            if credential.is_none() {
                info!("Provider {} has no credential; it will be skipped", p.id);
            }
            RemoteProvider {
                has_credential: credential.is_some(),
                client: Arc::new(OpenAiCompatibleClient::new(
                    &p.id,
                    &p.base_url,
                    credential,
                    &p.model,
                    p.timeout(),
                )),
            }
        })
        .collect();

    let local = Arc::new(OpenAiCompatibleClient::new(
        &config.local.id,
        &config.local.base_url,
        None,
        &config.local.model,
        config.local.timeout(),
    ));
    let connectivity = Arc::new(HttpConnectivityProbe::new(
        &config.connectivity.url,
        Duration::from_millis(config.connectivity.timeout_ms),
    ));

    ProviderRouter::new(remotes, local, connectivity)
}

pub fn loop_settings(config: &TroubleshooterConfig) -> LoopSettings {
    LoopSettings {
        max_iterations: config.max_iterations.max(1),
        max_tokens: config.max_tokens_per_turn,
        history_window: config.history_window.max(1),
        operator_notes: config.operator_notes().map(str::to_string),
    }
}

/// Assemble the tool-calling loop for `config`.
pub fn build_engine(config: &TroubleshooterConfig, events: EventEmitter) -> Result<ToolCallingLoop> {
    let registry = build_registry(config, events)?;
    Ok(ToolCallingLoop::new(
        Arc::new(registry),
        Arc::new(build_router(config)),
        ResilientExecutor::new(config.retry_policy()),
        loop_settings(config),
    ))
}
