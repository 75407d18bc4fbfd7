//! Application wiring: builds the production orchestrator from configuration.
//!
//! Adding a collaborator means one field change in the context and one line
//! here; no command signature changes.

use anyhow::{Context, Result};

use crate::application::context::OrchestratorContext;
use crate::application::orchestrator::Orchestrator;
use crate::application::services::render_serializer::RenderSerializer;
use crate::domain::config::{LeaseConfig, Settings};
use crate::infra::clock::SystemClock;
use crate::infra::panel_file::FilePanelPublisher;
use crate::infra::provider::HttpProvider;
use crate::infra::state::JsonPanelStateStore;
use crate::output::{OutputContext, TerminalNotifier};

/// The orchestrator as the `serve` command runs it.
pub type ProductionOrchestrator =
    Orchestrator<HttpProvider, TerminalNotifier, SystemClock, FilePanelPublisher, JsonPanelStateStore>;

/// Validate `config` and assemble the production collaborators.
///
/// Settings are validated before the API key is read, so a missing
/// firewall group id is reported even when no key is configured.
///
/// # Errors
///
/// Returns an error for invalid settings, a missing API key, or an
/// undeterminable home directory.
pub fn build(config: &LeaseConfig, output: OutputContext) -> Result<ProductionOrchestrator> {
    let settings = Settings::from_config(config)?;
    let provider = HttpProvider::from_env(&config.provider.api_url).context("cannot create provider client")?;

    let panel_dir = match &config.panel.dir {
        Some(dir) => dir.clone(),
        None => FilePanelPublisher::default_dir()?,
    };
    let store = match &config.panel.state_file {
        Some(path) => JsonPanelStateStore::with_path(path.clone()),
        None => JsonPanelStateStore::new()?,
    };

    let ctx = OrchestratorContext::new(provider, TerminalNotifier::new(output), SystemClock, settings);
    let panel = RenderSerializer::new(FilePanelPublisher::new(panel_dir), store);
    Ok(Orchestrator::new(ctx, panel))
}
