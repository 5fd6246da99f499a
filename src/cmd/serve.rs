//! Gateway server command: `pipedeck serve`.

use anyhow::Result;

use pipedeck::config::DeckConfig;
use pipedeck::gateway::server;
use pipedeck::telemetry;

pub async fn cmd_serve(
    project_dir: &std::path::Path,
    verbose: bool,
    host: Option<String>,
    port: Option<u16>,
    dev: bool,
) -> Result<()> {
    let config = DeckConfig::with_cli_args(project_dir.to_path_buf(), verbose, host, port, dev)?;
    telemetry::init(&config.toml.logging, config.verbose)?;

    for warning in config.validate() {
        tracing::warn!("config: {}", warning);
    }

    server::start_server(&config).await
}
