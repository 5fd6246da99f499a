//! Configuration view and validation commands: `pipedeck config`.

use anyhow::Result;

use pipedeck::config::{
    ANALYZER_SCRIPT, BackendSection, CONFIG_DIR, CONFIG_FILE, DeckConfig, DeckToml,
    OPTIMIZER_SCRIPT,
};

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    let config_dir = project_dir.join(CONFIG_DIR);
    let config_path = config_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Pipedeck Configuration");
            println!("======================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                DeckToml::load(&config_path)?
            } else {
                println!("No pipedeck.toml found at {}", config_path.display());
                println!("Using default configuration.");
                DeckToml::default()
            };
            println!();

            println!("[server]");
            println!("  host = \"{}\"", toml.server.host);
            println!("  port = {}", toml.server.port);
            println!("  max_body_bytes = {}", toml.server.max_body_bytes);
            println!("  cors_permissive = {}", toml.server.cors_permissive);
            println!("  diagnostics = \"{}\"", toml.server.diagnostics);
            println!();

            print_backend("analyzer", &toml.analyzer, ANALYZER_SCRIPT);
            print_backend("optimizer", &toml.optimizer, OPTIMIZER_SCRIPT);

            println!("[logging]");
            println!("  level = \"{}\"", toml.logging.level);
            println!("  format = \"{}\"", toml.logging.format);
            println!();

            // Effective values (including env overrides)
            println!("Effective values (with env overrides):");
            let config = DeckConfig::new(project_dir.to_path_buf())?;
            println!(
                "  listen = {}:{}",
                config.toml.server.host, config.toml.server.port
            );
            println!("  analyzer = {}", config.analyzer_spec().command_line());
            println!("  optimizer = {}", config.optimizer_spec().command_line());
            println!();

            if !config_path.exists() {
                println!("Run 'pipedeck config init' to create a pipedeck.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No pipedeck.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = DeckToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("pipedeck.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !config_dir.exists() {
                std::fs::create_dir_all(&config_dir)?;
            }

            let toml = DeckToml::default();
            toml.save(&config_path)?;

            println!("Created pipedeck.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] host, port, max_body_bytes, diagnostics");
            println!("  - [analyzer] / [optimizer] command, args, timeout_secs, engine");
            println!("  - [logging] level, format");
            println!();
        }
    }

    Ok(())
}

/// Print one backend section with its command and args resolved.
fn print_backend(name: &str, section: &BackendSection, default_script: &str) {
    println!("[{}]", name);
    println!("  engine = \"{}\"", section.engine);
    println!("  command = \"{}\"", section.command());
    println!("  args = {:?}", section.resolved_args(default_script));
    if let Some(dir) = &section.working_dir {
        println!("  working_dir = \"{}\"", dir.display());
    }
    if let Some(secs) = section.timeout_secs {
        println!("  timeout_secs = {}", secs);
    }
    println!("  max_output_bytes = {}", section.max_output_bytes);
    println!();
}
