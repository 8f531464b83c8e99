mod cli;
mod config;
mod mcp;
mod oracle;
mod tools;

use anyhow::{Context, Result};
use cli::{Cli, Commands};
use colored::*;
use config::Config;
use mcp::server::McpServer;
use oracle::OracleClient;
use serde_json::{Value, json};
use tools::ToolRegistry;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());
    let cfg = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let registry = registry_from_config(&cfg)?;
            let server_info = cfg.server().info();
            info!(name = %server_info.name, version = %server_info.version, "MCP server running on stdio");
            McpServer::new(server_info, registry).serve_stdio().await?;
        }
        Commands::Price => {
            let registry = registry_from_config(&cfg)?;
            let tool = registry
                .get(tools::uco_price::TOOL_NAME)
                .context("price tool not registered")?;
            let output = tool.call(&Value::Null).await;
            let text = output.first_text().unwrap_or_default();
            if output.is_error {
                eprintln!("{}", text.red());
                std::process::exit(1);
            }
            println!("{}", text);
        }
        Commands::Tools => {
            let registry = registry_from_config(&cfg)?;
            let specs: Vec<Value> = registry
                .list()
                .into_iter()
                .map(|s| {
                    json!({
                        "name": s.name,
                        "description": s.description,
                        "inputSchema": s.parameters,
                        "readOnly": s.read_only,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&specs)?);
        }
        Commands::ConfigPath => {
            println!("{}", Config::default_path()?.display());
        }
        Commands::InitConfig => {
            let path = Config::write_example_if_absent()?;
            println!("{} {}", "Wrote example config to".bold(), path.display());
        }
    }

    Ok(())
}

fn registry_from_config(cfg: &Config) -> Result<ToolRegistry> {
    let oracle_cfg = cfg.oracle();
    let client = OracleClient::from_config(&oracle_cfg).context("building oracle HTTP client")?;
    info!(endpoint = client.endpoint(), timeout = ?oracle_cfg.effective_timeout(), "oracle configured");
    Ok(ToolRegistry::with_default(client))
}

/// Logs go to stderr; stdout carries protocol traffic.
fn init_logging(level: Option<&str>) {
    let filter = level
        .map(EnvFilter::new)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
