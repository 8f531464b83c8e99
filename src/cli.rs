use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "uco-price-mcp", author, version, about = "MCP server for the Archethic UCO price oracle", long_about = None)]
pub struct Cli {
    /// Optional path to a config file (toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log filter, e.g. "debug" or "uco_price_mcp=trace" (defaults to RUST_LOG, then info)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum Commands {
    /// Serve the getUcoPrice tool over stdio (default)
    Serve,
    /// Fetch the UCO price once and print it
    Price,
    /// Print the registered tool specs as JSON
    Tools,
    /// Print the default config path
    ConfigPath,
    /// Create an example config file if missing
    InitConfig,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
