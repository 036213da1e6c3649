use std::path::PathBuf;
use std::process;

use clap::Parser;
use unseal_broker::{BrokerConfig, ConfigOverrides, LogFormat, telemetry};

#[derive(Parser)]
#[command(name = "unseal-broker", version, about = "Transit encryption and token broker")]
struct BrokerArgs {
    /// TOML config file
    #[arg(long, env = "UNSEAL_CONFIG")]
    config: Option<PathBuf>,
    /// Bind host (IP address)
    #[arg(long)]
    host: Option<String>,
    /// Bind port
    #[arg(long)]
    port: Option<u16>,
    /// `json` or `standard`
    #[arg(long)]
    log_format: Option<LogFormat>,
    /// Log filter, e.g. `info` or `unseal_core=debug`
    #[arg(long)]
    log_level: Option<String>,
    /// Fixed id for the bootstrap root token
    #[arg(long)]
    root_token: Option<String>,
    /// Print the resolved config before starting
    #[arg(long)]
    verbose: bool,
}

impl BrokerArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            host: self.host.clone(),
            port: self.port,
            log_format: self.log_format,
            log_level: self.log_level.clone(),
            root_token: self.root_token.clone(),
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = real_main().await {
        eprintln!("broker exited with error: {err:#}");
        process::exit(1);
    }
}

async fn real_main() -> anyhow::Result<()> {
    let args = BrokerArgs::parse();
    let config = BrokerConfig::load(args.config.as_deref(), &args.overrides())?;
    if args.verbose {
        println!("config loaded: {config:?}");
    }
    telemetry::init(config.log_format, &config.log_level)?;
    unseal_broker::run(config).await
}
