use case_rush::{
    catalog::CaseCatalog,
    deployment::DeploymentEnv,
    history::ANONYMOUS_USER,
    roll::DEFAULT_REEL_LENGTH,
    session::SessionSettings,
};
use clap::{
    ArgGroup,
    Parser,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use std::{
    path::PathBuf,
    time::Duration,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};

mod client;
mod ui;

const DEFAULT_DATA_DIR: &str = "~/.case-rush";
const LOG_FILE: &str = "case-rush.log";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Open cases in the terminal, in demo mode or against a BSC case contract",
    long_about = None,
    group(
        ArgGroup::new("network")
            .args(["demo", "local", "testnet", "mainnet"])
            .required(false)
    )
)]
struct Args {
    /// Local rolls only, no ledger (default)
    #[arg(long)]
    demo: bool,

    /// In-process simulated ledger
    #[arg(long)]
    local: bool,

    /// BSC testnet (chain 97)
    #[arg(long)]
    testnet: bool,

    /// BSC mainnet (chain 56)
    #[arg(long)]
    mainnet: bool,

    /// Case catalog document; the bundled Rush Case is used when omitted
    #[arg(long)]
    catalog: Option<PathBuf>,

    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    data_dir: String,

    /// Player address; also the name shown on the leaderboard
    #[arg(long, default_value = ANONYMOUS_USER)]
    address: String,

    /// Override the gateway URL from the deployment record
    #[arg(long)]
    gateway_url: Option<String>,

    /// Override the contract address from the deployment record
    #[arg(long)]
    contract: Option<String>,

    #[arg(long, default_value_t = DEFAULT_REEL_LENGTH)]
    reel_length: usize,

    /// Length of the reveal animation
    #[arg(long, default_value_t = 8)]
    spin_secs: u64,

    /// Wait after `openCase` before reading the inventory back
    #[arg(long, default_value_t = 2000)]
    settle_ms: u64,

    /// Log to stderr instead of the rolling log file
    #[arg(long, default_value = "false")]
    log_stderr: bool,
}

impl Args {
    fn network(&self) -> client::Network {
        if self.local {
            client::Network::Local
        } else if self.testnet {
            client::Network::Remote(DeploymentEnv::Testnet)
        } else if self.mainnet {
            client::Network::Remote(DeploymentEnv::Mainnet)
        } else {
            client::Network::Demo
        }
    }

    fn into_config(self) -> Result<client::AppConfig> {
        if self.reel_length == 0 {
            return Err(eyre!("--reel-length must be at least 1"));
        }
        let network = self.network();
        let data_dir = PathBuf::from(
            shellexpand::tilde(&self.data_dir).into_owned(),
        );
        let catalog = match &self.catalog {
            Some(path) => CaseCatalog::load(path)
                .wrap_err_with(|| format!("loading catalog {}", path.display()))?,
            None => CaseCatalog::bundled().wrap_err("loading bundled catalog")?,
        };
        Ok(client::AppConfig {
            network,
            catalog,
            data_dir,
            address: self.address,
            gateway_url: self.gateway_url,
            contract: self.contract,
            settings: SessionSettings {
                reel_length: self.reel_length,
                spin_duration: Duration::from_secs(self.spin_secs),
            },
            settle_delay: Duration::from_millis(self.settle_ms),
        })
    }
}

fn init_tracing(data_dir: &std::path::Path, to_stderr: bool) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if to_stderr {
        let _ = fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
        return None;
    }
    let appender = rolling::daily(data_dir.join("logs"), LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(writer)
        .try_init();
    Some(guard)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let log_stderr = args.log_stderr;
    let config = args.into_config()?;
    let _guard = init_tracing(&config.data_dir, log_stderr);
    tracing::info!(network = %config.network, "starting case-rush");
    client::run_app(config).await
}
