//! `rflinkproxy`: share one RFLink gateway between many TCP clients.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rflink_client::{Endpoint, DEFAULT_BAUD};
use rflink_proxy::{ProxyConfig, ProxyError, ProxyResult};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rflinkproxy")]
#[command(about = "Relay between RFLink gateway and TCP clients")]
#[command(version)]
struct Args {
    /// YAML configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to listen on for clients
    #[arg(long = "listenport")]
    listen_port: Option<u16>,

    /// Serial port, or TCP port when --host is given
    #[arg(long)]
    port: Option<String>,

    /// TCP mode, connect to this host
    #[arg(long)]
    host: Option<String>,

    /// Serial baud rate
    #[arg(long)]
    baud: Option<u32>,

    /// How many times each client command is sent to the gateway
    #[arg(long)]
    repeat: Option<u32>,

    /// Serve Prometheus metrics on this address
    #[cfg(feature = "prometheus")]
    #[arg(long)]
    metrics_addr: Option<std::net::SocketAddr>,

    /// Increase logging verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn load_config(&self) -> ProxyResult<ProxyConfig> {
        let mut config = match &self.config {
            Some(path) => ProxyConfig::from_yaml_file(path)?,
            None => ProxyConfig::default(),
        };

        if let Some(port) = self.listen_port {
            config.listen_port = port;
        }
        if let Some(repeat) = self.repeat {
            config.repeat = repeat;
        }

        match (&self.host, &self.port) {
            (Some(host), Some(port)) => {
                let port = port
                    .parse()
                    .map_err(|_| ProxyError::Config(format!("invalid TCP port: {}", port)))?;
                config.endpoint = Endpoint::tcp(host, port);
            }
            (Some(_), None) => {
                return Err(ProxyError::Config("--host requires --port".to_string()));
            }
            (None, Some(path)) => {
                config.endpoint = Endpoint::Serial {
                    path: path.clone(),
                    baud: self.baud.unwrap_or(DEFAULT_BAUD),
                };
            }
            (None, None) => {
                if let (Some(baud), Endpoint::Serial { baud: current, .. }) =
                    (self.baud, &mut config.endpoint)
                {
                    *current = baud;
                }
            }
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "error",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    #[cfg(feature = "prometheus")]
    if let Some(addr) = args.metrics_addr {
        if let Err(e) = rflink_metrics::install_prometheus(addr) {
            error!("failed to start metrics exporter: {}", e);
            return ExitCode::FAILURE;
        }
    }

    let (stop_tx, mut stop_rx) = tokio::sync::mpsc::unbounded_channel();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    }) {
        error!("failed to install Ctrl-C handler: {}", e);
        return ExitCode::FAILURE;
    }

    let relay = match rflink_proxy::start(config).await {
        Ok(relay) => relay,
        Err(e) => {
            error!("failed to start relay: {}", e);
            return ExitCode::FAILURE;
        }
    };

    stop_rx.recv().await;
    info!("interrupted");
    relay.shutdown().await;
    ExitCode::SUCCESS
}
