//! `rflink`: monitor an RFLink gateway or send a single command.
//!
//! ```text
//! rflink -v                                  print events
//! rflink -m print --host rflink.local -p 1234
//! rflink --ignore 'kaku_*,oregon*' --json
//! rflink --repeat 3 on newkaku_000001_01
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use rflink_client::{
    connect, ClientError, ClientResult, CommandOutcome, Connection, ConnectionConfig, Endpoint,
    Handlers, IgnoreList, DEFAULT_BAUD,
};
use rflink_protocol::Event;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// What to do with incoming packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Print every decoded packet.
    Print,
    /// Print events.
    Event,
    /// Answer every switch event with the opposite command.
    Invert,
    /// Send every switch event again.
    Repeat,
}

/// Commands that can be sent to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Action {
    On,
    Off,
    Allon,
    Alloff,
    Up,
    Down,
    Stop,
    Pair,
}

impl Action {
    fn as_str(&self) -> &'static str {
        match self {
            Action::On => "on",
            Action::Off => "off",
            Action::Allon => "allon",
            Action::Alloff => "alloff",
            Action::Up => "up",
            Action::Down => "down",
            Action::Stop => "stop",
            Action::Pair => "pair",
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "rflink")]
#[command(about = "Command line interface for RFLink gateways")]
#[command(version)]
struct Args {
    /// Command to send; monitors incoming packets when omitted
    #[arg(value_enum, requires = "id")]
    action: Option<Action>,

    /// Device id to send the command to, e.g. newkaku_000001_01
    id: Option<String>,

    /// Serial port, or TCP port when --host is given
    #[arg(short, long, default_value = "/dev/ttyACM0")]
    port: String,

    /// TCP mode, connect to this host instead of a serial port
    #[arg(long)]
    host: Option<String>,

    /// Serial baud rate
    #[arg(long, default_value_t = DEFAULT_BAUD)]
    baud: u32,

    /// How often to send a command
    #[arg(long, default_value_t = 1)]
    repeat: u32,

    /// How to handle incoming packets
    #[arg(short = 'm', value_enum, default_value = "event")]
    mode: Mode,

    /// Comma separated device ids to ignore; a trailing * matches a prefix
    #[arg(long)]
    ignore: Option<String>,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,

    /// Increase logging verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn endpoint(&self) -> Result<Endpoint, String> {
        match &self.host {
            Some(host) => {
                let port = self
                    .port
                    .parse()
                    .map_err(|_| format!("invalid TCP port: {}", self.port))?;
                Ok(Endpoint::tcp(host, port))
            }
            None => Ok(Endpoint::Serial {
                path: self.port.clone(),
                baud: self.baud,
            }),
        }
    }

    fn connection_config(&self) -> ConnectionConfig {
        let ignore = self
            .ignore
            .as_deref()
            .map(IgnoreList::from_comma_separated)
            .unwrap_or_default();
        ConnectionConfig::default().with_ignore(ignore)
    }
}

/// The command to answer a switch event with in invert mode: `on` turns
/// into `off`, everything else into `on`.
fn inverted(command: &str) -> &'static str {
    if command.eq_ignore_ascii_case("on") {
        "off"
    } else {
        "on"
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

// ============================================================================
// Command mode
// ============================================================================

async fn send_command(
    endpoint: &Endpoint,
    config: ConnectionConfig,
    device_id: &str,
    action: Action,
    repeat: u32,
) -> ClientResult<CommandOutcome> {
    let conn = connect(endpoint, Handlers::new().without_events(), config).await?;

    let mut outcome = CommandOutcome::Timeout;
    for attempt in 0..repeat.max(1) {
        debug!("sending {} to {} (attempt {})", action.as_str(), device_id, attempt + 1);
        outcome = conn.send_command_ack(device_id, action.as_str()).await?;
    }
    conn.close().await;
    Ok(outcome)
}

// ============================================================================
// Monitor modes
// ============================================================================

fn monitor_handlers(args: &Args, events: mpsc::UnboundedSender<Event>) -> Handlers {
    match args.mode {
        Mode::Print => Handlers::new().without_events().on_packet(|packet| println!("{:?}", packet)),
        Mode::Event if args.json => Handlers::new().on_event(|event| {
            match serde_json::to_string(&event) {
                Ok(json) => println!("{}", json),
                Err(e) => warn!("failed to serialize {}: {}", event.id(), e),
            }
        }),
        Mode::Event => Handlers::new().print_events(),
        Mode::Invert | Mode::Repeat => Handlers::new().on_event(move |event| {
            let _ = events.send(event);
        }),
    }
}

/// Answer switch events in invert and repeat modes.
async fn respond_to_events(conn: Arc<Connection>, mode: Mode, mut events: mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = events.recv().await {
        let Some(command) = event.command() else {
            continue;
        };
        let response = match mode {
            Mode::Invert => inverted(command).to_string(),
            _ => command.to_string(),
        };

        info!("{} {} -> {}", event.id(), command, response);
        match conn.send_command_ack(event.id(), &response).await {
            Ok(outcome) if !outcome.is_ok() => warn!("{} {}: {}", event.id(), response, outcome),
            Ok(_) => {}
            Err(e) => {
                warn!("{} {}: {}", event.id(), response, e);
                if conn.is_closed() {
                    break;
                }
            }
        }
    }
}

async fn monitor(args: &Args, endpoint: &Endpoint) -> ClientResult<()> {
    let (disconnect_tx, mut disconnected) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (stop_tx, mut stop) = mpsc::unbounded_channel();

    if let Err(e) = ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    }) {
        warn!("failed to install Ctrl-C handler: {}", e);
    }

    let handlers = monitor_handlers(args, event_tx).on_disconnect(move |err| {
        let _ = disconnect_tx.send(err);
    });
    let conn = connect(endpoint, handlers, args.connection_config()).await?;
    info!("connected to {}", endpoint);

    let responder = tokio::spawn(respond_to_events(conn.clone(), args.mode, event_rx));

    let result = tokio::select! {
        // the gateway going away is a failure even without an error
        err = disconnected.recv() => match err.flatten() {
            Some(e) => Err(e.into()),
            None => Err(ClientError::Disconnected),
        },
        _ = stop.recv() => {
            info!("interrupted");
            conn.close().await;
            Ok(())
        }
    };
    responder.abort();
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let endpoint = match args.endpoint() {
        Ok(endpoint) => endpoint,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match (&args.action, &args.id) {
        (Some(action), Some(id)) => {
            match send_command(&endpoint, args.connection_config(), id, *action, args.repeat).await {
                Ok(outcome) => {
                    info!("{} {}: {}", id, action.as_str(), outcome);
                    if outcome.is_ok() {
                        ExitCode::SUCCESS
                    } else {
                        ExitCode::FAILURE
                    }
                }
                Err(e) => {
                    error!("{}", e);
                    ExitCode::FAILURE
                }
            }
        }
        _ => match monitor(&args, &endpoint).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("{}", e);
                ExitCode::FAILURE
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_arguments() {
        let args = Args::try_parse_from(["rflink", "--repeat", "3", "on", "newkaku_000001_01"]).unwrap();
        assert_eq!(args.action, Some(Action::On));
        assert_eq!(args.id.as_deref(), Some("newkaku_000001_01"));
        assert_eq!(args.repeat, 3);
        assert_eq!(args.endpoint().unwrap(), Endpoint::serial("/dev/ttyACM0"));

        // an action needs a device id
        assert!(Args::try_parse_from(["rflink", "off"]).is_err());
        assert!(Args::try_parse_from(["rflink", "toggle", "kaku_000041_1"]).is_err());
    }

    #[test]
    fn test_monitor_arguments() {
        let args = Args::try_parse_from([
            "rflink", "-vv", "-m", "invert", "--host", "rflink.local", "-p", "1234", "--ignore",
            "kaku_*,oregon_temp",
        ])
        .unwrap();
        assert_eq!(args.action, None);
        assert_eq!(args.mode, Mode::Invert);
        assert_eq!(args.verbose, 2);
        assert_eq!(args.endpoint().unwrap(), Endpoint::tcp("rflink.local", 1234));

        let config = args.connection_config();
        assert!(config.ignore.matches("kaku_000041_1"));
        assert!(config.ignore.matches("oregon_temp"));
        assert!(!config.ignore.matches("oregon_temp2"));

        let args = Args::try_parse_from(["rflink", "--host", "rflink.local", "-p", "ttyACM0"]).unwrap();
        assert!(args.endpoint().is_err());
    }

    #[test]
    fn test_inverted() {
        assert_eq!(inverted("on"), "off");
        assert_eq!(inverted("ON"), "off");
        assert_eq!(inverted("off"), "on");
        assert_eq!(inverted("allon"), "on");
        assert_eq!(inverted("down"), "on");
    }
}
