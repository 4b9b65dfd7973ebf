//! Headless Presence Client
//!
//! Joins a presence server as a wandering bot and logs every participant
//! that appears, moves, or leaves.
//!
//! Usage:
//!   presence-client [--url <ws-url>] [--name <name>] [--contact <text>]
//!
//! Examples:
//!   presence-client
//!   presence-client --url ws://127.0.0.1:3000 --name Scout
//!   presence-client --name Scout --speed 4 --radius 10

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use presence_core::client::headless::{HeadlessVisuals, LoggingSink, WanderingMovement};
use presence_core::client::PresenceClient;
use presence_core::config::ClientConfig;
use presence_core::protocol::ParticipantId;
use presence_core::VERSION;

/// CLI arguments, applied over the loaded configuration
#[derive(Default)]
struct Args {
    /// Server URL override
    url: Option<String>,
    /// Display name override
    name: Option<String>,
    /// Contact override
    contact: Option<String>,
    /// Walking speed in units per second
    speed: f64,
    /// Distance from the origin the bot stays within
    radius: f64,
    /// Simulated asset load delay
    load_delay_ms: u64,
    /// Verbose output
    verbose: bool,
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = std::env::args().collect();

    let mut parsed = Args {
        speed: 2.0,
        radius: 20.0,
        load_delay_ms: 50,
        ..Default::default()
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--url" | "-u" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for --url".to_string());
                }
                parsed.url = Some(args[i].clone());
            }
            "--name" | "-n" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for --name".to_string());
                }
                parsed.name = Some(args[i].clone());
            }
            "--contact" | "-c" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for --contact".to_string());
                }
                parsed.contact = Some(args[i].clone());
            }
            "--speed" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for --speed".to_string());
                }
                parsed.speed = args[i]
                    .parse()
                    .map_err(|_| format!("Invalid speed value: {}", args[i]))?;
            }
            "--radius" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for --radius".to_string());
                }
                parsed.radius = args[i]
                    .parse()
                    .map_err(|_| format!("Invalid radius value: {}", args[i]))?;
            }
            "--load-delay-ms" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for --load-delay-ms".to_string());
                }
                parsed.load_delay_ms = args[i]
                    .parse()
                    .map_err(|_| format!("Invalid load delay: {}", args[i]))?;
            }
            "--verbose" | "-v" => {
                parsed.verbose = true;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            arg => {
                return Err(format!("Unknown argument: {}", arg));
            }
        }
        i += 1;
    }

    Ok(parsed)
}

fn print_help() {
    println!(
        r#"
Headless Presence Client v{}

Joins a presence server as a wandering bot.

USAGE:
    presence-client [OPTIONS]

OPTIONS:
    -u, --url <URL>          Server WebSocket URL (default from config)
    -n, --name <NAME>        Display name to announce
    -c, --contact <TEXT>     Contact string to announce
        --speed <N>          Walking speed in units per second (default: 2)
        --radius <N>         Stay within this distance of the origin (default: 20)
        --load-delay-ms <N>  Simulated instantiation delay (default: 50)
    -v, --verbose            Enable verbose output
    -h, --help               Print this help message

ENVIRONMENT:
    PRESENCE_CLIENT_CONFIG   Config file path (default: config/client.toml)
    PRESENCE_SERVER_URL      Server URL
    PRESENCE_NAME            Display name
    PRESENCE_CONTACT         Contact string
"#,
        VERSION
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    init_logging(args.verbose);

    let mut config = ClientConfig::load().await?;
    if let Some(url) = args.url {
        config.server_url = url;
    }
    if let Some(name) = args.name {
        config.name = name;
    }
    if let Some(contact) = args.contact {
        config.contact = contact;
    }
    config.validate()?;

    let local_id = ParticipantId::generate();
    info!(participant = %local_id, name = %config.name, url = %config.server_url, "Presence client starting");

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Received Ctrl+C, leaving...");
        let _ = shutdown_tx.send(());
    });

    let mut client = PresenceClient::new(
        config,
        local_id,
        Arc::new(HeadlessVisuals::new(Duration::from_millis(args.load_delay_ms))),
        LoggingSink::default(),
        WanderingMovement::new(args.speed, args.radius),
    );

    client.run(&mut shutdown_rx).await?;

    info!(
        visible = client.sink().visible(),
        present = client.store().present_count(),
        "Presence client stopped"
    );
    Ok(())
}

/// Initialize the logging/tracing system
fn init_logging(verbose: bool) {
    let default = if verbose {
        "debug,presence_core=trace"
    } else {
        "info,presence_core=debug"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}
