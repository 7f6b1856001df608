//! Insteon CLI - Main entry point
//!
//! Sends commands to Insteon devices through a hub on the local network.

mod config;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use insteon_core::{catalog::UNKNOWN, Catalog, DeviceId, FileStateStore};
use insteon_discovery::discover_links;
use insteon_hub::{Dimmer, Fan, FanSpeed, Group, HttpTransport, Hub, OnOffOutlet, Socket, Switch};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "insteon")]
#[command(about = "Control Insteon devices through a local Insteon Hub")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "insteon.toml")]
    config: PathBuf,

    /// Hub address, overrides the configuration file
    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    username: Option<String>,

    #[arg(short, long)]
    password: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Write an example configuration to --config and exit
    #[arg(long)]
    init_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode the hub buffer, then clear it
    Buffer,
    /// Clear the hub buffer
    Clear,
    /// Current level of a device
    Status {
        id: DeviceId,
        /// Ask for LED flags instead of the on level
        #[arg(long)]
        led: bool,
    },
    /// Turn a device on, optionally to a dimmer level
    On {
        id: DeviceId,
        /// Brightness 0-100
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
        level: Option<u8>,
    },
    Off {
        id: DeviceId,
    },
    /// Make a device beep
    Beep {
        id: DeviceId,
    },
    /// Ask a device for its category, sub-category and firmware
    Id {
        id: DeviceId,
    },
    /// List the devices in the hub's ALL-Link database
    Links {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Turn an ALL-Link group on or off
    Scene {
        group: u8,
        action: Action,
    },
    /// Set a FanLinc fan speed (off, low, medium, high), or show it
    Fan {
        id: DeviceId,
        speed: Option<FanSpeed>,
    },
    /// Switch one socket of an on/off outlet
    Outlet {
        id: DeviceId,
        socket: SocketArg,
        action: Action,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Action {
    On,
    Off,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SocketArg {
    Top,
    Bottom,
}

impl From<SocketArg> for Socket {
    fn from(arg: SocketArg) -> Self {
        match arg {
            SocketArg::Top => Socket::Top,
            SocketArg::Bottom => Socket::Bottom,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if args.init_config {
        config::save_default_config(&args.config)?;
        println!("Wrote example configuration to {}", args.config.display());
        return Ok(());
    }

    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(());
    };

    let mut config = config::load_config(&args.config)?;
    if let Some(host) = args.host {
        config.hub.host = host;
    }
    if let Some(username) = args.username {
        config.hub.username = username;
    }
    if let Some(password) = args.password {
        config.hub.password = password;
    }

    info!(
        host = %config.hub.host,
        port = config.hub.port,
        "Configuration loaded"
    );

    let hub = connect(&config)?;
    run(&hub, &config, command).await?;

    // Let an expired-status refresh finish before the runtime shuts down
    hub.wait_for_refreshes().await;
    Ok(())
}

fn connect(config: &config::Config) -> Result<Hub> {
    let transport = HttpTransport::new(&config.hub_address()).context("Failed to build HTTP client")?;
    let store = FileStateStore::new(&config.cache.dir)
        .with_context(|| format!("Failed to open state directory {}", config.cache.dir.display()))?
        .with_lock_stale_after(Duration::from_secs(config.cache.lock_stale_secs));
    debug!(dir = %config.cache.dir.display(), "Using state directory");

    Ok(Hub::new(Arc::new(transport), Arc::new(store), config.hub_settings()))
}

fn load_catalog(config: &config::Config) -> Result<Catalog> {
    match &config.catalog.path {
        Some(path) => Catalog::from_file(path)
            .with_context(|| format!("Failed to load catalog {}", path.display())),
        None => Ok(Catalog::builtin()),
    }
}

fn confirmed(confirmed: bool, what: &str) -> Result<()> {
    if !confirmed {
        bail!("{} was not confirmed by the device", what);
    }
    println!("{} confirmed", what);
    Ok(())
}

async fn run(hub: &Hub, config: &config::Config, command: Command) -> Result<()> {
    match command {
        Command::Buffer => {
            let _exchange = hub.exclusive().await;
            let snapshot = hub.poll().await?;
            if snapshot.messages.is_empty() {
                println!("{}", snapshot.message);
            }
            for msg in &snapshot.messages {
                println!("{:02X} {:<40} {}", msg.code, msg.description(), msg.raw);
                for (name, value) in &msg.fields {
                    println!("    {:<16} {}", name, value);
                }
                if let Some(detail) = msg.detail() {
                    println!("    {}", detail);
                }
            }
            if let Some(halted) = &snapshot.halted {
                println!("Decoding stopped: {}", halted);
            }
        }
        Command::Clear => {
            hub.clear_buffer().await?;
            println!("Buffer cleared");
        }
        Command::Status { id, led } => {
            let switch = Switch::new(hub.clone(), id.clone());
            let Some(reading) = switch.status(led).await? else {
                bail!("No status response from {}", id);
            };
            let source = match (reading.from_cache, reading.stale) {
                (false, _) => "device",
                (true, false) => "cache",
                (true, true) => "expired cache, refreshing",
            };
            match (reading.value(), led) {
                (Some(value), true) => println!("{} LED flags {:02X} ({})", id, value, source),
                (Some(value), false) => println!(
                    "{} level {:02X} ({}%) ({})",
                    id,
                    value,
                    reading.percent().unwrap_or_default(),
                    source
                ),
                (None, _) => println!("{} returned {} ({})", id, reading.response.raw, source),
            }
        }
        Command::On { id, level } => {
            let ok = match level {
                Some(level) => Dimmer::new(hub.clone(), id.clone()).on(level).await?,
                None => Switch::new(hub.clone(), id.clone()).on().await?,
            };
            confirmed(ok, &format!("{} on", id))?;
        }
        Command::Off { id } => {
            let ok = Switch::new(hub.clone(), id.clone()).off().await?;
            confirmed(ok, &format!("{} off", id))?;
        }
        Command::Beep { id } => {
            let ok = Switch::new(hub.clone(), id.clone()).beep().await?;
            confirmed(ok, &format!("{} beep", id))?;
        }
        Command::Id { id } => {
            let Some(identity) = hub.id_request(&id).await? else {
                bail!("{} did not answer the ID request", id);
            };
            let catalog = load_catalog(config)?;
            let category = catalog.lookup_category(&identity.cat, &identity.sub_cat);
            let model = catalog.lookup_model(&identity.cat, &identity.sub_cat, None);
            println!("{}", id);
            println!("  Category: {} ({})", identity.cat, category.map_or(UNKNOWN, |c| c.name.as_str()));
            println!("  Sub-category: {}", identity.sub_cat);
            println!("  Firmware: {}", identity.firmware);
            if let Some(model) = model {
                println!("  Model: {} ({})", model.name, model.sku);
            }
        }
        Command::Links { json } => {
            let catalog = load_catalog(config)?;
            let devices = discover_links(hub, &catalog).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else {
                println!("Found {} linked devices:", devices.len());
                for (id, device) in &devices {
                    let groups: Vec<String> = device.groups.iter().map(|g| format!("{:02X}", g)).collect();
                    println!("  - {} {} ({})", id, device.model_name, device.sku);
                    println!("    Category: {} / {}", device.cat_name, device.cat_type);
                    println!("    Groups: {}", groups.join(", "));
                }
            }
        }
        Command::Scene { group, action } => {
            let group = Group::new(hub.clone(), group);
            match action {
                Action::On => group.on().await?,
                Action::Off => group.off().await?,
            }
            println!("Group {:02X} {:?} sent", group.id(), action);
        }
        Command::Fan { id, speed } => {
            let fan = Fan::new(hub.clone(), id.clone());
            let Some(speed) = speed else {
                match fan.speed().await? {
                    Some(current) => println!("{} fan {}", id, current),
                    None => bail!("No fan status response from {}", id),
                }
                return Ok(());
            };
            let ok = match speed {
                FanSpeed::Off => fan.off().await?,
                speed => fan.on(speed).await?,
            };
            confirmed(ok, &format!("{} fan {}", id, speed))?;
        }
        Command::Outlet { id, socket, action } => {
            let outlet = OnOffOutlet::new(hub.clone(), id.clone());
            let ok = match action {
                Action::On => outlet.on(socket.into()).await?,
                Action::Off => outlet.off(socket.into()).await?,
            };
            confirmed(ok, &format!("{} {:?} socket {:?}", id, socket, action))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["insteon", "on", "40565b", "--level", "50"]).unwrap();
        match args.command {
            Some(Command::On { id, level }) => {
                assert_eq!(id.as_str(), "40565B");
                assert_eq!(level, Some(50));
            }
            other => panic!("unexpected command {:?}", other),
        }

        let args = Args::try_parse_from(["insteon", "fan", "40565B", "med"]).unwrap();
        assert!(matches!(args.command, Some(Command::Fan { speed: Some(FanSpeed::Medium), .. })));

        let args = Args::try_parse_from(["insteon", "fan", "40565B"]).unwrap();
        assert!(matches!(args.command, Some(Command::Fan { speed: None, .. })));

        let args = Args::try_parse_from(["insteon", "outlet", "40565B", "bottom", "off"]).unwrap();
        assert!(matches!(
            args.command,
            Some(Command::Outlet { socket: SocketArg::Bottom, action: Action::Off, .. })
        ));
    }

    #[test]
    fn test_args_reject_bad_input() {
        assert!(Args::try_parse_from(["insteon", "on", "40565"]).is_err());
        assert!(Args::try_parse_from(["insteon", "on", "40565B", "--level", "101"]).is_err());
        assert!(Args::try_parse_from(["insteon", "fan", "40565B", "turbo"]).is_err());
    }

    #[test]
    fn test_args_definition() {
        Args::command().debug_assert();
    }
}
