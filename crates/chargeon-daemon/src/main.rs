//! ChargeOn host daemon
//!
//! Keeps a laptop battery between two charge thresholds by switching the
//! charger's RF outlet through a ChargeOn module.
//!
//! Usage:
//!   chargeon [OPTIONS] [COMMAND]
//!
//! Commands:
//!   monitor              Check the battery every interval (default)
//!   on | off             Switch the outlet once
//!   learn                Capture outlet codes from its remote control
//!   sync                 Push the outlet settings to the module
//!   show                 Ask the module to print its outlet settings
//!   version              Print the module firmware build
//!   thresholds MIN MAX   Change and save the charge thresholds
//!   config               Print the effective settings
//!   ports                List serial ports
//!
//! Options:
//!   --config PATH        Settings file (default: <config dir>/ChargeOn/settings.json)
//!   --demo               Use a simulated module and battery
//!   --require-module     Exit instead of monitoring when no module is found
//!   --restore-on-exit    Turn the outlet on at exit if the battery is discharging

mod prompt;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chargeon_core::config::{ChargeThresholds, JsonFileStore};
use chargeon_core::demo::{DemoBattery, DemoPorts, ModuleHandle};
use chargeon_core::learn::LearnOutcome;
use chargeon_core::power::SysfsPowerSource;
use chargeon_core::protocol::{list_ports, ExchangeTiming, PortInfo, ProtocolEngine, SystemPorts};
use chargeon_core::station::{Station, TickOutcome};
use tokio::time::MissedTickBehavior;
use tracing_subscriber::EnvFilter;

use crate::prompt::ConsolePrompt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Monitor,
    Switch(bool),
    Learn,
    Sync,
    Show,
    Version,
    Thresholds(u8, u8),
    Config,
    Ports,
}

#[derive(Debug)]
struct Options {
    config: Option<PathBuf>,
    demo: bool,
    require_module: bool,
    restore_on_exit: bool,
    command: Command,
}

fn parse_args(args: &[String]) -> Result<Option<Options>> {
    let mut options = Options {
        config: None,
        demo: false,
        require_module: false,
        restore_on_exit: false,
        command: Command::Monitor,
    };
    let mut positional = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                let path = args.get(i).context("--config needs a path")?;
                options.config = Some(PathBuf::from(path));
            }
            "--demo" => options.demo = true,
            "--require-module" => options.require_module = true,
            "--restore-on-exit" => options.restore_on_exit = true,
            "--help" | "-h" => {
                print_help();
                return Ok(None);
            }
            arg if arg.starts_with('-') => bail!("Unknown option: {}", arg),
            arg => positional.push(arg.to_string()),
        }
        i += 1;
    }

    let mut words = positional.iter().map(String::as_str);
    options.command = match words.next() {
        None | Some("monitor") => Command::Monitor,
        Some("on") => Command::Switch(true),
        Some("off") => Command::Switch(false),
        Some("learn") => Command::Learn,
        Some("sync") => Command::Sync,
        Some("show") => Command::Show,
        Some("version") => Command::Version,
        Some("config") => Command::Config,
        Some("ports") => Command::Ports,
        Some("thresholds") => {
            let (Some(min), Some(max)) = (words.next(), words.next()) else {
                bail!("thresholds needs MIN and MAX");
            };
            Command::Thresholds(
                min.parse().with_context(|| format!("invalid minimum {:?}", min))?,
                max.parse().with_context(|| format!("invalid maximum {:?}", max))?,
            )
        }
        Some(other) => bail!("Unknown command: {}", other),
    };
    if let Some(extra) = words.next() {
        bail!("Unexpected argument: {}", extra);
    }

    Ok(Some(options))
}

fn print_help() {
    println!("chargeon {}", chargeon_core::VERSION);
    println!();
    println!("Usage: chargeon [OPTIONS] [COMMAND]");
    println!();
    println!("Commands:");
    println!("  monitor              Check the battery every interval (default)");
    println!("  on | off             Switch the outlet once");
    println!("  learn                Capture outlet codes from its remote control");
    println!("  sync                 Push the outlet settings to the module");
    println!("  show                 Ask the module to print its outlet settings");
    println!("  version              Print the module firmware build");
    println!("  thresholds MIN MAX   Change and save the charge thresholds");
    println!("  config               Print the effective settings");
    println!("  ports                List serial ports");
    println!();
    println!("Options:");
    println!("  -c, --config PATH    Settings file");
    println!("  --demo               Use a simulated module and battery");
    println!("  --require-module     Exit instead of monitoring when no module is found");
    println!("  --restore-on-exit    Turn the outlet on at exit if the battery is discharging");
}

fn describe_port(port: &PortInfo) -> String {
    let mut line = port.name.clone();
    if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        line.push_str(&format!("  [{:04x}:{:04x}]", vid, pid));
    }
    if let Some(product) = &port.product {
        line.push_str(&format!("  ({})", product));
    }
    line
}

fn build_station(options: &Options) -> Result<Station> {
    let store_path = match &options.config {
        Some(path) => path.clone(),
        None if options.demo => std::env::temp_dir().join("chargeon-demo.json"),
        None => JsonFileStore::default_path()?,
    };
    tracing::debug!("settings file: {}", store_path.display());
    let store = Box::new(JsonFileStore::new(store_path));

    if options.demo {
        let module = ModuleHandle::default();
        return Ok(Station::new(
            Arc::new(ProtocolEngine::new(ExchangeTiming::immediate())),
            Box::new(DemoPorts::new(module.clone())),
            Box::new(DemoBattery::new(module, 50.0)),
            store,
        ));
    }

    Ok(Station::new(
        Arc::new(ProtocolEngine::default()),
        Box::new(SystemPorts::default()),
        Box::new(SysfsPowerSource::default()),
        store,
    ))
}

async fn run_monitor(mut station: Station, restore_on_exit: bool) -> Result<()> {
    let mut ticker = tokio::time::interval(station.config().check_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let outcome = tokio::task::block_in_place(|| station.tick());
                if let TickOutcome::Completed(summary) = outcome {
                    if station.config().update_every_check || summary.sample_changed || summary.link_lost {
                        println!("{}", station.status());
                    }
                    if let Some(alert) = summary.alert() {
                        println!("{}", alert);
                    }
                }
            }
            result = &mut ctrl_c => {
                result.context("waiting for Ctrl-C")?;
                tracing::info!("shutting down");
                break;
            }
        }
    }

    tokio::task::block_in_place(|| station.shutdown(restore_on_exit))
        .context("closing the ChargeOn module")?;
    Ok(())
}

fn run_once(station: &mut Station, command: &Command) -> Result<()> {
    match command {
        Command::Switch(on) => {
            station.switch_outlet(*on)?;
            println!("Outlet is {}", if *on { "ON" } else { "OFF" });
        }
        Command::Learn => match station.learn(&mut ConsolePrompt::stdin())? {
            LearnOutcome::Captured(profile) => {
                println!("Saved ON code {} and OFF code {}", profile.on_code, profile.off_code)
            }
            LearnOutcome::Cancelled => println!("Outlet settings unchanged"),
        },
        Command::Sync => {
            station.sync_settings()?;
            println!("Outlet settings sent");
        }
        Command::Show => {
            station.show_settings()?;
            println!("Outlet settings printed on the module's debug port");
        }
        Command::Version => println!("{}", station.firmware_version()?),
        Command::Monitor | Command::Thresholds(..) | Command::Config | Command::Ports => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(options) = parse_args(&args)? else {
        return Ok(());
    };

    if options.command == Command::Ports {
        for port in list_ports() {
            println!("{}", describe_port(&port));
        }
        return Ok(());
    }

    let mut station = build_station(&options)?;

    match &options.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(station.config())?);
            return Ok(());
        }
        Command::Thresholds(min, max) => {
            station.set_thresholds(ChargeThresholds::new(*min, *max));
            let applied = station.config().thresholds();
            println!("Thresholds set to {}%..{}%", applied.min(), applied.max());
            return Ok(());
        }
        _ => {}
    }

    match tokio::task::block_in_place(|| station.startup()) {
        Ok(port) => println!("Connected on {}", port),
        Err(e) if options.require_module || options.command != Command::Monitor => {
            return Err(e).context("Could not find an available/suitable ChargeOn module");
        }
        Err(e) => {
            tracing::warn!("{}", e);
            println!("{}; monitoring the battery only", chargeon_core::station::STATUS_DISABLED);
        }
    }

    if options.command == Command::Monitor {
        return run_monitor(station, options.restore_on_exit).await;
    }

    let result = tokio::task::block_in_place(|| run_once(&mut station, &options.command));
    station.shutdown(false).context("closing the ChargeOn module")?;
    result
}
