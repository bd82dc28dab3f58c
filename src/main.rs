//! Command-line controller for UDP LED devices.
//!
//! Run with: udp-led --help

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::debug;
use udp_led_rs::{Brightness, Color, Controller, ControllerConfig, Effect, PowerMode, Speed};

#[derive(Parser)]
#[command(name = "udp-led")]
#[command(about = "Discover and control LED devices over UDP broadcast", long_about = None)]
struct Cli {
    /// Port devices listen on for commands
    #[arg(short = 'b', long, global = true)]
    broadcast_port: Option<u16>,

    /// Port this controller listens on for replies
    #[arg(short = 'l', long, global = true)]
    listen_port: Option<u16>,

    /// Broadcast address (default: 255.255.255.255)
    #[arg(long, global = true)]
    broadcast_addr: Option<IpAddr>,

    /// JSON configuration file; flags override its values
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Seconds to keep printing replies after sending a command
    #[arg(short, long, global = true, default_value = "1")]
    wait: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover devices on the network
    Discover {
        /// Collection window in seconds (default: from config, 3)
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Set RGB color (0-255 for each component)
    Color {
        /// Red component (0-255)
        red: u8,
        /// Green component (0-255)
        green: u8,
        /// Blue component (0-255)
        blue: u8,
        /// Brightness level (0-100)
        #[arg(long, default_value = "100", value_parser = clap::value_parser!(u8).range(0..=100))]
        brightness: u8,
        /// Device address (ip or ip:port); broadcast when omitted
        #[arg(short, long)]
        target: Option<String>,
    },

    /// Turn devices on or off
    Power {
        /// on or off
        state: PowerMode,
        /// Device address (ip or ip:port); broadcast when omitted
        #[arg(short, long)]
        target: Option<String>,
    },

    /// Start a built-in effect
    Effect {
        /// One of: static, rainbow, breathing, blink
        effect: Effect,
        /// Effect speed (0-100)
        #[arg(long, default_value = "50", value_parser = clap::value_parser!(u8).range(0..=100))]
        speed: u8,
        /// Device address (ip or ip:port); broadcast when omitted
        #[arg(short, long)]
        target: Option<String>,
    },

    /// Ask devices to report their status
    Status {
        /// Device address (ip or ip:port); broadcast when omitted
        #[arg(short, long)]
        target: Option<String>,
    },

    /// Print every reply until Ctrl+C
    Monitor,
}

fn load_config(cli: &Cli) -> Result<ControllerConfig, udp_led_rs::Error> {
    let mut config = match &cli.config {
        Some(path) => ControllerConfig::from_json_file(path)?,
        None => ControllerConfig::default(),
    };
    if let Some(port) = cli.broadcast_port {
        config = config.with_broadcast_port(port);
    }
    if let Some(port) = cli.listen_port {
        config = config.with_listen_port(port);
    }
    if let Some(addr) = cli.broadcast_addr {
        config = config.with_broadcast_addr(addr);
    }
    Ok(config)
}

fn resolve_target(
    config: &ControllerConfig,
    target: Option<&str>,
) -> Result<Option<SocketAddr>, udp_led_rs::Error> {
    target.map(|t| config.parse_target(t)).transpose()
}

fn report(result: Result<(), udp_led_rs::Error>, what: &str, target: Option<SocketAddr>) -> bool {
    let destination = target.map_or_else(|| "all devices".to_string(), |t| t.to_string());
    match result {
        Ok(()) => {
            println!("Sent {} to {}", what, destination);
            true
        }
        Err(e) => {
            eprintln!("Command not sent ({}): no effect", e);
            false
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    debug!("Using configuration: {:?}", config);

    let mut controller = match Controller::start(config.clone()).await {
        Ok(controller) => controller,
        Err(e) => {
            eprintln!("Failed to start controller: {}", e);
            return Err(e.into());
        }
    };

    controller.on_reply(|device_id, reply| {
        let body = serde_json::to_string(reply.payload())
            .unwrap_or_else(|_| format!("{:?}", reply.payload()));
        println!("[{}@{}]: {}", device_id, reply.source().ip(), body);
    });

    let wait = Duration::from_secs(cli.wait);
    let sent = match cli.command {
        Commands::Discover { timeout } => {
            let window = timeout
                .map(Duration::from_secs)
                .unwrap_or(config.discovery_timeout);
            println!("Discovering devices (timeout: {}s)...", window.as_secs_f64());
            let devices = controller.discover(window).await;
            if devices.is_empty() {
                println!("No devices found.");
            } else {
                println!("\nFound {} device(s):", devices.len());
                for device in devices {
                    println!("  {}", device);
                }
            }
            false
        }

        Commands::Color {
            red,
            green,
            blue,
            brightness,
            target,
        } => {
            let target = resolve_target(&config, target.as_deref())?;
            let color = Color::rgb(red, green, blue);
            let brightness = Brightness::create_or(brightness);
            let result = controller.set_color(&color, brightness, target).await;
            report(
                result,
                &format!("color RGB({}, {}, {}) at {}%", red, green, blue, brightness.value()),
                target,
            )
        }

        Commands::Power { state, target } => {
            let target = resolve_target(&config, target.as_deref())?;
            let result = controller.set_power(&state, target).await;
            report(result, &format!("power {}", state), target)
        }

        Commands::Effect {
            effect,
            speed,
            target,
        } => {
            let target = resolve_target(&config, target.as_deref())?;
            let speed = Speed::create_or(speed);
            let result = controller.set_effect(effect, speed, target).await;
            report(
                result,
                &format!("effect {} (speed {})", effect, speed.value()),
                target,
            )
        }

        Commands::Status { target } => {
            let target = resolve_target(&config, target.as_deref())?;
            let result = controller.get_status(target).await;
            report(result, "status request", target)
        }

        Commands::Monitor => {
            println!(
                "Listening for replies on {} (Press Ctrl+C to stop)",
                controller.listen_addr()
            );
            tokio::signal::ctrl_c().await?;
            println!("\nStopped listening");
            false
        }
    };

    if sent && !wait.is_zero() {
        tokio::time::sleep(wait).await;
    }

    controller.shutdown().await;
    Ok(())
}
