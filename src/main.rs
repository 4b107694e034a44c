use anyhow::Context;
use clap::{Parser, Subcommand};
use laser_etcher::{init_logging, App, Config, LogFormat, BUILD_DATE, VERSION};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "laser-etcher")]
#[command(about = "Pre-test and stream G-code to a laser etching rig", long_about = None)]
#[command(version = VERSION)]
struct Cli {
    /// Configuration file (.toml or .json); defaults to the platform config directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run against a simulated rig instead of the serial ports
    #[arg(long, global = true)]
    simulate: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit log records as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List attached serial ports
    Ports,
    /// Run the homing pre-test
    Prepare,
    /// Run the pre-test, then etch a G-code program
    Etch {
        /// G-code program to stream
        program: PathBuf,
    },
    /// Turn the laser on
    Fire,
    /// Turn the laser off
    Stop,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    init_logging(if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    })?;
    tracing::debug!("laser-etcher {} (built {})", VERSION, BUILD_DATE);

    let config = Config::load_or_default(cli.config.as_deref()).context("loading configuration")?;
    let app = if cli.simulate {
        App::simulated(config)
    } else {
        App::system(config)
    };

    match cli.command {
        Commands::Ports => {
            let ports = app.ports()?;
            if cli.json {
                print_json(&ports)?;
            } else if ports.is_empty() {
                println!("No serial ports found");
            } else {
                for port in &ports {
                    println!(
                        "{:<20} {:<24} {}",
                        port.port_name,
                        port.serial_number.as_deref().unwrap_or("-"),
                        port.description
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Prepare => {
            let outcome = tokio::task::spawn_blocking(move || app.prepare()).await?;
            if cli.json {
                print_json(&outcome)?;
            } else if outcome.ready {
                println!(
                    "Ready: {}",
                    outcome.device_path.as_deref().unwrap_or_default()
                );
            } else {
                println!("Not ready: {}", outcome.reason);
                if let Some(detail) = &outcome.detail {
                    println!("  {}", detail);
                }
            }
            Ok(exit_code(outcome.ready))
        }
        Commands::Etch { program } => {
            let mut session = app.session();
            let cancel = session.cancel_token();
            let mut etch = tokio::task::spawn_blocking(move || app.etch(&mut session, &program));

            let report = tokio::select! {
                report = &mut etch => report?,
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!("Interrupted, cancelling after the current line");
                    cancel.cancel();
                    etch.await?
                }
            };

            if cli.json {
                print_json(&report)?;
            } else {
                match &report.etch {
                    None => println!("Not ready: {}", report.prepare.reason),
                    Some(result) if result.success => println!("Etch complete"),
                    Some(result) => {
                        println!("Etch failed: {}", result.reason);
                        if let Some(detail) = &result.detail {
                            println!("  {}", detail);
                        }
                    }
                }
                for warning in report.etch.iter().flat_map(|etch| &etch.warnings) {
                    println!("WARNING: {}", warning);
                }
            }
            Ok(exit_code(report.success()))
        }
        command @ (Commands::Fire | Commands::Stop) => {
            let fire = matches!(command, Commands::Fire);
            let outcome = tokio::task::spawn_blocking(move || {
                if fire {
                    app.fire()
                } else {
                    app.stop()
                }
            })
            .await?;

            if cli.json {
                print_json(&outcome)?;
            } else {
                match outcome.warning() {
                    Some(warning) => println!("WARNING: {}", warning),
                    None => println!("Laser {} sent", outcome.command()),
                }
            }
            Ok(exit_code(outcome.is_sent()))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
