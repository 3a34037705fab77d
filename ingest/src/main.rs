use clap::{Arg, ArgAction, Command, value_parser};
use ingest::pipeline::BatchOptions;
use serde::Serialize;
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "config/ingest.toml";

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .default_value(DEFAULT_CONFIG)
        .help("Sets a custom config file")
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_summary<T: Serialize>(summary: &T) {
    match serde_json::to_string_pretty(summary) {
        Ok(json) => println!("{}", json),
        Err(e) => warn!(error = %e, "Could not render summary"),
    }
}

#[tokio::main]
async fn main() {
    let matches = Command::new("Aircraft Registry Ingest")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Moves FAA aircraft registration archives into object storage and the warehouse")
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("ingest")
                .about("Fetch, normalize and publish one year of registration data")
                .arg(
                    Arg::new("year")
                        .short('y')
                        .long("year")
                        .required(true)
                        .value_parser(value_parser!(i32))
                        .help("Registration year to ingest"),
                )
                .arg(config_arg())
                .arg(
                    Arg::new("load")
                        .long("load")
                        .action(ArgAction::SetTrue)
                        .help("Load matching objects into the warehouse afterwards"),
                ),
        )
        .subcommand(
            Command::new("load")
                .about("Load published objects into the warehouse")
                .arg(config_arg()),
        )
        .get_matches();

    init_logging(matches.get_flag("log-json"));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    match matches.subcommand() {
        Some(("ingest", ingest_matches)) => {
            let Some(config_path) = ingest_matches.get_one::<String>("config") else {
                error!("--config is required");
                process::exit(1);
            };
            let Some(&year) = ingest_matches.get_one::<i32>("year") else {
                error!("--year is required");
                process::exit(1);
            };
            let options = BatchOptions {
                load: ingest_matches.get_flag("load"),
            };
            info!(config = %config_path, year, load = options.load, "Starting ingest");

            match ingest::run_ingest(config_path, year, options, &cancel).await {
                Ok(summary) => print_summary(&summary),
                Err(e) => {
                    error!(error = %e, "Ingest failed");
                    process::exit(1);
                }
            }
        }

        Some(("load", load_matches)) => {
            let Some(config_path) = load_matches.get_one::<String>("config") else {
                error!("--config is required");
                process::exit(1);
            };
            info!(config = %config_path, "Starting load");

            match ingest::run_load(config_path, &cancel).await {
                Ok(report) => print_summary(&report),
                Err(e) => {
                    error!(error = %e, "Load failed");
                    process::exit(1);
                }
            }
        }

        _ => {
            eprintln!("No subcommand specified. Use --help for usage information.");
            process::exit(1);
        }
    }
}
