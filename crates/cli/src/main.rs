// FILE: crates/cli/src/main.rs

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use offsync_config::{Config, ConfigManager};
use std::path::PathBuf;

mod commands;

fn build_cli() -> Command {
    Command::new("offsync")
        .version(env!("CARGO_PKG_VERSION"))
        .author("offsync Team")
        .about("Offline-first dataset synchronization")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("DIR")
                .help("Directory holding config.toml")
                .global(true),
        )
        .subcommand(Command::new("init").about("Write a default config file"))
        .subcommand(
            Command::new("show-config")
                .about("Print the effective configuration, including environment overrides")
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Print as JSON instead of TOML")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("demo")
                .about("Sync a dataset against an in-memory remote and print every notification")
                .arg(Arg::new("dataset").short('d').long("dataset").value_name("ID").help("Dataset to manage").default_value("demo"))
                .arg(
                    Arg::new("records")
                        .short('n')
                        .long("records")
                        .value_name("COUNT")
                        .help("Records to create")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("3"),
                )
                .arg(
                    Arg::new("frequency")
                        .short('f')
                        .long("frequency")
                        .value_name("SECS")
                        .help("Seconds between sync cycles")
                        .value_parser(clap::value_parser!(f64))
                        .default_value("0.2"),
                )
                .arg(
                    Arg::new("crash-cycles")
                        .long("crash-cycles")
                        .value_name("COUNT")
                        .help("Cycles the remote fails before recovering")
                        .value_parser(clap::value_parser!(u32))
                        .default_value("0"),
                )
                .arg(
                    Arg::new("collide")
                        .long("collide")
                        .help("Edit a record remotely and locally at once to provoke a collision")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
}

fn config_manager(matches: &ArgMatches) -> Result<ConfigManager> {
    match matches.get_one::<String>("config") {
        Some(dir) => ConfigManager::with_directory(PathBuf::from(dir))
            .with_context(|| format!("Failed to use config directory {}", dir)),
        None => ConfigManager::new().context("Failed to locate config directory"),
    }
}

fn init_logging(config: &Config) {
    let filter = config.app.log_level.to_string();
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();
    let manager = config_manager(&matches)?;
    let config = manager
        .load_with_env_overrides()
        .context("Failed to load configuration")?;
    init_logging(&config);

    match matches.subcommand() {
        Some(("init", _)) => commands::init_config(&manager),
        Some(("show-config", sub_matches)) => {
            commands::show_config(&config, sub_matches.get_flag("json"))
        }
        Some(("demo", sub_matches)) => {
            let options = commands::DemoOptions::from_matches(sub_matches)?;
            commands::run_demo(&config, options).await
        }
        _ => {
            build_cli().print_help()?;
            Ok(())
        }
    }
}
