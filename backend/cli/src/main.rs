mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, ArgMatches, CommandFactory, FromArgMatches, Parser};
use tracing::{error, info};

use botbus_config::{environment_prefix, get_environment, handler_policy, load_config};
use botbus_core::Dispatcher;

#[derive(Parser, Debug)]
#[command(name = "botbus")]
#[command(about = "Communication and commands bot")]
#[command(version)]
struct Cli {
    /// Load configuration from FILE (overrides the packaged default)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Load logging settings from the [logging] section of FILE
    #[arg(short, long, value_name = "FILE")]
    log: Option<PathBuf>,

    /// Add an environment entry for plugins; several values are joined with ','
    #[arg(
        short,
        long = "env",
        value_names = ["KEY", "VALUE"],
        num_args = 2..,
        action = ArgAction::Append
    )]
    env: Vec<String>,
}

/// `-e` values grouped per occurrence, key first.
fn env_entries(matches: &ArgMatches) -> Vec<Vec<String>> {
    matches
        .get_occurrences::<String>("env")
        .map(|occurrences| occurrences.map(|values| values.cloned().collect()).collect())
        .unwrap_or_default()
}

fn parse_args<I, T>(args: I) -> Result<(Cli, Vec<Vec<String>>), clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let matches = Cli::command().try_get_matches_from(args)?;
    let cli = Cli::from_arg_matches(&matches)?;
    Ok((cli, env_entries(&matches)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let (cli, env_entries) = parse_args(std::env::args_os()).unwrap_or_else(|e| e.exit());

    let settings = config::logging_settings(cli.log.as_deref(), cli.config.as_deref()).await?;
    botbus_logging::init_logging(&settings).context("Failed to initialize logging")?;

    let config = load_config(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;
    let env = get_environment(environment_prefix(&config), &env_entries);
    let dispatcher = Dispatcher::new(botbus_plugins::providers()).with_handler_policy(handler_policy(&config)?);

    info!(policy = ?dispatcher.policy(), "Starting...");
    let result = dispatcher.run(&config, &env, None).await;
    if let Err(e) = &result {
        error!(error = %e, "Bot stopped with an error");
    }
    info!("Stopping...");
    Ok(result?)
}
