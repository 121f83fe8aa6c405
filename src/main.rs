mod account;
mod cli;
mod commands;
mod config;
mod constants;
mod db;
mod error;
mod mail;
mod notify;
mod poller;

use anyhow::Result;
use std::env;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Command, Prompt};
use crate::config::Config;
use crate::db::Db;

fn setup_logging(config: &Config) {
    use std::fs::OpenOptions;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,popper=debug"));

    // Several invocations may share one log file, so append
    let log_file = config.logging.file.as_ref().and_then(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });

    if let Some(file) = log_file {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn print_usage() {
    eprintln!(
        r#"popper - Desktop notifications for unread IMAP mail

Usage: popper [command]

Commands:
    (none)                       Resume polling the accounts logged in last time
    login [ID...]                Log in to accounts and start polling
    logout ID | --all            Log out of one account or all of them
    -x                           Log out of all accounts
    -i                           Interactive menu
    account list                 List stored accounts
    account create [SERVER,PORT [USER]]
                                 Add an account (password from {} if set)
    account edit [ID]            Change server/port, username or password
    account delete [ID]          Remove an account
    notify [--key KEY] [MESSAGE] Show a notification until it is answered
    ack clear [KEY]              Forget one or every acknowledgement
    ack prune DAYS               Forget acknowledgements older than DAYS
    help                         Show this help message

Configuration file: ~/.config/popper/config.toml
"#,
        constants::ENV_PASSWORD
    );
}

async fn run(command: Command) -> Result<ExitCode> {
    let config = Config::load()?;
    setup_logging(&config);
    config.ensure_dirs()?;

    let db = Db::open(&config.database_path()?).await?;
    let mut prompt = Prompt::stdio();
    let result = commands::execute(command, &config, &db, &mut prompt).await;
    db.close().await;
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();

    let command = match cli::parse_args(&args) {
        Ok(Command::Help) => {
            print_usage();
            return ExitCode::SUCCESS;
        }
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}", e);
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    match run(command).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
