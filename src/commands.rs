//! Runs a parsed `Command` against the store, the poller or the notifier.

use anyhow::{Result, bail};
use std::io::{BufRead, Write};
use std::process::ExitCode;
use std::time::Duration;

use crate::account::{AccountId, AccountStore};
use crate::cli::{self, Command, MenuOutcome, Prompt};
use crate::config::Config;
use crate::db::Db;
use crate::notify::{
    AnnounceOptions, AnnounceOutcome, Notice, NotificationKey, ProcessProbe, announce, build_sink,
};
use crate::poller::{PollerDeps, PollerManager};

const DEFAULT_MESSAGE: &str = "You have a new message!";

pub async fn execute<R: BufRead, W: Write>(
    command: Command,
    config: &Config,
    db: &Db,
    prompt: &mut Prompt<R, W>,
) -> Result<ExitCode> {
    let store = db.accounts();

    match command {
        Command::Resume => {
            let ids = store.last_active().await?;
            if ids.is_empty() {
                prompt.say("No account is logged in. Use `popper login` or `popper -i`.")?;
                return Ok(ExitCode::SUCCESS);
            }
            run_poller(config, db, &ids).await
        }
        Command::Login(ids) => {
            let ids = cli::login_ids(&store, prompt, ids).await?;
            if ids.is_empty() {
                return Ok(ExitCode::SUCCESS);
            }
            run_poller(config, db, &ids).await
        }
        Command::Logout(id) => {
            if store.remove_last_active(id).await? {
                prompt.say(format!("Logged out from account {}", id))?;
            } else {
                prompt.say(format!("Account {} was not logged in", id))?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::LogoutAll => {
            store.clear_last_active().await?;
            prompt.say("Logged out from all accounts!")?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Interactive => match cli::interactive_menu(&store, prompt).await? {
            MenuOutcome::Poll(ids) => run_poller(config, db, &ids).await,
            MenuOutcome::Done => Ok(ExitCode::SUCCESS),
        },
        Command::AccountList => {
            list_accounts(&store, prompt).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::AccountCreate {
            server_port,
            username,
        } => {
            cli::create_account(&store, prompt, server_port, username).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::AccountEdit(id) => {
            cli::edit_account(&store, prompt, id).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::AccountDelete(id) => {
            cli::delete_account(&store, prompt, id).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Notify { key, message } => notify(config, db, key, message).await,
        Command::AckClear(Some(key)) => {
            if db.acks().clear(&key).await? {
                prompt.say(format!("Cleared acknowledgement {}", key))?;
            } else {
                prompt.say(format!("No acknowledgement for {}", key))?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::AckClear(None) => {
            let removed = db.acks().clear_all().await?;
            prompt.say(format!("Cleared {} acknowledgement(s)", removed))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::AckPrune { days } => {
            let removed = db
                .acks()
                .prune(Duration::from_secs(days.saturating_mul(24 * 60 * 60)))
                .await?;
            prompt.say(format!(
                "Removed {} acknowledgement(s) older than {} day(s)",
                removed, days
            ))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Help => Ok(ExitCode::SUCCESS),
    }
}

async fn list_accounts<R: BufRead, W: Write>(
    store: &AccountStore,
    prompt: &mut Prompt<R, W>,
) -> Result<()> {
    let accounts = store.list().await?;
    if accounts.is_empty() {
        prompt.say("You do not have any account yet. Create one with `popper account create`.")?;
        return Ok(());
    }

    let active = store.last_active().await?;
    prompt.say(cli::format_accounts(&accounts).trim_end())?;
    if !active.is_empty() {
        let ids: Vec<String> = active.iter().map(ToString::to_string).collect();
        prompt.say(format!("Logged in: {}", ids.join(", ")))?;
    }
    Ok(())
}

/// Poll the given accounts until every worker stops or Ctrl-C is pressed.
async fn run_poller(config: &Config, db: &Db, ids: &[AccountId]) -> Result<ExitCode> {
    let store = db.accounts();
    let mut accounts = Vec::with_capacity(ids.len());
    for id in ids {
        accounts.push(store.get(*id).await?);
    }

    let deps = PollerDeps::from_config(config, db.clone());
    let manager = PollerManager::start(accounts, deps);

    let shutdown = manager.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, stopping");
            shutdown.cancel();
        }
    });

    let mut failed = false;
    for (id, exit) in manager.wait().await {
        if exit.is_failure() {
            tracing::error!("Account {} stopped: {:?}", id, exit);
            failed = true;
        } else {
            tracing::info!("Account {} stopped: {:?}", id, exit);
        }
    }

    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// `popper notify`: nag about one message until someone reacts.
async fn notify(
    config: &Config,
    db: &Db,
    key: Option<String>,
    message: Option<String>,
) -> Result<ExitCode> {
    let body = message.unwrap_or_else(|| DEFAULT_MESSAGE.to_string());
    let key = key.unwrap_or_else(|| format!("message:{}", body));
    if key.trim().is_empty() {
        bail!("The notification key must not be empty");
    }

    let notice = Notice {
        title: config.notifications.app_name.clone(),
        body,
        key: NotificationKey::Keyed(key),
        timeout_ms: config.notifications.timeout_ms,
    };
    let options = AnnounceOptions {
        budget: config.notifications.budget,
        interval: config.poll.interval(),
        ack_ttl: config.notifications.ack_ttl(),
        launch_command: config.peer.launch_command.clone(),
    };

    let sink = build_sink(&config.notifications);
    let probe = ProcessProbe::new(&config.peer.process_name);
    let outcome = announce(sink, &db.acks(), &probe, &notice, &options).await?;

    match outcome {
        AnnounceOutcome::AlreadyAcknowledged => {
            tracing::info!("Already acknowledged, not shown")
        }
        AnnounceOutcome::Answered(action) => tracing::info!("User {}", action.as_str()),
        AnnounceOutcome::Unanswered { shown } => {
            tracing::info!("Shown {} time(s) without an answer", shown)
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::NewAccount;
    use crate::notify::UserAction;
    use std::io::Cursor;

    fn prompt() -> Prompt<Cursor<Vec<u8>>, Vec<u8>> {
        Prompt::new(Cursor::new(Vec::new()), Vec::new())
    }

    fn said(prompt: Prompt<Cursor<Vec<u8>>, Vec<u8>>) -> String {
        String::from_utf8_lossy(&prompt.into_output()).to_string()
    }

    async fn db_with_account() -> (Db, AccountId) {
        let db = Db::open_in_memory().await.unwrap();
        let id = db
            .accounts()
            .create(&NewAccount::new("imap.example.com", 993, "me", "secret").unwrap())
            .await
            .unwrap();
        (db, id)
    }

    #[tokio::test]
    async fn test_resume_without_logins_does_nothing() {
        let (db, _) = db_with_account().await;
        let mut prompt = prompt();

        execute(Command::Resume, &Config::default(), &db, &mut prompt)
            .await
            .unwrap();
        assert!(said(prompt).contains("No account is logged in"));
    }

    #[tokio::test]
    async fn test_logout_all() {
        let (db, id) = db_with_account().await;
        db.accounts().record_last_active(&[id]).await.unwrap();
        let mut prompt = prompt();

        execute(Command::LogoutAll, &Config::default(), &db, &mut prompt)
            .await
            .unwrap();
        assert!(db.accounts().last_active().await.unwrap().is_empty());
        assert!(said(prompt).contains("Logged out from all accounts!"));
    }

    #[tokio::test]
    async fn test_logout_one() {
        let (db, id) = db_with_account().await;
        let mut prompt = prompt();

        execute(Command::Logout(id), &Config::default(), &db, &mut prompt)
            .await
            .unwrap();
        assert!(said(prompt).contains("was not logged in"));
    }

    #[tokio::test]
    async fn test_list_marks_logged_in() {
        let (db, id) = db_with_account().await;
        db.accounts().record_last_active(&[id]).await.unwrap();
        let mut prompt = prompt();

        execute(Command::AccountList, &Config::default(), &db, &mut prompt)
            .await
            .unwrap();
        let out = said(prompt);
        assert!(out.contains("imap.example.com:993"));
        assert!(out.contains("Logged in: 1"));
    }

    #[tokio::test]
    async fn test_ack_clear() {
        let (db, _) = db_with_account().await;
        db.acks().record("k1", UserAction::Dismissed).await.unwrap();
        db.acks().record("k2", UserAction::Closed).await.unwrap();

        let mut one = prompt();
        execute(
            Command::AckClear(Some("k1".to_string())),
            &Config::default(),
            &db,
            &mut one,
        )
        .await
        .unwrap();
        assert!(said(one).contains("Cleared acknowledgement k1"));

        let mut all = prompt();
        execute(Command::AckClear(None), &Config::default(), &db, &mut all)
            .await
            .unwrap();
        assert!(said(all).contains("Cleared 1 acknowledgement(s)"));
        assert!(db.acks().lookup("k2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_login_unknown_account_errors() {
        let (db, _) = db_with_account().await;
        let mut prompt = prompt();

        let result = execute(
            Command::Login(vec![AccountId(42)]),
            &Config::default(),
            &db,
            &mut prompt,
        )
        .await;
        assert!(result.is_err());
        assert!(db.accounts().last_active().await.unwrap().is_empty());
    }
}
