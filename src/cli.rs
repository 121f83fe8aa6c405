//! Command-line parsing and the terminal account flows.

use anyhow::{Context, Result, bail};
use std::io::{BufRead, Write};

use crate::account::{
    AccountId, AccountStore, AccountSummary, AccountUpdate, NewAccount, format_login,
};
use crate::constants::ENV_PASSWORD;
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Poll the accounts that were logged in last time
    Resume,
    Login(Vec<AccountId>),
    Logout(AccountId),
    LogoutAll,
    Interactive,
    AccountList,
    AccountCreate {
        server_port: Option<String>,
        username: Option<String>,
    },
    AccountEdit(Option<AccountId>),
    AccountDelete(Option<AccountId>),
    Notify {
        key: Option<String>,
        message: Option<String>,
    },
    AckClear(Option<String>),
    AckPrune { days: u64 },
    Help,
}

fn parse_id(arg: &str) -> Result<AccountId, String> {
    arg.parse::<AccountId>().map_err(|e| e.to_string())
}

fn parse_optional_id(args: &[String]) -> Result<Option<AccountId>, String> {
    match args {
        [] => Ok(None),
        [id] => parse_id(id).map(Some),
        _ => Err("expected at most one account id".to_string()),
    }
}

pub fn parse_args(args: &[String]) -> Result<Command, String> {
    let Some((first, rest)) = args.split_first() else {
        return Ok(Command::Resume);
    };

    match (first.as_str(), rest) {
        ("help" | "--help" | "-h", _) => Ok(Command::Help),
        ("-i", []) => Ok(Command::Interactive),
        ("-x", []) => Ok(Command::LogoutAll),
        ("login", ids) => ids
            .iter()
            .map(|id| parse_id(id))
            .collect::<Result<Vec<_>, _>>()
            .map(Command::Login),
        ("logout", [flag]) if flag == "--all" => Ok(Command::LogoutAll),
        ("logout", [id]) => parse_id(id).map(Command::Logout),
        ("logout", _) => Err("usage: popper logout ID | --all".to_string()),
        ("account", [sub, sub_args @ ..]) => match (sub.as_str(), sub_args) {
            ("list", []) => Ok(Command::AccountList),
            ("create", []) => Ok(Command::AccountCreate {
                server_port: None,
                username: None,
            }),
            ("create", [server_port]) => Ok(Command::AccountCreate {
                server_port: Some(server_port.clone()),
                username: None,
            }),
            ("create", [server_port, username]) => Ok(Command::AccountCreate {
                server_port: Some(server_port.clone()),
                username: Some(username.clone()),
            }),
            ("edit", ids) => parse_optional_id(ids).map(Command::AccountEdit),
            ("delete", ids) => parse_optional_id(ids).map(Command::AccountDelete),
            _ => Err(format!("unknown account command: {}", sub)),
        },
        ("account", []) => Err("usage: popper account list|create|edit|delete".to_string()),
        ("notify", notify_args) => parse_notify(notify_args),
        ("ack", [sub, sub_args @ ..]) => match (sub.as_str(), sub_args) {
            ("clear", []) => Ok(Command::AckClear(None)),
            ("clear", [key]) => Ok(Command::AckClear(Some(key.clone()))),
            ("prune", [days]) => days
                .parse::<u64>()
                .map(|days| Command::AckPrune { days })
                .map_err(|_| format!("'{}' is not a number of days", days)),
            _ => Err("usage: popper ack clear [KEY] | ack prune DAYS".to_string()),
        },
        (cmd, _) => Err(format!("Unknown command: {}", cmd)),
    }
}

fn parse_notify(args: &[String]) -> Result<Command, String> {
    let mut key = None;
    let mut message = None;
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        if arg == "--key" {
            let value = iter.next().ok_or("--key needs a value")?;
            key = Some(value.clone());
        } else if message.is_none() {
            message = Some(arg.clone());
        } else {
            return Err("notify takes a single message (quote it)".to_string());
        }
    }

    Ok(Command::Notify { key, message })
}

/// Line-oriented terminal I/O. Generic so the flows can run against buffers.
pub struct Prompt<R, W> {
    input: R,
    output: W,
    /// Turn off terminal echo while reading passwords
    hide_secrets: bool,
}

impl Prompt<std::io::StdinLock<'static>, std::io::Stdout> {
    pub fn stdio() -> Self {
        Self {
            input: std::io::stdin().lock(),
            output: std::io::stdout(),
            hide_secrets: true,
        }
    }
}

impl<R: BufRead, W: Write> Prompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            hide_secrets: false,
        }
    }

    pub fn say(&mut self, line: impl std::fmt::Display) -> Result<()> {
        writeln!(self.output, "{}", line)?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            bail!("Input closed");
        }
        Ok(line.trim().to_string())
    }

    pub fn ask(&mut self, question: &str) -> Result<String> {
        write!(self.output, "{}", question)?;
        self.output.flush()?;
        self.read_line()
    }

    pub fn ask_secret(&mut self, question: &str) -> Result<String> {
        write!(self.output, "{}", question)?;
        self.output.flush()?;

        let _guard = if self.hide_secrets {
            Some(DisableEcho::new()?)
        } else {
            None
        };
        let secret = self.read_line();
        drop(_guard);

        writeln!(self.output)?;
        secret
    }

    #[cfg(test)]
    pub fn into_output(self) -> W {
        self.output
    }

    pub fn confirm(&mut self, question: &str) -> Result<bool> {
        let answer = self.ask(question)?;
        Ok(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
    }
}

struct DisableEcho {
    #[cfg(unix)]
    original: libc::termios,
}

impl DisableEcho {
    #[cfg(unix)]
    fn new() -> Result<Self> {
        use std::mem::MaybeUninit;
        use std::os::unix::io::AsRawFd;

        let fd = std::io::stdin().as_raw_fd();
        let mut termios = MaybeUninit::<libc::termios>::uninit();

        unsafe {
            if libc::tcgetattr(fd, termios.as_mut_ptr()) != 0 {
                bail!("Failed to get terminal attributes");
            }
            let original = termios.assume_init();
            let mut new = original;
            new.c_lflag &= !libc::ECHO;
            if libc::tcsetattr(fd, libc::TCSANOW, &new) != 0 {
                bail!("Failed to set terminal attributes");
            }
            Ok(Self { original })
        }
    }

    #[cfg(not(unix))]
    fn new() -> Result<Self> {
        Ok(Self {})
    }
}

#[cfg(unix)]
impl Drop for DisableEcho {
    fn drop(&mut self) {
        use std::os::unix::io::AsRawFd;
        let fd = std::io::stdin().as_raw_fd();
        unsafe {
            libc::tcsetattr(fd, libc::TCSANOW, &self.original);
        }
    }
}

/// Format the account table shown by `account list` and the pickers.
pub fn format_accounts(accounts: &[AccountSummary]) -> String {
    let mut out = String::from("\tID\tUsername\tServer\tLast login\n");
    for account in accounts {
        out.push_str(&format!(
            "\t{}\t{}\t{}:{}\t{}\n",
            account.id,
            account.username,
            account.server,
            account.port,
            format_login(account.last_login)
        ));
    }
    out
}

fn password_from_env() -> Option<String> {
    std::env::var(ENV_PASSWORD)
        .ok()
        .filter(|p| !p.trim().is_empty())
}

/// Ask for an account id from the list. With no accounts yet, offer to
/// create one and return it.
pub async fn choose_account<R: BufRead, W: Write>(
    store: &AccountStore,
    prompt: &mut Prompt<R, W>,
) -> Result<Option<AccountId>> {
    let accounts = store.list().await?;

    if accounts.is_empty() {
        if prompt.confirm("You do not have any account. Do you want to add one? (y/n): ")? {
            return create_account(store, prompt, None, None).await.map(Some);
        }
        return Ok(None);
    }

    prompt.say("Please choose an account:")?;
    prompt.say(format_accounts(&accounts).trim_end())?;

    loop {
        let answer = prompt.ask("Choose an account: ")?;
        if answer.is_empty() {
            return Ok(None);
        }
        match answer.parse::<AccountId>() {
            Ok(id) if accounts.iter().any(|a| a.id == id) => return Ok(Some(id)),
            Ok(id) => prompt.say(format!("No account with ID {}", id))?,
            Err(e) => prompt.say(e)?,
        }
    }
}

/// Create an account. Arguments given on the command line are validated
/// once; values typed at the prompt are asked again until valid.
pub async fn create_account<R: BufRead, W: Write>(
    store: &AccountStore,
    prompt: &mut Prompt<R, W>,
    server_port: Option<String>,
    username: Option<String>,
) -> Result<AccountId> {
    let server_port = match server_port {
        Some(arg) => {
            crate::account::parse_server_port(&arg)?;
            arg
        }
        None => loop {
            let answer = prompt.ask("Enter comma-separated server and port: ")?;
            match crate::account::parse_server_port(&answer) {
                Ok(_) => break answer,
                Err(e) => prompt.say(e)?,
            }
        },
    };

    let username = match username {
        Some(name) => name,
        None => loop {
            let answer = prompt.ask("Enter user name: ")?;
            if !answer.is_empty() {
                break answer;
            }
            prompt.say("The user name must not be empty.")?;
        },
    };

    let password = match password_from_env() {
        Some(password) => password,
        None => loop {
            let answer = prompt.ask_secret("Enter your password: ")?;
            if !answer.is_empty() {
                break answer;
            }
            prompt.say("The password must not be empty.")?;
        },
    };

    let account = NewAccount::parse(&server_port, &username, &password)?;
    let id = store.create(&account).await?;
    prompt.say(format!("Created account {} for {}", id, account.username))?;
    Ok(id)
}

pub async fn edit_account<R: BufRead, W: Write>(
    store: &AccountStore,
    prompt: &mut Prompt<R, W>,
    id: Option<AccountId>,
) -> Result<()> {
    let id = match id {
        Some(id) => id,
        None => match choose_account(store, prompt).await? {
            Some(id) => id,
            None => return Ok(()),
        },
    };
    // Fail before asking anything if the id is unknown
    store.get(id).await?;

    let update = loop {
        let choice = prompt.ask(
            "Enter\n\t1. To edit server and port.\n\t2. To edit username.\n\t3. To edit password. : ",
        )?;
        let update = match choice.as_str() {
            "1" => AccountUpdate::server_port(
                &prompt.ask("Enter comma-separated new server and port: ")?,
            ),
            "2" => AccountUpdate::username(&prompt.ask("Enter new username: ")?),
            "3" => AccountUpdate::password(&prompt.ask_secret("Enter new password: ")?),
            _ => {
                prompt.say("Invalid choice.")?;
                continue;
            }
        };
        match update {
            Ok(update) => break update,
            Err(StoreError::Validation(msg)) => prompt.say(msg)?,
            Err(e) => return Err(e.into()),
        }
    };

    let field = update.field_name();
    store.update(id, update).await?;
    prompt.say(format!("Updated {} of account {}", field, id))?;
    Ok(())
}

pub async fn delete_account<R: BufRead, W: Write>(
    store: &AccountStore,
    prompt: &mut Prompt<R, W>,
    id: Option<AccountId>,
) -> Result<()> {
    let id = match id {
        Some(id) => id,
        None => match choose_account(store, prompt).await? {
            Some(id) => id,
            None => return Ok(()),
        },
    };
    let account = store.get(id).await?;

    if !prompt.confirm(&format!("Delete account {} ({})? [y/N]: ", id, account.label()))? {
        prompt.say("Nothing deleted.")?;
        return Ok(());
    }

    store.delete(id).await?;
    prompt.say(format!("Deleted account {}", id))?;
    Ok(())
}

/// What the interactive menu asks the caller to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuOutcome {
    Poll(Vec<AccountId>),
    Done,
}

pub async fn interactive_menu<R: BufRead, W: Write>(
    store: &AccountStore,
    prompt: &mut Prompt<R, W>,
) -> Result<MenuOutcome> {
    let choice = prompt.ask(
        "Choose an option to proceed with:\n\t1. Login\n\t2. Logout\n\t3. Create an account\n\t4. Edit an account\n\t5. Delete an account: ",
    )?;

    match choice.as_str() {
        "1" => {
            let Some(id) = choose_account(store, prompt).await? else {
                return Ok(MenuOutcome::Done);
            };
            store.record_last_active(&[id]).await?;
            Ok(MenuOutcome::Poll(vec![id]))
        }
        "2" => {
            store.clear_last_active().await?;
            prompt.say("Logged out!")?;
            Ok(MenuOutcome::Done)
        }
        "3" => {
            create_account(store, prompt, None, None).await?;
            Ok(MenuOutcome::Done)
        }
        "4" => {
            edit_account(store, prompt, None).await?;
            Ok(MenuOutcome::Done)
        }
        "5" => {
            delete_account(store, prompt, None).await?;
            Ok(MenuOutcome::Done)
        }
        other => bail!("'{}' is not a menu option", other),
    }
}

/// Resolve the ids to poll for `popper login [ID...]`, prompting when none
/// were given, and remember them as last active.
pub async fn login_ids<R: BufRead, W: Write>(
    store: &AccountStore,
    prompt: &mut Prompt<R, W>,
    ids: Vec<AccountId>,
) -> Result<Vec<AccountId>> {
    let ids = if ids.is_empty() {
        match choose_account(store, prompt).await? {
            Some(id) => vec![id],
            None => return Ok(Vec::new()),
        }
    } else {
        ids
    };

    store
        .record_last_active(&ids)
        .await
        .context("Cannot log in")?;
    Ok(ids)
}
