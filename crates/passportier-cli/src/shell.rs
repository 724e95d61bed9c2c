//! Line-oriented shell over one user's vault.
//!
//! Passphrases and secrets are read with echo disabled and never pass through
//! the command line itself.

use std::time::Duration;

use anyhow::{Context, Result};
use passportier_core::UserId;
use passportier_vault::{Vault, VaultError, VaultResult};
use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

const HELP: &str = "\
commands:
  unlock [ttl_secs]   open a session (prompts for the passphrase)
  lock                end the session
  save <service>      store a secret (prompts for it)
  get <query>         show the first secret whose name contains <query>
  list                stored service names
  reveal              every stored secret
  delete <service>    remove the entry with exactly that name
  ttl <secs>          auto-lock preference for later unlocks
  count               number of stored entries
  status              whether a session is open
  help | quit";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Unlock(Option<Duration>),
    Lock,
    Save(String),
    Get(String),
    List,
    Reveal,
    Delete(String),
    Ttl(Duration),
    Count,
    Status,
    Help,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        let needs_arg = |what: &str| -> Result<String, String> {
            if rest.is_empty() {
                Err(format!("{verb}: missing {what}"))
            } else {
                Ok(rest.to_string())
            }
        };
        let secs = |s: &str| -> Result<Duration, String> {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| format!("{verb}: {s:?} is not a number of seconds"))
        };

        match verb.to_ascii_lowercase().as_str() {
            "unlock" if rest.is_empty() => Ok(Command::Unlock(None)),
            "unlock" => Ok(Command::Unlock(Some(secs(rest)?))),
            "lock" => Ok(Command::Lock),
            "save" => Ok(Command::Save(needs_arg("service name")?)),
            "get" => Ok(Command::Get(needs_arg("query")?)),
            "list" | "ls" => Ok(Command::List),
            "reveal" => Ok(Command::Reveal),
            "delete" | "rm" => Ok(Command::Delete(needs_arg("service name")?)),
            "ttl" => Ok(Command::Ttl(secs(&needs_arg("seconds")?)?)),
            "count" => Ok(Command::Count),
            "status" => Ok(Command::Status),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(format!("unknown command {other:?} (try `help`)")),
        }
    }
}

/// Read commands from stdin until `quit` or EOF.
pub async fn run(vault: &Vault, user: UserId) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    println!("passportier shell for user {user} ({} sessions)", vault.session_backend());
    println!("type `help` for commands");

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await.context("reading stdin")? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(msg) => {
                println!("{msg}");
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }

        match execute(vault, user, command).await {
            Ok(()) => {}
            Err(e) => match e.downcast_ref::<VaultError>() {
                Some(vault_error) => println!("{}", describe(vault_error)),
                None => println!("error: {e:#}"),
            },
        }
    }

    if let Some(msg) = exit_lock_message(vault.lock(user).await) {
        println!("{msg}");
    }
    Ok(())
}

/// What to report after the lock attempted on the way out.
fn exit_lock_message(result: VaultResult<bool>) -> Option<String> {
    match result {
        Ok(true) => Some("session locked".into()),
        Ok(false) => None,
        Err(e) => {
            tracing::warn!(error = %e, "lock on exit failed");
            Some(format!(
                "could not lock on exit ({}); the session may stay open until it expires",
                describe(&e)
            ))
        }
    }
}

async fn execute(vault: &Vault, user: UserId, command: Command) -> Result<()> {
    match command {
        Command::Unlock(ttl) => {
            let passphrase = prompt_hidden("passphrase: ").await?;
            let applied = vault.unlock(user, &passphrase, ttl).await?;
            println!("unlocked for {}", format_duration(applied));
        }
        Command::Lock => {
            if vault.lock(user).await? {
                println!("locked");
            } else {
                println!("no open session");
            }
        }
        Command::Save(service) => {
            if !vault.is_unlocked(user).await? {
                return Err(VaultError::SessionNotFound.into());
            }
            let secret = prompt_hidden(&format!("secret for {service}: ")).await?;
            vault.save(user, &service, &secret).await?;
            println!("saved {}", service.trim());
        }
        Command::Get(query) => {
            let found = vault.get(user, &query).await?;
            println!("{}: {}", found.service_name, found.secret.expose_secret());
        }
        Command::List => {
            let records = vault.list(user).await?;
            if records.is_empty() {
                println!("no stored credentials");
            }
            for (i, record) in records.iter().enumerate() {
                println!("{:>3}. {}", i + 1, record.service_name);
            }
        }
        Command::Reveal => {
            let revealed = vault.reveal_all(user).await?;
            if revealed.is_empty() {
                println!("no stored credentials");
            }
            for item in revealed {
                match item.secret {
                    Ok(secret) => println!("{}: {}", item.service_name, secret.expose_secret()),
                    Err(e) => println!("{}: <{}>", item.service_name, describe(&e)),
                }
            }
        }
        Command::Delete(service) => {
            if vault.delete(user, &service).await? {
                println!("deleted {}", service.trim());
            } else {
                println!("nothing stored under {:?}", service.trim());
            }
        }
        Command::Ttl(ttl) => {
            let stored = vault.set_session_ttl(user, ttl).await?;
            println!("auto-lock after {} from the next unlock", format_duration(stored));
        }
        Command::Count => {
            println!("{} stored", vault.count(user).await?);
        }
        Command::Status => {
            let state = if vault.is_unlocked(user).await? { "unlocked" } else { "locked" };
            println!("{state}");
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
    Ok(())
}

/// Message for the person at the keyboard.
fn describe(e: &VaultError) -> String {
    match e {
        VaultError::SessionNotFound => "vault is locked; run `unlock` first".into(),
        VaultError::AuthenticationFailed => "wrong passphrase".into(),
        VaultError::NotFound => "nothing stored under that name".into(),
        VaultError::DataMalformed(_) => "stored entry is corrupt and cannot be opened".into(),
        other => format!("error: {other}"),
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    match secs {
        0 => format!("{}ms", d.as_millis()),
        s if s % 3600 == 0 => format!("{}h", s / 3600),
        s if s % 60 == 0 => format!("{}m", s / 60),
        s => format!("{s}s"),
    }
}

async fn prompt_hidden(prompt: &str) -> Result<SecretString> {
    let prompt = prompt.to_string();
    let input = tokio::task::spawn_blocking(move || rpassword::prompt_password(prompt))
        .await
        .context("prompt task failed")?
        .context("reading hidden input")?;
    Ok(SecretString::from(input))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse("unlock"), Ok(Command::Unlock(None)));
        assert_eq!(
            Command::parse("unlock 600"),
            Ok(Command::Unlock(Some(Duration::from_secs(600))))
        );
        assert_eq!(Command::parse("  LOCK "), Ok(Command::Lock));
        assert_eq!(Command::parse("ls"), Ok(Command::List));
        assert_eq!(
            Command::parse("ttl 60"),
            Ok(Command::Ttl(Duration::from_secs(60)))
        );
    }

    #[test]
    fn service_names_keep_inner_spaces_and_case() {
        assert_eq!(
            Command::parse("save Work Gmail"),
            Ok(Command::Save("Work Gmail".into()))
        );
        assert_eq!(
            Command::parse("delete   Old Bank  "),
            Ok(Command::Delete("Old Bank".into()))
        );
    }

    #[test]
    fn rejects_missing_and_bad_arguments() {
        assert!(Command::parse("get").is_err());
        assert!(Command::parse("save   ").is_err());
        assert!(Command::parse("unlock soon").is_err());
        assert!(Command::parse("ttl").is_err());
        assert!(Command::parse("frobnicate").is_err());
    }

    #[test]
    fn durations_read_naturally() {
        assert_eq!(format_duration(Duration::from_secs(1800)), "30m");
        assert_eq!(format_duration(Duration::from_secs(7200)), "2h");
        assert_eq!(format_duration(Duration::from_secs(90)), "90s");
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
    }

    #[test]
    fn exit_lock_failure_is_reported() {
        assert_eq!(exit_lock_message(Ok(true)).as_deref(), Some("session locked"));
        assert_eq!(exit_lock_message(Ok(false)), None);

        let msg = exit_lock_message(Err(VaultError::SessionBackend("redis down".into())))
            .expect("a failed lock must not be silent");
        assert!(msg.contains("could not lock"));
        assert!(msg.contains("redis down"));
    }

    #[test]
    fn user_errors_have_plain_messages() {
        assert_eq!(describe(&VaultError::AuthenticationFailed), "wrong passphrase");
        assert!(describe(&VaultError::SessionNotFound).contains("unlock"));
        assert!(describe(&VaultError::StorageFailed("disk".into())).contains("disk"));
    }
}
