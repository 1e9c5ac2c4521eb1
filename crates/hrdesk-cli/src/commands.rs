use std::io::{self, BufRead, Write};

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::debug;

use hrdesk_core::{ApiClient, ApiError, Config};

/// PIN entry attempts before giving up
const MAX_PIN_ATTEMPTS: u32 = 3;

/// PINs are exactly this many digits
const PIN_LENGTH: usize = 6;

pub fn print_usage() {
    eprintln!(
        "Usage: hrdesk <command> [args]

Commands:
  login [username]        Sign in (demo@acme.co / password works offline)
  logout                  Sign out and erase stored credentials
  status                  Show the current session
  unlock                  Check the PIN or biometrics for this device
  pin                     Set or change the unlock PIN
  biometrics on|off       Enable or disable biometric unlock
  get <path>              GET an API path
  post <path> <json>      POST a JSON body
  put <path> <json>       PUT a JSON body
  delete <path>           DELETE an API path"
    );
}

pub async fn run(command: &str, args: &[String], client: &ApiClient, config: &mut Config) -> Result<()> {
    match command {
        "login" => login(client, config, args.first().map(String::as_str)).await,
        "logout" => {
            client.logout().await?;
            println!("Signed out.");
            Ok(())
        }
        "status" => status(client).await,
        "unlock" => {
            ensure_unlocked(client).await?;
            println!("Unlocked.");
            Ok(())
        }
        "pin" => set_pin(client).await,
        "biometrics" => biometrics(client, args.first().map(String::as_str)).await,
        "get" | "delete" => {
            let path = required(args, 0, "path")?;
            ensure_unlocked(client).await?;
            let value: Value = if command == "get" {
                client.get(path).await
            } else {
                client.delete(path).await
            }
            .map_err(user_facing)?;
            print_json(&value)
        }
        "post" | "put" => {
            let path = required(args, 0, "path")?;
            let body: Value = serde_json::from_str(required(args, 1, "json body")?)
                .context("Request body is not valid JSON")?;
            ensure_unlocked(client).await?;
            let value: Value = if command == "post" {
                client.post(path, &body).await
            } else {
                client.put(path, &body).await
            }
            .map_err(user_facing)?;
            print_json(&value)
        }
        other => {
            print_usage();
            bail!("Unknown command: {}", other)
        }
    }
}

async fn login(client: &ApiClient, config: &mut Config, username: Option<&str>) -> Result<()> {
    let username = match username {
        Some(u) => u.to_string(),
        None => prompt_line("Username", config.last_username.as_deref())?,
    };
    if username.is_empty() {
        bail!("Username is required");
    }
    let password = rpassword::prompt_password("Password: ")?;

    let user = client.login(&username, &password).await.map_err(user_facing)?;
    println!("Signed in as {} ({}).", user.name, user.role_display());

    config.last_username = Some(username);
    if let Err(e) = config.save() {
        debug!(error = %e, "Failed to save config");
    }

    if !client.session().snapshot().await.has_pin {
        println!("Tip: run `hrdesk pin` to protect this device with a PIN.");
    }
    Ok(())
}

async fn status(client: &ApiClient) -> Result<()> {
    let state = client.session().snapshot().await;
    let Some(user) = state.user.as_ref().filter(|_| state.is_authenticated()) else {
        println!("Not signed in.");
        return Ok(());
    };

    println!("Signed in as {} <{}> ({})", user.name, user.email, user.role_display());
    println!("PIN:        {}", if state.has_pin { "set" } else { "not set" });
    println!("Biometrics: {}", if state.biometry_enabled { "enabled" } else { "disabled" });
    println!("Locked:     {}", if state.is_locked() { "yes" } else { "no" });
    if state.refresh_token.is_none() {
        println!("Session cannot be renewed; sign in again when it expires.");
    }
    if let Some(at) = state.refreshed_at {
        println!("Renewed:    {}", at.format("%Y-%m-%d %H:%M UTC"));
    }
    Ok(())
}

async fn set_pin(client: &ApiClient) -> Result<()> {
    ensure_unlocked(client).await?;

    let pin = rpassword::prompt_password("New PIN: ")?;
    let pin = pin.trim();
    if pin.len() != PIN_LENGTH || !pin.chars().all(|c| c.is_ascii_digit()) {
        bail!("PIN must be {} digits", PIN_LENGTH);
    }
    let confirm = rpassword::prompt_password("Confirm PIN: ")?;
    if confirm.trim() != pin {
        bail!("PINs do not match");
    }

    let session = client.session();
    session.set_pin(pin).await?;
    session.set_unlocked(true).await;
    println!("PIN saved.");
    Ok(())
}

async fn biometrics(client: &ApiClient, toggle: Option<&str>) -> Result<()> {
    let session = client.session();
    match toggle {
        Some("on") => {
            ensure_unlocked(client).await?;
            if !session.is_biometrics_available().await {
                bail!("Biometric unlock is not available on this device");
            }
            if session.enable_biometrics().await {
                println!("Biometric unlock enabled.");
                Ok(())
            } else {
                bail!("Biometric unlock could not be enabled")
            }
        }
        Some("off") => {
            ensure_unlocked(client).await?;
            session.disable_biometrics().await?;
            println!("Biometric unlock disabled.");
            Ok(())
        }
        _ => bail!("Usage: hrdesk biometrics on|off"),
    }
}

/// Require a session and pass the PIN/biometric gate.
async fn ensure_unlocked(client: &ApiClient) -> Result<()> {
    let session = client.session();
    let state = session.snapshot().await;
    if !state.is_authenticated() {
        bail!("You are not signed in. Run `hrdesk login` first.");
    }
    if state.is_unlocked {
        return Ok(());
    }
    if state.biometry_enabled && session.unlock_with_biometrics().await {
        return Ok(());
    }

    for attempt in 1..=MAX_PIN_ATTEMPTS {
        let pin = rpassword::prompt_password("PIN: ")?;
        if session.verify_pin(pin.trim()).await? {
            return Ok(());
        }
        eprintln!("Incorrect PIN ({} of {}).", attempt, MAX_PIN_ATTEMPTS);
    }
    bail!("Too many incorrect PIN attempts.")
}

fn user_facing(err: ApiError) -> anyhow::Error {
    debug!(error = %err, "Request failed");
    anyhow::anyhow!(err.user_message())
}

fn required<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("Missing argument: {}", name))
}

fn prompt_line(label: &str, default: Option<&str>) -> Result<String> {
    match default {
        Some(d) => print!("{} [{}]: ", label, d),
        None => print!("{}: ", label),
    }
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let line = line.trim();
    Ok(if line.is_empty() {
        default.unwrap_or_default().to_string()
    } else {
        line.to_string()
    })
}

fn print_json(value: &Value) -> Result<()> {
    if !value.is_null() {
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}
