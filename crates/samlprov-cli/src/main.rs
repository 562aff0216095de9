//! samlprov - configure SAML application push provisioning from the command line.
//!
//! Settings come from `~/.config/samlprov/config.json` and `OKTA_*`
//! environment variables (a `.env` file is honoured). Secrets come from the
//! environment, the OS keychain, or an interactive prompt.

use std::io;

use anyhow::{Context, Result};
use samlprov_core::{
    Config, DirectoryClient, Governor, ProviderSettings, ProvisionError, Provisioner, Secrets,
};
use secrecy::{ExposeSecret, SecretString};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// Constants
// ============================================================================

/// Directory for daily log files; file logging is off when unset
const LOG_DIR_ENV: &str = "SAMLPROV_LOG_DIR";

const LOG_FILE_PREFIX: &str = "samlprov.log";

const ENV_ACCESS_KEY: &str = "AWS_ACCESS_KEY_ID";
const ENV_SECRET_KEY: &str = "AWS_SECRET_ACCESS_KEY";

const USAGE: &str = "\
Usage: samlprov <command> <app-id>

Commands:
  set <app-id>       Enable push provisioning using AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY
  revoke <app-id>    Disable push provisioning and clear the stored keys
  status <app-id>    Show whether push provisioning is enabled
  metadata <app-id>  Print the application's SAML metadata
  help               Show this message";

#[derive(Debug, PartialEq)]
enum Command {
    Set(String),
    Revoke(String),
    Status(String),
    Metadata(String),
    Help,
}

impl Command {
    fn parse(args: &[String]) -> Result<Self> {
        let mut args = args.iter().map(String::as_str);
        let name = args.next().unwrap_or("help");

        if matches!(name, "help" | "--help" | "-h") {
            return Ok(Command::Help);
        }

        let app_id = args
            .next()
            .filter(|id| !id.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Missing <app-id>\n\n{}", USAGE))?;
        if let Some(extra) = args.next() {
            anyhow::bail!("Unexpected argument {:?}\n\n{}", extra, USAGE);
        }

        match name {
            "set" => Ok(Command::Set(app_id)),
            "revoke" => Ok(Command::Revoke(app_id)),
            "status" => Ok(Command::Status(app_id)),
            "metadata" => Ok(Command::Metadata(app_id)),
            other => anyhow::bail!("Unknown command {:?}\n\n{}", other, USAGE),
        }
    }

    /// Whether the command drives the admin console.
    fn uses_console(&self) -> bool {
        matches!(self, Command::Set(_) | Command::Revoke(_))
    }
}

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var_os(LOG_DIR_ENV) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::parse(&args)?;
    if command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    let _guard = init_tracing();

    let settings = load_settings(command.uses_console())?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            trigger.cancel();
        }
    });

    run(command, &settings, cancel).await?;
    Ok(())
}

fn load_settings(uses_console: bool) -> Result<ProviderSettings> {
    let mut config = Config::load()?;
    config.apply_env()?;

    let mut secrets = Secrets::gather(config.username.as_deref());
    if secrets.password.is_none() {
        secrets.password = Some(if uses_console {
            let prompt = format!(
                "Password for {}: ",
                config.username.as_deref().unwrap_or("admin")
            );
            let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
            SecretString::from(password)
        } else {
            // Read-only commands never reach the console
            SecretString::from(String::new())
        });
    }

    config.resolve(secrets)
}

async fn run(
    command: Command,
    settings: &ProviderSettings,
    cancel: CancellationToken,
) -> Result<(), ProvisionError> {
    match command {
        Command::Set(app_id) => {
            let access_key = aws_key(ENV_ACCESS_KEY)?;
            let secret_key = aws_key(ENV_SECRET_KEY)?;
            let provisioner = Provisioner::new(settings, cancel)?;
            let app = provisioner
                .set(&app_id, access_key.expose_secret(), secret_key.expose_secret())
                .await?;
            println!("Push provisioning enabled for {} ({})", app.label, app.id);
        }
        Command::Revoke(app_id) => {
            let provisioner = Provisioner::new(settings, cancel)?;
            let app = provisioner.revoke(&app_id).await?;
            println!("Push provisioning disabled for {} ({})", app.label, app.id);
        }
        Command::Status(app_id) => {
            let provisioner = Provisioner::new(settings, cancel)?;
            let state = provisioner.status(&app_id).await?;
            println!("{}: push provisioning {}", app_id, state);
        }
        Command::Metadata(app_id) => {
            let governor = Governor::with_cancellation(settings.request_policy(), cancel);
            let client =
                DirectoryClient::new(settings.endpoints.clone(), settings.api_key.clone(), governor)?;
            let app = client
                .application(&app_id)
                .await?
                .ok_or_else(|| ProvisionError::NotFound(format!("application {}", app_id)))?;
            let key_id = app.signing_key_id().ok_or_else(|| {
                ProvisionError::NotFound(format!("signing key for application {}", app_id))
            })?;
            let metadata = client
                .saml_metadata(&app_id, key_id)
                .await?
                .ok_or_else(|| ProvisionError::NotFound(format!("metadata for application {}", app_id)))?;
            println!("{}", metadata);
        }
        Command::Help => {}
    }

    info!("Done");
    Ok(())
}

fn aws_key(var: &str) -> Result<SecretString, ProvisionError> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .map(SecretString::from)
        .ok_or_else(|| ProvisionError::Config(format!("{} is not set", var)))
}
