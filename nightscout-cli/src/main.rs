use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use nightscout_core::platform;
use nightscout_core::remote::NotificationPayload;
use nightscout_core::service::{http_transport_factory, ServiceDependencies};
use nightscout_core::{
    Clock, CommandStage, Credentials, FileStore, ManualClock, NightscoutService,
    RemoteAction, RemoteCommandDelegate, RemoteCommandError, ServiceConfig, SystemClock,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Nightscout remote data service CLI
#[derive(Parser)]
#[command(name = "nightscout")]
#[command(about = "OTP, credentials and remote commands for a Nightscout remote data service", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// State file holding credentials, the OTP secret and cached object ids
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Evaluate time-dependent commands at this Unix timestamp
    #[arg(long, global = true)]
    at: Option<i64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// One-time password operations
    #[command(subcommand)]
    Otp(OtpCommand),

    /// Manage Nightscout site credentials
    #[command(subcommand)]
    Credentials(CredentialsCommand),

    /// Check the configured site accepts the API secret
    Verify,

    /// Run a push notification payload (JSON file) through the command pipeline
    Notify {
        payload: PathBuf,
    },
}

#[derive(Subcommand)]
enum OtpCommand {
    /// Print the current code
    Current,

    /// Print the last N codes, oldest first
    History { count: usize },

    /// Print the otpauth:// provisioning URL
    Url,

    /// Generate a new secret, invalidating linked devices
    Reset,

    /// Validate and consume a code
    Validate { code: String },
}

#[derive(Subcommand)]
enum CredentialsCommand {
    Set {
        #[arg(long)]
        url: String,

        #[arg(long)]
        secret: String,
    },
    Show,
    Clear,
}

/// Prints dispatched actions instead of carrying them out.
struct LoggingDelegate;

#[async_trait]
impl RemoteCommandDelegate for LoggingDelegate {
    async fn handle_action(&self, action: RemoteAction) -> Result<(), RemoteCommandError> {
        println!("Accepted: {}", action.description());
        Ok(())
    }

    async fn report_error(
        &self,
        error: &RemoteCommandError,
        stage: CommandStage,
        _payload: &NotificationPayload,
    ) {
        println!("Rejected after {} stage: {}", stage, error);
    }
}

fn load_config(path: Option<&Path>) -> Result<ServiceConfig> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(platform::get_default_config_path);
    if !path.exists() {
        info!("No config at {}, using defaults", path.display());
        return Ok(ServiceConfig::default());
    }
    Ok(ServiceConfig::load(&path)?)
}

fn state_path(path: Option<PathBuf>) -> Result<PathBuf> {
    match path {
        Some(path) => Ok(path),
        None => {
            platform::ensure_data_dir().context("Failed to create data directory")?;
            Ok(platform::get_default_state_path())
        }
    }
}

fn open_service(
    config: ServiceConfig,
    store: Arc<FileStore>,
    clock: Arc<dyn Clock>,
) -> Result<NightscoutService> {
    let deps = ServiceDependencies {
        credential_store: store.clone(),
        secret_store: store.clone(),
        transport_factory: http_transport_factory(),
        clock,
    };
    let service = match store.service_state() {
        Some(raw_state) => NightscoutService::from_raw_state(config, deps, &raw_state)?,
        None => NightscoutService::new(config, deps),
    };
    Ok(service)
}

fn read_payload(path: &Path) -> Result<NotificationPayload> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    match serde_json::from_str(&content)? {
        serde_json::Value::Object(payload) => Ok(payload),
        _ => bail!("{} does not contain a JSON object", path.display()),
    }
}

fn run_otp(service: &NightscoutService, command: OtpCommand) -> Result<()> {
    let otp = service.otp_manager();
    match command {
        OtpCommand::Current => println!("{}", otp.current_password()?),
        OtpCommand::History { count } => {
            for password in otp.last_passwords_ascending(count)? {
                println!("{}", password);
            }
        }
        OtpCommand::Url => match otp.otp_url() {
            Some(url) => println!("{}", url),
            None => bail!("No OTP secret is provisioned"),
        },
        OtpCommand::Reset => {
            otp.reset_secret_key()?;
            println!("OTP secret reset; re-link any devices using the new URL");
        }
        OtpCommand::Validate { code } => match otp.validate_otp(&code) {
            Ok(()) => println!("Accepted"),
            Err(e) => bail!("Rejected: {}", e),
        },
    }
    Ok(())
}

fn run_credentials(service: &NightscoutService, command: CredentialsCommand) -> Result<()> {
    match command {
        CredentialsCommand::Set { url, secret } => {
            let credentials = Credentials::new(url, secret);
            if service.has_configuration() {
                service.complete_update(credentials)?;
            } else {
                service.complete_create(credentials)?;
            }
            println!("Credentials saved");
        }
        CredentialsCommand::Show => match service.credentials()? {
            Some(credentials) => {
                println!("Site URL:   {}", credentials.site_url);
                println!("API secret: (set)");
            }
            None => println!("Not configured"),
        },
        CredentialsCommand::Clear => {
            service.complete_delete()?;
            println!("Credentials cleared");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    let store = Arc::new(FileStore::open(state_path(cli.state)?)?);
    let clock: Arc<dyn Clock> = match cli.at {
        Some(timestamp) => Arc::new(ManualClock::at_timestamp(timestamp)),
        None => Arc::new(SystemClock),
    };
    let service = open_service(config, store.clone(), clock)?;

    let mut rejected = false;
    match cli.command {
        Commands::Otp(command) => run_otp(&service, command)?,
        Commands::Credentials(command) => run_credentials(&service, command)?,
        Commands::Verify => {
            service.verify_configuration().await?;
            println!("Nightscout site accepted the API secret");
        }
        Commands::Notify { payload } => {
            let payload = read_payload(&payload)?;
            let source = service.remote_command_source(Arc::new(LoggingDelegate));
            rejected = source
                .remote_notification_was_received(&payload)
                .await
                .is_err();
        }
    }

    store.set_service_state(Some(service.raw_state()?))?;
    if rejected {
        std::process::exit(1);
    }
    Ok(())
}
