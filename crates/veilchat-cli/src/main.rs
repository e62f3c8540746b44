//! veilchat command line client.
//!
//! Drives the end-to-end encryption service against a real key directory,
//! keeping the private key in a local redb file.
//!
//! # Usage
//!
//! ```bash
//! export VEILCHAT_DIRECTORY_URL=https://chat.example.com/api
//! export VEILCHAT_TOKEN=...
//!
//! # Create or load a key pair and publish it
//! veilchat --user alice init
//!
//! # Encrypt for bob; prints the wire JSON
//! veilchat --user alice encrypt --to bob "hello"
//!
//! # Decrypt a message from alice (use `-` to read it from stdin)
//! veilchat --user bob decrypt --from alice '{"content": ...}'
//! ```

use std::{
    io::{Read, Write},
    path::PathBuf,
    process::ExitCode,
    sync::Arc,
};

use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use veilchat_client::{
    Authenticity, Credential, DirectoryError, E2eeError, EncryptedEnvelope, EncryptionService,
    Environment, HttpDirectoryConfig, HttpKeyDirectory, KeyStore, RedbKeyStore, ServiceConfig,
    StorageError, SystemEnv,
};
use veilchat_core::WireError;
use veilchat_crypto::{KeyValidator, RsaAesProvider};

/// veilchat end-to-end encryption client
#[derive(Parser, Debug)]
#[command(name = "veilchat")]
#[command(about = "End-to-end encrypted messaging keys and envelopes")]
#[command(version)]
struct Args {
    /// Local user id
    #[arg(short, long, env = "VEILCHAT_USER")]
    user: String,

    /// Base URL of the key directory
    #[arg(long, env = "VEILCHAT_DIRECTORY_URL", default_value = "http://localhost:5000/api")]
    directory_url: String,

    /// Bearer token for the key directory
    #[arg(long, env = "VEILCHAT_TOKEN", hide_env_values = true)]
    token: String,

    /// Directory holding the local key store
    #[arg(long, env = "VEILCHAT_DATA_DIR", default_value = ".veilchat")]
    data_dir: PathBuf,

    /// RSA modulus size for newly generated keys
    #[arg(long, default_value = "2048")]
    key_bits: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load or create the key pair and publish it
    Init,
    /// Show the locally stored key without contacting the directory
    Status,
    /// Replace the key pair with a new version
    Rotate,
    /// Encrypt a message and print its wire JSON
    Encrypt {
        /// Recipient user id
        #[arg(long)]
        to: String,
        /// Message text
        message: String,
    },
    /// Decrypt a wire JSON message and print the plaintext
    Decrypt {
        /// Sender user id
        #[arg(long)]
        from: String,
        /// Wire JSON, or `-` for stdin
        message: String,
    },
    /// Forget the local key pair
    Logout,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    E2ee(#[from] E2eeError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("invalid message: {0}")]
    Wire(#[from] WireError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    fn user_message(&self) -> String {
        match self {
            Self::E2ee(error) => error.user_message().to_owned(),
            other => other.to_string(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "{}", error.user_message());
            ExitCode::FAILURE
        },
    }
}

async fn run(args: Args) -> Result<(), CliError> {
    std::fs::create_dir_all(&args.data_dir)?;
    let key_store = Arc::new(RedbKeyStore::open(args.data_dir.join("keys.redb"))?);
    let mut out = std::io::stdout().lock();

    match args.command {
        Command::Status => {
            let validator = KeyValidator::new(Arc::new(RsaAesProvider::new()));
            let mut rng = SystemEnv::new().crypto_rng();
            match key_store.load_validated(&args.user, &validator, &mut rng).await? {
                Some(pair) => {
                    writeln!(out, "user: {}", args.user)?;
                    writeln!(out, "key version: {}", pair.version())?;
                    writeln!(out, "fingerprint: {}", pair.public_key().fingerprint())?;
                },
                None => writeln!(out, "no usable key stored for {}", args.user)?,
            }
            return Ok(());
        },
        Command::Logout => {
            key_store.clear(&args.user).await?;
            writeln!(out, "local key removed for {}", args.user)?;
            return Ok(());
        },
        _ => {},
    }

    let directory = HttpKeyDirectory::new(&HttpDirectoryConfig::new(&args.directory_url))?;
    let config = ServiceConfig { modulus_bits: args.key_bits, ..ServiceConfig::default() };
    let service = EncryptionService::new(key_store, Arc::new(directory), SystemEnv::new(), config);
    let credential = Credential::new(args.token);
    service.initialize(&args.user, credential.clone()).await?;

    match args.command {
        Command::Init => {
            let status = service.status();
            writeln!(out, "user: {}", args.user)?;
            if let Some(version) = status.key_version {
                writeln!(out, "key version: {version}")?;
            }
            if let Some(key) = service.public_key() {
                writeln!(out, "fingerprint: {}", key.fingerprint())?;
            }
            if status.degraded {
                writeln!(out, "warning: the directory does not serve this key")?;
            }
        },
        Command::Rotate => {
            let version = service.rotate_keys(&args.user, credential).await?;
            writeln!(out, "key version: {version}")?;
        },
        Command::Encrypt { to, message } => {
            let envelope = service.encrypt_message(message.as_bytes(), &to).await?;
            writeln!(out, "{}", envelope.to_json()?)?;
        },
        Command::Decrypt { from, message } => {
            let json = if message == "-" {
                let mut buf = String::new();
                std::io::stdin().read_to_string(&mut buf)?;
                buf
            } else {
                message
            };
            let envelope = EncryptedEnvelope::from_json(&json)?;

            let decrypted = service.decrypt_message(&envelope, &from).await?;
            match &decrypted.authenticity {
                Authenticity::Verified { sender_key_version } => {
                    tracing::info!(from, sender_key_version, "signature verified");
                },
                Authenticity::Unverified(failure) => {
                    tracing::warn!(from, reason = %failure.reason, "{}", failure.user_message());
                },
                Authenticity::Plaintext => tracing::warn!(from, "message was not encrypted"),
            }
            out.write_all(&decrypted.plaintext)?;
            writeln!(out)?;
        },
        Command::Status | Command::Logout => {},
    }

    Ok(())
}
