//! veilchat Client
//!
//! End-to-end encryption for one-to-one chat. Components, leaf first:
//!
//! - [`key_store`]: durable storage of the local private key
//! - [`directory`]: publishing and looking up public keys, with a TTL cache,
//!   per-attempt timeouts and retry
//! - [`EncryptionService`]: the orchestrator; owns the key pair lifecycle and
//!   produces and consumes [`EncryptedEnvelope`]s
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │               EncryptionService               │
//! │  initialize / encrypt / decrypt / rotate      │
//! └──────┬──────────────────┬──────────────┬──────┘
//!        │                  │              │
//! ┌──────▼──────┐  ┌────────▼─────────┐  ┌─▼──────────────┐
//! │  KeyStore   │  │KeyDirectoryClient│  │ CryptoProvider │
//! │ memory/redb │  │  cache + retry   │  │  KeyValidator  │
//! └─────────────┘  └────────┬─────────┘  └────────────────┘
//!                           │
//!                  ┌────────▼─────────┐
//!                  │   KeyDirectory   │
//!                  │ http / memory    │
//!                  └──────────────────┘
//! ```
//!
//! Nothing is global: the caller builds the store, the directory and the
//! environment and hands them to [`EncryptionService::new`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod directory;
mod error;
pub mod key_store;
mod service;
mod system_env;

pub use config::{DirectoryClientConfig, ServiceConfig};
pub use directory::{
    ChaoticKeyDirectory, Credential, DirectoryError, FetchedKey, HttpDirectoryConfig,
    HttpKeyDirectory, KeyDirectory, KeyDirectoryClient, MemoryKeyDirectory,
};
pub use error::{E2eeError, ErrorKind, SignatureFailure};
pub use key_store::{KeyStore, MemoryKeyStore, RedbKeyStore, StorageError, StoredKey};
pub use service::{Authenticity, DecryptedMessage, EncryptionService, ServiceState, Status};
pub use system_env::SystemEnv;
pub use veilchat_core::{EncryptedEnvelope, Environment, RetryPolicy, SimEnv, WireMessage};
