//! veilchat Core
//!
//! Runtime-independent building blocks shared by the client and the command
//! line front end:
//!
//! - [`Environment`]: time, sleep and randomness behind a trait, with
//!   [`SimEnv`] for deterministic tests
//! - [`RetryPolicy`]: the single bounded retry-with-backoff loop
//! - [`EncryptedEnvelope`] / [`WireMessage`]: message envelope and its
//!   transport form
//! - [`directory`]: key directory request and response records

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod directory;
pub mod env;
mod envelope;
mod error;
pub mod retry;
mod sim_env;

pub use directory::PublicKeyRecord;
pub use env::Environment;
pub use envelope::{EncryptedEnvelope, WireMessage};
pub use error::WireError;
pub use retry::RetryPolicy;
pub use sim_env::SimEnv;
