//! # relay-cli
//!
//! The `relay` binary: provision topics and subscriptions, publish JSON
//! payloads and listen on a subscription, against either the Pub/Sub emulator
//! or the in-process broker.

pub mod app;
pub mod cli;
pub mod error;
pub mod signal;

pub use app::App;
pub use cli::{Args, Commands};
pub use error::{CliError, Result};
