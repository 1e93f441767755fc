pub mod action;
pub mod client;
pub mod config;
pub mod error;
pub mod indexeddb;
pub mod server;
pub mod services;

use chrono::Utc;

pub use client::{AuthedClient, RunnerClient};
pub use config::{CompanionEnv, RunnerConfig};
pub use error::RunnerError;
pub use indexeddb::{Comparator, IdbCmp1Comparator};
pub use server::{ControlServer, ServerState};

pub(crate) fn now_iso() -> String {
    Utc::now().to_rfc3339()
}
