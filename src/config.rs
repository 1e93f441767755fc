use std::{env, path::PathBuf, time::Duration};

use crate::error::RunnerError;

/// Environment variable carrying the control server base url into a companion process.
pub const RUNNER_SERVER_URL_ENV: &str = "RUNNER_SERVER_URL";
/// Environment variable carrying the bearer token issued to a companion process.
pub const RUNNER_SERVER_AUTH_TOKEN_ENV: &str = "RUNNER_SERVER_AUTH_TOKEN";

const DEFAULT_CHECK_IN_INTERVAL_SECS: u64 = 60;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub debug: bool,
    pub log_filter: Option<String>,
    pub check_in_interval: Duration,
    pub companion_bin: Option<PathBuf>,
    pub shutdown_timeout: Duration,
}

impl RunnerConfig {
    pub fn from_env() -> Result<Self, RunnerError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, RunnerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let debug = parse_bool(lookup("RUNNER_DEBUG"));
        let log_filter = non_empty(lookup("RUNNER_LOG"));

        let check_in_interval = Duration::from_secs(parse_u64(
            "RUNNER_CHECK_IN_INTERVAL_SECS",
            lookup("RUNNER_CHECK_IN_INTERVAL_SECS"),
            DEFAULT_CHECK_IN_INTERVAL_SECS,
        )?);
        let shutdown_timeout = Duration::from_secs(parse_u64(
            "RUNNER_SHUTDOWN_TIMEOUT_SECS",
            lookup("RUNNER_SHUTDOWN_TIMEOUT_SECS"),
            DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        )?);

        let companion_bin = non_empty(lookup("RUNNER_COMPANION_BIN")).map(PathBuf::from);

        Ok(Self {
            debug,
            log_filter,
            check_in_interval,
            companion_bin,
            shutdown_timeout,
        })
    }

    /// Filter directive handed to the tracing subscriber.
    pub fn log_directive(&self) -> String {
        match &self.log_filter {
            Some(filter) => filter.clone(),
            None if self.debug => "debug".to_string(),
            None => "info".to_string(),
        }
    }
}

/// Bootstrap values a companion process receives from the process that spawned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanionEnv {
    pub server_url: String,
    pub auth_token: String,
}

impl CompanionEnv {
    pub fn from_env() -> Result<Self, RunnerError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, RunnerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server_url = non_empty(lookup(RUNNER_SERVER_URL_ENV))
            .ok_or(RunnerError::MissingEnv(RUNNER_SERVER_URL_ENV))?;
        let auth_token = non_empty(lookup(RUNNER_SERVER_AUTH_TOKEN_ENV))
            .ok_or(RunnerError::MissingEnv(RUNNER_SERVER_AUTH_TOKEN_ENV))?;

        Ok(Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            auth_token,
        })
    }

    /// The `(name, value)` pairs to set on a spawned companion.
    pub fn vars(&self) -> [(&'static str, &str); 2] {
        [
            (RUNNER_SERVER_URL_ENV, self.server_url.as_str()),
            (RUNNER_SERVER_AUTH_TOKEN_ENV, self.auth_token.as_str()),
        ]
    }
}

fn parse_bool(value: Option<String>) -> bool {
    value
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn parse_u64(name: &'static str, value: Option<String>, fallback: u64) -> Result<u64, RunnerError> {
    match non_empty(value) {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| RunnerError::InvalidEnv { name, value: raw }),
        None => Ok(fallback),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
