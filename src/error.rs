use std::time::Duration;

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("creating net listener: {0}")]
    Bind(#[source] std::io::Error),

    #[error("serving control server: {0}")]
    Serve(#[source] std::io::Error),

    #[error("control server is already serving")]
    AlreadyServing,

    #[error("control server did not drain within {0:?}; in-flight requests abandoned")]
    ShutdownTimedOut(Duration),

    #[error("building authed client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    #[error("auth token is not a valid header value")]
    InvalidToken,

    #[error("making request: {0}")]
    Request(#[source] reqwest::Error),

    #[error("unexpected status code: {0}")]
    UnexpectedStatus(StatusCode),

    #[error("{0} is required")]
    MissingEnv(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("starting desktop process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("parent process exited")]
    ParentExited,

    #[error("could not connect to parent after {attempts} attempts")]
    ParentUnreachable { attempts: u32 },
}
