use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, warn};

use crate::{client::RunnerClient, error::RunnerError};

const MAX_HEALTH_ERRORS: u32 = 3;

/// Polls the runner's health endpoint until the runner goes away.
///
/// Consecutive failures below the limit are retried on the next tick; a single success resets
/// the count. Only returns once the parent is gone or unreachable.
pub async fn monitor_parent(client: &RunnerClient, every: Duration) -> RunnerError {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut error_count = 0;

    loop {
        ticker.tick().await;

        if parent_exited() {
            error!("ppid is 0 or 1, exiting");
            return RunnerError::ParentExited;
        }

        let Err(err) = client.health().await else {
            error_count = 0;
            continue;
        };

        error_count += 1;
        if error_count < MAX_HEALTH_ERRORS {
            warn!(
                %err,
                attempts = error_count,
                max_attempts = MAX_HEALTH_ERRORS,
                "could not connect to parent, will retry"
            );
            continue;
        }

        error!(
            %err,
            attempts = error_count,
            max_attempts = MAX_HEALTH_ERRORS,
            "could not connect to parent, max attempts reached, exiting"
        );
        return RunnerError::ParentUnreachable {
            attempts: error_count,
        };
    }
}

#[cfg(unix)]
fn parent_exited() -> bool {
    // orphans are reparented to init (or the reaper at pid 0 in some sandboxes)
    std::os::unix::process::parent_id() < 2
}

#[cfg(not(unix))]
fn parent_exited() -> bool {
    false
}
