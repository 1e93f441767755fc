use std::{env, process, sync::Arc, time::Duration};

use runner_ipc::{
    action::{MenuAction, ACTION_METHOD},
    config::RunnerConfig,
    error::RunnerError,
    server::{ControlServer, RECHECK_METHOD},
    services::{
        monitor_parent, ChannelMessenger, CheckInSchedule, DesktopProcess, RunnerMessage,
    },
    RunnerClient,
};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const COMPANION_ARG: &str = "companion";
const DESKTOP_CLIENT_KEY: &str = "desktop";
const PARENT_HEALTH_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() {
    let config = match RunnerConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("{error}");
            process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_directive()))
        .with_writer(std::io::stderr)
        .init();

    let result = match env::args().nth(1).as_deref() {
        Some(COMPANION_ARG) => run_companion().await,
        Some(other) => {
            eprintln!("unknown mode {other:?}; expected no arguments or `{COMPANION_ARG}`");
            process::exit(2);
        }
        None => run_owner(config).await,
    };

    if let Err(error) = result {
        eprintln!("{error}");
        process::exit(1);
    }
}

async fn run_owner(config: RunnerConfig) -> Result<(), RunnerError> {
    let schedule = CheckInSchedule::new(config.check_in_interval);
    let (messenger, mut messages) = ChannelMessenger::new();

    let server = Arc::new(
        ControlServer::new(Arc::new(schedule.clone()), Arc::new(messenger)).await?,
    );
    info!(url = %server.url(), "runner control server started");

    let mut serving = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.serve().await }
    });

    let desktop = match &config.companion_bin {
        Some(executable) => {
            let args = [COMPANION_ARG.to_string()];
            match DesktopProcess::spawn(&server, DESKTOP_CLIENT_KEY, executable, &args).await {
                Ok(process) => Some(process),
                Err(error) => {
                    error!(%error, executable = %executable.display(), "could not start desktop process");
                    None
                }
            }
        }
        None => None,
    };

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut interval_changes = schedule.subscribe();
    let mut next_check_in = Instant::now() + schedule.current_interval();
    log_check_in_tick(&schedule);

    let serve_finished = loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("received interrupt, shutting down");
                break false;
            }
            joined = &mut serving => {
                match joined {
                    Ok(Ok(())) => warn!("control server closed unexpectedly"),
                    Ok(Err(error)) => error!(%error, "control server failed"),
                    Err(error) => error!(%error, "control server task failed"),
                }
                break true;
            }
            Some(message) = messages.recv() => {
                if handle_message(&message) {
                    log_check_in_tick(&schedule);
                    next_check_in = Instant::now() + schedule.current_interval();
                }
            }
            _ = sleep_until(next_check_in) => {
                log_check_in_tick(&schedule);
                next_check_in = Instant::now() + schedule.current_interval();
            }
            Ok(()) = interval_changes.changed() => {
                let interval = *interval_changes.borrow_and_update();
                next_check_in = next_check_in.min(Instant::now() + interval);
                debug!(interval = ?interval, "check-in interval changed");
            }
        }
    };

    if let Some(desktop) = desktop {
        desktop.stop().await;
    }

    let drained = server.shutdown(config.shutdown_timeout).await;
    if !serve_finished {
        match serving.await {
            Ok(Err(error)) => error!(%error, "control server failed"),
            Err(error) => error!(%error, "control server task failed"),
            Ok(Ok(())) => {}
        }
    }
    drained
}

/// Handles a message forwarded by the control server. Returns true when it asks for an
/// immediate check-in.
fn handle_message(message: &RunnerMessage) -> bool {
    match message.method.as_str() {
        RECHECK_METHOD => {
            info!(received_at = %message.received_at, "recheck requested");
            true
        }
        ACTION_METHOD => {
            match MenuAction::from_value(message.params.clone()) {
                Ok(MenuAction::RefreshMenu) => info!("refreshing menu"),
                Ok(MenuAction::OpenUrl { url }) => info!(%url, "opening url from menu action"),
                Ok(MenuAction::Unknown) => debug!(params = %message.params, "ignoring unknown menu action"),
                Err(error) => warn!(%error, "could not decode menu action"),
            }
            false
        }
        other => {
            debug!(method = other, "ignoring message with unknown method");
            false
        }
    }
}

/// Marks a tick of the check-in loop. The control request itself belongs to the embedding
/// agent; this binary only drives the schedule.
fn log_check_in_tick(schedule: &CheckInSchedule) {
    debug!(interval = ?schedule.current_interval(), "checking in");
}

async fn run_companion() -> Result<(), RunnerError> {
    let client = RunnerClient::from_env(PARENT_HEALTH_INTERVAL)?;
    info!(url = client.base_url(), "desktop companion started");

    if let Err(error) = client.menu_opened().await {
        warn!(%error, "could not notify runner that menu opened");
    }

    tokio::select! {
        reason = monitor_parent(&client, PARENT_HEALTH_INTERVAL) => {
            info!(%reason, "desktop companion exiting");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt, desktop companion exiting");
        }
    }

    Ok(())
}
