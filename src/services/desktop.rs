use std::{path::Path, process::Stdio, sync::Arc};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
    sync::oneshot,
    task::JoinHandle,
};
use tracing::{error, info, warn};

use crate::{config::CompanionEnv, error::RunnerError, server::ControlServer};

/// A desktop companion process launched by the runner.
///
/// The process is registered with the control server under `key` for as long as it runs;
/// its token is revoked as soon as it exits or is stopped.
pub struct DesktopProcess {
    key: String,
    pid: Option<u32>,
    stop_tx: Option<oneshot::Sender<()>>,
    exited: JoinHandle<()>,
}

impl DesktopProcess {
    pub async fn spawn(
        server: &Arc<ControlServer>,
        key: &str,
        executable: &Path,
        args: &[String],
    ) -> Result<Self, RunnerError> {
        let token = server.register_client(key).await;
        let bootstrap = CompanionEnv {
            server_url: server.url(),
            auth_token: token,
        };

        let mut child = match Command::new(executable)
            .args(args)
            .envs(bootstrap.vars())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(error) => {
                server.deregister_client(key).await;
                return Err(RunnerError::Spawn(error));
            }
        };

        let pid = child.id();
        info!(client_key = key, pid = ?pid, executable = %executable.display(), "started desktop process");

        if let Some(stdout) = child.stdout.take() {
            spawn_output_loop(key.to_string(), "stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_output_loop(key.to_string(), "stderr", stderr);
        }

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let wait_server = Arc::clone(server);
        let wait_key = key.to_string();
        let exited = tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = stop_rx => {
                    if let Err(error) = child.kill().await {
                        warn!(client_key = %wait_key, %error, "failed killing desktop process");
                    }
                    child.wait().await
                }
            };

            match status {
                Ok(status) => info!(client_key = %wait_key, %status, "desktop process exited"),
                Err(error) => {
                    error!(client_key = %wait_key, %error, "failed waiting for desktop process exit")
                }
            }

            wait_server.deregister_client(&wait_key).await;
        });

        Ok(Self {
            key: key.to_string(),
            pid,
            stop_tx: Some(stop_tx),
            exited,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Waits for the process to exit on its own. Its token is revoked by the time this returns.
    pub async fn wait(mut self) {
        let exited = &mut self.exited;
        if let Err(error) = exited.await {
            error!(client_key = %self.key, %error, "desktop process wait task failed");
        }
    }

    /// Kills the process and waits for its token to be revoked.
    pub async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        self.wait().await;
    }
}

fn spawn_output_loop<R>(key: String, stream: &'static str, output: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(output).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        info!(client_key = %key, stream, subprocess = "desktop", "{trimmed}");
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    warn!(client_key = %key, stream, %error, "desktop output read error");
                    break;
                }
            }
        }
    });
}
