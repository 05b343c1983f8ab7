//! Model server lifecycle.
//!
//! A summarization run needs a text-generation server. When one already
//! answers on the configured endpoint it is borrowed and left alone; when
//! nothing answers and `llm.manage_server` is enabled, the configured
//! command is spawned, awaited and stopped again once the run is over.

use crate::config::LlmConfig;
use crate::error::{PipelineError, Result};
use reqwest::Client;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::{Instant, sleep, timeout};
use tracing::{info, instrument, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub enum ModelServer {
    /// Someone else runs the server; release does nothing.
    Borrowed,
    /// Started by us; release stops the child.
    Owned(Child),
}

/// Any HTTP answer, whatever the status, means the server is up.
async fn reachable(client: &Client, endpoint: &str) -> bool {
    client.get(endpoint).send().await.is_ok()
}

/// Ask `pid` to shut down. Returns false when the signal could not be sent.
#[cfg(unix)]
async fn send_sigterm(pid: u32) -> bool {
    match Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .stderr(Stdio::null())
        .status()
        .await
    {
        Ok(status) if status.success() => true,
        Ok(status) => {
            warn!(pid, %status, "kill -TERM failed; falling back to a hard kill");
            false
        }
        Err(e) => {
            warn!(pid, error = %e, "Could not run kill; falling back to a hard kill");
            false
        }
    }
}

impl ModelServer {
    #[instrument(level = "info", skip_all, fields(endpoint = %config.endpoint))]
    pub async fn acquire(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder().timeout(PROBE_TIMEOUT).build()?;
        if reachable(&client, &config.endpoint).await {
            info!("Model server already running");
            return Ok(ModelServer::Borrowed);
        }
        if !config.manage_server {
            return Err(PipelineError::ModelServer(format!(
                "nothing answers on {}; start it (`ollama serve`) or set llm.manage_server",
                config.endpoint
            )));
        }

        let (program, args) = config.server_command.split_first().ok_or_else(|| {
            PipelineError::Config("llm.server_command is empty".to_string())
        })?;
        info!(command = ?config.server_command, "Starting model server");
        let mut child = Command::new(program)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PipelineError::ModelServer(format!("could not start {program}: {e}")))?;

        let deadline = Instant::now() + config.startup_timeout();
        loop {
            if let Some(status) = child.try_wait()? {
                return Err(PipelineError::ModelServer(format!(
                    "{program} exited during startup ({status})"
                )));
            }
            if reachable(&client, &config.endpoint).await {
                info!(pid = child.id(), "Model server is up");
                return Ok(ModelServer::Owned(child));
            }
            if Instant::now() >= deadline {
                let _ = child.kill().await;
                return Err(PipelineError::ModelServer(format!(
                    "model server did not answer within {}s",
                    config.startup_timeout
                )));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, ModelServer::Owned(_))
    }

    /// Stop the server if this run started it.
    #[instrument(level = "info", skip_all)]
    pub async fn release(self) -> Result<()> {
        let ModelServer::Owned(mut child) = self else {
            return Ok(());
        };

        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                if !send_sigterm(pid).await {
                    child.start_kill()?;
                }
            }
        }
        #[cfg(not(unix))]
        {
            child.start_kill()?;
        }

        match timeout(STOP_TIMEOUT, child.wait()).await {
            Ok(status) => {
                info!(status = ?status.ok(), "Model server stopped");
            }
            Err(_) => {
                warn!("Model server ignored SIGTERM; killing it");
                child.start_kill()?;
                child.wait().await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config(endpoint: String) -> LlmConfig {
        LlmConfig {
            endpoint,
            ..LlmConfig::default()
        }
    }

    #[tokio::test]
    async fn test_unreachable_without_management_fails() {
        let err = ModelServer::acquire(&config("http://127.0.0.1:9".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ModelServer(_)));
    }

    #[tokio::test]
    async fn test_running_server_is_borrowed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
                    .await;
            }
        });

        let server = ModelServer::acquire(&config(format!("http://{addr}")))
            .await
            .unwrap();
        assert!(!server.is_owned());
        server.release().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_startup_timeout_kills_child() {
        let llm = LlmConfig {
            endpoint: "http://127.0.0.1:9".to_string(),
            manage_server: true,
            server_command: vec!["sleep".to_string(), "30".to_string()],
            startup_timeout: 1,
            ..LlmConfig::default()
        };
        let err = ModelServer::acquire(&llm).await.unwrap_err();
        assert!(matches!(err, PipelineError::ModelServer(msg) if msg.contains("did not answer")));
    }

    /// Binds now but only starts answering after `delay`, so the first
    /// reachability check in `acquire` times out and the managed command gets spawned.
    async fn late_http_server(delay: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            sleep(delay).await;
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
                    .await;
            }
        });
        format!("http://{addr}")
    }

    #[cfg(unix)]
    async fn process_alive(pid: u32) -> bool {
        Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_started_server_is_owned_and_stopped() {
        let llm = LlmConfig {
            endpoint: late_http_server(PROBE_TIMEOUT + Duration::from_millis(500)).await,
            manage_server: true,
            server_command: vec!["sleep".to_string(), "60".to_string()],
            startup_timeout: 15,
            ..LlmConfig::default()
        };

        let server = ModelServer::acquire(&llm).await.unwrap();
        assert!(server.is_owned());
        let pid = match &server {
            ModelServer::Owned(child) => child.id().unwrap(),
            ModelServer::Borrowed => unreachable!(),
        };
        assert!(process_alive(pid).await);

        server.release().await.unwrap();
        assert!(!process_alive(pid).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sigterm_to_missing_process_reports_failure() {
        let mut gone = Command::new("true").spawn().unwrap();
        let pid = gone.id().unwrap();
        gone.wait().await.unwrap();
        assert!(!send_sigterm(pid).await);
    }

    #[tokio::test]
    async fn test_empty_command_is_config_error() {
        let llm = LlmConfig {
            endpoint: "http://127.0.0.1:9".to_string(),
            manage_server: true,
            server_command: Vec::new(),
            ..LlmConfig::default()
        };
        let err = ModelServer::acquire(&llm).await.unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
