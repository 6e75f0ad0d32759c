//! GMP client over the gvmd Unix socket
//!
//! One `GmpClient` is one authenticated session. It is opened once at process
//! start (or lazily on the first request when built with `GmpClient::new`),
//! shared by reference, and closed explicitly at shutdown. If the socket
//! breaks or a request times out, the connection is dropped and the next
//! request reconnects and re-authenticates. The failed request itself is not
//! retried here; retry policy belongs to the caller.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use vulnwatch_core::{Error, Result};

use crate::engine::ScanEngine;
use crate::protocol::{self, DocumentFrame};
use crate::types::{GmpConfig, NewTask, TaskInfo};

const READ_CHUNK: usize = 64 * 1024;

/// Authenticated GMP session
pub struct GmpClient {
    config: GmpConfig,
    conn: Mutex<Option<UnixStream>>,
}

impl GmpClient {
    /// Client without a connection; the first request opens the session
    pub fn new(config: GmpConfig) -> Self {
        Self {
            config,
            conn: Mutex::new(None),
        }
    }

    /// Open a session: connect and authenticate
    pub async fn connect(config: GmpConfig) -> Result<Self> {
        info!("Connecting to gvmd at {}", config.socket_path.display());
        let stream = open_session(&config).await?;
        Ok(Self {
            config,
            conn: Mutex::new(Some(stream)),
        })
    }

    /// Close the session
    pub async fn close(&self) {
        if let Some(mut stream) = self.conn.lock().await.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Error closing gvmd socket: {}", e);
            }
            info!("GMP session closed");
        }
    }

    /// Send one command and return the raw reply
    async fn request(&self, command: &str, xml: &str) -> Result<String> {
        let mut guard = self.conn.lock().await;

        if guard.is_none() {
            info!("Opening GMP session to {}", self.config.socket_path.display());
            *guard = Some(open_session(&self.config).await?);
        }
        let Some(stream) = guard.as_mut() else {
            return Err(Error::engine(command, "no connection"));
        };

        trace!("GMP -> {}", command);
        match exchange(stream, xml, self.config.request_timeout).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                warn!("GMP {} failed, dropping connection: {}", command, e);
                *guard = None;
                Err(Error::engine(command, e))
            }
        }
    }
}

async fn open_session(config: &GmpConfig) -> Result<UnixStream> {
    let mut stream = timeout(
        config.request_timeout,
        UnixStream::connect(&config.socket_path),
    )
    .await
    .map_err(|_| Error::engine("connect", "timed out"))?
    .map_err(|e| {
        Error::engine(
            "connect",
            format!("{}: {}", config.socket_path.display(), e),
        )
    })?;

    let reply = exchange(
        &mut stream,
        &protocol::authenticate(&config.username, &config.password),
        config.request_timeout,
    )
    .await
    .map_err(|e| Error::engine("authenticate", e))?;

    let response = protocol::parse_response(&reply)?;
    if !response.is_success() {
        return Err(Error::Authentication(format!(
            "{} {}",
            response.status, response.status_text
        )));
    }

    debug!("Authenticated to gvmd as {}", config.username);
    Ok(stream)
}

/// Write a command and read until the reply element is complete
async fn exchange(
    stream: &mut UnixStream,
    xml: &str,
    limit: Duration,
) -> std::result::Result<String, String> {
    let io = async {
        stream
            .write_all(xml.as_bytes())
            .await
            .map_err(|e| format!("write failed: {}", e))?;

        let mut reply = DocumentFrame::new();
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let n = stream
                .read(&mut chunk)
                .await
                .map_err(|e| format!("read failed: {}", e))?;
            if n == 0 {
                return Err("connection closed by gvmd".to_string());
            }
            if reply.push(&chunk[..n]) {
                break;
            }
        }

        String::from_utf8(reply.into_bytes()).map_err(|e| format!("reply is not UTF-8: {}", e))
    };

    timeout(limit, io)
        .await
        .map_err(|_| format!("no reply within {:?}", limit))?
}

#[async_trait::async_trait]
impl ScanEngine for GmpClient {
    async fn create_target(
        &self,
        name: &str,
        hosts: &[String],
        port_list_id: &str,
    ) -> Result<String> {
        let reply = self
            .request(
                "create_target",
                &protocol::create_target(name, hosts, port_list_id),
            )
            .await?;
        let id = protocol::created_id(&reply, "create_target")?;
        info!("Created target {} ({})", name, id);
        Ok(id)
    }

    async fn create_schedule(
        &self,
        name: &str,
        icalendar: &str,
        timezone: &str,
    ) -> Result<String> {
        let reply = self
            .request(
                "create_schedule",
                &protocol::create_schedule(name, icalendar, timezone),
            )
            .await?;
        let id = protocol::created_id(&reply, "create_schedule")?;
        info!("Created schedule {} ({})", name, id);
        Ok(id)
    }

    async fn create_task(&self, task: &NewTask<'_>) -> Result<String> {
        let reply = self
            .request("create_task", &protocol::create_task(task))
            .await?;
        let id = protocol::created_id(&reply, "create_task")?;
        info!("Created task {} ({})", task.name, id);
        Ok(id)
    }

    async fn get_task(&self, task_id: &str) -> Result<TaskInfo> {
        let reply = self
            .request("get_tasks", &protocol::get_task(task_id))
            .await?;
        protocol::parse_task(&reply, task_id)
    }

    async fn get_report(&self, report_id: &str, format_id: &str, filter: &str) -> Result<Vec<u8>> {
        let reply = self
            .request(
                "get_reports",
                &protocol::get_report(report_id, format_id, filter),
            )
            .await?;
        let bytes = protocol::parse_report(&reply)?;
        debug!("Report {} rendered: {} bytes", report_id, bytes.len());
        Ok(bytes)
    }

    async fn delete_task(&self, task_id: &str) -> Result<()> {
        let reply = self
            .request("delete_task", &protocol::delete_task(task_id))
            .await?;
        protocol::expect_success(&reply, "delete_task")?;
        info!("Deleted task {}", task_id);
        Ok(())
    }
}
