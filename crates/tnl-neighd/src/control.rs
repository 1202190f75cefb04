//! Local control channel for administrative commands
//!
//! Requests are single text lines (`tnl/neigh/show`, `tnl/neigh/set BRIDGE
//! ADDRESS MAC`, ...). Every request gets exactly one JSON line back.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - AC-3: Access Enforcement - Unix socket file permissions gate access
//! - AU-3: Content of Audit Records - Failed requests logged with the command
//! - SC-7: Boundary Protection - Local socket only, no network listener

use crate::admin::AdminOps;
use crate::error::{Result, TnlNeighError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

/// Reply to one control request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlReply {
    pub success: bool,
    pub body: Option<String>,
    pub error: Option<String>,
}

impl ControlReply {
    pub fn ok(body: String) -> Self {
        Self {
            success: true,
            body: Some(body),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            body: None,
            error: Some(message),
        }
    }
}

impl From<Result<String>> for ControlReply {
    fn from(result: Result<String>) -> Self {
        match result {
            Ok(body) => Self::ok(body),
            Err(e) => Self::error(e.to_string()),
        }
    }
}

/// Unix socket server dispatching to [`AdminOps`].
#[derive(Debug)]
pub struct ControlServer {
    listener: UnixListener,
    path: PathBuf,
    admin: AdminOps,
}

impl ControlServer {
    /// Bind `path`, replacing a stale socket left by a previous run.
    pub fn bind(path: &Path, admin: AdminOps) -> Result<Self> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        info!(path = %path.display(), "Control socket listening");

        Ok(Self {
            listener,
            path: path.to_path_buf(),
            admin,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until the task is dropped or aborted.
    pub async fn serve(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => {
                    let admin = self.admin.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, admin).await {
                            error!(error = %e, "Control connection error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept control connection");
                }
            }
        }
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn handle_client(stream: UnixStream, admin: AdminOps) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        let command = line.trim().to_string();
        if command.is_empty() {
            continue;
        }
        debug!(%command, "Control request");

        // hostname resolution may block
        let admin = admin.clone();
        let request = command.clone();
        let result = tokio::task::spawn_blocking(move || admin.execute(&request))
            .await
            .map_err(|e| TnlNeighError::Io(std::io::Error::other(e)))?;

        if let Err(e) = &result {
            warn!(%command, error = %e, "Control request failed");
        }

        let mut reply = serde_json::to_string(&ControlReply::from(result))?;
        reply.push('\n');
        write_half.write_all(reply.as_bytes()).await?;
    }

    Ok(())
}

/// Send one command to a running daemon and wait for its reply.
pub async fn request(path: &Path, command: &str) -> Result<ControlReply> {
    let stream = UnixStream::connect(path).await?;
    let (read_half, mut write_half) = stream.into_split();

    write_half
        .write_all(format!("{}\n", command.trim()).as_bytes())
        .await?;

    let mut lines = BufReader::new(read_half).lines();
    let line = lines.next_line().await?.ok_or_else(|| {
        TnlNeighError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "control socket closed without a reply",
        ))
    })?;
    Ok(serde_json::from_str(&line)?)
}
