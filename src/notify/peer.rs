//! The user's own mail client: is it running, and starting it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

#[async_trait]
pub trait PeerProbe: Send + Sync {
    async fn is_running(&self) -> bool;
}

/// Looks for a process with an exact name via `pgrep -x`.
pub struct ProcessProbe {
    process_name: String,
}

impl ProcessProbe {
    pub fn new(process_name: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
        }
    }
}

#[async_trait]
impl PeerProbe for ProcessProbe {
    async fn is_running(&self) -> bool {
        if self.process_name.is_empty() {
            return false;
        }

        let status = Command::new("pgrep")
            .arg("-x")
            .arg(&self.process_name)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) => status.success(),
            Err(e) => {
                tracing::debug!("pgrep unavailable, assuming {} is not running: {}", self.process_name, e);
                false
            }
        }
    }
}

/// Start the mail client. An empty command hands `mailto:` to the desktop's
/// default handler instead.
pub async fn launch_client(command: &str) -> Result<()> {
    let mut parts = command.split_whitespace();

    let Some(program) = parts.next() else {
        return tokio::task::spawn_blocking(|| open::that("mailto:"))
            .await
            .context("Launcher task panicked")?
            .context("Failed to open the default mail handler");
    };

    let mut child = Command::new(program)
        .args(parts)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to start {}", program))?;

    tracing::info!("Started {}", program);

    // Reap it whenever it exits.
    tokio::spawn(async move {
        let _ = child.wait().await;
    });
    Ok(())
}
