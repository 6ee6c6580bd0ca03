//! External restore/replicate programs.
//!
//! Both hooks are shell commands invoked as
//! ```text
//! sh -c '<command> "$1" "$2"' sh <data_dir> <filename>
//! ```
//! with the server's stdout/stderr inherited.
//!
//! - restore: awaited before a store is opened; a failing exit aborts the open.
//! - replicate: dispatched in the background and never observed. At most
//!   `max_replicate_jobs` replicate processes run at once; the rest wait for a
//!   permit inside their own task, never in the caller.

use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Semaphore;

/// Hook errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HookError {
    #[error("Failed to spawn hook `{command}`: {reason}")]
    Spawn { command: String, reason: String },
    #[error("Hook `{command}` exited with {status}")]
    Failed { command: String, status: String },
}

/// Runs the configured hooks against files in one data directory.
#[derive(Clone)]
pub struct HookRunner {
    data_dir: PathBuf,
    restore: Option<String>,
    replicate: Option<String>,
    replicate_slots: Arc<Semaphore>,
}

impl HookRunner {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        restore: Option<String>,
        replicate: Option<String>,
        max_replicate_jobs: usize,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            restore: restore.filter(|c| !c.is_empty()),
            replicate: replicate.filter(|c| !c.is_empty()),
            replicate_slots: Arc::new(Semaphore::new(max_replicate_jobs.max(1))),
        }
    }

    /// No hooks configured.
    pub fn disabled(data_dir: impl Into<PathBuf>) -> Self {
        Self::new(data_dir, None, None, 1)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Replicate slots not held by a running hook. Clones share one pool.
    pub fn idle_replicate_slots(&self) -> usize {
        self.replicate_slots.available_permits()
    }

    /// Run the restore hook for `filename` and wait for it. No-op when unset.
    pub async fn restore(&self, filename: &str) -> Result<(), HookError> {
        let Some(command) = &self.restore else {
            return Ok(());
        };

        log::info!("Restoring {filename} with `{command}`");
        let status = hook_command(command, &self.data_dir, filename)
            .status()
            .await
            .map_err(|e| HookError::Spawn {
                command: command.clone(),
                reason: e.to_string(),
            })?;
        check_status(command, status)
    }

    /// Start the replicate hook for `filename` in the background.
    ///
    /// Returns whether a hook was dispatched. The outcome is only logged.
    pub fn replicate(&self, filename: &str) -> bool {
        let Some(command) = self.replicate.clone() else {
            return false;
        };

        let slots = self.replicate_slots.clone();
        let mut cmd = hook_command(&command, &self.data_dir, filename);
        let filename = filename.to_string();

        tokio::spawn(async move {
            let Ok(_permit) = slots.acquire_owned().await else {
                return;
            };
            log::debug!("Replicating {filename} with `{command}`");
            match cmd.status().await {
                Ok(status) if status.success() => {
                    log::debug!("Replicate hook for {filename} finished");
                }
                Ok(status) => log::warn!("Replicate hook for {filename} exited with {status}"),
                Err(e) => log::warn!("Replicate hook for {filename} failed to start: {e}"),
            }
        });

        true
    }
}

fn hook_command(command: &str, data_dir: &Path, filename: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(format!("{command} \"$1\" \"$2\""))
        .arg("sh")
        .arg(data_dir)
        .arg(filename);
    cmd
}

fn check_status(command: &str, status: ExitStatus) -> Result<(), HookError> {
    if status.success() {
        Ok(())
    } else {
        Err(HookError::Failed {
            command: command.to_string(),
            status: status.to_string(),
        })
    }
}
