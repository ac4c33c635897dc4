//! One-time-passcode retrieval. Codes are deposited out-of-band into a
//! small git repository as `<category>/otp.txt`; each poll attempt does a
//! fresh shallow clone so a previous cycle's code is never re-read.
use crate::model::AuthFailure;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

/// A pollable store of per-category one-time passcodes. One `fetch` call
/// is one isolated read; `Ok(None)` means the code is not there yet.
#[async_trait]
pub trait OtpSource: Send + Sync {
    async fn fetch(&self, category: &str) -> Result<Option<String>>;
}

/// Retry policy for the OTP poll loop. The wait precedes every attempt,
/// giving the out-of-band side time to deposit the code.
#[derive(Debug, Clone, Copy)]
pub struct OtpPolicy {
    pub attempts: u32,
    pub wait: Duration,
}

/// Poll `source` until a code appears or attempts are exhausted.
pub async fn poll_otp(
    source: &dyn OtpSource,
    category: &str,
    policy: OtpPolicy,
) -> Result<String, AuthFailure> {
    for attempt in 1..=policy.attempts {
        info!(attempt, total = policy.attempts, category, "waiting for otp");
        tokio::time::sleep(policy.wait).await;
        match source.fetch(category).await {
            Ok(Some(code)) => {
                info!(attempt, category, "otp retrieved");
                return Ok(code);
            }
            Ok(None) => {}
            Err(err) => warn!(?err, attempt, category, "otp fetch attempt failed"),
        }
    }
    Err(AuthFailure::OtpTimeout {
        attempts: policy.attempts,
    })
}

/// OTP source backed by a git repository cloned with the system `git`.
pub struct GitOtpSource {
    repo_url: String,
    work_dir: PathBuf,
}

impl GitOtpSource {
    pub fn new(repo_url: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_url: repo_url.into(),
            work_dir: work_dir.into(),
        }
    }

    async fn clone_fresh(&self) -> Result<()> {
        // The scratch checkout must not survive between attempts.
        if tokio::fs::try_exists(&self.work_dir).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&self.work_dir)
                .await
                .with_context(|| {
                    format!("failed to clear otp scratch dir {}", self.work_dir.display())
                })?;
        }
        let status = Command::new("git")
            .arg("clone")
            .arg("--depth")
            .arg("1")
            .arg("--quiet")
            .arg(&self.repo_url)
            .arg(self.work_dir.as_os_str())
            .kill_on_drop(true)
            .status()
            .await
            .context("failed to spawn git clone")?;
        if !status.success() {
            return Err(anyhow!("git clone exited with status {}", status));
        }
        Ok(())
    }
}

#[async_trait]
impl OtpSource for GitOtpSource {
    async fn fetch(&self, category: &str) -> Result<Option<String>> {
        self.clone_fresh().await?;
        let otp_path = self.work_dir.join(category).join("otp.txt");
        let code = read_code(&otp_path).await;
        // Discard the checkout right away; the next attempt re-clones.
        if let Err(err) = tokio::fs::remove_dir_all(&self.work_dir).await {
            warn!(?err, dir = %self.work_dir.display(), "failed to clean otp scratch dir");
        }
        Ok(code)
    }
}

async fn read_code(path: &Path) -> Option<String> {
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    let code = raw.trim();
    if code.is_empty() {
        None
    } else {
        Some(code.to_string())
    }
}
