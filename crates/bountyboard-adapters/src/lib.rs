//! Collaborator adapters for bountyboard: verifiers and fund-transfer backends.

#![deny(unsafe_code)]

use async_trait::async_trait;
use bountyboard_core::{
    EscrowError, Forfeiture, FundTransfer, Principal, Task, TaskId, TokenId, VaultError, Verdict,
    Verifier,
};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Artifact category a reference verifier checks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Image,
    Text,
    Code,
}

impl ArtifactKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Text => "text",
            Self::Code => "code",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
#[error("unknown artifact kind '{0}'")]
pub struct UnknownArtifactKind(String);

impl FromStr for ArtifactKind {
    type Err = UnknownArtifactKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "image" => Ok(Self::Image),
            "text" => Ok(Self::Text),
            "code" => Ok(Self::Code),
            other => Err(UnknownArtifactKind(other.to_string())),
        }
    }
}

/// Rule-based verifier for URL/IPFS solution references.
///
/// References must be `http(s)` or `ipfs://`. Images must look like an image
/// (`.png`, `.jpg`, or content-addressed on IPFS). Text and code pass once the
/// reference is well formed.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceVerifier {
    kind: ArtifactKind,
}

impl ReferenceVerifier {
    pub fn new(kind: ArtifactKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn check(&self, reference: &str) -> Verdict {
        if !reference.starts_with("http") && !reference.starts_with("ipfs://") {
            return Verdict::Rejected {
                reason: "Invalid URL format".to_string(),
            };
        }

        match self.kind {
            ArtifactKind::Image => {
                if reference.ends_with(".png")
                    || reference.ends_with(".jpg")
                    || reference.contains("ipfs")
                {
                    Verdict::Accepted {
                        score: 95,
                        note: None,
                    }
                } else {
                    Verdict::Rejected {
                        reason: "URL does not point to an image file".to_string(),
                    }
                }
            }
            ArtifactKind::Text | ArtifactKind::Code => Verdict::Accepted {
                score: 88,
                note: Some("Linting passed".to_string()),
            },
        }
    }
}

#[async_trait]
impl Verifier for ReferenceVerifier {
    async fn verify(&self, task: &Task, solution_reference: &str) -> Result<Verdict, EscrowError> {
        let verdict = self.check(solution_reference);
        debug!(task_id = %task.id(), kind = %self.kind, accepted = verdict.is_accepted(), "Reference checked");
        Ok(verdict)
    }
}

/// Wraps a backend and sleeps before every call, standing in for a remote ledger
/// with confirmation latency.
pub struct LatencyTransfer {
    inner: Arc<dyn FundTransfer>,
    delay: Duration,
}

impl LatencyTransfer {
    pub fn new(inner: Arc<dyn FundTransfer>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl FundTransfer for LatencyTransfer {
    async fn lock(
        &self,
        task_id: TaskId,
        from: &Principal,
        token: &TokenId,
        amount: u64,
    ) -> Result<(), VaultError> {
        tokio::time::sleep(self.delay).await;
        self.inner.lock(task_id, from, token, amount).await
    }

    async fn release(
        &self,
        task_id: TaskId,
        to: &Principal,
        token: &TokenId,
        amount: u64,
    ) -> Result<(), VaultError> {
        tokio::time::sleep(self.delay).await;
        self.inner.release(task_id, to, token, amount).await
    }

    async fn forfeit(
        &self,
        task_id: TaskId,
        token: &TokenId,
        amount: u64,
        sink: Option<&Principal>,
    ) -> Result<Forfeiture, VaultError> {
        tokio::time::sleep(self.delay).await;
        self.inner.forfeit(task_id, token, amount, sink).await
    }
}

/// Backend whose every call fails. Useful for failure-path testing.
#[derive(Debug, Clone)]
pub struct AlwaysFailTransfer {
    reason: String,
}

impl AlwaysFailTransfer {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn fail(&self) -> VaultError {
        VaultError::Transfer(self.reason.clone())
    }
}

#[async_trait]
impl FundTransfer for AlwaysFailTransfer {
    async fn lock(
        &self,
        _task_id: TaskId,
        _from: &Principal,
        _token: &TokenId,
        _amount: u64,
    ) -> Result<(), VaultError> {
        Err(self.fail())
    }

    async fn release(
        &self,
        _task_id: TaskId,
        _to: &Principal,
        _token: &TokenId,
        _amount: u64,
    ) -> Result<(), VaultError> {
        Err(self.fail())
    }

    async fn forfeit(
        &self,
        _task_id: TaskId,
        _token: &TokenId,
        _amount: u64,
        _sink: Option<&Principal>,
    ) -> Result<Forfeiture, VaultError> {
        Err(self.fail())
    }
}

/// Backend whose `lock` goes through to `inner` but whose payouts always fail,
/// standing in for a ledger that accepts deposits while withdrawals are halted.
pub struct PayoutOutageTransfer {
    inner: Arc<dyn FundTransfer>,
    reason: String,
}

impl PayoutOutageTransfer {
    pub fn new(inner: Arc<dyn FundTransfer>, reason: impl Into<String>) -> Self {
        Self {
            inner,
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl FundTransfer for PayoutOutageTransfer {
    async fn lock(
        &self,
        task_id: TaskId,
        from: &Principal,
        token: &TokenId,
        amount: u64,
    ) -> Result<(), VaultError> {
        self.inner.lock(task_id, from, token, amount).await
    }

    async fn release(
        &self,
        task_id: TaskId,
        _to: &Principal,
        _token: &TokenId,
        amount: u64,
    ) -> Result<(), VaultError> {
        debug!(task_id = %task_id, amount, "Payout refused");
        Err(VaultError::Transfer(self.reason.clone()))
    }

    async fn forfeit(
        &self,
        task_id: TaskId,
        _token: &TokenId,
        amount: u64,
        _sink: Option<&Principal>,
    ) -> Result<Forfeiture, VaultError> {
        debug!(task_id = %task_id, amount, "Forfeit refused");
        Err(VaultError::Transfer(self.reason.clone()))
    }
}
