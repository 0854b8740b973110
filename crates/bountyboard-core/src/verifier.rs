use crate::engine::EscrowEngine;
use crate::error::EscrowError;
use crate::types::{Principal, Task, TaskId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Verdict on a submitted artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Accepted { score: u8, note: Option<String> },
    Rejected { reason: String },
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// External quality judgement consulted before release or reject.
/// The engine never calls it on its own.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, task: &Task, solution_reference: &str) -> Result<Verdict, EscrowError>;
}

/// What `resolve_submission` did with a pending claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    Released { solver: Principal, score: u8 },
    Rejected { solver: Principal, reason: String },
}

/// Verify the pending submission on `id`, then release on accept or reject on reject.
pub async fn resolve_submission(
    engine: &EscrowEngine,
    verifier: &dyn Verifier,
    id: TaskId,
) -> Result<Resolution, EscrowError> {
    let task = engine.get_task(id).await?;
    let submission = task.submission().cloned().ok_or_else(|| {
        EscrowError::invalid_state(id, "resolve", task.status(), "no pending submission")
    })?;

    let verdict = verifier
        .verify(&task, &submission.solution_reference)
        .await?;
    info!(task_id = %id, solver = %submission.solver, accepted = verdict.is_accepted(), "Submission verified");

    // release/reject re-check the claim under the task lock, so a claim that changed
    // since the read above fails with InvalidState instead of paying the wrong party.
    match verdict {
        Verdict::Accepted { score, .. } => {
            engine.release(id, &submission.solver).await?;
            Ok(Resolution::Released {
                solver: submission.solver,
                score,
            })
        }
        Verdict::Rejected { reason } => {
            engine.reject(id, &submission.solver, reason.clone()).await?;
            Ok(Resolution::Rejected {
                solver: submission.solver,
                reason,
            })
        }
    }
}
