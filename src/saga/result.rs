//! Outcome types of a saga run.

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

/// Result of [`Saga::run`](super::Saga::run).
///
/// A failed run is a value, not an error: callers render it directly.
#[derive(Debug)]
pub enum SagaResult<T> {
    /// Every step completed
    Success {
        /// Output of the saga
        data: T,
    },
    /// A step failed and completed steps were compensated
    Failure(SagaFailure),
}

/// Details of a failed run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaFailure {
    /// Message of the error that stopped the run
    pub error: String,
    /// Name of the step whose action failed, or `unknown`
    pub failed_step: String,
    /// What happened during compensation
    pub rollback: RollbackReport,
}

impl<T> SagaResult<T> {
    /// Whether the run succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, SagaResult::Success { .. })
    }

    /// Output of a successful run
    pub fn data(&self) -> Option<&T> {
        match self {
            SagaResult::Success { data } => Some(data),
            SagaResult::Failure(_) => None,
        }
    }

    /// Failure details of an unsuccessful run
    pub fn failure(&self) -> Option<&SagaFailure> {
        match self {
            SagaResult::Success { .. } => None,
            SagaResult::Failure(failure) => Some(failure),
        }
    }

    /// Name of the failed step
    pub fn failed_step(&self) -> Option<&str> {
        self.failure().map(|f| f.failed_step.as_str())
    }

    /// Convert into a `Result`
    pub fn into_result(self) -> std::result::Result<T, SagaFailure> {
        match self {
            SagaResult::Success { data } => Ok(data),
            SagaResult::Failure(failure) => Err(failure),
        }
    }

    /// Map the output of a successful run
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> SagaResult<U> {
        match self {
            SagaResult::Success { data } => SagaResult::Success { data: f(data) },
            SagaResult::Failure(failure) => SagaResult::Failure(failure),
        }
    }
}

impl<T: Serialize> Serialize for SagaResult<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SagaResult::Success { data } => {
                let mut s = serializer.serialize_struct("SagaResult", 2)?;
                s.serialize_field("success", &true)?;
                s.serialize_field("data", data)?;
                s.end()
            }
            SagaResult::Failure(failure) => {
                let mut s = serializer.serialize_struct("SagaResult", 4)?;
                s.serialize_field("success", &false)?;
                s.serialize_field("error", &failure.error)?;
                s.serialize_field("failedStep", &failure.failed_step)?;
                s.serialize_field("rollback", &failure.rollback)?;
                s.end()
            }
        }
    }
}

/// Outcome of one compensation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum RollbackStatus {
    /// Compensation ran to completion
    Compensated,
    /// Compensation failed with this message
    Failed(String),
}

/// One attempted compensation
#[derive(Debug, Clone, Serialize)]
pub struct RollbackOutcome {
    /// Step whose effects were compensated
    pub step: String,
    /// How it went
    #[serde(flatten)]
    pub status: RollbackStatus,
    /// When the compensation finished
    pub at: DateTime<Utc>,
}

/// Compensations attempted during a rollback, in the order they ran
#[derive(Debug, Clone, Default, Serialize)]
pub struct RollbackReport {
    /// Every attempted compensation
    pub entries: Vec<RollbackOutcome>,
}

impl RollbackReport {
    pub(crate) fn record(&mut self, step: &str, status: RollbackStatus) {
        self.entries.push(RollbackOutcome {
            step: step.to_string(),
            status,
            at: Utc::now(),
        });
    }

    /// Names of compensated steps, in execution order
    pub fn steps(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.step.as_str()).collect()
    }

    /// Whether every compensation succeeded
    pub fn is_clean(&self) -> bool {
        self.entries
            .iter()
            .all(|e| e.status == RollbackStatus::Compensated)
    }

    /// Compensations that failed
    pub fn failures(&self) -> impl Iterator<Item = &RollbackOutcome> {
        self.entries
            .iter()
            .filter(|e| matches!(e.status, RollbackStatus::Failed(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_like_a_discriminated_union() {
        let ok: SagaResult<u32> = SagaResult::Success { data: 7 };
        assert_eq!(
            serde_json::to_value(&ok).expect("serialize success"),
            serde_json::json!({"success": true, "data": 7})
        );

        let mut rollback = RollbackReport::default();
        rollback.record("stash", RollbackStatus::Failed("conflict".into()));
        let failed: SagaResult<u32> = SagaResult::Failure(SagaFailure {
            error: "pull failed".into(),
            failed_step: "pull".into(),
            rollback,
        });
        let value = serde_json::to_value(&failed).expect("serialize failure");
        assert_eq!(value["success"], false);
        assert_eq!(value["failedStep"], "pull");
        assert_eq!(value["rollback"]["entries"][0]["step"], "stash");
        assert_eq!(value["rollback"]["entries"][0]["status"], "failed");
        assert_eq!(value["rollback"]["entries"][0]["error"], "conflict");
    }
}
