//! Saga executor and the concrete git workflows built on it.
//!
//! A saga is an ordered list of steps, each pairing a forward action with a
//! compensation. [`Saga::run`] executes the steps through a [`SagaContext`];
//! if one fails, the compensations of the steps that already completed run in
//! reverse order and the run returns [`SagaResult::Failure`] naming the step
//! that failed. Compensation is best-effort: every completed step is
//! attempted, and failures are collected in a [`RollbackReport`] instead of
//! being raised.

mod branch;
mod clean;
mod clone;
mod context;
mod pull;
mod result;

pub use branch::{
    BranchOutput, BranchRequest, CreateBranchSaga, CreateOrSwitchBranchSaga, ResetOutput,
    ResetToDefaultBranchSaga, ResetToDefaultRequest, SwitchBranchSaga,
};
pub use clean::{CleanOutput, CleanWorkingTreeSaga};
pub use clone::{CloneOutput, CloneSaga};
pub use context::SagaContext;
pub use pull::{PullOutput, PullRequest, PullSaga};
pub use result::{RollbackOutcome, RollbackReport, RollbackStatus, SagaFailure, SagaResult};

use crate::error::Result;
use std::future::Future;

/// Name recorded when a run fails outside of any step
pub const UNKNOWN_STEP: &str = "unknown";

/// A multi-step workflow with per-step compensation
pub trait Saga {
    /// Parameters of one run
    type Input;
    /// Value produced by a successful run
    type Output;

    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Body of the saga. Steps go through `ctx` so they can be compensated.
    fn execute<'s>(
        &'s self,
        input: Self::Input,
        ctx: &mut SagaContext<'s>,
    ) -> impl Future<Output = Result<Self::Output>>;

    /// Runs once after the run committed or finished rolling back
    fn finalize(&self) -> impl Future<Output = ()> {
        async {}
    }

    /// Execute the saga with fresh run state
    fn run(&self, input: Self::Input) -> impl Future<Output = SagaResult<Self::Output>> {
        async move {
            let mut ctx = SagaContext::new(self.name());
            let run_id = ctx.run_id();
            log::info!("[{} {}] started", self.name(), run_id);

            let result = match self.execute(input, &mut ctx).await {
                Ok(data) => {
                    log::info!("[{} {}] committed", self.name(), run_id);
                    SagaResult::Success { data }
                }
                Err(error) => {
                    // Attribution is fixed before any compensation runs.
                    let failed_step = ctx.current_step().unwrap_or(UNKNOWN_STEP).to_string();
                    let error = error.to_string();
                    log::warn!(
                        "[{} {}] step {} failed: {}",
                        self.name(),
                        run_id,
                        failed_step,
                        error
                    );
                    let rollback = ctx.rollback().await;
                    SagaResult::Failure(SagaFailure {
                        error,
                        failed_step,
                        rollback,
                    })
                }
            };

            self.finalize().await;
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OperationError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Runs `steps` numbered steps, failing at `fail_at` (1-indexed)
    struct Scripted {
        steps: usize,
        fail_at: Option<usize>,
        broken_rollback: Option<usize>,
        fail_after_steps: bool,
        log: Arc<Mutex<Vec<String>>>,
        finalized: AtomicUsize,
    }

    impl Scripted {
        fn new(steps: usize, fail_at: Option<usize>) -> Self {
            Self {
                steps,
                fail_at,
                broken_rollback: None,
                fail_after_steps: false,
                log: Arc::default(),
                finalized: AtomicUsize::new(0),
            }
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    impl Saga for Scripted {
        type Input = ();
        type Output = usize;

        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn execute<'s>(&'s self, _input: (), ctx: &mut SagaContext<'s>) -> Result<usize> {
            for i in 1..=self.steps {
                let log = Arc::clone(&self.log);
                let fail = self.fail_at == Some(i);
                let broken = self.broken_rollback == Some(i);
                let action_log = Arc::clone(&self.log);
                ctx.step(
                    &format!("step-{i}"),
                    async move {
                        action_log.lock().unwrap().push(format!("run-{i}"));
                        if fail {
                            Err(OperationError::from(anyhow::anyhow!("step {i} exploded")))
                        } else {
                            Ok(i)
                        }
                    },
                    move |value: usize| async move {
                        log.lock().unwrap().push(format!("rollback-{value}"));
                        if broken {
                            Err(OperationError::from(anyhow::anyhow!("cannot undo {value}")))
                        } else {
                            Ok(())
                        }
                    },
                )
                .await?;
            }
            if self.fail_after_steps {
                return Err(anyhow::anyhow!("post-processing failed").into());
            }
            Ok(self.steps)
        }

        async fn finalize(&self) {
            self.finalized.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn all_steps_succeeding_runs_no_rollback() {
        let saga = Scripted::new(4, None);
        let result = saga.run(()).await;

        assert_eq!(result.data(), Some(&4));
        assert_eq!(saga.log(), vec!["run-1", "run-2", "run-3", "run-4"]);
        assert_eq!(saga.finalized.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_at_k_compensates_previous_steps_in_reverse() {
        let saga = Scripted::new(5, Some(3));
        let result = saga.run(()).await;

        let failure = result.failure().expect("run must fail");
        assert_eq!(failure.failed_step, "step-3");
        assert!(failure.error.contains("step 3 exploded"));
        assert_eq!(
            saga.log(),
            vec!["run-1", "run-2", "run-3", "rollback-2", "rollback-1"]
        );
        assert_eq!(failure.rollback.steps(), vec!["step-2", "step-1"]);
        assert!(failure.rollback.is_clean());
        assert_eq!(saga.finalized.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_compensation_does_not_stop_the_others() {
        let mut saga = Scripted::new(3, Some(3));
        saga.broken_rollback = Some(2);
        let result = saga.run(()).await;

        let failure = result.failure().expect("run must fail");
        assert_eq!(failure.failed_step, "step-3");
        assert_eq!(
            saga.log(),
            vec!["run-1", "run-2", "run-3", "rollback-2", "rollback-1"]
        );
        let failed: Vec<_> = failure.rollback.failures().map(|o| o.step.as_str()).collect();
        assert_eq!(failed, vec!["step-2"]);
        assert!(!failure.rollback.is_clean());
    }

    #[tokio::test]
    async fn failure_outside_a_step_is_attributed_to_unknown() {
        let mut saga = Scripted::new(2, None);
        saga.fail_after_steps = true;
        let result = saga.run(()).await;

        assert_eq!(result.failed_step(), Some(UNKNOWN_STEP));
        assert_eq!(
            saga.log(),
            vec!["run-1", "run-2", "rollback-2", "rollback-1"]
        );
    }

    #[tokio::test]
    async fn run_state_is_reset_between_runs() {
        let saga = Scripted::new(2, Some(2));
        let first = saga.run(()).await;
        let second = saga.run(()).await;

        assert_eq!(first.failed_step(), Some("step-2"));
        assert_eq!(second.failure().map(|f| f.rollback.steps()), Some(vec!["step-1"]));
        assert_eq!(saga.finalized.load(Ordering::SeqCst), 2);
    }
}
