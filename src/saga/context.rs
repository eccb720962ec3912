//! Step runner handed to [`Saga::execute`](super::Saga::execute).

use super::result::{RollbackReport, RollbackStatus};
use crate::error::Result;
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

type BoxedCompensation<'a> = Pin<Box<dyn Future<Output = Result<()>> + 'a>>;
type Compensation<'a> = Box<dyn FnOnce() -> BoxedCompensation<'a> + 'a>;

struct CompletedStep<'a> {
    name: String,
    compensate: Compensation<'a>,
}

/// Run state of one saga invocation.
///
/// Holds the compensations of steps that completed, in completion order,
/// and the name of the step in flight. A fresh context is created for every
/// run and discarded when the run returns.
pub struct SagaContext<'a> {
    saga: &'static str,
    run_id: Uuid,
    completed: Vec<CompletedStep<'a>>,
    current_step: Option<String>,
}

impl std::fmt::Debug for SagaContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaContext")
            .field("saga", &self.saga)
            .field("run_id", &self.run_id)
            .field("completed", &self.completed_steps())
            .field("current_step", &self.current_step)
            .finish()
    }
}

impl<'a> SagaContext<'a> {
    pub(crate) fn new(saga: &'static str) -> Self {
        Self {
            saga,
            run_id: Uuid::new_v4(),
            completed: Vec::new(),
            current_step: None,
        }
    }

    /// Identifier of this run, included in log lines
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Step whose action is in flight (or failed)
    pub fn current_step(&self) -> Option<&str> {
        self.current_step.as_deref()
    }

    /// Steps that completed and have a compensation registered
    pub fn completed_steps(&self) -> Vec<&str> {
        self.completed.iter().map(|s| s.name.as_str()).collect()
    }

    /// Run a compensatable step.
    ///
    /// `rollback` is registered only if `action` succeeds, and receives a
    /// copy of the value the action produced. A failing action propagates its
    /// error and leaves `name` as the current step.
    pub async fn step<T, F, R, RF>(&mut self, name: &str, action: F, rollback: R) -> Result<T>
    where
        F: Future<Output = Result<T>>,
        R: FnOnce(T) -> RF + 'a,
        RF: Future<Output = Result<()>> + 'a,
        T: Clone + 'a,
    {
        self.begin(name);
        let value = action.await?;

        let produced = value.clone();
        let compensate: Compensation<'a> = Box::new(move || {
            let fut: BoxedCompensation<'a> = Box::pin(rollback(produced));
            fut
        });
        self.completed.push(CompletedStep {
            name: name.to_string(),
            compensate,
        });
        self.current_step = None;
        Ok(value)
    }

    /// Run a step that needs no compensation
    pub async fn read_only_step<T, F>(&mut self, name: &str, action: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.begin(name);
        let value = action.await?;
        self.current_step = None;
        Ok(value)
    }

    fn begin(&mut self, name: &str) {
        log::debug!("[{} {}] step {}", self.saga, self.run_id, name);
        self.current_step = Some(name.to_string());
    }

    /// Run every registered compensation, newest first.
    ///
    /// A failing compensation is logged and recorded; the remaining ones
    /// still run.
    pub(crate) async fn rollback(&mut self) -> RollbackReport {
        let mut report = RollbackReport::default();
        while let Some(step) = self.completed.pop() {
            log::warn!("[{} {}] rolling back {}", self.saga, self.run_id, step.name);
            match (step.compensate)().await {
                Ok(()) => report.record(&step.name, RollbackStatus::Compensated),
                Err(e) => {
                    log::error!(
                        "[{} {}] rollback of {} failed: {}",
                        self.saga,
                        self.run_id,
                        step.name,
                        e
                    );
                    report.record(&step.name, RollbackStatus::Failed(e.to_string()));
                }
            }
        }
        report
    }
}
