//! Compensable multi-step operations.
//!
//! A [`Saga`] is an ordered list of [`SagaStep`]s sharing a mutable context.
//! Steps run in order. When one fails, every step that already committed is
//! compensated in reverse order and the original error is returned. A
//! compensation that fails is logged and recorded in the [`SagaFailure`], and
//! unwinding continues with the next one.
//!
//! Cancellation is observed between steps. A step already in flight runs to
//! completion so its side effect is known, then the saga unwinds as if that
//! step had been followed by a failure.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ControlError;

/// One forward action and the action that undoes it.
#[async_trait]
pub trait SagaStep<C: Send + Sync>: Send + Sync {
    /// Short name used in logs and reports.
    fn name(&self) -> &'static str;

    /// Perform the step.
    ///
    /// # Errors
    ///
    /// Any error aborts the saga and triggers compensation of earlier steps.
    async fn execute(&self, ctx: &mut C) -> Result<(), ControlError>;

    /// Undo the step after a later step failed.
    ///
    /// # Errors
    ///
    /// Errors are logged and recorded, never propagated.
    async fn compensate(&self, ctx: &C) -> Result<(), ControlError>;
}

/// Outcome of a saga that committed every step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaReport {
    /// Steps that ran, in order.
    pub committed: Vec<&'static str>,
}

/// Outcome of a saga that failed and was unwound.
#[derive(Debug)]
pub struct SagaFailure {
    /// The step whose failure aborted the saga.
    pub failed_step: &'static str,
    /// The error returned by that step.
    pub error: ControlError,
    /// Steps whose compensation succeeded, in the order they were undone.
    pub compensated: Vec<&'static str>,
    /// Steps whose compensation failed, with the failure.
    pub compensation_failures: Vec<(&'static str, ControlError)>,
}

impl SagaFailure {
    /// Returns true if every committed step was undone.
    #[must_use]
    pub fn fully_compensated(&self) -> bool {
        self.compensation_failures.is_empty()
    }
}

/// An ordered sequence of compensable steps.
pub struct Saga<C: Send + Sync> {
    name: &'static str,
    steps: Vec<Box<dyn SagaStep<C>>>,
}

impl<C: Send + Sync> Saga<C> {
    /// Create an empty saga.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            steps: Vec::new(),
        }
    }

    /// Append a step.
    #[must_use]
    pub fn step(mut self, step: impl SagaStep<C> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Run the steps in order, unwinding on failure.
    ///
    /// # Errors
    ///
    /// Returns a [`SagaFailure`] carrying the first step error and the
    /// compensation outcome.
    pub async fn run(&self, ctx: &mut C) -> Result<SagaReport, SagaFailure> {
        self.run_until_cancelled(ctx, &CancellationToken::new()).await
    }

    /// Run the steps in order, unwinding on failure or once `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns a [`SagaFailure`] carrying the first step error, or
    /// `ControlError::Cancelled` when cancelled, and the compensation outcome.
    pub async fn run_until_cancelled(
        &self,
        ctx: &mut C,
        cancel: &CancellationToken,
    ) -> Result<SagaReport, SagaFailure> {
        let mut committed: Vec<&dyn SagaStep<C>> = Vec::with_capacity(self.steps.len());

        for step in &self.steps {
            if cancel.is_cancelled() {
                let last = committed.last().map_or("none", |s| s.name());
                tracing::warn!(
                    saga = self.name,
                    after = last,
                    "Saga cancelled, compensating"
                );
                let error = ControlError::Cancelled {
                    op: self.name,
                    step: last,
                };
                return Err(self.unwind(ctx, step.name(), error, committed).await);
            }

            tracing::debug!(saga = self.name, step = step.name(), "Running saga step");

            if let Err(error) = step.execute(ctx).await {
                tracing::warn!(
                    saga = self.name,
                    step = step.name(),
                    error = %error,
                    "Saga step failed, compensating"
                );
                return Err(self.unwind(ctx, step.name(), error, committed).await);
            }
            committed.push(step.as_ref());
        }

        Ok(SagaReport {
            committed: committed.iter().map(|s| s.name()).collect(),
        })
    }

    async fn unwind(
        &self,
        ctx: &C,
        failed_step: &'static str,
        error: ControlError,
        committed: Vec<&dyn SagaStep<C>>,
    ) -> SagaFailure {
        let mut compensated = Vec::new();
        let mut compensation_failures = Vec::new();

        for step in committed.into_iter().rev() {
            match step.compensate(ctx).await {
                Ok(()) => {
                    tracing::info!(saga = self.name, step = step.name(), "Compensated saga step");
                    compensated.push(step.name());
                }
                Err(e) => {
                    tracing::error!(
                        saga = self.name,
                        step = step.name(),
                        error = %e,
                        "Compensation failed, state may be inconsistent"
                    );
                    compensation_failures.push((step.name(), e));
                }
            }
        }

        SagaFailure {
            failed_step,
            error,
            compensated,
            compensation_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Journal {
        events: Vec<String>,
    }

    struct Record {
        name: &'static str,
        fail: bool,
        fail_compensation: bool,
    }

    impl Record {
        const fn ok(name: &'static str) -> Self {
            Self {
                name,
                fail: false,
                fail_compensation: false,
            }
        }
    }

    #[async_trait]
    impl SagaStep<Journal> for Record {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn execute(&self, ctx: &mut Journal) -> Result<(), ControlError> {
            if self.fail {
                return Err(ControlError::InvalidRequest(format!("{} failed", self.name)));
            }
            ctx.events.push(format!("do {}", self.name));
            Ok(())
        }

        async fn compensate(&self, _ctx: &Journal) -> Result<(), ControlError> {
            if self.fail_compensation {
                return Err(ControlError::InvalidRequest(format!("undo {} failed", self.name)));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn all_steps_commit() {
        let saga = Saga::new("test")
            .step(Record::ok("one"))
            .step(Record::ok("two"))
            .step(Record::ok("three"));
        let mut journal = Journal::default();

        let report = saga.run(&mut journal).await.unwrap();
        assert_eq!(report.committed, ["one", "two", "three"]);
        assert_eq!(journal.events, ["do one", "do two", "do three"]);
    }

    #[tokio::test]
    async fn failure_unwinds_in_reverse() {
        let saga = Saga::new("test")
            .step(Record::ok("one"))
            .step(Record::ok("two"))
            .step(Record {
                name: "three",
                fail: true,
                fail_compensation: false,
            })
            .step(Record::ok("four"));
        let mut journal = Journal::default();

        let failure = saga.run(&mut journal).await.unwrap_err();
        assert_eq!(failure.failed_step, "three");
        assert_eq!(failure.compensated, ["two", "one"]);
        assert!(failure.fully_compensated());
        assert_eq!(journal.events, ["do one", "do two"]);
        assert!(failure.error.to_string().contains("three failed"));
    }

    #[tokio::test]
    async fn failed_compensation_does_not_stop_unwinding() {
        let saga = Saga::new("test")
            .step(Record::ok("one"))
            .step(Record {
                name: "two",
                fail: false,
                fail_compensation: true,
            })
            .step(Record {
                name: "three",
                fail: true,
                fail_compensation: false,
            });
        let mut journal = Journal::default();

        let failure = saga.run(&mut journal).await.unwrap_err();
        assert_eq!(failure.compensated, ["one"]);
        assert_eq!(failure.compensation_failures.len(), 1);
        assert_eq!(failure.compensation_failures[0].0, "two");
        assert!(!failure.fully_compensated());
        assert!(failure.error.to_string().contains("three failed"));
    }

    /// Cancels the token as its forward action.
    struct CancelDuring {
        name: &'static str,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl SagaStep<Journal> for CancelDuring {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn execute(&self, ctx: &mut Journal) -> Result<(), ControlError> {
            self.cancel.cancel();
            ctx.events.push(format!("do {}", self.name));
            Ok(())
        }

        async fn compensate(&self, _ctx: &Journal) -> Result<(), ControlError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn cancellation_unwinds_after_step_in_flight() {
        let cancel = CancellationToken::new();
        let saga = Saga::new("test")
            .step(Record::ok("one"))
            .step(CancelDuring {
                name: "two",
                cancel: cancel.clone(),
            })
            .step(Record::ok("three"));
        let mut journal = Journal::default();

        let failure = saga
            .run_until_cancelled(&mut journal, &cancel)
            .await
            .unwrap_err();
        assert_eq!(failure.failed_step, "three");
        assert!(matches!(
            failure.error,
            ControlError::Cancelled { op: "test", step: "two" }
        ));
        assert_eq!(failure.compensated, ["two", "one"]);
        assert_eq!(journal.events, ["do one", "do two"]);
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let saga = Saga::new("test").step(Record::ok("one"));
        let mut journal = Journal::default();

        let failure = saga
            .run_until_cancelled(&mut journal, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            failure.error,
            ControlError::Cancelled { step: "none", .. }
        ));
        assert!(failure.compensated.is_empty());
        assert!(journal.events.is_empty());
    }

    #[tokio::test]
    async fn first_step_failure_compensates_nothing() {
        let saga = Saga::new("test").step(Record {
            name: "one",
            fail: true,
            fail_compensation: false,
        });
        let mut journal = Journal::default();

        let failure = saga.run(&mut journal).await.unwrap_err();
        assert!(failure.compensated.is_empty());
        assert!(failure.fully_compensated());
    }
}
