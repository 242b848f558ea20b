//! Multi-step writes with compensating rollback.
//!
//! The store offers no transaction spanning several records. A [`Saga`] is
//! an ordered list of steps, each optionally paired with a compensation
//! that undoes it. When a step fails, the compensations of the steps that
//! already completed run in reverse order.
//!
//! ```rust
//! use fiscaliza_core::{CoreError, Saga};
//!
//! let mut log: Vec<String> = Vec::new();
//! let result = Saga::new("example")
//!     .step_with_compensation(
//!         "first",
//!         |log: &mut Vec<String>| { log.push("first".into()); Ok(()) },
//!         |log: &mut Vec<String>| { log.push("undo first".into()); Ok(()) },
//!     )
//!     .step("second", |_: &mut Vec<String>| Err(CoreError::validation("boom")))
//!     .run(&mut log);
//!
//! assert!(matches!(result, Err(CoreError::SagaFailure { step: "second", .. })));
//! assert_eq!(log, vec!["first", "undo first"]);
//! ```

mod finding_chain;

pub use finding_chain::{
    AnswerInput, ChecklistCatalog, CreationSaga, FindingChain, FindingDetails, ManualFindingInput,
    RecordedAnswer, RecordedFinding, RetractReport,
};

use crate::error::{CoreError, CoreResult};
use tracing::{debug, error, warn};

type Action<'a, T> = Box<dyn FnMut(&mut T) -> CoreResult<()> + 'a>;

struct Step<'a, T> {
    name: &'static str,
    action: Action<'a, T>,
    compensation: Option<Action<'a, T>>,
}

/// An ordered list of steps run against a shared state.
pub struct Saga<'a, T> {
    name: &'static str,
    steps: Vec<Step<'a, T>>,
}

impl<'a, T> Saga<'a, T> {
    /// Creates an empty saga.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            steps: Vec::new(),
        }
    }

    /// Appends a step with nothing to undo.
    #[must_use]
    pub fn step<A>(mut self, name: &'static str, action: A) -> Self
    where
        A: FnMut(&mut T) -> CoreResult<()> + 'a,
    {
        self.steps.push(Step {
            name,
            action: Box::new(action),
            compensation: None,
        });
        self
    }

    /// Appends a step and the compensation undoing it.
    #[must_use]
    pub fn step_with_compensation<A, C>(mut self, name: &'static str, action: A, compensation: C) -> Self
    where
        A: FnMut(&mut T) -> CoreResult<()> + 'a,
        C: FnMut(&mut T) -> CoreResult<()> + 'a,
    {
        self.steps.push(Step {
            name,
            action: Box::new(action),
            compensation: Some(Box::new(compensation)),
        });
        self
    }

    /// Returns the number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the saga has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs every step in order.
    ///
    /// # Errors
    ///
    /// - the failing step's own error when no completed step had a
    ///   compensation to run
    /// - [`CoreError::SagaFailure`] when the completed steps were compensated
    /// - [`CoreError::UnrecoverableInconsistency`] when a compensation failed;
    ///   the remaining compensations still run
    pub fn run(mut self, state: &mut T) -> CoreResult<()> {
        let saga = self.name;
        for index in 0..self.steps.len() {
            let step_name = self.steps[index].name;
            debug!(saga, step = step_name, "running saga step");
            let err = match (self.steps[index].action)(state) {
                Ok(()) => continue,
                Err(err) => err,
            };

            warn!(saga, step = step_name, error = %err, "saga step failed; compensating");
            let mut compensated = 0usize;
            let mut failed_compensation: Option<(&'static str, CoreError)> = None;
            for done in self.steps[..index].iter_mut().rev() {
                let Some(compensation) = done.compensation.as_mut() else {
                    continue;
                };
                compensated += 1;
                debug!(saga, step = done.name, "compensating saga step");
                if let Err(comp_err) = compensation(state) {
                    error!(
                        saga,
                        step = done.name,
                        error = %comp_err,
                        "compensation failed; store left inconsistent"
                    );
                    if failed_compensation.is_none() {
                        failed_compensation = Some((done.name, comp_err));
                    }
                }
            }

            return Err(match failed_compensation {
                Some((compensating_step, compensation)) => CoreError::UnrecoverableInconsistency {
                    saga,
                    step: step_name,
                    compensating_step,
                    original: Box::new(err),
                    compensation: Box::new(compensation),
                },
                None if compensated == 0 => err,
                None => CoreError::SagaFailure {
                    saga,
                    step: step_name,
                    source: Box::new(err),
                },
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Trace {
        events: Vec<String>,
    }

    fn push(name: &'static str) -> impl FnMut(&mut Trace) -> CoreResult<()> {
        move |t: &mut Trace| {
            t.events.push(name.to_string());
            Ok(())
        }
    }

    fn fail(message: &'static str) -> impl FnMut(&mut Trace) -> CoreResult<()> {
        move |_: &mut Trace| Err(CoreError::validation(message))
    }

    #[test]
    fn all_steps_run_in_order() {
        let mut trace = Trace::default();
        Saga::new("ok")
            .step("a", push("a"))
            .step_with_compensation("b", push("b"), push("undo b"))
            .step("c", push("c"))
            .run(&mut trace)
            .unwrap();
        assert_eq!(trace.events, vec!["a", "b", "c"]);
    }

    #[test]
    fn failure_compensates_in_reverse() {
        let mut trace = Trace::default();
        let err = Saga::new("chain")
            .step_with_compensation("a", push("a"), push("undo a"))
            .step("b", push("b"))
            .step_with_compensation("c", push("c"), push("undo c"))
            .step("d", fail("d broke"))
            .run(&mut trace)
            .unwrap_err();

        assert_eq!(trace.events, vec!["a", "b", "c", "undo c", "undo a"]);
        match err {
            CoreError::SagaFailure { saga, step, source } => {
                assert_eq!(saga, "chain");
                assert_eq!(step, "d");
                assert!(matches!(*source, CoreError::Validation { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn failure_before_any_compensable_step_returns_original_error() {
        let mut trace = Trace::default();
        let err = Saga::new("chain")
            .step("check", fail("bad input"))
            .step_with_compensation("a", push("a"), push("undo a"))
            .run(&mut trace)
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
        assert!(trace.events.is_empty());
    }

    #[test]
    fn failed_compensation_escalates_and_continues() {
        let mut trace = Trace::default();
        let err = Saga::new("chain")
            .step_with_compensation("a", push("a"), push("undo a"))
            .step_with_compensation("b", push("b"), fail("cannot undo b"))
            .step("c", fail("c broke"))
            .run(&mut trace)
            .unwrap_err();

        assert_eq!(trace.events, vec!["a", "b", "undo a"]);
        match err {
            CoreError::UnrecoverableInconsistency {
                step,
                compensating_step,
                original,
                compensation,
                ..
            } => {
                assert_eq!(step, "c");
                assert_eq!(compensating_step, "b");
                assert!(original.to_string().contains("c broke"));
                assert!(compensation.to_string().contains("cannot undo b"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
