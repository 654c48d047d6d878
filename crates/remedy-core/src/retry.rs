//! Retry budget: a ready-made handler that retries a bounded number of times.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::decision::Decision;
use crate::handler::Handler;

/// How many attempts a [`BoundedRetry`] allows.
///
/// v1: attempt count only. Delays are the caller's business, since the
/// engine re-runs the block synchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryBudget {
    /// Total attempts including the first one. 1 means never retry.
    #[serde(default = "RetryBudget::default_max_attempts")]
    pub max_attempts: u32,
}

impl RetryBudget {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// Default budget for v1: 3 attempts in total.
    pub fn default_v1() -> Self {
        Self::new(Self::default_max_attempts())
    }

    fn default_max_attempts() -> u32 {
        3
    }

    /// Whether the failure of attempt `attempt` may be retried.
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::default_v1()
    }
}

/// Retries matching errors until the budget runs out, then re-raises.
///
/// Pure decision logic: the handler keeps no state of its own and reads the
/// attempt number off the decision.
pub struct BoundedRetry<P> {
    name: String,
    budget: RetryBudget,
    predicate: P,
}

impl<P> BoundedRetry<P> {
    pub fn new(name: impl Into<String>, budget: RetryBudget, predicate: P) -> Self {
        Self {
            name: name.into(),
            budget,
            predicate,
        }
    }

    pub fn budget(&self) -> RetryBudget {
        self.budget
    }
}

impl<T, E, P> Handler<T, E> for BoundedRetry<P>
where
    P: Fn(&E) -> bool,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, error: &E) -> bool {
        (self.predicate)(error)
    }

    fn handle(&self, decision: &mut Decision<T, E>) {
        if self.budget.allows_retry_after(decision.attempt()) {
            decision.retry();
        } else {
            tracing::debug!(
                handler = %self.name,
                attempt = decision.attempt(),
                max_attempts = self.budget.max_attempts,
                "retry budget exhausted"
            );
            decision.raise();
        }
    }
}

impl<P> fmt::Debug for BoundedRetry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedRetry")
            .field("name", &self.name)
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Action;
    use crate::engine::execute;
    use crate::error::ExecuteError;
    use rstest::rstest;
    use std::cell::Cell;

    #[derive(Debug, PartialEq)]
    enum NetError {
        Timeout,
        Refused,
    }

    fn timeouts(e: &NetError) -> bool {
        *e == NetError::Timeout
    }

    #[test]
    fn default_budget_has_reasonable_values() {
        assert_eq!(RetryBudget::default_v1().max_attempts, 3);
        assert_eq!(RetryBudget::default(), RetryBudget::default_v1());
    }

    #[test]
    fn budget_deserializes_with_defaults() {
        let b: RetryBudget = serde_json::from_str("{}").unwrap();
        assert_eq!(b.max_attempts, 3);

        let b: RetryBudget = serde_json::from_str(r#"{"max_attempts": 5}"#).unwrap();
        assert_eq!(b.max_attempts, 5);
    }

    #[rstest]
    #[case(1, Action::Retry)]
    #[case(2, Action::Retry)]
    #[case(3, Action::Raise)]
    #[case(4, Action::Raise)]
    fn decides_from_attempt_number(#[case] attempt: u32, #[case] expected: Action) {
        let h = BoundedRetry::new("timeouts", RetryBudget::new(3), timeouts);
        let mut d: Decision<(), NetError> =
            Decision::new(NetError::Timeout, Default::default(), attempt);

        h.handle(&mut d);

        assert_eq!(d.action(), Some(expected));
    }

    #[test]
    fn retries_until_success() {
        let h = BoundedRetry::new("timeouts", RetryBudget::new(3), timeouts);
        let calls = Cell::new(0);

        let result = execute(&h, || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(NetError::Timeout)
            } else {
                Ok("connected")
            }
        });

        assert_eq!(result.unwrap(), "connected");
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn gives_up_with_original_error_after_budget() {
        let h = BoundedRetry::new("timeouts", RetryBudget::new(2), timeouts);
        let calls = Cell::new(0);

        let err = execute(&h, || {
            calls.set(calls.get() + 1);
            Err::<(), _>(NetError::Timeout)
        })
        .unwrap_err();

        assert!(matches!(err, ExecuteError::Raised(NetError::Timeout)));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn ignores_errors_outside_predicate() {
        let h = BoundedRetry::new("timeouts", RetryBudget::default_v1(), timeouts);
        let calls = Cell::new(0);

        let err = execute(&h, || {
            calls.set(calls.get() + 1);
            Err::<(), _>(NetError::Refused)
        })
        .unwrap_err();

        assert_eq!(err.into_inner(), NetError::Refused);
        assert_eq!(calls.get(), 1);
    }
}
