//! Decision model: what the engine should do with a caught error.
//!
//! A [`Decision`] is created by the engine for every error a handler takes.
//! The handler records its verdict on it, and the engine reads it back.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::Context;

/// The next action to take for a caught error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Resume with a substitute value.
    Continue,

    /// Abort with the original error or a substitute.
    Raise,

    /// Run the protected block again from the top.
    Retry,
}

impl Action {
    /// Every action, in declaration order.
    pub const ALL: [Action; 3] = [Action::Continue, Action::Raise, Action::Retry];

    /// Snake-case name, same as the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Continue => "continue",
            Action::Raise => "raise",
            Action::Retry => "retry",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An action together with its payload.
///
/// This is what pure-function handlers return from `(error, context)`.
/// Keeping the payload inside the variant means only the payload of the
/// chosen action can exist.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict<T, E> {
    Continue(T),

    /// `None` re-raises the original error.
    Raise(Option<E>),

    Retry,
}

impl<T, E> Verdict<T, E> {
    pub fn action(&self) -> Action {
        match self {
            Verdict::Continue(_) => Action::Continue,
            Verdict::Raise(_) => Action::Raise,
            Verdict::Retry => Action::Retry,
        }
    }
}

/// The mutable record a handler uses to communicate its chosen action.
///
/// Setting an action replaces whatever was set before, payload included.
/// Composite handlers stop consulting further handlers once an action is set,
/// so within one handling pass the first decision is the one that counts.
pub struct Decision<T, E> {
    error: E,
    context: Context,
    attempt: u32,
    verdict: Option<Verdict<T, E>>,
    decided_by: Option<String>,
}

impl<T, E> Decision<T, E> {
    /// Create an undecided record for the failure of attempt `attempt` (1-based).
    pub fn new(error: E, context: Context, attempt: u32) -> Self {
        Self {
            error,
            context,
            attempt,
            verdict: None,
            decided_by: None,
        }
    }

    /// The caught error.
    pub fn error(&self) -> &E {
        &self.error
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Handlers may keep their own bookkeeping (attempt counters etc.) here.
    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// Which attempt failed, starting from 1.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn action(&self) -> Option<Action> {
        self.verdict.as_ref().map(Verdict::action)
    }

    pub fn is_decided(&self) -> bool {
        self.verdict.is_some()
    }

    pub fn verdict(&self) -> Option<&Verdict<T, E>> {
        self.verdict.as_ref()
    }

    /// Payload for `Continue`; `None` under any other action.
    pub fn continue_value(&self) -> Option<&T> {
        match &self.verdict {
            Some(Verdict::Continue(value)) => Some(value),
            _ => None,
        }
    }

    /// Error to raise under `Raise`, falling back to the original error.
    pub fn raise_error(&self) -> Option<&E> {
        match &self.verdict {
            Some(Verdict::Raise(substitute)) => Some(substitute.as_ref().unwrap_or(&self.error)),
            _ => None,
        }
    }

    /// Name of the handler that set the action, when it identified itself.
    pub fn decided_by(&self) -> Option<&str> {
        self.decided_by.as_deref()
    }

    pub fn available_actions(&self) -> &'static [Action] {
        &Action::ALL
    }

    pub fn continue_with(&mut self, value: T) {
        self.apply(Verdict::Continue(value));
    }

    /// Re-raise the original error.
    pub fn raise(&mut self) {
        self.apply(Verdict::Raise(None));
    }

    /// Raise `error` in place of the original one.
    pub fn raise_with(&mut self, error: E) {
        self.apply(Verdict::Raise(Some(error)));
    }

    pub fn retry(&mut self) {
        self.apply(Verdict::Retry);
    }

    /// Record a verdict produced by a pure-function handler.
    pub fn apply(&mut self, verdict: Verdict<T, E>) {
        self.verdict = Some(verdict);
        self.decided_by = None;
    }

    pub(crate) fn mark_decided_by(&mut self, name: &str) {
        if self.verdict.is_some() && self.decided_by.is_none() {
            self.decided_by = Some(name.to_string());
        }
    }

    pub(crate) fn error_and_context_mut(&mut self) -> (&E, &mut Context) {
        (&self.error, &mut self.context)
    }

    pub(crate) fn into_context(self) -> Context {
        self.context
    }

    pub(crate) fn into_parts(self) -> (E, Context, Option<Verdict<T, E>>) {
        (self.error, self.context, self.verdict)
    }
}

impl<T: Default, E> Decision<T, E> {
    /// Continue with `T::default()`.
    pub fn continue_default(&mut self) {
        self.continue_with(T::default());
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Decision<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decision")
            .field("error", &self.error)
            .field("context", &self.context)
            .field("attempt", &self.attempt)
            .field("verdict", &self.verdict)
            .field("decided_by", &self.decided_by)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Boom(&'static str);

    fn undecided() -> Decision<i32, Boom> {
        Decision::new(Boom("original"), Context::new(), 1)
    }

    #[test]
    fn new_decision_is_undecided() {
        let d = undecided();
        assert!(!d.is_decided());
        assert_eq!(d.action(), None);
        assert_eq!(d.continue_value(), None);
        assert_eq!(d.raise_error(), None);
        assert_eq!(d.attempt(), 1);
    }

    #[test]
    fn raise_without_payload_defaults_to_original_error() {
        let mut d = undecided();
        d.raise();
        assert_eq!(d.action(), Some(Action::Raise));
        assert_eq!(d.raise_error(), Some(&Boom("original")));
    }

    #[test]
    fn continue_after_raise_clears_raise_payload() {
        let mut d = undecided();
        d.raise_with(Boom("substitute"));
        d.continue_with(7);

        assert_eq!(d.action(), Some(Action::Continue));
        assert_eq!(d.continue_value(), Some(&7));
        assert_eq!(d.raise_error(), None);
    }

    #[test]
    fn raise_after_continue_clears_continue_value() {
        let mut d = undecided();
        d.continue_with(7);
        d.raise_with(Boom("substitute"));

        assert_eq!(d.action(), Some(Action::Raise));
        assert_eq!(d.continue_value(), None);
        assert_eq!(d.raise_error(), Some(&Boom("substitute")));
    }

    #[test]
    fn retry_clears_both_payloads() {
        let mut d = undecided();
        d.continue_with(7);
        d.retry();

        assert_eq!(d.action(), Some(Action::Retry));
        assert_eq!(d.continue_value(), None);
        assert_eq!(d.raise_error(), None);
    }

    #[test]
    fn apply_records_pure_function_verdict() {
        let mut d = undecided();
        d.apply(Verdict::Continue(42));
        assert_eq!(d.verdict(), Some(&Verdict::Continue(42)));
    }

    #[test]
    fn decided_by_is_only_recorded_once_decided() {
        let mut d = undecided();
        d.mark_decided_by("first");
        assert_eq!(d.decided_by(), None);

        d.retry();
        d.mark_decided_by("second");
        d.mark_decided_by("third");
        assert_eq!(d.decided_by(), Some("second"));
    }

    #[test]
    fn continue_default_uses_default_value() {
        let mut d = undecided();
        d.continue_default();
        assert_eq!(d.continue_value(), Some(&0));
    }

    #[test]
    fn action_serializes_as_snake_case() {
        let s = serde_json::to_string(&Action::Retry).unwrap();
        assert_eq!(s, "\"retry\"");
        assert_eq!(Action::Continue.to_string(), "continue");
    }

    #[test]
    fn available_actions_lists_all_three() {
        let d = undecided();
        assert_eq!(
            d.available_actions(),
            &[Action::Continue, Action::Raise, Action::Retry]
        );
    }
}
