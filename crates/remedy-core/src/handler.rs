//! Handler trait - エラーを照合して対処方針を決める Handler の定義
//!
//! # 学習ポイント
//! - ジェネリック trait (Handler<T, E>) を object-safe に保つ
//! - デフォルト実装付きの任意メソッド (report_retry_success)
//! - クロージャから具体的な Handler を組み立てる (FnHandler)

use std::fmt;

use crate::context::Context;
use crate::decision::{Decision, Verdict};

/// Handler は catch したエラーを照合し、Decision に action を設定する
///
/// # 使用例
/// ```ignore
/// struct TimeoutHandler;
///
/// impl Handler<Response, HttpError> for TimeoutHandler {
///     fn matches(&self, error: &HttpError) -> bool {
///         matches!(error, HttpError::Timeout)
///     }
///
///     fn handle(&self, decision: &mut Decision<Response, HttpError>) {
///         if decision.attempt() < 3 {
///             decision.retry();
///         } else {
///             decision.raise();
///         }
///     }
/// }
/// ```
///
/// # 契約
/// - `matches` は副作用のない述語
/// - `handle` は `matches` が true を返したエラーに対してのみ呼ばれる
/// - action を設定しないまま返すと、単独の handler なら
///   `ExecuteError::InvalidHandlerResponse` になる
pub trait Handler<T, E> {
    /// 同一 priority 内の順序を決める安定した名前
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn matches(&self, error: &E) -> bool;

    fn handle(&self, decision: &mut Decision<T, E>);

    /// retry 後の試行が成功したときに、retry を決めた Decision とともに呼ばれる
    fn report_retry_success(&self, _decision: &Decision<T, E>) {}
}

type Matcher<E> = Box<dyn Fn(&E) -> bool>;
type Decider<T, E> = Box<dyn Fn(&E, &mut Context) -> Option<Verdict<T, E>>>;
type RetryObserver<T, E> = Box<dyn Fn(&Decision<T, E>)>;

/// FnHandler はクロージャから組み立てる Handler
///
/// decider は `(error, context)` の純粋関数として Verdict を返す。
/// `None` を返すと action は未設定のまま（Registry では次の handler に回る）。
///
/// ```ignore
/// let retry_once = FnHandler::new(
///     "retry_once",
///     |e: &DbError| e.is_transient(),
///     |_e, ctx| match ctx.increment("retries") {
///         1 => Some(Verdict::Retry),
///         _ => Some(Verdict::Raise(None)),
///     },
/// );
/// ```
pub struct FnHandler<T, E> {
    name: String,
    matcher: Matcher<E>,
    decider: Decider<T, E>,
    on_retry_success: Option<RetryObserver<T, E>>,
}

impl<T, E> FnHandler<T, E> {
    pub fn new<M, D>(name: impl Into<String>, matcher: M, decider: D) -> Self
    where
        M: Fn(&E) -> bool + 'static,
        D: Fn(&E, &mut Context) -> Option<Verdict<T, E>> + 'static,
    {
        Self {
            name: name.into(),
            matcher: Box::new(matcher),
            decider: Box::new(decider),
            on_retry_success: None,
        }
    }

    /// retry 成功時の通知を設定
    pub fn on_retry_success<F>(mut self, observer: F) -> Self
    where
        F: Fn(&Decision<T, E>) + 'static,
    {
        self.on_retry_success = Some(Box::new(observer));
        self
    }
}

impl<T, E> Handler<T, E> for FnHandler<T, E> {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, error: &E) -> bool {
        (self.matcher)(error)
    }

    fn handle(&self, decision: &mut Decision<T, E>) {
        let (error, context) = decision.error_and_context_mut();
        if let Some(verdict) = (self.decider)(error, context) {
            decision.apply(verdict);
            decision.mark_decided_by(&self.name);
        }
    }

    fn report_retry_success(&self, decision: &Decision<T, E>) {
        if let Some(observer) = &self.on_retry_success {
            observer(decision);
        }
    }
}

impl<T, E> fmt::Debug for FnHandler<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler")
            .field("name", &self.name)
            .field("on_retry_success", &self.on_retry_success.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Action;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Transient,
        Fatal,
    }

    struct Unnamed;

    impl Handler<(), TestError> for Unnamed {
        fn matches(&self, _error: &TestError) -> bool {
            true
        }

        fn handle(&self, decision: &mut Decision<(), TestError>) {
            decision.raise();
        }
    }

    #[test]
    fn default_name_is_the_type_name() {
        assert!(Unnamed.name().ends_with("Unnamed"));
    }

    #[test]
    fn fn_handler_delegates_matching() {
        let h: FnHandler<(), TestError> = FnHandler::new(
            "transient",
            |e: &TestError| *e == TestError::Transient,
            |_, _| None,
        );

        assert_eq!(h.name(), "transient");
        assert!(h.matches(&TestError::Transient));
        assert!(!h.matches(&TestError::Fatal));
    }

    #[test]
    fn fn_handler_applies_verdict_and_records_itself() {
        let h = FnHandler::new(
            "fallback",
            |_: &TestError| true,
            |_, _| Some(Verdict::Continue(5)),
        );
        let mut d = Decision::new(TestError::Fatal, Context::new(), 1);

        h.handle(&mut d);

        assert_eq!(d.action(), Some(Action::Continue));
        assert_eq!(d.continue_value(), Some(&5));
        assert_eq!(d.decided_by(), Some("fallback"));
    }

    #[test]
    fn fn_handler_can_leave_decision_unset() {
        let h: FnHandler<i32, TestError> =
            FnHandler::new("pass", |_: &TestError| true, |_, _| None);
        let mut d = Decision::new(TestError::Fatal, Context::new(), 1);

        h.handle(&mut d);

        assert!(!d.is_decided());
        assert_eq!(d.decided_by(), None);
    }

    #[test]
    fn fn_handler_decider_can_keep_counters_in_context() {
        let h: FnHandler<i32, TestError> = FnHandler::new(
            "retry_once",
            |_: &TestError| true,
            |_, ctx| match ctx.increment("retries") {
                1 => Some(Verdict::Retry),
                _ => Some(Verdict::Raise(None)),
            },
        );

        let mut first = Decision::new(TestError::Transient, Context::new(), 1);
        h.handle(&mut first);
        assert_eq!(first.action(), Some(Action::Retry));

        let (_, ctx, _) = first.into_parts();
        let mut second = Decision::new(TestError::Transient, ctx, 2);
        h.handle(&mut second);
        assert_eq!(second.action(), Some(Action::Raise));
    }

    #[test]
    fn fn_handler_forwards_retry_success() {
        let seen = Rc::new(Cell::new(0));
        let observed = Rc::clone(&seen);
        let h: FnHandler<i32, TestError> =
            FnHandler::new("r", |_: &TestError| true, |_, _| Some(Verdict::Retry))
                .on_retry_success(move |d| observed.set(d.attempt()));

        let d = Decision::new(TestError::Transient, Context::new(), 3);
        h.report_retry_success(&d);

        assert_eq!(seen.get(), 3);
    }
}
