//! remedy-core
//!
//! Pluggable, prioritized error remediation: wrap a unit of work with a
//! handler instead of inline recovery logic.
//!
//! # モジュール構成
//! - **decision**: Decision / Action / Verdict（handler が決めた対処）
//! - **context**: handler に渡す呼び出し元のデータ
//! - **handler**: Handler trait と FnHandler
//! - **engine**: execute（continue / raise / retry のステートマシン）
//! - **registry**: priority 付き Registry（合成 Handler）
//! - **retry**: RetryBudget と BoundedRetry
//! - **error**: ExecuteError

pub mod context;
pub mod decision;
pub mod engine;
pub mod error;
pub mod handler;
pub mod registry;
pub mod retry;

pub use self::context::Context;
pub use self::decision::{Action, Decision, Verdict};
pub use self::engine::{execute, execute_with};
pub use self::error::ExecuteError;
pub use self::handler::{FnHandler, Handler};
pub use self::registry::{DEFAULT_PRIORITY, OrderedHandlers, Priority, Registry, SharedHandler};
pub use self::retry::{BoundedRetry, RetryBudget};
