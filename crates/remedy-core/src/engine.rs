//! Execution engine: runs a protected block under a handler.
//!
//! The loop per call:
//! 1. run the block; `Ok` returns (after a retry-success notification if the
//!    previous attempt was retried)
//! 2. an error the handler does not match is returned unchanged
//! 3. a matched error becomes a fresh [`Decision`] handed to the handler
//! 4. `Continue` returns the value, `Raise` returns the error, `Retry` goes
//!    back to 1, no action is a contract violation
//!
//! Retries are unbounded. Handlers bound them themselves, via
//! [`Decision::attempt`] or a counter kept in the [`Context`].

use std::fmt;

use tracing::{debug, trace, warn};

use crate::context::Context;
use crate::decision::{Action, Decision, Verdict};
use crate::error::ExecuteError;
use crate::handler::Handler;

/// Run `block` under `handler` with an empty context.
pub fn execute<T, E, H, F>(handler: &H, block: F) -> Result<T, ExecuteError<E>>
where
    H: Handler<T, E> + ?Sized,
    F: FnMut() -> Result<T, E>,
    E: fmt::Debug,
{
    execute_with(handler, Context::new(), block)
}

/// Run `block` under `handler`, handing `context` to every decision.
///
/// The context is shared by all attempts of this call, so whatever a handler
/// writes into it is visible when the next failure is handled.
pub fn execute_with<T, E, H, F>(
    handler: &H,
    context: Context,
    mut block: F,
) -> Result<T, ExecuteError<E>>
where
    H: Handler<T, E> + ?Sized,
    F: FnMut() -> Result<T, E>,
    E: fmt::Debug,
{
    let mut idle_context = context;
    let mut retried: Option<Decision<T, E>> = None;
    let mut attempt: u32 = 1;

    loop {
        let error = match block() {
            Ok(value) => {
                if let Some(prior) = retried.as_ref() {
                    debug!(
                        handler = handler.name(),
                        attempt,
                        "protected block succeeded after retry"
                    );
                    handler.report_retry_success(prior);
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if !handler.matches(&error) {
            trace!(handler = handler.name(), ?error, "error not matched, propagating");
            return Err(ExecuteError::Raised(error));
        }

        // the previous decision (if any) holds the context; take it back
        let context = match retried.take() {
            Some(prior) => prior.into_context(),
            None => std::mem::take(&mut idle_context),
        };

        debug!(handler = handler.name(), attempt, ?error, "handling error");
        let mut decision = Decision::new(error, context, attempt);
        handler.handle(&mut decision);

        if decision.action() == Some(Action::Retry) {
            debug!(
                handler = handler.name(),
                decided_by = decision.decided_by(),
                attempt,
                "retrying protected block"
            );
            attempt = attempt.saturating_add(1);
            retried = Some(decision);
            continue;
        }

        let (error, _context, verdict) = decision.into_parts();
        return match verdict {
            Some(Verdict::Continue(value)) => Ok(value),
            Some(Verdict::Raise(substitute)) => {
                Err(ExecuteError::Raised(substitute.unwrap_or(error)))
            }
            _ => {
                warn!(
                    handler = handler.name(),
                    attempt,
                    ?error,
                    "handler did not decide an action"
                );
                Err(ExecuteError::InvalidHandlerResponse { cause: error })
            }
        };
    }
}
