//! Stage-scoped failure tolerance.
//!
//! Assembly stages that are not essential to producing *some* response run
//! under this wrapper: a failure is logged with the stage name and a
//! default value is substituted, so one broken helper never takes the turn
//! down with it. Fatal stages (session lookup, persona render) bypass this
//! and propagate with `Error::in_stage` instead.

use std::future::Future;

use tracing::warn;

use engram_core::Result;

/// Run a fallible stage, substituting `default` on failure.
///
/// The stage name travels into the log line, never into an error, because
/// tolerated failures do not become errors.
pub async fn stage_scope<T, Fut>(stage: &'static str, default: T, fut: Fut) -> T
where
    Fut: Future<Output = Result<T>>,
{
    match fut.await {
        Ok(value) => value,
        Err(err) => {
            warn!(stage, error = %err, "Stage failed, substituting default");
            default
        }
    }
}
