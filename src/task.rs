use std::fmt::Display;
use std::future::Future;

use tokio::task::JoinHandle;

/// Spawn a detached task whose failure is still observed.
///
/// A watcher awaits the task and logs an `Err` result or a panic under
/// `name`. The returned handle resolves once the watcher has logged.
pub fn spawn_supervised<F, E>(name: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let inner = tokio::spawn(fut);
    tokio::spawn(async move {
        match inner.await {
            Ok(Ok(())) => tracing::debug!(task = name, "Task finished"),
            Ok(Err(e)) => tracing::error!(task = name, error = %e, "Task failed"),
            Err(e) if e.is_panic() => tracing::error!(task = name, "Task panicked"),
            Err(_) => tracing::warn!(task = name, "Task cancelled"),
        }
    })
}
