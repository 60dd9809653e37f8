//! Request correlation across async tasks and blocking stages.
//!
//! The pipeline keys each request by its content hash. The hash is scoped
//! as a task-local for the async part of the pipeline and mirrored into a
//! thread-local so stage closures on the blocking pool can read it too.

use crate::services::SHORT_ID_LEN;
use std::cell::RefCell;
use std::future::Future;

/// Correlation id of the request being processed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    request_id: String,
}

impl RequestContext {
    /// Creates a context for an existing id, usually a request hash.
    #[must_use]
    pub fn from_id(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
        }
    }

    /// Returns the full id.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Returns the id truncated for log lines.
    #[must_use]
    pub fn short_id(&self) -> &str {
        self.request_id
            .get(..SHORT_ID_LEN)
            .unwrap_or(&self.request_id)
    }
}

tokio::task_local! {
    static TASK_CONTEXT: RequestContext;
}

thread_local! {
    static THREAD_CONTEXT: RefCell<Option<RequestContext>> = const { RefCell::new(None) };
}

/// Restores the previous thread-local context on drop.
pub struct RequestContextGuard {
    previous: Option<RequestContext>,
}

impl Drop for RequestContextGuard {
    fn drop(&mut self) {
        THREAD_CONTEXT.with(|slot| {
            *slot.borrow_mut() = self.previous.take();
        });
    }
}

/// Installs `context` on the current thread until the guard drops.
#[must_use]
pub fn enter_request_context(context: RequestContext) -> RequestContextGuard {
    let previous = THREAD_CONTEXT.with(|slot| slot.borrow_mut().replace(context));
    RequestContextGuard { previous }
}

/// Runs `fut` with `context` visible to every poll.
pub async fn scope_request_context<F, T>(context: RequestContext, fut: F) -> T
where
    F: Future<Output = T>,
{
    TASK_CONTEXT
        .scope(context.clone(), async move {
            let _guard = enter_request_context(context);
            fut.await
        })
        .await
}

/// Returns the id of the request being processed, if any.
#[must_use]
pub fn current_request_id() -> Option<String> {
    if let Ok(id) = TASK_CONTEXT.try_with(|ctx| ctx.request_id.clone()) {
        return Some(id);
    }

    THREAD_CONTEXT.with(|slot| slot.borrow().as_ref().map(|ctx| ctx.request_id.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_restores_outer_context() {
        let _outer = enter_request_context(RequestContext::from_id("outer"));
        {
            let _inner = enter_request_context(RequestContext::from_id("inner"));
            assert_eq!(current_request_id().as_deref(), Some("inner"));
        }
        assert_eq!(current_request_id().as_deref(), Some("outer"));
    }

    #[test]
    fn test_no_context_outside_a_request() {
        std::thread::spawn(|| assert!(current_request_id().is_none()))
            .join()
            .unwrap();
    }

    #[test]
    fn test_short_id() {
        let context = RequestContext::from_id("0123456789abcdef0123");
        assert_eq!(context.short_id().len(), SHORT_ID_LEN);
        assert_eq!(RequestContext::from_id("abc").short_id(), "abc");
    }

    #[tokio::test]
    async fn test_scope_survives_await() {
        let observed = scope_request_context(RequestContext::from_id("hash-1"), async {
            tokio::task::yield_now().await;
            current_request_id()
        })
        .await;
        assert_eq!(observed.as_deref(), Some("hash-1"));
    }
}
