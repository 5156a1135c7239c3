use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use crate::context::Context;
use crate::handler::Handler;

type TimeoutHook = Arc<dyn Fn(&Context) + Send + Sync + 'static>;

/// Bounds everything after this middleware by `duration`.
///
/// Derives a child of the active scope with that deadline and installs it,
/// so the running handler is dropped once the deadline passes. The child is
/// cancelled at request end, which stops its timer.
pub fn timeout(duration: Duration) -> impl Handler {
    deadline(duration, None)
}

/// Like [`timeout`], and runs `hook` when the deadline is what ended the
/// request. The hook does not run if a response was committed first.
pub fn timeout_with<F>(duration: Duration, hook: F) -> impl Handler
where
    F: Fn(&Context) + Send + Sync + 'static,
{
    deadline(duration, Some(Arc::new(hook)))
}

fn deadline(duration: Duration, hook: Option<TimeoutHook>) -> impl Handler {
    move |ctx: Context| {
        let (_, cancel) = ctx.derive_scope(Some(duration));
        ctx.on_end(move || cancel.cancel());

        if let Some(hook) = hook.clone() {
            let target = ctx.clone();
            ctx.on_timeout(move || hook(&target));
        }
        ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Chain, ChainState, ContentType, Logger};
    use bytes::Bytes;
    use http::StatusCode;
    use http_body_util::BodyExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request() -> http::Request<Bytes> {
        http::Request::builder().uri("/slow").body(Bytes::new()).unwrap()
    }

    #[tokio::test]
    async fn slow_handler_gets_504_and_hook_runs_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        let chain = Chain::new()
            .with_logger(Logger::discard())
            .with(timeout_with(Duration::from_millis(50), move |_| {
                f.fetch_add(1, Ordering::SeqCst);
            }))
            .with(|_ctx: Context| tokio::time::sleep(Duration::from_secs(5)));

        let res = chain.handle(request(), None).await;

        assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn committed_response_suppresses_timeout() {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        let chain = Chain::new()
            .with_logger(Logger::discard())
            .with(timeout_with(Duration::from_millis(30), move |_| {
                f.fetch_add(1, Ordering::SeqCst);
            }))
            .with(|ctx: Context| async move {
                ctx.response().text("streamed early");
                ctx.response().commit();
                tokio::time::sleep(Duration::from_secs(5)).await;
            });
        let req = http::Request::builder().uri("/").body(Bytes::new()).unwrap();
        let ctx = Context::new(crate::Request::from_http(req, None), Logger::discard());

        let outcome = chain.execute(&ctx).await;

        assert_eq!(outcome.state(), ChainState::TimedOut);
        assert_eq!(ctx.response().status(), StatusCode::OK);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn hook_can_shape_the_timeout_response() {
        let chain = Chain::new()
            .with_logger(Logger::discard())
            .with(timeout_with(Duration::from_millis(30), |ctx: &Context| {
                ctx.response().send(
                    StatusCode::GATEWAY_TIMEOUT,
                    ContentType::Json,
                    r#"{"error":"upstream too slow"}"#,
                );
            }))
            .with(|_ctx: Context| tokio::time::sleep(Duration::from_secs(5)));

        let res = chain.handle(request(), None).await;

        assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(res.headers()["content-type"], "application/json");
        let body = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(br#"{"error":"upstream too slow"}"#));
    }

    #[tokio::test]
    async fn deadline_derived_inside_a_handler_cuts_it_short() {
        let chain = Chain::new()
            .with_logger(Logger::discard())
            .with(|ctx: Context| async move {
                ctx.derive_scope(Some(Duration::from_millis(50)));
                tokio::time::sleep(Duration::from_millis(400)).await;
                ctx.response().text("finished");
            });
        let started = std::time::Instant::now();

        let res = chain.handle(request(), None).await;

        assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(started.elapsed() < Duration::from_millis(300), "took {:?}", started.elapsed());
    }
}
