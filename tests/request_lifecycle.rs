mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use common::{chain_with, get, json_logger, post_json, record_of};
use http::StatusCode;
use http_body_util::BodyExt;
use strata::{BoxError, Context, HttpError, Logger, Router, middleware};

async fn body_of(res: http::Response<http_body_util::Full<Bytes>>) -> Bytes {
    res.into_body().collect().await.unwrap().to_bytes()
}

#[tokio::test]
async fn timeout_wins_over_a_slow_handler() {
    let (logger, _) = json_logger();
    let observed = Arc::new(Mutex::new(None));
    let seen = Arc::clone(&observed);

    let chain = chain_with(&logger)
        .with(middleware::timeout(Duration::from_millis(100)))
        .with(move |ctx: Context| {
            let seen = Arc::clone(&seen);
            async move {
                let (child, _) = ctx.cancellation().derive(None);
                let started = Instant::now();
                tokio::spawn(async move {
                    child.done_owned().await;
                    *seen.lock().unwrap() = Some(started.elapsed());
                });
                tokio::time::sleep(Duration::from_millis(500)).await;
                ctx.response().text("finished anyway");
            }
        });

    let res = chain.handle(get("/slow"), None).await;

    assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
    tokio::time::sleep(Duration::from_millis(20)).await;
    let elapsed = observed.lock().unwrap().expect("child scope never reported done");
    assert!(elapsed < Duration::from_millis(500), "child done after {elapsed:?}");
}

#[tokio::test]
async fn fast_handler_never_triggers_the_timeout_hook() {
    let (logger, _) = json_logger();
    let timeouts = Arc::new(AtomicUsize::new(0));
    let t = Arc::clone(&timeouts);

    let chain = chain_with(&logger)
        .with(middleware::timeout_with(Duration::from_millis(100), move |_| {
            t.fetch_add(1, Ordering::SeqCst);
        }))
        .with(|ctx: Context| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            ctx.response().text("ok");
        });

    let res = chain.handle(get("/fast"), None).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_of(res).await, Bytes::from_static(b"ok"));
    assert_eq!(timeouts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn panic_response_captures_bodies_in_the_record() {
    async fn explode(_ctx: Context) {
        panic!("order service unavailable");
    }

    let (logger, buf) = json_logger();
    let chain = chain_with(&logger)
        .with(middleware::request_log())
        .with(explode);

    let res = chain.handle(post_json("/orders", r#"{"sku":"A-1"}"#), None).await;
    logger.flush().await;

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let lines = buf.lines();
    let records: Vec<_> = lines.iter().filter(|l| l.contains("requestBody")).collect();
    assert_eq!(records.len(), 1, "{lines:#?}");

    let record = record_of(records[0]);
    assert_eq!(record["status"], 500);
    assert_eq!(record["requestBody"], r#"{"sku":"A-1"}"#);
    assert_eq!(record["requestContentType"], "application/json");
    assert_eq!(record["responseBody"], "Internal Server Error");
    assert_eq!(record["responseContentType"], "text/plain; charset=utf-8");
    assert_eq!(record["error"], "panic: order service unavailable");

    // The Error-level entry carries the panic site's trace.
    assert!(lines.iter().any(|l| l.contains(" ERROR ") && l.contains("order service unavailable")));
}

#[tokio::test]
async fn successful_response_does_not_capture_bodies() {
    let (logger, buf) = json_logger();
    let chain = chain_with(&logger)
        .with(middleware::request_log())
        .with(|ctx: Context| async move {
            ctx.response().text("created");
        });

    let res = chain.handle(post_json("/orders", r#"{"sku":"A-1"}"#), None).await;
    logger.flush().await;

    assert_eq!(res.status(), StatusCode::OK);
    let lines = buf.lines();
    assert_eq!(lines.len(), 1);

    let record = record_of(&lines[0]);
    assert_eq!(record["status"], 200);
    assert_eq!(record["method"], "POST");
    assert_eq!(record["url"], "/orders");
    assert_eq!(record["length"], 7);
    assert!(record.get("requestBody").is_none());
    assert!(record.get("responseBody").is_none());
}

#[tokio::test]
async fn client_errors_are_not_logged_at_error_level() {
    let (logger, buf) = json_logger();
    let chain = chain_with(&logger)
        .with(Router::new().get("/users/{id}", |_ctx: Context| async {
            Err::<(), BoxError>(HttpError::new(StatusCode::NOT_FOUND, "no such user").into())
        }));

    let res = chain.handle(get("/users/9"), None).await;
    logger.flush().await;

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_of(res).await, Bytes::from_static(b"no such user"));
    assert!(!buf.text().contains(" ERROR "));
    let lines = buf.lines();
    assert_eq!(lines.len(), 1);
    assert_eq!(record_of(&lines[0])["error"], "404 no such user");
}

#[tokio::test]
async fn end_hooks_run_once_in_order_across_terminal_paths() {
    async fn explode(_ctx: Context) {
        panic!("late failure");
    }

    let (logger, _) = json_logger();
    let order = Arc::new(Mutex::new(Vec::new()));
    let o = Arc::clone(&order);

    let chain = chain_with(&logger)
        .with(move |ctx: Context| {
            let o = Arc::clone(&o);
            async move {
                for n in 1..=3 {
                    let o = Arc::clone(&o);
                    ctx.on_end(move || o.lock().unwrap().push(n));
                }
            }
        })
        .with(explode);

    let req = strata::Request::from_http(get("/"), None);
    let ctx = Context::new(req, logger.clone());
    chain.execute(&ctx).await;
    ctx.finish();

    assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn concurrent_requests_never_interleave_lines() {
    let (logger, buf) = json_logger();
    let chain = Arc::new(
        chain_with(&logger)
            .with(middleware::request_log())
            .with(|ctx: Context| async move {
                ctx.log_record().insert("note", "line one\nline two\r\n".repeat(20));
                ctx.logger().info(format!("working on {}", ctx.request().path()));
                tokio::task::yield_now().await;
                ctx.response().text("ok");
            }),
    );

    let requests: Vec<_> = (0..64)
        .map(|n| {
            let chain = Arc::clone(&chain);
            tokio::spawn(async move { chain.handle(get(&format!("/item/{n}")), None).await })
        })
        .collect();
    for r in requests {
        assert_eq!(r.await.unwrap().status(), StatusCode::OK);
    }
    logger.flush().await;

    let lines = buf.lines();
    assert_eq!(lines.len(), 128);
    let records = lines.iter().filter(|l| l.contains(r#""note""#)).count();
    assert_eq!(records, 64);
    for line in lines.iter().filter(|l| l.contains(r#""note""#)) {
        assert_eq!(record_of(line)["status"], 200);
    }
}

#[tokio::test]
async fn dropped_request_still_flushes_its_record() {
    let (logger, buf) = json_logger();
    let chain = chain_with(&logger)
        .with(middleware::request_log())
        .with(|_ctx: Context| std::future::pending::<()>());

    let pending = chain.handle(get("/hang"), None);
    let _ = tokio::time::timeout(Duration::from_millis(30), pending).await;
    logger.flush().await;

    let lines = buf.lines();
    assert_eq!(lines.len(), 1);
    assert_eq!(record_of(&lines[0])["url"], "/hang");
}

#[tokio::test]
async fn discard_logger_still_serves() {
    let chain = chain_with(&Logger::discard()).with(|ctx: Context| async move {
        ctx.response().json(r#"{"ok":true}"#);
    });

    let res = chain.handle(get("/"), None).await;

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "application/json");
}

#[tokio::test]
async fn panicking_init_hook_still_yields_one_response() {
    async fn explode(_ctx: Context) {
        panic!("handler failed too");
    }

    let buf = common::SharedBuffer::default();
    let logger = strata::LoggerConfig::new(buf.clone())
        .json(true)
        .init(|_, _| panic!("init broke"))
        .build()
        .unwrap();
    let chain = chain_with(&logger)
        .with(middleware::request_log())
        .with(explode);

    let res = tokio::spawn(async move { chain.handle(get("/orders"), None).await })
        .await
        .expect("request task unwound");
    logger.flush().await;

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let records: Vec<_> = buf.lines().into_iter().filter(|l| l.contains(r#""length""#)).collect();
    assert_eq!(records.len(), 1);
}
