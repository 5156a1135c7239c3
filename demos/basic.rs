//! Minimal strata example: a timeout, per-request records and a router.
//!
//! Run with:
//!   cargo run --example basic -- strata.toml
//!
//! Try:
//!   curl http://localhost:3000/users/42
//!   curl -X POST http://localhost:3000/users \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice"}'
//!   curl http://localhost:3000/slow          # 504 after the configured timeout
//!   curl http://localhost:3000/boom          # 500, bodies land in the record

use std::time::Duration;

use http::StatusCode;
use strata::{Chain, Config, ContentType, Context, HttpError, Router, Server, middleware};

#[tokio::main]
async fn main() -> Result<(), strata::Error> {
    tracing_subscriber::fmt::init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(path)?,
        None => Config { request_timeout_ms: Some(2_000), ..Config::default() },
    };

    let chain = Chain::from_config(&config)?
        .with(middleware::request_log())
        .with(
            Router::new()
                .get("/users/{id}", get_user)
                .post("/users", create_user)
                .get("/slow", slow)
                .get("/boom", boom),
        );

    let _ = strata::logger::global::install(chain.logger().clone());
    strata::logger::global::notice(format!("listening on {}", config.listen));

    Server::from_config(&config)?.serve(chain).await
}

// GET /users/{id}
async fn get_user(ctx: Context) -> Result<(), HttpError> {
    let id = ctx.param("id").ok_or_else(HttpError::not_found)?;
    ctx.log_record().insert("userId", id.clone());
    ctx.response().json(format!(r#"{{"id":"{id}","name":"alice"}}"#));
    Ok(())
}

// POST /users
async fn create_user(ctx: Context) -> Result<(), HttpError> {
    if ctx.request().body().is_empty() {
        return Err(HttpError::new(StatusCode::BAD_REQUEST, "empty body"));
    }
    ctx.response().send(StatusCode::CREATED, ContentType::Json, r#"{"id":"99","name":"new_user"}"#);
    Ok(())
}

// GET /slow: outlives any sensible timeout, stops early when the scope ends.
async fn slow(ctx: Context) {
    tokio::select! {
        _ = ctx.done() => {}
        () = tokio::time::sleep(Duration::from_secs(30)) => { ctx.response().text("done"); }
    }
}

// GET /boom
async fn boom(_ctx: Context) {
    panic!("boom");
}
