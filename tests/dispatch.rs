//! End-to-end dispatch behavior through the layered service.

use axum::body::Body;
use axum::http::{Method, StatusCode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use switchyard::{error_handler, handler, Application, HandlerError, HttpServer, Middleware, Router};

mod common;

fn serve(router: Router) -> HttpServer {
    HttpServer::new(common::test_config(), Application::new(router))
}

/// Handler that records its label and continues after a short delay.
fn deferred(log: &Arc<Mutex<Vec<&'static str>>>, label: &'static str) -> Middleware {
    let log = log.clone();
    handler(move |_req, _res, next| {
        let log = log.clone();
        tokio::spawn(async move {
            log.lock().unwrap().push(label);
            tokio::time::sleep(Duration::from_millis(5)).await;
            log.lock().unwrap().push(label);
            next.proceed();
        });
        Box::pin(async { Ok(()) })
    })
}

#[tokio::test]
async fn test_nested_router_param_reply() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let logged = log.clone();
    let bars = Router::new().post(
        "/bars/:bar",
        [
            handler(move |req, _res, next| {
                logged.lock().unwrap().push(req.original_path().to_string());
                next.proceed();
                Box::pin(async { Ok(()) })
            }),
            handler(|req, res, _next| {
                let bar = req.param("bar").unwrap_or_default().to_string();
                res.set_text_body(format!("Bar: {bar}")).close();
                Box::pin(async { Ok(()) })
            }),
        ],
    );
    let server = serve(Router::new().mount("/foo", bars));

    let (status, body) = common::send(&server, Method::POST, "/foo/bars/42", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Bar: 42");
    assert_eq!(*log.lock().unwrap(), vec!["/foo/bars/42".to_string()]);
}

#[tokio::test]
async fn test_synchronous_panic_reaches_default_policy() {
    let leaf_ran = Arc::new(AtomicBool::new(false));
    let leaf_flag = leaf_ran.clone();
    let router = Router::new()
        .middleware(handler(|_req, _res, _next| panic!("middleware exploded")))
        .get("/", handler(move |_req, res, _next| {
            leaf_flag.store(true, Ordering::SeqCst);
            res.set_text_body("OK").close();
            Box::pin(async { Ok(()) })
        }));
    let server = serve(router);

    let (status, body) = common::send(&server, Method::GET, "/", Body::empty()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "Internal Server Error");
    assert!(!leaf_ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_returned_error_reaches_default_policy() {
    let router = Router::new().middleware(handler(|_req, _res, _next| {
        Box::pin(async { Err(HandlerError::msg("async failure")) })
    }));
    let server = serve(router);

    let (status, _) = common::send(&server, Method::GET, "/anything", Body::empty()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_method_mismatch_is_not_found() {
    let router = Router::new().post("/submit", handler(|_req, res, _next| {
        res.set_text_body("posted").close();
        Box::pin(async { Ok(()) })
    }));
    let server = serve(router);

    let (status, body) = common::send(&server, Method::GET, "/submit", Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "Not Found");

    let (status, body) = common::send(&server, Method::POST, "/submit", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "posted");
}

#[tokio::test]
async fn test_handlers_never_overlap() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let inner = Router::new().middleware(deferred(&log, "inner"));
    let router = Router::new()
        .middleware(deferred(&log, "first"))
        .mount("/a", inner)
        .get("/a/b", deferred(&log, "route"))
        .post("/a/b", deferred(&log, "wrong-method"))
        .middleware(deferred(&log, "last"));
    let server = serve(router);

    let (status, _) = common::send(&server, Method::GET, "/a/b", Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    // Each label appears twice in a row: a turn ends before the next begins.
    assert_eq!(
        *log.lock().unwrap(),
        vec!["first", "first", "inner", "inner", "route", "route", "last", "last"]
    );
}

#[tokio::test]
async fn test_params_merge_and_restore() {
    let seen: Arc<Mutex<Vec<HashMap<String, String>>>> = Arc::new(Mutex::new(Vec::new()));
    let inner_seen = seen.clone();
    let sibling_seen = seen.clone();

    let inner = Router::new().get("/foo/:id", handler(move |req, _res, next| {
        inner_seen.lock().unwrap().push(req.params().clone());
        next.proceed();
        Box::pin(async { Ok(()) })
    }));
    let router = Router::new()
        .mount("/api/:tenant", inner)
        .middleware(handler(move |req, res, _next| {
            sibling_seen.lock().unwrap().push(req.params().clone());
            res.set_text_body(req.path().to_string()).close();
            Box::pin(async { Ok(()) })
        }));
    let server = serve(router);

    let (status, body) = common::send(&server, Method::GET, "/api/acme/foo/123", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "/api/acme/foo/123");

    let seen = seen.lock().unwrap();
    let expected: HashMap<String, String> = [("tenant", "acme"), ("id", "123")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    assert_eq!(seen[0], expected);
    assert!(seen[1].is_empty());
}

#[tokio::test]
async fn test_error_handler_sees_error_and_recovers() {
    let skipped = Arc::new(AtomicBool::new(false));
    let skipped_flag = skipped.clone();
    let router = Router::new()
        .middleware(handler(|_req, _res, next| {
            next.fail(HandlerError::msg("db unavailable"));
            Box::pin(async { Ok(()) })
        }))
        .middleware(handler(move |_req, _res, next| {
            skipped_flag.store(true, Ordering::SeqCst);
            next.proceed();
            Box::pin(async { Ok(()) })
        }))
        .middleware(error_handler(|err, _req, res, _next| {
            res.set_status_code(503)
                .set_text_body(format!("recovered: {err}"))
                .close();
            Box::pin(async { Ok(()) })
        }));
    let server = serve(router);

    let (status, body) = common::send(&server, Method::GET, "/", Body::empty()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, "recovered: db unavailable");
    assert!(!skipped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_pending_error_passes_mounted_router() {
    let router = Router::new()
        .middleware(handler(|_req, _res, next| {
            next.fail(HandlerError::msg("kept"));
            Box::pin(async { Ok(()) })
        }))
        .mount("/", Router::new())
        .middleware(error_handler(|err, _req, res, _next| {
            res.set_text_body(err.to_string()).close();
            Box::pin(async { Ok(()) })
        }));
    let server = serve(router);

    let (_, body) = common::send(&server, Method::GET, "/x", Body::empty()).await;
    assert_eq!(body, "kept");
}

#[tokio::test]
async fn test_json_body_round_trip() {
    let router = Router::new().post("/echo", handler(|req, res, _next| {
        Box::pin(async move {
            let value: serde_json::Value = req.json()?;
            res.set_json_body(&serde_json::json!({ "got": value }))?.close();
            Ok(())
        })
    }));
    let server = serve(router);

    let (status, body) = common::send(&server, Method::POST, "/echo", Body::from(r#"{"n":1}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"{"got":{"n":1}}"#);

    let (status, _) = common::send(&server, Method::POST, "/echo", Body::from("not json")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_streamed_chunks_assembled_on_close() {
    let router = Router::new().get("/stream", handler(|_req, res, _next| {
        Box::pin(async move {
            res.write("hello, ")?;
            res.write("world")?;
            res.close();
            Ok(())
        })
    }));
    let server = serve(router);

    let (_, body) = common::send(&server, Method::GET, "/stream", Body::empty()).await;
    assert_eq!(body, "hello, world");
}
