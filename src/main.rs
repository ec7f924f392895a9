//! Switchyard demo server.
//!
//! Serves a small application showing the dispatch engine:
//! - a logging middleware that defers its continuation
//! - `POST /hello`, a two-handler chain
//! - a `/foo` sub-router with `/bars` and `/bars/:bar`
//! - a websocket echo session
//! - a trailing error handler

use clap::Parser;
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use switchyard::config::{load_config, ServerConfig};
use switchyard::http::{SessionContext, WebSocket, WebSocketHandler};
use switchyard::lifecycle::{forward_signals, Shutdown};
use switchyard::observability::{logging, metrics};
use switchyard::{error_handler, handler, Application, HttpServer, Router};

#[derive(Debug, Parser)]
#[command(name = "switchyard", version, about = "Routing and middleware dispatch demo server")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability);
    tracing::info!("switchyard v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        max_body_bytes = config.limits.max_body_bytes,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let app = demo_application(&config)?;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    forward_signals(shutdown.clone());

    HttpServer::new(config, app).run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn demo_application(config: &ServerConfig) -> Result<Application, Box<dyn std::error::Error>> {
    let foo = Router::new()
        .post(
            "/bars",
            handler(|req, res, _next| {
                tracing::info!(path = %req.path(), query = ?req.query(), "Bars");
                res.set_text_body("Bars").close();
                Box::pin(async { Ok(()) })
            }),
        )
        .post(
            "/bars/:bar",
            [
                handler(|req, _res, next| {
                    tracing::info!(
                        original_path = %req.original_path(),
                        path = %req.path(),
                        params = ?req.params(),
                        "Bar"
                    );
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

    let router = Router::new()
        .middleware(handler(|req, _res, next| {
            tracing::info!(method = %req.method(), path = %req.path(), "Middleware");
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                next.proceed();
            });
            Box::pin(async { Ok(()) })
        }))
        .post(
            "/hello",
            [
                handler(|_req, _res, next| {
                    tracing::info!("Hello");
                    next.proceed();
                    Box::pin(async { Ok(()) })
                }),
                handler(|_req, res, _next| {
                    Box::pin(async move {
                        res.set_json_body(&serde_json::json!({ "message": "Hello World" }))?
                            .close();
                        Ok(())
                    })
                }),
            ],
        )
        .mount("/foo", foo)
        .middleware(error_handler(|err, req, _res, next| {
            tracing::warn!(request_id = %req.request_id(), error = %err, "Error handler");
            next.fail(err);
            Box::pin(async { Ok(()) })
        }));

    Ok(Application::new(router).websocket(Some(&config.websocket.path), Echo)?)
}

/// Echoes every text or binary frame back to the sender.
struct Echo;

impl WebSocketHandler for Echo {
    fn on_open(&self, mut socket: WebSocket, ctx: SessionContext) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            tracing::info!(request_id = %ctx.request_id, "Connected");
            while let Some(message) = socket.next().await {
                match message {
                    Ok(message @ (Message::Text(_) | Message::Binary(_))) => {
                        if socket.send(message).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            tracing::info!(request_id = %ctx.request_id, "Disconnected");
        })
    }
}
