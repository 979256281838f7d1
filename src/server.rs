use serde_json::json;
use skiff::app::STATIC_ROUTE;
use skiff::config::Config;
use skiff::session::SessionGc;
use skiff::template::JsonTemplator;
use skiff::{App, CtxError, Env, Handler, RequestContext, RouteDef, handler};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::info;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

const PUBLIC_DIR: &str = "public";

pub async fn run(address: Option<SocketAddr>, config_path: Option<PathBuf>) -> Result<(), AnyError> {
    info!("Loading configuration");
    let config = match config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .map_err(|e| format!("Failed to load config: {}", e))?;
    let address = address.unwrap_or(config.server.bind_addr);
    let gc_interval = Duration::from_secs(config.session.gc_interval_secs);

    let (router, services) = demo_app(Env::new(config)).build()?;

    let gc = services
        .session_manager()
        .cloned()
        .map(|manager| SessionGc::start(manager, gc_interval));

    let listener = TcpListener::bind(address).await?;
    info!(%address, mode = %services.config().app.mode, "skiff server listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(gc) = gc {
        gc.stop().await;
    }
    let metrics = services.metrics().snapshot();
    info!(
        requests = metrics.requests_served,
        failures = metrics.handler_failures,
        "Server stopped"
    );

    Ok(())
}

fn demo_app(mut env: Env) -> App {
    env.add_static_dir([PUBLIC_DIR]);
    env.add_tpl_func("upper", |args| {
        Ok(args
            .first()
            .and_then(|value| value.as_str())
            .map(|text| text.to_uppercase().into())
            .unwrap_or_default())
    });

    let chain = |handlers: Vec<Handler>| {
        let mut chain = vec![timing()];
        chain.extend(handlers);
        chain
    };

    App::new(env)
        .with_templator(JsonTemplator)
        .route(RouteDef::get("index", "/", chain(vec![handler(index)])))
        .route(RouteDef::get("health", "/health", chain(vec![handler(health)])))
        .route(RouteDef::get("hello", "/hello/{name}", chain(vec![handler(hello)])))
        .route(RouteDef::get(
            "flash",
            "/flash/{category}/{message}",
            chain(vec![handler(flash)]),
        ))
}

/// Wraps the rest of the chain.
fn timing() -> Handler {
    handler(|ctx| {
        let started = Instant::now();
        ctx.next()?;
        info!(
            method = %ctx.request().method,
            path = %ctx.request().path(),
            status = %ctx.writer().status(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Handled request"
        );
        Ok(())
    })
}

fn index(ctx: &mut RequestContext) -> Result<(), CtxError> {
    let hello = ctx.url_relative("hello", &["world"]);
    let home = ctx.url_external("index", &[]);
    let style = ctx.url_relative(STATIC_ROUTE, &["app.css"]);
    ctx.render_template(
        "index.html",
        json!({"title": "skiff", "links": {"hello": hello, "home": home, "style": style}}),
    )
}

fn health(ctx: &mut RequestContext) -> Result<(), CtxError> {
    ctx.serve_plain(200, "ok")
}

fn hello(ctx: &mut RequestContext) -> Result<(), CtxError> {
    let name = ctx.must_get("name")?.as_str().unwrap_or_default().to_string();
    ctx.serve_plain(200, format!("Hello, {name}!"))
}

fn flash(ctx: &mut RequestContext) -> Result<(), CtxError> {
    let category = ctx.must_get("category")?.as_str().unwrap_or_default().to_string();
    let message = ctx.must_get("message")?.as_str().unwrap_or_default().to_string();
    ctx.flash(&category, &message);

    let index = ctx.url_relative("index", &[]);
    ctx.redirect(303, index)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
