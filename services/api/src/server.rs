use crate::cli::ServeArgs;
use crate::infra::{AppState, CookieSettings};
use crate::routes::{with_portal_routes, PortalState};
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use leadflow::auth::HttpIdentityProvider;
use leadflow::backend::HttpBackend;
use leadflow::config::AppConfig;
use leadflow::error::AppError;
use leadflow::portal::PortalService;
use leadflow::ratelimit::FixedWindowLimiter;
use leadflow::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let http = reqwest::Client::new();
    let backend = Arc::new(HttpBackend::new(http.clone(), config.backend.api_base_url.clone()));
    let provider = Arc::new(HttpIdentityProvider::new(http, config.identity.clone()));
    let portal = Arc::new(PortalService::new(
        backend,
        provider,
        Arc::new(FixedWindowLimiter::new()),
    ));
    let portal_state = PortalState {
        portal,
        cookies: CookieSettings::new(&config.session.secret, config.secure_cookies()),
    };

    let app = with_portal_routes(portal_state)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "lead capture and portal service ready");

    axum::serve(listener, app).await?;
    Ok(())
}
