use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ratewatch_core::domain::recommendation::Recommendation;
use ratewatch_core::domain::stock::StockRow;
use ratewatch_core::shutdown::ShutdownListener;
use ratewatch_core::storage::query::{list_stocks, QueryError, StockFilter, StockParams};
use ratewatch_core::storage::recommendations::best_recommendation;

type ApiError = (StatusCode, Json<serde_json::Value>);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = ratewatch_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match ratewatch_core::storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    let app = router(AppState { pool });

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8080);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(ShutdownListener::install()))
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/stocks", get(get_stocks))
        .route("/api/v1/recommendations", get(get_recommendation))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Clone)]
struct AppState {
    pool: Option<PgPool>,
}

#[derive(Debug, Serialize)]
struct StocksResponse {
    items: Vec<StockRow>,
}

#[derive(Debug, Serialize)]
struct RecommendationResponse {
    recommendation: Option<Recommendation>,
}

fn unavailable() -> ApiError {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": "database unavailable" })),
    )
}

fn query_error(err: QueryError) -> ApiError {
    match err {
        QueryError::InvalidParam { .. } => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": err.to_string() })),
        ),
        QueryError::Database(_) => {
            let err = anyhow::Error::new(err);
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %err, "stock query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "stock query failed" })),
            )
        }
    }
}

async fn get_stocks(
    State(state): State<AppState>,
    Query(params): Query<StockParams>,
) -> Result<Json<StocksResponse>, ApiError> {
    let filter = StockFilter::from_params(&params).map_err(query_error)?;
    let Some(pool) = &state.pool else {
        return Err(unavailable());
    };

    let items = list_stocks(pool, &filter, Utc::now())
        .await
        .map_err(query_error)?;

    Ok(Json(StocksResponse { items }))
}

async fn get_recommendation(
    State(state): State<AppState>,
) -> Result<Json<RecommendationResponse>, ApiError> {
    let Some(pool) = &state.pool else {
        return Err(unavailable());
    };

    let recommendation = best_recommendation(pool, Utc::now()).await.map_err(|e| {
        sentry_anyhow::capture_anyhow(&e);
        tracing::error!(error = %e, "recommendation lookup failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "recommendation lookup failed" })),
        )
    })?;

    Ok(Json(RecommendationResponse { recommendation }))
}

async fn shutdown_signal(signals: ShutdownListener) {
    let signal = signals.recv().await;
    tracing::info!(signal, "shutting down");
}

fn init_sentry(settings: &ratewatch_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
