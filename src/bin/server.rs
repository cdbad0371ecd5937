//! HTTP surface: three CAPTCHA endpoints plus `/health`, wired the way the
//! teacher's API binary wires its own `axum` service — a thin translation
//! layer between wire payloads and the core pipeline in `line_captcha`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::Method;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{extract::DefaultBodyLimit, Json, Router};
use serde::{Deserialize, Serialize};
use tower_governor::key_extractor::SmartIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use line_captcha::config::Config;
use line_captcha::error::CaptchaError;
use line_captcha::pathgen::generate_path;
use line_captcha::peek::{self, PeekResponse};
use line_captcha::store::{now_ms, Challenge, ChallengeStore, InMemoryChallengeStore};
use line_captcha::token::{Claims, Signer};
use line_captcha::verify::{self, VerifyRequest, VerifyResponse};
use line_captcha::Point;

#[derive(Clone)]
struct AppState {
    store: Arc<dyn ChallengeStore>,
    signer: Signer,
    config: Arc<Config>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewChallengeResponse {
    challenge_id: String,
    ttl_ms: u64,
    expires_at: i64,
    nonce: String,
    token: String,
    start_point: Point,
    tolerance: ToleranceView,
    target_completion_ms: u64,
    trail: TrailView,
    canvas: CanvasView,
}

#[derive(Serialize)]
struct ToleranceView {
    mouse: f64,
    touch: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TrailView {
    visible_ms: u64,
    fadeout_ms: u64,
}

#[derive(Serialize)]
struct CanvasView {
    width: f64,
    height: f64,
}

async fn new_challenge(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, CaptchaError> {
    let now = now_ms();
    let seed = uuid::Uuid::new_v4().to_string();
    let (points, path_length) = generate_path(&seed, state.config.canvas_width, state.config.canvas_height);

    let mut rng = rand::thread_rng();
    use rand::Rng;
    let jitter_mouse = rng.gen_range(-state.config.jitter_mouse_px..=state.config.jitter_mouse_px);
    let jitter_touch = rng.gen_range(-state.config.jitter_touch_px..=state.config.jitter_touch_px);
    let tolerance_mouse = (state.config.tolerance_mouse_px + jitter_mouse).max(1.0);
    let tolerance_touch = (state.config.tolerance_touch_px + jitter_touch).max(1.0);

    let id = uuid::Uuid::new_v4().to_string();
    let nonce = uuid::Uuid::new_v4().to_string();
    let start_point = points[0];

    let challenge = Challenge {
        id: id.clone(),
        seed: seed.clone(),
        points,
        path_length,
        ttl_ms: state.config.challenge_ttl_ms,
        nonce: nonce.clone(),
        tolerance_mouse_px: tolerance_mouse,
        tolerance_touch_px: tolerance_touch,
        jitter_mouse_px: jitter_mouse,
        jitter_touch_px: jitter_touch,
        peek_pos: 0.0,
        peek_count: 0,
        last_peek_at: None,
        nonce_used: false,
        created_at: now,
    };
    state.store.save(challenge);
    state.store.prune_expired(now);

    let token = state.signer.sign(&Claims {
        cid: id.clone(),
        seed,
        ttl: state.config.challenge_ttl_ms,
        iat: now,
        nonce: nonce.clone(),
    })?;

    tracing::info!(challenge_id = %id, "issued new challenge");

    Ok(Json(NewChallengeResponse {
        challenge_id: id,
        ttl_ms: state.config.challenge_ttl_ms,
        expires_at: now + state.config.challenge_ttl_ms as i64,
        nonce,
        token,
        start_point,
        tolerance: ToleranceView { mouse: tolerance_mouse, touch: tolerance_touch },
        target_completion_ms: state.config.target_completion_ms,
        trail: TrailView {
            visible_ms: state.config.trail_visible_ms,
            fadeout_ms: state.config.trail_fadeout_ms,
        },
        canvas: CanvasView {
            width: state.config.canvas_width,
            height: state.config.canvas_height,
        },
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PeekRequestBody {
    challenge_id: String,
    nonce: String,
    token: String,
    cursor: [f64; 2],
}

async fn peek_handler(
    State(state): State<AppState>,
    Json(body): Json<PeekRequestBody>,
) -> Result<Json<PeekResponse>, CaptchaError> {
    let response = peek::peek(
        state.store.as_ref(),
        &state.signer,
        &state.config,
        &body.challenge_id,
        &body.nonce,
        &body.token,
        (body.cursor[0], body.cursor[1]),
    )?;
    Ok(Json(response))
}

async fn verify_handler(
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, CaptchaError> {
    let response = verify::verify(state.store.as_ref(), &state.signer, &state.config, &req)?;
    tracing::info!(challenge_id = %req.challenge_id, reason = ?response.reason, "verify decided");
    Ok(Json(response))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    time: i64,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", time: now_ms() })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "line_captcha_server=info,tower_http=info".into()),
        )
        .with_target(false)
        .compact()
        .init();

    info!("Starting line-captcha server");

    let config = Config::from_env()?;
    let addr: SocketAddr = config.addr;

    let state = AppState {
        store: Arc::new(InMemoryChallengeStore::new()),
        signer: Signer::new(config.secret.clone()),
        config: Arc::new(config),
    };

    let allowed_origins =
        std::env::var("CORS_ALLOWED_ORIGINS").unwrap_or_else(|_| "*".into());
    let cors = if allowed_origins == "*" {
        warn!("CORS set to permissive mode (*); restrict CORS_ALLOWED_ORIGINS in production");
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = allowed_origins
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        info!(?origins, "CORS configured");
        CorsLayer::new()
            .allow_methods([Method::GET, Method::POST])
            .allow_origin(origins)
    };

    let governor_conf = Box::leak(Box::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(30)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .expect("governor config"),
    ));
    info!("rate limiting configured: 10 req/sec per IP (burst 30)");

    let app = Router::new()
        .route("/captcha/line/new", post(new_challenge))
        .route("/captcha/line/peek", post(peek_handler))
        .route("/captcha/line/verify", post(verify_handler))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(GovernorLayer { config: governor_conf })
        .with_state(state.clone());

    let pruner_store = state.store.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            pruner_store.prune_expired(now_ms());
        }
    });

    info!(%addr, "line-captcha server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
