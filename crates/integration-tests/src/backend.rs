//! In-process emergency API

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, info};

use sosync_api_client::{HttpEmergencyService, HttpServiceConfig};
use sosync_core::{
    Coordinates, CreateEmergencyRequest, EmergencyId, EmergencyService, EmergencySession,
    InMemoryEmergencyService, SessionError, SessionResult,
};

#[derive(Clone)]
struct ApiState {
    service: InMemoryEmergencyService,
    token: Option<Arc<str>>,
}

#[derive(Debug, Default, Deserialize)]
struct ActivateBody {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

/// HTTP front for an [`InMemoryEmergencyService`]
pub struct TestBackend {
    pub url: String,
    pub service: InMemoryEmergencyService,
    token: Option<String>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TestBackend {
    /// Serve without authentication
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with_token(None).await
    }

    /// Serve, rejecting requests whose bearer token differs from `token`
    pub async fn start_with_token(token: Option<&str>) -> anyhow::Result<Self> {
        crate::init_logging();

        let service = InMemoryEmergencyService::new();
        let app = router(ApiState {
            service: service.clone(),
            token: token.map(Arc::from),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let url = format!("http://{}/api", addr);
        info!("Test backend listening on {}", url);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                tracing::error!("Backend error: {}", e);
            }
        });

        Ok(Self {
            url,
            service,
            token: token.map(str::to_string),
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// Client configured with the backend's token
    pub fn client(&self) -> anyhow::Result<HttpEmergencyService> {
        let mut config = HttpServiceConfig::new(&self.url).with_request_timeout_secs(2);
        if let Some(token) = &self.token {
            config = config.with_access_token(token.clone());
        }
        Ok(HttpEmergencyService::new(config)?)
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn router(state: ApiState) -> Router {
    let api = Router::new()
        .route("/emergency", post(create))
        .route("/emergency/:id", get(fetch))
        .route("/emergency/:id/activate", put(activate))
        .route("/emergency/:id/cancel", put(cancel))
        .route("/emergency/:id/recover", put(recover))
        .route("/emergency/:id/complete", put(complete))
        .route("/emergency/:id/location", post(location));
    Router::new().nest("/api", api).with_state(state)
}

fn authorized(state: &ApiState, headers: &HeaderMap) -> bool {
    let Some(token) = &state.token else {
        return true;
    };
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|presented| presented == token.as_ref())
}

fn respond(result: SessionResult<EmergencySession>) -> Response {
    match result {
        Ok(session) => Json(session).into_response(),
        Err(SessionError::ServerError { status }) => StatusCode::from_u16(status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
        Err(e) => {
            debug!(error = %e, "Backend failure");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn create(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<CreateEmergencyRequest>,
) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    respond(state.service.create(&request).await)
}

async fn fetch(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<EmergencyId>,
) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    respond(state.service.fetch(id).await)
}

async fn activate(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<EmergencyId>,
    Json(body): Json<ActivateBody>,
) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let coordinates = match (body.latitude, body.longitude) {
        (Some(latitude), Some(longitude)) => Some(Coordinates {
            latitude,
            longitude,
        }),
        _ => None,
    };
    respond(state.service.activate(id, coordinates).await)
}

async fn cancel(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<EmergencyId>,
) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    respond(state.service.cancel(id).await)
}

async fn recover(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<EmergencyId>,
) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    respond(state.service.begin_recovery(id).await)
}

async fn complete(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<EmergencyId>,
) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    respond(state.service.complete_recovery(id).await)
}

async fn location(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<EmergencyId>,
    Json(coordinates): Json<Coordinates>,
) -> Response {
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    respond(state.service.update_location(id, coordinates).await)
}
