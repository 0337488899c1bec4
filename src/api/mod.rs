use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{Path, Query, Request, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::engine::Engine;
use crate::error::{HiveError, Result};
use crate::proxy::ForwardRequest;
use crate::registry::NodeEntry;
use crate::scheduler::{ContainerConfig, ImageJob};

/// Largest request body relayed to the container daemon.
const MAX_FORWARD_BODY: usize = 16 * 1024 * 1024;

#[derive(Deserialize)]
struct NodesQuery {
    zone: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SubmitContainerResponse {
    id: String,
    nodes: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SubmitImageResponse {
    image: String,
    accepted: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Maps core failures onto HTTP status codes.
pub struct ApiError(HiveError);

impl From<HiveError> for ApiError {
    fn from(err: HiveError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            HiveError::NoCandidateNodes { .. } | HiveError::InsufficientNodes { .. } => {
                StatusCode::CONFLICT
            }
            HiveError::InvalidJob(_) | HiveError::Serialization(_) => StatusCode::BAD_REQUEST,
            HiveError::JobNotFound(_) => StatusCode::NOT_FOUND,
            HiveError::StoreUnavailable(_) | HiveError::StoreTimeout(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            HiveError::Forward(_) => StatusCode::BAD_GATEWAY,
            HiveError::InvalidConfig(_) | HiveError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = %status, error = %self.0, "Request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

pub fn router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_handler))
        .route("/ping", get(ping_handler))
        .route("/api/cluster", get(cluster_status_handler))
        .route("/api/nodes", get(list_nodes_handler))
        .route(
            "/api/jobs/containers",
            get(list_container_jobs_handler).post(submit_container_job_handler),
        )
        .route(
            "/api/jobs/containers/{name}",
            get(get_container_job_handler).delete(remove_container_job_handler),
        )
        .route("/api/jobs/images", post(submit_image_job_handler))
        .route(
            "/api/jobs/images/{*image}",
            get(get_image_job_handler).delete(remove_image_job_handler),
        )
        .route("/api/assignments", get(assignments_handler))
        .fallback(daemon_handler)
        .layer(cors)
        .with_state(engine)
}

/// Serves the API on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    engine: Arc<Engine>,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = listener
        .local_addr()
        .map_err(|e| HiveError::Internal(format!("listener has no local address: {e}")))?;
    tracing::info!(addr = %addr, "Starting API server");

    axum::serve(listener, router(engine))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| HiveError::Internal(format!("API server failed: {e}")))
}

async fn index_handler() -> String {
    format!("Docker Hive {}", crate::VERSION)
}

async fn ping_handler() -> &'static str {
    "pong"
}

async fn cluster_status_handler(
    State(engine): State<Arc<Engine>>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(engine.cluster_status().await?))
}

async fn list_nodes_handler(
    State(engine): State<Arc<Engine>>,
    Query(query): Query<NodesQuery>,
) -> ApiResult<Json<Vec<NodeEntry>>> {
    let nodes: Vec<NodeEntry> = match query.zone {
        Some(zone) => engine
            .registry()
            .list_nodes(&zone)
            .await?
            .into_iter()
            .map(|name| NodeEntry {
                zone: zone.clone(),
                name,
            })
            .collect(),
        None => engine.registry().list_all_nodes().await?,
    };
    Ok(Json(nodes))
}

async fn list_container_jobs_handler(
    State(engine): State<Arc<Engine>>,
) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(engine.scheduler().list_container_jobs().await?))
}

async fn submit_container_job_handler(
    State(engine): State<Arc<Engine>>,
    Json(config): Json<ContainerConfig>,
) -> ApiResult<impl IntoResponse> {
    let zone = config.zone.clone();
    let count = usize::try_from(config.number_of_instances.max(1)).unwrap_or(usize::MAX);

    let submission = engine.submit_container_job(config, &zone, count).await?;
    Ok((
        StatusCode::CREATED,
        Json(SubmitContainerResponse {
            id: submission.id,
            nodes: submission.nodes,
        }),
    ))
}

async fn get_container_job_handler(
    State(engine): State<Arc<Engine>>,
    Path(name): Path<String>,
) -> ApiResult<Json<ContainerConfig>> {
    engine
        .scheduler()
        .get_container_job(&name)
        .await?
        .map(Json)
        .ok_or_else(|| HiveError::JobNotFound(name).into())
}

async fn remove_container_job_handler(
    State(engine): State<Arc<Engine>>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    if engine.remove_container_job(&name).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(HiveError::JobNotFound(name).into())
    }
}

async fn submit_image_job_handler(
    State(engine): State<Arc<Engine>>,
    Json(job): Json<ImageJob>,
) -> ApiResult<impl IntoResponse> {
    let accepted = engine.submit_image_job(&job.image, &job.zone).await?;
    Ok((
        StatusCode::CREATED,
        Json(SubmitImageResponse {
            image: job.image,
            accepted,
        }),
    ))
}

async fn get_image_job_handler(
    State(engine): State<Arc<Engine>>,
    Path(image): Path<String>,
) -> ApiResult<Json<ImageJob>> {
    engine
        .scheduler()
        .get_image_job(&image)
        .await?
        .map(Json)
        .ok_or_else(|| HiveError::JobNotFound(image).into())
}

async fn remove_image_job_handler(
    State(engine): State<Arc<Engine>>,
    Path(image): Path<String>,
) -> ApiResult<StatusCode> {
    if engine.remove_image_job(&image).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(HiveError::JobNotFound(image).into())
    }
}

async fn assignments_handler(State(engine): State<Arc<Engine>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(engine.assignments().await?))
}

/// Relays versioned daemon API calls (`/v1.*`) to the local container daemon.
async fn daemon_handler(
    State(engine): State<Arc<Engine>>,
    request: Request,
) -> ApiResult<Response> {
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    if !request.uri().path().starts_with("/v1") {
        return Ok((StatusCode::NOT_FOUND, "404 page not found").into_response());
    }

    let method = request.method().to_string();
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = to_bytes(request.into_body(), MAX_FORWARD_BODY)
        .await
        .map_err(|e| HiveError::Forward(format!("failed to read request body: {e}")))?;

    let forwarded = engine
        .forwarder()
        .forward(ForwardRequest {
            method,
            path_and_query,
            content_type,
            body,
        })
        .await?;

    let status = StatusCode::from_u16(forwarded.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = (status, Body::from(forwarded.body)).into_response();
    if let Some(value) = forwarded
        .content_type
        .and_then(|ct| HeaderValue::from_str(&ct).ok())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}
