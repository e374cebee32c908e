use crate::activator::HttpActivator;
use crate::config::Config;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use holdfast_core::{
    BalanceChange, ChunkPos, ClaimRecord, ClaimType, EngineStats, FlatFileBackend, HoldError,
    OwnerId, QuotaStanding, ReconcileController, SqliteBackend, StorageBackend, StorageRegistry,
    WorldCatalog,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub struct ServerState {
    controller: Mutex<ReconcileController>,
    worlds: Arc<HttpActivator>,
}

#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

fn respond<T: Serialize>(result: holdfast_core::Result<T>) -> Response {
    match result {
        Ok(data) => (
            StatusCode::OK,
            Json(ApiResponse {
                success: true,
                data: Some(data),
                error: None,
            }),
        )
            .into_response(),
        Err(error) => (
            error_status(&error),
            Json(ApiResponse::<T> {
                success: false,
                data: None,
                error: Some(error.to_string()),
            }),
        )
            .into_response(),
    }
}

fn error_status(error: &HoldError) -> StatusCode {
    match error {
        HoldError::QuotaExceeded { .. } | HoldError::DuplicateClaim { .. } => StatusCode::CONFLICT,
        HoldError::ClaimNotFound(_) => StatusCode::NOT_FOUND,
        HoldError::UnknownBackend(_) | HoldError::Config(_) => StatusCode::BAD_REQUEST,
        HoldError::StorageUnavailable(_) | HoldError::Activation(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let backend = select_backend(&config)?;

    let activator = Arc::new(HttpActivator::new(
        &config.activation.endpoint,
        Duration::from_secs(config.activation.timeout_secs),
    )?);

    let mut controller = ReconcileController::new(
        backend,
        activator.clone(),
        config.server_name.clone(),
        config.quota_defaults(),
    );

    // a store we cannot load is fatal; running with an inconsistent claim
    // set is worse than not running
    controller.load().await?;
    let activated = controller.activate().await?;
    tracing::info!("Startup reconciliation complete: {} claims active", activated);

    let state = Arc::new(ServerState {
        controller: Mutex::new(controller),
        worlds: activator,
    });

    let app = Router::new()
        .route("/claims", post(create_claim))
        .route("/claims/:id", delete(remove_claim))
        .route("/owners/:owner/claims", delete(delete_owner_claims))
        .route("/balance/:owner", get(get_balance).post(change_balance))
        .route("/purge", post(purge))
        .route("/stats", get(stats))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!("Admin API listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let mut controller = state.controller.lock().await;
    controller.shutdown().await?;
    Ok(())
}

fn select_backend(config: &Config) -> holdfast_core::Result<Arc<dyn StorageBackend>> {
    let mut registry = StorageRegistry::new();

    let flatfile_cfg = config.storage.flatfile.clone();
    registry.register(
        "flatfile",
        Box::new(move || {
            let cfg = flatfile_cfg.clone().ok_or_else(|| {
                HoldError::Config("flatfile backend requires storage.flatfile.path".to_string())
            })?;
            Ok(Arc::new(FlatFileBackend::new(cfg.path)) as Arc<dyn StorageBackend>)
        }),
    );

    let sqlite_cfg = config.storage.sqlite.clone();
    registry.register(
        "sqlite",
        Box::new(move || {
            let cfg = sqlite_cfg.clone().ok_or_else(|| {
                HoldError::Config("sqlite backend requires storage.sqlite.path".to_string())
            })?;
            Ok(Arc::new(SqliteBackend::new(cfg.path)) as Arc<dyn StorageBackend>)
        }),
    );

    registry.select(&config.storage.backend)
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", error);
    }
}

#[derive(Debug, Deserialize)]
struct CreateClaimRequest {
    /// Omitted owner means a system-owned claim.
    owner: Option<String>,
    world_id: String,
    x: i32,
    z: i32,
    claim_type: ClaimType,
}

async fn create_claim(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<CreateClaimRequest>,
) -> Response {
    let owner = match request.owner {
        Some(id) => OwnerId::new(id),
        None => OwnerId::server(),
    };

    let mut controller = state.controller.lock().await;
    let server_name = controller.server_name().to_string();
    let result: holdfast_core::Result<ClaimRecord> =
        controller.engine_mut().and_then(|engine| {
            engine.create_claim(
                owner,
                server_name,
                request.world_id,
                ChunkPos {
                    x: request.x,
                    z: request.z,
                },
                request.claim_type,
            )
        });
    respond(result)
}

async fn remove_claim(State(state): State<Arc<ServerState>>, Path(id): Path<String>) -> Response {
    let mut controller = state.controller.lock().await;
    let result = controller
        .engine_mut()
        .and_then(|engine| engine.remove_claim(&id));
    respond(result)
}

#[derive(Debug, Serialize)]
struct RemovedResponse {
    removed: usize,
}

async fn delete_owner_claims(
    State(state): State<Arc<ServerState>>,
    Path(owner): Path<String>,
) -> Response {
    let mut controller = state.controller.lock().await;
    let result = controller.engine_mut().map(|engine| RemovedResponse {
        removed: engine
            .remove_all_claims_for_owner(&OwnerId::new(owner))
            .len(),
    });
    respond(result)
}

async fn get_balance(State(state): State<Arc<ServerState>>, Path(owner): Path<String>) -> Response {
    let controller = state.controller.lock().await;
    let result: holdfast_core::Result<Vec<QuotaStanding>> = controller
        .engine()
        .map(|engine| engine.summarize(&OwnerId::new(owner)));
    respond(result)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ChangeOp {
    Add,
    Set,
    Remove,
}

#[derive(Debug, Deserialize)]
struct ChangeBalanceRequest {
    claim_type: ClaimType,
    op: ChangeOp,
    value: u32,
}

async fn change_balance(
    State(state): State<Arc<ServerState>>,
    Path(owner): Path<String>,
    Json(request): Json<ChangeBalanceRequest>,
) -> Response {
    let change = match request.op {
        ChangeOp::Add => BalanceChange::Add(request.value),
        ChangeOp::Set => BalanceChange::Set(request.value),
        ChangeOp::Remove => BalanceChange::Remove(request.value),
    };

    let mut controller = state.controller.lock().await;
    let result = controller.engine_mut().map(|engine| {
        engine.change_balance(&OwnerId::new(owner), request.claim_type, change)
    });
    respond(result)
}

async fn purge(State(state): State<Arc<ServerState>>) -> Response {
    let worlds = match state.worlds.existing_world_ids().await {
        Ok(worlds) => worlds,
        Err(error) => return respond::<RemovedResponse>(Err(error)),
    };

    let mut controller = state.controller.lock().await;
    let result = controller.engine_mut().map(|engine| RemovedResponse {
        removed: engine.purge(&worlds),
    });
    respond(result)
}

async fn stats(State(state): State<Arc<ServerState>>) -> Response {
    let controller = state.controller.lock().await;
    let result: holdfast_core::Result<EngineStats> =
        controller.engine().map(|engine| engine.stats());
    respond(result)
}
