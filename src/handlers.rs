use crate::config::Config;
use crate::errors::AppError;
use crate::models::*;
use crate::notifications;
use crate::store::SolicitudStorage;
use crate::tickets::TicketStorage;
use crate::wizard;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use moka::future::Cache;
use serde_json::json;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub db: PgPool,
    /// Application configuration.
    pub config: Config,
    /// Double-submit guard: hashed (tipo, email) keys of recent
    /// submissions. A hit short-circuits with 409 before touching the store.
    pub recent_submission_cache: Cache<String, i64>,
}

/// Cache key for the double-submit guard.
fn clave_dedup(tipo: TipoSolicitud, email: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tipo.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(email.trim().to_lowercase().as_bytes());
    hex::encode(hasher.finalize())
}

/// Explicit admin identity for mutating back-office calls; never ambient.
fn revisor_desde(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get("x-admin-user")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .ok_or_else(|| AppError::Unauthorized("Falta el encabezado X-Admin-User".to_string()))
}

fn parse_tipo(tipo: &str) -> Result<TipoSolicitud, AppError> {
    tipo.parse::<TipoSolicitud>().map_err(AppError::BadRequest)
}

/// Health check endpoint.
///
/// Returns the service status, version, and health information.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "av10julio-api",
            "version": "0.1.0"
        })),
    )
}

/// POST /api/v1/solicitudes/:tipo/validar/:paso
///
/// Per-step wizard validation, the server-side `nextStep()` gate. Fails
/// closed: unknown type or step index never passes.
pub async fn validar_paso(
    Path((tipo, paso)): Path<(String, usize)>,
    Json(req): Json<EnviarSolicitudRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let tipo = parse_tipo(&tipo)?;
    wizard::validar_paso(tipo, paso, &req.campos).map_err(AppError::Validation)?;
    Ok(Json(json!({ "valido": true, "paso": paso })))
}

/// POST /api/v1/solicitudes/:tipo
///
/// Final wizard submit: full server-side validation, duplicate rejection,
/// request creation and the admin notification enqueue in one transaction.
pub async fn enviar_solicitud(
    State(state): State<Arc<AppState>>,
    Path(tipo): Path<String>,
    Json(req): Json<EnviarSolicitudRequest>,
) -> Result<(StatusCode, Json<Solicitud>), AppError> {
    let tipo = parse_tipo(&tipo)?;
    tracing::info!("POST /solicitudes/{} - {} campos", tipo, req.campos.len());

    wizard::validar_completo(tipo, &req.campos).map_err(AppError::Validation)?;

    let email = req
        .campos
        .get("email")
        .map(|e| e.trim().to_lowercase())
        .unwrap_or_default();
    let clave = clave_dedup(tipo, &email);
    if state.recent_submission_cache.get(&clave).await.is_some() {
        return Err(AppError::Conflict(format!(
            "Solicitud ya enviada recientemente; intente de nuevo en {} segundos",
            state.config.dedup_ttl_secs
        )));
    }

    // Mark the key in flight before touching the store, so the second of
    // two near-simultaneous submissions hits the cache instead of racing
    // the insert.
    state
        .recent_submission_cache
        .insert(clave.clone(), Utc::now().timestamp())
        .await;

    let solicitud = wizard::construir_solicitud(tipo, &req.campos, Utc::now());
    let storage = SolicitudStorage::new(state.db.clone());
    if let Err(e) = storage.crear_solicitud(&solicitud).await {
        // A failed create must not lock the applicant out for the TTL.
        state.recent_submission_cache.invalidate(&clave).await;
        return Err(e);
    }

    Ok((StatusCode::CREATED, Json(solicitud)))
}

/// GET /api/v1/admin/solicitudes/:tipo
///
/// Back-office listing with estado/etapa filters and free-text search.
pub async fn listar_solicitudes(
    State(state): State<Arc<AppState>>,
    Path(tipo): Path<String>,
    Query(params): Query<ListarSolicitudesParams>,
) -> Result<Json<Vec<Solicitud>>, AppError> {
    let tipo = parse_tipo(&tipo)?;
    let storage = SolicitudStorage::new(state.db.clone());
    let solicitudes = storage.listar(tipo, &params).await?;
    Ok(Json(solicitudes))
}

/// GET /api/v1/admin/solicitudes/:tipo/:id
pub async fn obtener_solicitud(
    State(state): State<Arc<AppState>>,
    Path((tipo, id)): Path<(String, Uuid)>,
) -> Result<Json<Solicitud>, AppError> {
    let tipo = parse_tipo(&tipo)?;
    let storage = SolicitudStorage::new(state.db.clone());
    Ok(Json(storage.obtener(tipo, id).await?))
}

/// POST /api/v1/admin/solicitudes/:tipo/:id/avanzar
///
/// Closes the current stage and opens a strictly later one. 409 on
/// backwards moves, unknown stages or a stale `version_esperada`.
pub async fn avanzar_etapa(
    State(state): State<Arc<AppState>>,
    Path((tipo, id)): Path<(String, Uuid)>,
    headers: HeaderMap,
    Json(req): Json<AvanzarEtapaRequest>,
) -> Result<Json<Solicitud>, AppError> {
    let tipo = parse_tipo(&tipo)?;
    let revisor = revisor_desde(&headers)?;
    tracing::info!(
        "POST /admin/solicitudes/{}/{}/avanzar -> {} ({})",
        tipo,
        id,
        req.hacia,
        revisor
    );

    let storage = SolicitudStorage::new(state.db.clone());
    let solicitud = storage.avanzar_etapa(tipo, id, &req, &revisor).await?;
    Ok(Json(solicitud))
}

/// POST /api/v1/admin/solicitudes/:tipo/:id/aprobar
///
/// Approves the request and creates the active entity in one transaction.
/// Calling it twice returns the same entity id with `ya_aprobada = true`.
pub async fn aprobar_solicitud(
    State(state): State<Arc<AppState>>,
    Path((tipo, id)): Path<(String, Uuid)>,
    headers: HeaderMap,
) -> Result<Json<AprobacionResponse>, AppError> {
    let tipo = parse_tipo(&tipo)?;
    let revisor = revisor_desde(&headers)?;
    tracing::info!("POST /admin/solicitudes/{}/{}/aprobar ({})", tipo, id, revisor);

    let storage = SolicitudStorage::new(state.db.clone());
    let resultado = storage.aprobar(tipo, id, &revisor).await?;
    Ok(Json(resultado))
}

/// POST /api/v1/admin/solicitudes/:tipo/:id/rechazar
///
/// Rejects the request; a previously approved one also gets its linked
/// entity deactivated with the same motivo.
pub async fn rechazar_solicitud(
    State(state): State<Arc<AppState>>,
    Path((tipo, id)): Path<(String, Uuid)>,
    headers: HeaderMap,
    Json(req): Json<RechazarRequest>,
) -> Result<Json<Solicitud>, AppError> {
    let tipo = parse_tipo(&tipo)?;
    let revisor = revisor_desde(&headers)?;
    tracing::info!("POST /admin/solicitudes/{}/{}/rechazar ({})", tipo, id, revisor);

    let storage = SolicitudStorage::new(state.db.clone());
    let solicitud = storage
        .rechazar(tipo, id, &req.motivo, req.version_esperada, &revisor)
        .await?;
    Ok(Json(solicitud))
}

/// GET /api/v1/empresas/:id
///
/// Public storefront lookup of an active entity.
pub async fn obtener_empresa(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Empresa>, AppError> {
    let storage = SolicitudStorage::new(state.db.clone());
    Ok(Json(storage.obtener_empresa(id).await?))
}

/// GET /api/v1/referencias/:coleccion
///
/// Read-only reference data (categorias, marcas, centros_revision, ...).
pub async fn listar_referencias(
    State(state): State<Arc<AppState>>,
    Path(coleccion): Path<String>,
) -> Result<Json<Vec<Referencia>>, AppError> {
    let storage = SolicitudStorage::new(state.db.clone());
    Ok(Json(storage.listar_referencias(&coleccion).await?))
}

/// GET /api/v1/notificaciones/usuario/:user_id
pub async fn listar_notificaciones(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(params): Query<ListarNotificacionesParams>,
) -> Result<Json<Vec<Notificacion>>, AppError> {
    let lista = notifications::listar(&state.db, &user_id, params.solo_no_leidas).await?;
    Ok(Json(lista))
}

/// GET /api/v1/notificaciones/usuario/:user_id/no-leidas
///
/// Unread badge count for the back-office header; cheap enough to poll.
pub async fn contar_no_leidas(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let cuenta = notifications::contar_no_leidas(&state.db, &user_id).await?;
    Ok(Json(json!({ "no_leidas": cuenta })))
}

/// POST /api/v1/notificaciones/:id/leer
pub async fn marcar_leida(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    notifications::marcar_leida(&state.db, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/tickets
///
/// Public contact form.
pub async fn crear_ticket(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CrearTicketRequest>,
) -> Result<(StatusCode, Json<Ticket>), AppError> {
    let storage = TicketStorage::new(state.db.clone());
    let ticket = storage.crear(&req).await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

/// GET /api/v1/admin/tickets
pub async fn listar_tickets(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListarTicketsParams>,
) -> Result<Json<Vec<Ticket>>, AppError> {
    let storage = TicketStorage::new(state.db.clone());
    Ok(Json(storage.listar(&params).await?))
}

/// POST /api/v1/admin/tickets/:id/responder
pub async fn responder_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<ResponderTicketRequest>,
) -> Result<Json<Ticket>, AppError> {
    let admin = revisor_desde(&headers)?;
    let storage = TicketStorage::new(state.db.clone());
    Ok(Json(storage.responder(id, &req.respuesta, &admin).await?))
}

/// POST /api/v1/admin/tickets/:id/resolver
pub async fn resolver_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Ticket>, AppError> {
    let _admin = revisor_desde(&headers)?;
    let storage = TicketStorage::new(state.db.clone());
    Ok(Json(storage.resolver(id).await?))
}
