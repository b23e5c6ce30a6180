use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::AppError;

// ============ Domain enums ============

/// The three onboarding request variants handled by the marketplace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TipoSolicitud {
    /// End customer looking for parts/services.
    Cliente,
    /// Parts provider selling through the street's businesses.
    Proveedor,
    /// A storefront company on AV10 de Julio itself.
    Empresa,
}

impl TipoSolicitud {
    pub fn as_str(&self) -> &'static str {
        match self {
            TipoSolicitud::Cliente => "cliente",
            TipoSolicitud::Proveedor => "proveedor",
            TipoSolicitud::Empresa => "empresa",
        }
    }
}

impl FromStr for TipoSolicitud {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cliente" => Ok(TipoSolicitud::Cliente),
            "proveedor" => Ok(TipoSolicitud::Proveedor),
            "empresa" => Ok(TipoSolicitud::Empresa),
            other => Err(format!("tipo de solicitud desconocido: {}", other)),
        }
    }
}

impl fmt::Display for TipoSolicitud {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall lifecycle state of a request (`estado_general`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstadoGeneral {
    /// Created by the wizard, waiting for first admin touch.
    Enviada,
    /// At least one stage transition has happened.
    EnRevision,
    /// Terminal: an active entity exists and is linked.
    Aprobada,
    /// Terminal (but reachable again from `Aprobada` as a reversal).
    Rechazada,
}

impl EstadoGeneral {
    pub fn as_str(&self) -> &'static str {
        match self {
            EstadoGeneral::Enviada => "enviada",
            EstadoGeneral::EnRevision => "en_revision",
            EstadoGeneral::Aprobada => "aprobada",
            EstadoGeneral::Rechazada => "rechazada",
        }
    }
}

impl FromStr for EstadoGeneral {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enviada" => Ok(EstadoGeneral::Enviada),
            "en_revision" => Ok(EstadoGeneral::EnRevision),
            "aprobada" => Ok(EstadoGeneral::Aprobada),
            "rechazada" => Ok(EstadoGeneral::Rechazada),
            other => Err(format!("estado_general desconocido: {}", other)),
        }
    }
}

impl fmt::Display for EstadoGeneral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-state of a single review stage inside the stage map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstadoEtapa {
    Pendiente,
    EnProceso,
    Completada,
    Rechazada,
}

impl EstadoEtapa {
    pub fn as_str(&self) -> &'static str {
        match self {
            EstadoEtapa::Pendiente => "pendiente",
            EstadoEtapa::EnProceso => "en_proceso",
            EstadoEtapa::Completada => "completada",
            EstadoEtapa::Rechazada => "rechazada",
        }
    }
}

/// State of an approved company/profile record.
///
/// Stored capitalized ("Activa"/"Inactiva"), unlike the snake_case
/// request states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EstadoEmpresa {
    Activa,
    Inactiva,
}

impl EstadoEmpresa {
    pub fn as_str(&self) -> &'static str {
        match self {
            EstadoEmpresa::Activa => "Activa",
            EstadoEmpresa::Inactiva => "Inactiva",
        }
    }
}

impl FromStr for EstadoEmpresa {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Activa" => Ok(EstadoEmpresa::Activa),
            "Inactiva" => Ok(EstadoEmpresa::Inactiva),
            other => Err(format!("estado de empresa desconocido: {}", other)),
        }
    }
}

// ============ Stage map ============

/// One entry of a request's stage map (`etapas`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtapaInfo {
    pub estado: EstadoEtapa,
    #[serde(default)]
    pub fecha_inicio: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fecha_fin: Option<DateTime<Utc>>,
    #[serde(default)]
    pub comentarios: Option<String>,
    #[serde(default)]
    pub revisor: Option<String>,
}

impl EtapaInfo {
    pub fn pendiente() -> Self {
        Self {
            estado: EstadoEtapa::Pendiente,
            fecha_inicio: None,
            fecha_fin: None,
            comentarios: None,
            revisor: None,
        }
    }
}

/// Keyed stage map. Iteration order is irrelevant; the authoritative stage
/// order lives in `workflow::orden_etapas`.
pub type MapaEtapas = BTreeMap<String, EtapaInfo>;

// ============ Requests ============

/// An onboarding application progressing through staged admin review.
///
/// This is the typed in-memory view; `SolicitudRow` is the raw table row.
#[derive(Debug, Clone, Serialize)]
pub struct Solicitud {
    /// Document id.
    pub id: Uuid,
    /// Request variant (cliente/proveedor/empresa).
    pub tipo: TipoSolicitud,
    /// Applicant or business name.
    pub nombre: String,
    /// Contact email, also the duplicate-submission key.
    pub email: String,
    /// Chilean tax id (RUT), check digit included.
    pub rut: String,
    /// Contact phone, normalized to +56XXXXXXXXX.
    pub telefono: String,
    /// Remaining denormalized wizard fields.
    pub datos: Value,
    /// Stage map keyed by stage name.
    pub etapas: MapaEtapas,
    pub estado_general: EstadoGeneral,
    /// Key of the stage currently `en_proceso` (or last touched).
    pub etapa_actual: String,
    pub progreso_porcentaje: i32,
    pub motivo_rechazo: Option<String>,
    /// Id of the active entity created on approval.
    pub empresa_id: Option<Uuid>,
    pub empresa_activa: bool,
    /// Optimistic-concurrency counter, bumped on every admin mutation.
    pub version: i32,
    pub fecha_creacion: DateTime<Utc>,
    pub fecha_actualizacion: DateTime<Utc>,
}

/// Raw `solicitudes` row. State columns are TEXT and the stage map is JSONB;
/// conversion into the typed `Solicitud` happens in `TryFrom`.
#[derive(Debug, Clone, FromRow)]
pub struct SolicitudRow {
    pub id: Uuid,
    pub tipo: String,
    pub nombre: String,
    pub email: String,
    pub rut: String,
    pub telefono: String,
    pub datos: Value,
    pub etapas: Value,
    pub estado_general: String,
    pub etapa_actual: String,
    pub progreso_porcentaje: i32,
    pub motivo_rechazo: Option<String>,
    pub empresa_id: Option<Uuid>,
    pub empresa_activa: bool,
    pub version: i32,
    pub fecha_creacion: DateTime<Utc>,
    pub fecha_actualizacion: DateTime<Utc>,
}

impl TryFrom<SolicitudRow> for Solicitud {
    type Error = AppError;

    fn try_from(row: SolicitudRow) -> Result<Self, Self::Error> {
        let tipo = row
            .tipo
            .parse::<TipoSolicitud>()
            .map_err(AppError::InternalError)?;
        let estado_general = row
            .estado_general
            .parse::<EstadoGeneral>()
            .map_err(AppError::InternalError)?;
        let etapas: MapaEtapas = serde_json::from_value(row.etapas).map_err(|e| {
            AppError::InternalError(format!("mapa de etapas corrupto para {}: {}", row.id, e))
        })?;

        Ok(Solicitud {
            id: row.id,
            tipo,
            nombre: row.nombre,
            email: row.email,
            rut: row.rut,
            telefono: row.telefono,
            datos: row.datos,
            etapas,
            estado_general,
            etapa_actual: row.etapa_actual,
            progreso_porcentaje: row.progreso_porcentaje,
            motivo_rechazo: row.motivo_rechazo,
            empresa_id: row.empresa_id,
            empresa_activa: row.empresa_activa,
            version: row.version,
            fecha_creacion: row.fecha_creacion,
            fecha_actualizacion: row.fecha_actualizacion,
        })
    }
}

// ============ Active entities ============

/// The durable company/profile record created exactly once per approved
/// request (`empresas` table; clients land here too, discriminated by tipo).
#[derive(Debug, Clone, Serialize)]
pub struct Empresa {
    pub id: Uuid,
    /// Originating request; UNIQUE in the table, which is the
    /// exactly-once backstop for approval.
    pub solicitud_id: Uuid,
    pub tipo: TipoSolicitud,
    pub nombre: String,
    pub email: String,
    pub rut: String,
    pub estado: EstadoEmpresa,
    pub motivo_desactivacion: Option<String>,
    /// Denormalized copy of the request's wizard fields.
    pub datos: Value,
    pub verificada: bool,
    pub fecha_creacion: DateTime<Utc>,
    pub fecha_actualizacion: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct EmpresaRow {
    pub id: Uuid,
    pub solicitud_id: Uuid,
    pub tipo: String,
    pub nombre: String,
    pub email: String,
    pub rut: String,
    pub estado: String,
    pub motivo_desactivacion: Option<String>,
    pub datos: Value,
    pub verificada: bool,
    pub fecha_creacion: DateTime<Utc>,
    pub fecha_actualizacion: DateTime<Utc>,
}

impl TryFrom<EmpresaRow> for Empresa {
    type Error = AppError;

    fn try_from(row: EmpresaRow) -> Result<Self, Self::Error> {
        Ok(Empresa {
            id: row.id,
            solicitud_id: row.solicitud_id,
            tipo: row.tipo.parse().map_err(AppError::InternalError)?,
            nombre: row.nombre,
            email: row.email,
            rut: row.rut,
            estado: row.estado.parse().map_err(AppError::InternalError)?,
            motivo_desactivacion: row.motivo_desactivacion,
            datos: row.datos,
            verificada: row.verificada,
            fecha_creacion: row.fecha_creacion,
            fecha_actualizacion: row.fecha_actualizacion,
        })
    }
}

// ============ Notifications & email log ============

/// In-app notification record.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Notificacion {
    pub id: Uuid,
    /// Recipient user id ("admin" for the back office).
    pub user_id: String,
    /// Notification kind, mirrors the outbox event that produced it.
    pub tipo: String,
    pub titulo: String,
    pub mensaje: String,
    pub metadatos: Value,
    pub leida: bool,
    pub fecha_creacion: DateTime<Utc>,
    /// Optional expiry; expired rows are excluded from unread counts.
    pub fecha_vencimiento: Option<DateTime<Utc>>,
}

/// Stubbed email delivery record. Nothing sends these; they exist so the
/// dispatch side effects of a transition are auditable.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EmailLog {
    pub id: Uuid,
    pub destinatario: String,
    pub asunto: String,
    pub cuerpo: String,
    pub estado: String,
    pub fecha_creacion: DateTime<Utc>,
}

// ============ Tickets ============

/// Contact/support form submission with its own independent lifecycle.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Ticket {
    pub id: Uuid,
    pub tipo: String,
    pub nombre: String,
    pub email: String,
    pub mensaje: String,
    pub estado: String,
    /// Admin replies, appended in order.
    pub respuestas: Value,
    pub visto: bool,
    pub resuelto: bool,
    pub fecha_creacion: DateTime<Utc>,
    pub fecha_actualizacion: DateTime<Utc>,
}

// ============ Outbox ============

/// Event kinds the workflow emits through the outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TipoEvento {
    SolicitudRecibida,
    EtapaAvanzada,
    SolicitudAprobada,
    SolicitudRechazada,
    TicketCreado,
}

impl TipoEvento {
    pub fn as_str(&self) -> &'static str {
        match self {
            TipoEvento::SolicitudRecibida => "solicitud_recibida",
            TipoEvento::EtapaAvanzada => "etapa_avanzada",
            TipoEvento::SolicitudAprobada => "solicitud_aprobada",
            TipoEvento::SolicitudRechazada => "solicitud_rechazada",
            TipoEvento::TicketCreado => "ticket_creado",
        }
    }
}

impl FromStr for TipoEvento {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "solicitud_recibida" => Ok(TipoEvento::SolicitudRecibida),
            "etapa_avanzada" => Ok(TipoEvento::EtapaAvanzada),
            "solicitud_aprobada" => Ok(TipoEvento::SolicitudAprobada),
            "solicitud_rechazada" => Ok(TipoEvento::SolicitudRechazada),
            "ticket_creado" => Ok(TipoEvento::TicketCreado),
            other => Err(format!("tipo de evento desconocido: {}", other)),
        }
    }
}

/// Undispatched workflow event, written in the same transaction as the state
/// change it describes.
#[derive(Debug, Clone, FromRow)]
pub struct OutboxEvento {
    pub id: Uuid,
    pub evento: String,
    pub payload: Value,
    pub despachado: bool,
    /// Failed dispatch attempts; the dispatcher parks the event after
    /// `outbox::MAX_INTENTOS`.
    pub intentos: i32,
    pub fecha_creacion: DateTime<Utc>,
    pub fecha_despacho: Option<DateTime<Utc>>,
}

// ============ Reference data ============

/// Read-only reference row (categorias, marcas, centros_revision, ...).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Referencia {
    pub id: Uuid,
    pub coleccion: String,
    pub nombre: String,
    pub datos: Value,
}

// ============ API DTOs ============

/// Wizard submission payload: the accumulated form fields of all steps.
#[derive(Debug, Clone, Deserialize)]
pub struct EnviarSolicitudRequest {
    pub campos: std::collections::HashMap<String, String>,
}

/// Query params for the admin request listing.
#[derive(Debug, Default, Deserialize)]
pub struct ListarSolicitudesParams {
    /// Exact `estado_general` filter.
    pub estado: Option<String>,
    /// Exact `etapa_actual` filter.
    pub etapa: Option<String>,
    /// Free-text match on nombre/email.
    pub q: Option<String>,
}

/// Body for the advance-stage operation.
#[derive(Debug, Clone, Deserialize)]
pub struct AvanzarEtapaRequest {
    /// Target stage key; must be strictly later in the fixed order.
    pub hacia: String,
    #[serde(default)]
    pub comentarios: Option<String>,
    /// Expected current `version`; mismatch is a 409.
    #[serde(default)]
    pub version_esperada: Option<i32>,
}

/// Body for the reject operation.
#[derive(Debug, Clone, Deserialize)]
pub struct RechazarRequest {
    pub motivo: String,
    #[serde(default)]
    pub version_esperada: Option<i32>,
}

/// Result of an approval. `ya_aprobada` marks the idempotent repeat case.
#[derive(Debug, Clone, Serialize)]
pub struct AprobacionResponse {
    pub solicitud_id: Uuid,
    pub empresa_id: Uuid,
    pub ya_aprobada: bool,
}

/// Body for creating a support ticket.
#[derive(Debug, Clone, Deserialize)]
pub struct CrearTicketRequest {
    #[serde(default = "default_tipo_ticket")]
    pub tipo: String,
    pub nombre: String,
    pub email: String,
    pub mensaje: String,
}

fn default_tipo_ticket() -> String {
    "contacto".to_string()
}

/// Body for replying to a ticket.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponderTicketRequest {
    pub respuesta: String,
}

/// Query params for ticket listing.
#[derive(Debug, Default, Deserialize)]
pub struct ListarTicketsParams {
    pub estado: Option<String>,
    pub resuelto: Option<bool>,
}

/// Query params for the notification listing.
#[derive(Debug, Default, Deserialize)]
pub struct ListarNotificacionesParams {
    #[serde(default)]
    pub solo_no_leidas: bool,
}
