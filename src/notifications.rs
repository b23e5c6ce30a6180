//! Notification dispatcher.
//!
//! Consumes outbox events and writes the in-app `notificaciones` rows plus
//! the stubbed `email_logs` rows. Also owns the read side: listing, unread
//! counts (expired rows excluded) and mark-as-read.

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::config::Config;
use crate::errors::AppError;
use crate::models::{Notificacion, TipoEvento};

fn campo_str<'a>(payload: &'a Value, campo: &str) -> &'a str {
    payload.get(campo).and_then(|v| v.as_str()).unwrap_or("")
}

/// Materializes one outbox event: inserts the in-app notification for its
/// recipient and logs the stub email. Runs on the dispatcher's transaction.
pub async fn procesar_evento(
    tx: &mut Transaction<'_, Postgres>,
    config: &Config,
    tipo: TipoEvento,
    payload: &Value,
) -> Result<(), AppError> {
    let nombre = campo_str(payload, "nombre");
    let email = campo_str(payload, "email");
    let tipo_solicitud = campo_str(payload, "tipo_solicitud");

    let (destinatario, titulo, mensaje) = match tipo {
        TipoEvento::SolicitudRecibida => (
            config.admin_user_id.clone(),
            format!("Nueva solicitud de {}", tipo_solicitud),
            format!(
                "{} ({}) envió una solicitud de registro de {}.",
                nombre, email, tipo_solicitud
            ),
        ),
        TipoEvento::EtapaAvanzada => (
            email.to_string(),
            "Tu solicitud avanzó de etapa".to_string(),
            format!(
                "Tu solicitud pasó a la etapa '{}'.",
                campo_str(payload, "etapa")
            ),
        ),
        TipoEvento::SolicitudAprobada => (
            email.to_string(),
            "Solicitud aprobada".to_string(),
            format!(
                "¡Felicitaciones {}! Tu solicitud de {} fue aprobada.",
                nombre, tipo_solicitud
            ),
        ),
        TipoEvento::SolicitudRechazada => (
            email.to_string(),
            "Solicitud rechazada".to_string(),
            format!(
                "Tu solicitud de {} fue rechazada. Motivo: {}",
                tipo_solicitud,
                campo_str(payload, "motivo")
            ),
        ),
        TipoEvento::TicketCreado => (
            config.admin_user_id.clone(),
            "Nuevo ticket de contacto".to_string(),
            format!("{} ({}) envió una consulta.", nombre, email),
        ),
    };

    // Back-office notices go stale once nobody acted on them for a month;
    // applicant-facing ones never expire.
    let vencimiento: Option<DateTime<Utc>> = match tipo {
        TipoEvento::SolicitudRecibida | TipoEvento::TicketCreado => {
            Some(Utc::now() + Duration::days(30))
        }
        _ => None,
    };

    sqlx::query(
        "INSERT INTO notificaciones
         (id, user_id, tipo, titulo, mensaje, metadatos, leida, fecha_creacion, fecha_vencimiento)
         VALUES ($1, $2, $3, $4, $5, $6, FALSE, $7, $8)",
    )
    .bind(Uuid::new_v4())
    .bind(&destinatario)
    .bind(tipo.as_str())
    .bind(&titulo)
    .bind(&mensaje)
    .bind(payload)
    .bind(Utc::now())
    .bind(vencimiento)
    .execute(&mut **tx)
    .await?;

    // Email delivery is a stub: the row is the audit trail, nothing sends it.
    let email_destino = if email.is_empty() {
        destinatario.clone()
    } else {
        email.to_string()
    };
    sqlx::query(
        "INSERT INTO email_logs (id, destinatario, asunto, cuerpo, estado, fecha_creacion)
         VALUES ($1, $2, $3, $4, 'registrado', $5)",
    )
    .bind(Uuid::new_v4())
    .bind(email_destino)
    .bind(&titulo)
    .bind(&mensaje)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;

    tracing::info!(
        "Notificación '{}' despachada a {}",
        tipo.as_str(),
        destinatario
    );
    Ok(())
}

/// Lists a user's notifications, newest first. With `solo_no_leidas`,
/// expired rows are excluded too.
pub async fn listar(
    pool: &PgPool,
    user_id: &str,
    solo_no_leidas: bool,
) -> Result<Vec<Notificacion>, AppError> {
    let filas = if solo_no_leidas {
        sqlx::query_as::<_, Notificacion>(
            "SELECT * FROM notificaciones
             WHERE user_id = $1 AND NOT leida
               AND (fecha_vencimiento IS NULL OR fecha_vencimiento > $2)
             ORDER BY fecha_creacion DESC",
        )
        .bind(user_id)
        .bind(Utc::now())
        .fetch_all(pool)
        .await?
    } else {
        sqlx::query_as::<_, Notificacion>(
            "SELECT * FROM notificaciones WHERE user_id = $1 ORDER BY fecha_creacion DESC",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?
    };
    Ok(filas)
}

/// Unread count for the badge. Expired notifications do not count.
pub async fn contar_no_leidas(pool: &PgPool, user_id: &str) -> Result<i64, AppError> {
    let cuenta: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM notificaciones
         WHERE user_id = $1 AND NOT leida
           AND (fecha_vencimiento IS NULL OR fecha_vencimiento > $2)",
    )
    .bind(user_id)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;
    Ok(cuenta.0)
}

/// Marks one notification read. 404 if it does not exist.
pub async fn marcar_leida(pool: &PgPool, id: Uuid) -> Result<(), AppError> {
    let resultado = sqlx::query("UPDATE notificaciones SET leida = TRUE WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    if resultado.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Notificación {} no encontrada",
            id
        )));
    }
    Ok(())
}

/// Builds the standard event payload the workflow transitions enqueue.
pub fn payload_solicitud(
    solicitud_id: Uuid,
    tipo_solicitud: &str,
    nombre: &str,
    email: &str,
    extra: Value,
) -> Value {
    let mut payload = json!({
        "solicitud_id": solicitud_id,
        "tipo_solicitud": tipo_solicitud,
        "nombre": nombre,
        "email": email,
    });
    if let (Some(obj), Some(extra_obj)) = (payload.as_object_mut(), extra.as_object()) {
        for (k, v) in extra_obj {
            obj.insert(k.clone(), v.clone());
        }
    }
    payload
}
