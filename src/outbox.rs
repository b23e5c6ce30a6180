//! Transactional outbox.
//!
//! Workflow transitions never write notifications directly; they enqueue an
//! event row inside the same transaction as the state change, and a
//! background task turns pending events into notification and email-log
//! rows. A dispatch failure leaves the event pending for the next tick, so
//! delivery is at-least-once and a notification failure can never roll back
//! or silently drop a state change.

use chrono::Utc;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;
use crate::errors::AppError;
use crate::models::{OutboxEvento, TipoEvento};
use crate::notifications;

/// Dispatch attempts before an event is parked and stops being claimed.
pub const MAX_INTENTOS: i32 = 5;

/// Enqueues an event on an open transaction.
pub async fn encolar(
    tx: &mut Transaction<'_, Postgres>,
    evento: TipoEvento,
    payload: Value,
) -> Result<Uuid, AppError> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO outbox_eventos (id, evento, payload, despachado, fecha_creacion)
         VALUES ($1, $2, $3, FALSE, $4)",
    )
    .bind(id)
    .bind(evento.as_str())
    .bind(payload)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;
    Ok(id)
}

/// Background dispatcher loop. Never returns; errors are logged and retried
/// on the next tick.
pub async fn run_dispatcher(pool: PgPool, config: Config) {
    let mut interval = tokio::time::interval(Duration::from_secs(config.outbox_interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tracing::info!(
        "Outbox dispatcher started (every {}s)",
        config.outbox_interval_secs
    );

    loop {
        interval.tick().await;
        match despachar_pendientes(&pool, &config).await {
            Ok(0) => {}
            Ok(n) => tracing::debug!("Dispatched {} outbox event(s)", n),
            Err(e) => tracing::error!("Outbox dispatch pass failed: {}", e),
        }
    }
}

/// Dispatches pending events in creation order. Each event is processed in
/// its own transaction; `SKIP LOCKED` lets multiple instances coexist.
///
/// A failing event does not abort the pass: its partial work is rolled
/// back, its attempt counter bumped, and the pass moves on to younger
/// events. After `MAX_INTENTOS` failures the event stops being claimed.
pub async fn despachar_pendientes(pool: &PgPool, config: &Config) -> Result<usize, AppError> {
    let mut despachados = 0usize;
    let mut fallidos: Vec<Uuid> = Vec::new();

    loop {
        let mut tx = pool.begin().await?;

        let evento = sqlx::query_as::<_, OutboxEvento>(
            "SELECT * FROM outbox_eventos
             WHERE NOT despachado AND intentos < $1 AND NOT (id = ANY($2))
             ORDER BY fecha_creacion
             LIMIT 1
             FOR UPDATE SKIP LOCKED",
        )
        .bind(MAX_INTENTOS)
        .bind(&fallidos)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(evento) = evento else {
            tx.rollback().await?;
            break;
        };

        match despachar_uno(&mut tx, config, &evento).await {
            Ok(()) => {
                sqlx::query(
                    "UPDATE outbox_eventos SET despachado = TRUE, fecha_despacho = $2
                     WHERE id = $1",
                )
                .bind(evento.id)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                despachados += 1;
            }
            Err(e) => {
                tx.rollback().await?;
                tracing::error!(
                    "Evento {} ('{}') falló en el intento {}: {}",
                    evento.id,
                    evento.evento,
                    evento.intentos + 1,
                    e
                );
                sqlx::query("UPDATE outbox_eventos SET intentos = intentos + 1 WHERE id = $1")
                    .bind(evento.id)
                    .execute(pool)
                    .await?;
                fallidos.push(evento.id);
            }
        }
    }

    Ok(despachados)
}

async fn despachar_uno(
    tx: &mut Transaction<'_, Postgres>,
    config: &Config,
    evento: &OutboxEvento,
) -> Result<(), AppError> {
    let tipo: TipoEvento = evento.evento.parse().map_err(AppError::InternalError)?;
    notifications::procesar_evento(tx, config, tipo, &evento.payload).await
}
