//! Support ticket storage (contact form submissions).
//!
//! Independent lifecycle from the onboarding workflow: created publicly,
//! answered and resolved by the back office.

use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::{AppError, ErrorCampo, ResultExt};
use crate::models::{CrearTicketRequest, ListarTicketsParams, Ticket, TipoEvento};
use crate::outbox;
use crate::wizard::es_email_valido;

pub struct TicketStorage {
    pool: PgPool,
}

impl TicketStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates a ticket and enqueues the admin notification atomically.
    pub async fn crear(&self, req: &CrearTicketRequest) -> Result<Ticket, AppError> {
        let mut errores = Vec::new();
        if req.nombre.trim().is_empty() {
            errores.push(ErrorCampo::new("nombre", "El nombre es obligatorio"));
        }
        if !es_email_valido(req.email.trim()) {
            errores.push(ErrorCampo::new("email", "Email inválido"));
        }
        if req.mensaje.trim().is_empty() {
            errores.push(ErrorCampo::new("mensaje", "El mensaje es obligatorio"));
        }
        if !errores.is_empty() {
            return Err(AppError::Validation(errores));
        }

        let ahora = Utc::now();
        let id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        let ticket = sqlx::query_as::<_, Ticket>(
            "INSERT INTO tickets
             (id, tipo, nombre, email, mensaje, estado, respuestas, visto, resuelto,
              fecha_creacion, fecha_actualizacion)
             VALUES ($1, $2, $3, $4, $5, 'abierto', '[]'::jsonb, FALSE, FALSE, $6, $6)
             RETURNING *",
        )
        .bind(id)
        .bind(&req.tipo)
        .bind(req.nombre.trim())
        .bind(req.email.trim())
        .bind(req.mensaje.trim())
        .bind(ahora)
        .fetch_one(&mut *tx)
        .await
        .context("creación de ticket")?;

        outbox::encolar(
            &mut tx,
            TipoEvento::TicketCreado,
            json!({
                "ticket_id": id,
                "nombre": ticket.nombre,
                "email": ticket.email,
                "tipo_solicitud": ticket.tipo,
            }),
        )
        .await?;

        tx.commit().await?;
        tracing::info!("Ticket {} creado por {}", id, ticket.email);
        Ok(ticket)
    }

    /// Admin listing with optional estado/resuelto filters, newest first.
    pub async fn listar(&self, params: &ListarTicketsParams) -> Result<Vec<Ticket>, AppError> {
        let filas = sqlx::query_as::<_, Ticket>(
            "SELECT * FROM tickets
             WHERE ($1::text IS NULL OR estado = $1)
               AND ($2::boolean IS NULL OR resuelto = $2)
             ORDER BY fecha_creacion DESC",
        )
        .bind(&params.estado)
        .bind(params.resuelto)
        .fetch_all(&self.pool)
        .await?;
        Ok(filas)
    }

    /// Appends an admin reply and marks the ticket seen.
    pub async fn responder(
        &self,
        id: Uuid,
        respuesta: &str,
        admin: &str,
    ) -> Result<Ticket, AppError> {
        let respuesta = respuesta.trim();
        if respuesta.is_empty() {
            return Err(AppError::Validation(vec![ErrorCampo::new(
                "respuesta",
                "La respuesta no puede estar vacía",
            )]));
        }

        let entrada = json!({
            "autor": admin,
            "mensaje": respuesta,
            "fecha": Utc::now(),
        });

        let ticket = sqlx::query_as::<_, Ticket>(
            "UPDATE tickets
             SET respuestas = respuestas || $2::jsonb,
                 visto = TRUE, estado = 'respondido', fecha_actualizacion = $3
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(&entrada)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Ticket {} no encontrado", id)))?;

        Ok(ticket)
    }

    /// Marks a ticket resolved.
    pub async fn resolver(&self, id: Uuid) -> Result<Ticket, AppError> {
        let ticket = sqlx::query_as::<_, Ticket>(
            "UPDATE tickets
             SET resuelto = TRUE, estado = 'resuelto', fecha_actualizacion = $2
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Ticket {} no encontrado", id)))?;

        Ok(ticket)
    }
}
