//! Persistence operations for requests and active entities.
//!
//! Every admin transition runs as one transaction: row lock with
//! `FOR UPDATE`, pure state-machine application, persistence of the result,
//! and the outbox enqueue. Partial states (entity created but not linked,
//! state changed but notification lost) cannot occur.

use chrono::Utc;
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::errors::{AppError, ResultExt};
use crate::models::{
    AprobacionResponse, AvanzarEtapaRequest, Empresa, EmpresaRow, EstadoEmpresa,
    ListarSolicitudesParams, Referencia, Solicitud, SolicitudRow, TipoEvento, TipoSolicitud,
};
use crate::notifications::payload_solicitud;
use crate::outbox;
use crate::workflow::{self, Efecto, Evento};

/// Storage service for the onboarding workflow tables.
pub struct SolicitudStorage {
    pool: PgPool,
}

impl SolicitudStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a freshly built request and enqueues the admin notification,
    /// atomically. Rejects a duplicate non-rejected request for the same
    /// email and type with a 409 (applied uniformly to all three variants).
    pub async fn crear_solicitud(&self, solicitud: &Solicitud) -> Result<Uuid, AppError> {
        let mut tx = self.pool.begin().await?;

        let (duplicada,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(
                 SELECT 1 FROM solicitudes
                 WHERE tipo = $1 AND lower(email) = lower($2)
                   AND estado_general <> 'rechazada'
             )",
        )
        .bind(solicitud.tipo.as_str())
        .bind(&solicitud.email)
        .fetch_one(&mut *tx)
        .await?;

        if duplicada {
            return Err(AppError::Conflict(format!(
                "Ya existe una solicitud de {} para {}",
                solicitud.tipo, solicitud.email
            )));
        }

        let etapas = serde_json::to_value(&solicitud.etapas)
            .map_err(|e| AppError::InternalError(format!("mapa de etapas no serializable: {}", e)))?;

        sqlx::query(
            "INSERT INTO solicitudes
             (id, tipo, nombre, email, rut, telefono, datos, etapas, estado_general,
              etapa_actual, progreso_porcentaje, motivo_rechazo, empresa_id, empresa_activa,
              version, fecha_creacion, fecha_actualizacion)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
        )
        .bind(solicitud.id)
        .bind(solicitud.tipo.as_str())
        .bind(&solicitud.nombre)
        .bind(&solicitud.email)
        .bind(&solicitud.rut)
        .bind(&solicitud.telefono)
        .bind(&solicitud.datos)
        .bind(&etapas)
        .bind(solicitud.estado_general.as_str())
        .bind(&solicitud.etapa_actual)
        .bind(solicitud.progreso_porcentaje)
        .bind(&solicitud.motivo_rechazo)
        .bind(solicitud.empresa_id)
        .bind(solicitud.empresa_activa)
        .bind(solicitud.version)
        .bind(solicitud.fecha_creacion)
        .bind(solicitud.fecha_actualizacion)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            // The partial unique index catches the race two concurrent
            // submissions win against the EXISTS pre-check.
            sqlx::Error::Database(ref db) if db.code().as_deref() == Some("23505") => {
                AppError::Conflict(format!(
                    "Ya existe una solicitud de {} para {}",
                    solicitud.tipo, solicitud.email
                ))
            }
            otra => AppError::DatabaseError(otra),
        })?;

        outbox::encolar(
            &mut tx,
            TipoEvento::SolicitudRecibida,
            payload_solicitud(
                solicitud.id,
                solicitud.tipo.as_str(),
                &solicitud.nombre,
                &solicitud.email,
                json!({}),
            ),
        )
        .await?;

        tx.commit().await?;
        tracing::info!(
            "Solicitud {} de {} creada ({})",
            solicitud.id,
            solicitud.tipo,
            solicitud.email
        );
        Ok(solicitud.id)
    }

    /// Fetches one request by type and id.
    pub async fn obtener(&self, tipo: TipoSolicitud, id: Uuid) -> Result<Solicitud, AppError> {
        let fila = sqlx::query_as::<_, SolicitudRow>(
            "SELECT * FROM solicitudes WHERE id = $1 AND tipo = $2",
        )
        .bind(id)
        .bind(tipo.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Solicitud {} no encontrada", id)))?;
        fila.try_into()
    }

    /// Lists requests of a type, newest first, then applies the console's
    /// estado/etapa/free-text filters in memory (`aplicar_filtros`).
    pub async fn listar(
        &self,
        tipo: TipoSolicitud,
        params: &ListarSolicitudesParams,
    ) -> Result<Vec<Solicitud>, AppError> {
        let filas = sqlx::query_as::<_, SolicitudRow>(
            "SELECT * FROM solicitudes WHERE tipo = $1 ORDER BY fecha_creacion DESC",
        )
        .bind(tipo.as_str())
        .fetch_all(&self.pool)
        .await
        .context("listado de solicitudes")?;

        let solicitudes: Vec<Solicitud> = filas
            .into_iter()
            .map(Solicitud::try_from)
            .collect::<Result<_, _>>()?;
        Ok(aplicar_filtros(solicitudes, params))
    }

    /// Advances a request to a strictly later stage.
    pub async fn avanzar_etapa(
        &self,
        tipo: TipoSolicitud,
        id: Uuid,
        req: &AvanzarEtapaRequest,
        revisor: &str,
    ) -> Result<Solicitud, AppError> {
        let mut tx = self.pool.begin().await?;
        let actual = bloquear(&mut tx, tipo, id, req.version_esperada).await?;

        let evento = Evento::AvanzarEtapa {
            hacia: req.hacia.clone(),
            comentarios: req.comentarios.clone(),
        };
        let transicion = workflow::aplicar(&actual, &evento, revisor, Utc::now())?;
        debug_assert_eq!(transicion.efecto, Efecto::EtapaAvanzada);

        let actualizada = persistir_transicion(&mut tx, &transicion.solicitud).await?;

        outbox::encolar(
            &mut tx,
            TipoEvento::EtapaAvanzada,
            payload_solicitud(
                actualizada.id,
                actualizada.tipo.as_str(),
                &actualizada.nombre,
                &actualizada.email,
                json!({ "etapa": actualizada.etapa_actual, "revisor": revisor }),
            ),
        )
        .await?;

        tx.commit().await?;
        tracing::info!(
            "Solicitud {} avanzada a etapa '{}' por {}",
            id,
            actualizada.etapa_actual,
            revisor
        );
        Ok(actualizada)
    }

    /// Approves a request and creates its active entity, atomically.
    /// Idempotent: a repeat approval returns the already-linked entity id
    /// without writing anything.
    pub async fn aprobar(
        &self,
        tipo: TipoSolicitud,
        id: Uuid,
        revisor: &str,
    ) -> Result<AprobacionResponse, AppError> {
        let mut tx = self.pool.begin().await?;
        let actual = bloquear(&mut tx, tipo, id, None).await?;

        let transicion = workflow::aplicar(&actual, &Evento::Aprobar, revisor, Utc::now())?;

        if transicion.efecto == Efecto::Ninguno {
            tx.rollback().await?;
            let empresa_id = actual.empresa_id.ok_or_else(|| {
                AppError::InternalError(format!(
                    "Solicitud {} aprobada sin empresa vinculada",
                    id
                ))
            })?;
            tracing::info!("Aprobación repetida de {} ignorada", id);
            return Ok(AprobacionResponse {
                solicitud_id: id,
                empresa_id,
                ya_aprobada: true,
            });
        }

        let ahora = Utc::now();
        let empresa_id = Uuid::new_v4();
        // UNIQUE (solicitud_id) is the backstop: even a logic bug cannot
        // produce a second entity for the same request.
        sqlx::query(
            "INSERT INTO empresas
             (id, solicitud_id, tipo, nombre, email, rut, estado, motivo_desactivacion,
              datos, verificada, fecha_creacion, fecha_actualizacion)
             VALUES ($1, $2, $3, $4, $5, $6, $7, NULL, $8, TRUE, $9, $9)",
        )
        .bind(empresa_id)
        .bind(id)
        .bind(tipo.as_str())
        .bind(&actual.nombre)
        .bind(&actual.email)
        .bind(&actual.rut)
        .bind(EstadoEmpresa::Activa.as_str())
        .bind(&actual.datos)
        .bind(ahora)
        .execute(&mut *tx)
        .await
        .context("creación de empresa")?;

        let mut aprobada = transicion.solicitud;
        aprobada.empresa_id = Some(empresa_id);
        persistir_transicion(&mut tx, &aprobada).await?;

        outbox::encolar(
            &mut tx,
            TipoEvento::SolicitudAprobada,
            payload_solicitud(
                id,
                tipo.as_str(),
                &aprobada.nombre,
                &aprobada.email,
                json!({ "empresa_id": empresa_id, "revisor": revisor }),
            ),
        )
        .await?;

        tx.commit().await?;
        tracing::info!("Solicitud {} aprobada; empresa {} creada", id, empresa_id);
        Ok(AprobacionResponse {
            solicitud_id: id,
            empresa_id,
            ya_aprobada: false,
        })
    }

    /// Rejects a request. If an entity was already created (reversal of an
    /// earlier approval) it is deactivated with the same motivo in the same
    /// transaction.
    pub async fn rechazar(
        &self,
        tipo: TipoSolicitud,
        id: Uuid,
        motivo: &str,
        version_esperada: Option<i32>,
        revisor: &str,
    ) -> Result<Solicitud, AppError> {
        let mut tx = self.pool.begin().await?;
        let actual = bloquear(&mut tx, tipo, id, version_esperada).await?;

        let evento = Evento::Rechazar {
            motivo: motivo.to_string(),
        };
        let transicion = workflow::aplicar(&actual, &evento, revisor, Utc::now())?;

        if transicion.efecto == Efecto::Ninguno {
            tx.rollback().await?;
            tracing::info!("Rechazo repetido de {} ignorado", id);
            return Ok(actual);
        }

        let actualizada = persistir_transicion(&mut tx, &transicion.solicitud).await?;

        if let Efecto::Rechazada { tenia_empresa: true } = transicion.efecto {
            sqlx::query(
                "UPDATE empresas
                 SET estado = $2, motivo_desactivacion = $3, fecha_actualizacion = $4
                 WHERE solicitud_id = $1",
            )
            .bind(id)
            .bind(EstadoEmpresa::Inactiva.as_str())
            .bind(motivo.trim())
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .context("desactivación de empresa")?;
        }

        outbox::encolar(
            &mut tx,
            TipoEvento::SolicitudRechazada,
            payload_solicitud(
                id,
                tipo.as_str(),
                &actualizada.nombre,
                &actualizada.email,
                json!({ "motivo": motivo.trim(), "revisor": revisor }),
            ),
        )
        .await?;

        tx.commit().await?;
        tracing::info!("Solicitud {} rechazada por {}", id, revisor);
        Ok(actualizada)
    }

    /// Fetches an active entity by id.
    pub async fn obtener_empresa(&self, id: Uuid) -> Result<Empresa, AppError> {
        let fila = sqlx::query_as::<_, EmpresaRow>("SELECT * FROM empresas WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Empresa {} no encontrada", id)))?;
        fila.try_into()
    }

    /// Lists one reference collection (categorias, marcas, ...).
    pub async fn listar_referencias(&self, coleccion: &str) -> Result<Vec<Referencia>, AppError> {
        let filas = sqlx::query_as::<_, Referencia>(
            "SELECT * FROM referencias WHERE coleccion = $1 ORDER BY nombre",
        )
        .bind(coleccion)
        .fetch_all(&self.pool)
        .await?;
        Ok(filas)
    }
}

/// Applies the admin console's listing filters. Order-preserving: the
/// result keeps the relative order of the input. Exact match on estado and
/// etapa, case-insensitive substring match on nombre/email for `q`.
pub fn aplicar_filtros(
    solicitudes: Vec<Solicitud>,
    params: &ListarSolicitudesParams,
) -> Vec<Solicitud> {
    let q = params.q.as_ref().map(|q| q.to_lowercase());
    solicitudes
        .into_iter()
        .filter(|s| {
            params
                .estado
                .as_ref()
                .map_or(true, |estado| s.estado_general.as_str() == estado)
        })
        .filter(|s| {
            params
                .etapa
                .as_ref()
                .map_or(true, |etapa| &s.etapa_actual == etapa)
        })
        .filter(|s| {
            q.as_ref().map_or(true, |q| {
                s.nombre.to_lowercase().contains(q) || s.email.to_lowercase().contains(q)
            })
        })
        .collect()
}

/// Locks one request row for the duration of the transaction and checks the
/// caller's expected version when given.
async fn bloquear(
    tx: &mut Transaction<'_, Postgres>,
    tipo: TipoSolicitud,
    id: Uuid,
    version_esperada: Option<i32>,
) -> Result<Solicitud, AppError> {
    let fila = sqlx::query_as::<_, SolicitudRow>(
        "SELECT * FROM solicitudes WHERE id = $1 AND tipo = $2 FOR UPDATE",
    )
    .bind(id)
    .bind(tipo.as_str())
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Solicitud {} no encontrada", id)))?;

    if let Some(esperada) = version_esperada {
        if fila.version != esperada {
            return Err(AppError::Conflict(format!(
                "Versión esperada {} pero la solicitud está en versión {}",
                esperada, fila.version
            )));
        }
    }

    fila.try_into()
}

/// Writes back the mutated request and bumps its version. Returns the
/// persisted view.
async fn persistir_transicion(
    tx: &mut Transaction<'_, Postgres>,
    solicitud: &Solicitud,
) -> Result<Solicitud, AppError> {
    let etapas = serde_json::to_value(&solicitud.etapas)
        .map_err(|e| AppError::InternalError(format!("mapa de etapas no serializable: {}", e)))?;

    sqlx::query(
        "UPDATE solicitudes
         SET etapas = $2, estado_general = $3, etapa_actual = $4,
             progreso_porcentaje = $5, motivo_rechazo = $6, empresa_id = $7,
             empresa_activa = $8, version = version + 1, fecha_actualizacion = $9
         WHERE id = $1",
    )
    .bind(solicitud.id)
    .bind(&etapas)
    .bind(solicitud.estado_general.as_str())
    .bind(&solicitud.etapa_actual)
    .bind(solicitud.progreso_porcentaje)
    .bind(&solicitud.motivo_rechazo)
    .bind(solicitud.empresa_id)
    .bind(solicitud.empresa_activa)
    .bind(solicitud.fecha_actualizacion)
    .execute(&mut **tx)
    .await
    .context("actualización de solicitud")?;

    let mut persistida = solicitud.clone();
    persistida.version += 1;
    Ok(persistida)
}
