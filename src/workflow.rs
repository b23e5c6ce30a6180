//! Onboarding state machine.
//!
//! Pure transition logic over a `Solicitud`: no IO, no clocks, no store
//! access. The admin handlers load a request, apply an event here, and
//! persist whatever comes back inside one transaction. Stage progression is
//! monotonic: an advance may jump ahead over intermediate stages but never
//! move backwards.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::models::{EstadoEtapa, EstadoGeneral, EtapaInfo, MapaEtapas, Solicitud, TipoSolicitud};

/// Progress value written at submission time, regardless of stage count.
/// Every later transition recomputes via `progreso_para`.
pub const PROGRESO_INICIAL: i32 = 10;

/// Fixed review-stage order per request type.
pub fn orden_etapas(tipo: TipoSolicitud) -> &'static [&'static str] {
    match tipo {
        TipoSolicitud::Cliente => &[
            "revision_inicial",
            "validacion_datos",
            "asignacion_agente",
            "entrevista",
            "aprobacion_final",
        ],
        TipoSolicitud::Proveedor => &[
            "revision_inicial",
            "validacion_documentos",
            "verificacion_comercial",
            "aprobacion_final",
        ],
        TipoSolicitud::Empresa => &[
            "revision_inicial",
            "validacion_datos",
            "visita_terreno",
            "aprobacion_final",
        ],
    }
}

/// Position of a stage in the fixed order, if it exists for this type.
pub fn indice_etapa(tipo: TipoSolicitud, etapa: &str) -> Option<usize> {
    orden_etapas(tipo).iter().position(|e| *e == etapa)
}

/// First stage key for a type.
pub fn etapa_inicial(tipo: TipoSolicitud) -> &'static str {
    orden_etapas(tipo)[0]
}

/// Last stage key for a type.
pub fn etapa_final(tipo: TipoSolicitud) -> &'static str {
    orden_etapas(tipo)
        .last()
        .expect("stage orders are non-empty")
}

/// Deterministic progress for a stage: `100 * (index + 1) / n`, integer.
pub fn progreso_para(tipo: TipoSolicitud, etapa: &str) -> Option<i32> {
    let orden = orden_etapas(tipo);
    let idx = indice_etapa(tipo, etapa)?;
    Some((100 * (idx as i32 + 1)) / orden.len() as i32)
}

/// Builds the stage map a freshly submitted request starts with: the first
/// stage open (`en_proceso`), everything after it `pendiente`.
pub fn mapa_inicial(tipo: TipoSolicitud, ahora: DateTime<Utc>) -> MapaEtapas {
    let mut mapa = MapaEtapas::new();
    for (i, etapa) in orden_etapas(tipo).iter().enumerate() {
        let mut info = EtapaInfo::pendiente();
        if i == 0 {
            info.estado = EstadoEtapa::EnProceso;
            info.fecha_inicio = Some(ahora);
        }
        mapa.insert((*etapa).to_string(), info);
    }
    mapa
}

/// Admin-invoked workflow events.
#[derive(Debug, Clone, PartialEq)]
pub enum Evento {
    /// Close the current stage and open a strictly later one.
    AvanzarEtapa {
        hacia: String,
        comentarios: Option<String>,
    },
    /// Terminal approval; triggers active-entity creation in the store.
    Aprobar,
    /// Rejection, reachable from any state including `aprobada` (reversal).
    Rechazar { motivo: String },
}

/// What the store must do after a successful application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Efecto {
    /// Idempotent repeat; nothing changed, persist nothing.
    Ninguno,
    /// Stage map and progress changed.
    EtapaAvanzada,
    /// Create the active entity and link it back.
    Aprobada,
    /// Store the motivo; deactivate the linked entity if one exists.
    Rechazada { tenia_empresa: bool },
}

/// Outcome of applying an event: the updated request plus the side effect
/// the caller owes.
#[derive(Debug, Clone)]
pub struct Transicion {
    pub solicitud: Solicitud,
    pub efecto: Efecto,
}

/// Transition rejections. `MotivoVacio` maps to a validation error at the
/// API layer, the rest to HTTP 409.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowError {
    /// Target stage does not exist in this type's fixed order.
    EtapaDesconocida { etapa: String },
    /// Target stage is not strictly later than the current one.
    RetrocesoNoPermitido { desde: String, hacia: String },
    /// The operation is not allowed from the request's current state.
    EstadoInvalido {
        estado: EstadoGeneral,
        operacion: &'static str,
    },
    /// Reject requires a non-empty reason.
    MotivoVacio,
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowError::EtapaDesconocida { etapa } => {
                write!(f, "Etapa desconocida: {}", etapa)
            }
            WorkflowError::RetrocesoNoPermitido { desde, hacia } => {
                write!(
                    f,
                    "No se puede retroceder de '{}' a '{}': el avance de etapas es monotónico",
                    desde, hacia
                )
            }
            WorkflowError::EstadoInvalido { estado, operacion } => {
                write!(
                    f,
                    "La operación '{}' no está permitida en estado '{}'",
                    operacion, estado
                )
            }
            WorkflowError::MotivoVacio => write!(f, "El motivo de rechazo no puede estar vacío"),
        }
    }
}

impl std::error::Error for WorkflowError {}

/// Applies an admin event to a request.
///
/// Returns the mutated copy and the side effect the store must perform. The
/// input is untouched so callers can diff or retry.
pub fn aplicar(
    solicitud: &Solicitud,
    evento: &Evento,
    revisor: &str,
    ahora: DateTime<Utc>,
) -> Result<Transicion, WorkflowError> {
    match evento {
        Evento::AvanzarEtapa { hacia, comentarios } => {
            avanzar(solicitud, hacia, comentarios.as_deref(), revisor, ahora)
        }
        Evento::Aprobar => aprobar(solicitud, revisor, ahora),
        Evento::Rechazar { motivo } => rechazar(solicitud, motivo, revisor, ahora),
    }
}

fn avanzar(
    solicitud: &Solicitud,
    hacia: &str,
    comentarios: Option<&str>,
    revisor: &str,
    ahora: DateTime<Utc>,
) -> Result<Transicion, WorkflowError> {
    match solicitud.estado_general {
        EstadoGeneral::Enviada | EstadoGeneral::EnRevision => {}
        estado => {
            return Err(WorkflowError::EstadoInvalido {
                estado,
                operacion: "avanzar_etapa",
            })
        }
    }

    let idx_hacia = indice_etapa(solicitud.tipo, hacia).ok_or_else(|| {
        WorkflowError::EtapaDesconocida {
            etapa: hacia.to_string(),
        }
    })?;
    // etapa_actual always comes from the same fixed order; a miss here means
    // a corrupted document, treated as an unknown stage.
    let idx_actual = indice_etapa(solicitud.tipo, &solicitud.etapa_actual).ok_or_else(|| {
        WorkflowError::EtapaDesconocida {
            etapa: solicitud.etapa_actual.clone(),
        }
    })?;

    if idx_hacia <= idx_actual {
        return Err(WorkflowError::RetrocesoNoPermitido {
            desde: solicitud.etapa_actual.clone(),
            hacia: hacia.to_string(),
        });
    }

    let mut actualizada = solicitud.clone();

    // Close the stage being left: reviewer comments live on the closed stage.
    if let Some(info) = actualizada.etapas.get_mut(&solicitud.etapa_actual) {
        info.estado = EstadoEtapa::Completada;
        info.fecha_fin = Some(ahora);
        info.revisor = Some(revisor.to_string());
        if let Some(c) = comentarios {
            info.comentarios = Some(c.to_string());
        }
    }

    // Open the target stage. Skipped intermediate stages stay pendiente.
    if let Some(info) = actualizada.etapas.get_mut(hacia) {
        info.estado = EstadoEtapa::EnProceso;
        info.fecha_inicio = Some(ahora);
    }

    actualizada.etapa_actual = hacia.to_string();
    actualizada.estado_general = EstadoGeneral::EnRevision;
    actualizada.progreso_porcentaje =
        progreso_para(solicitud.tipo, hacia).expect("index checked above");
    actualizada.fecha_actualizacion = ahora;

    Ok(Transicion {
        solicitud: actualizada,
        efecto: Efecto::EtapaAvanzada,
    })
}

fn aprobar(
    solicitud: &Solicitud,
    revisor: &str,
    ahora: DateTime<Utc>,
) -> Result<Transicion, WorkflowError> {
    // Idempotent repeat: already approved means nothing to do.
    if solicitud.estado_general == EstadoGeneral::Aprobada {
        return Ok(Transicion {
            solicitud: solicitud.clone(),
            efecto: Efecto::Ninguno,
        });
    }

    match solicitud.estado_general {
        EstadoGeneral::Enviada | EstadoGeneral::EnRevision => {}
        estado => {
            return Err(WorkflowError::EstadoInvalido {
                estado,
                operacion: "aprobar",
            })
        }
    }

    let mut actualizada = solicitud.clone();
    for info in actualizada.etapas.values_mut() {
        if info.estado != EstadoEtapa::Completada {
            if info.fecha_inicio.is_none() {
                info.fecha_inicio = Some(ahora);
            }
            info.estado = EstadoEtapa::Completada;
            info.fecha_fin = Some(ahora);
            info.revisor = Some(revisor.to_string());
        }
    }

    actualizada.etapa_actual = etapa_final(solicitud.tipo).to_string();
    actualizada.estado_general = EstadoGeneral::Aprobada;
    actualizada.progreso_porcentaje = 100;
    actualizada.empresa_activa = true;
    actualizada.fecha_actualizacion = ahora;

    Ok(Transicion {
        solicitud: actualizada,
        efecto: Efecto::Aprobada,
    })
}

fn rechazar(
    solicitud: &Solicitud,
    motivo: &str,
    revisor: &str,
    ahora: DateTime<Utc>,
) -> Result<Transicion, WorkflowError> {
    let motivo = motivo.trim();
    if motivo.is_empty() {
        return Err(WorkflowError::MotivoVacio);
    }

    if solicitud.estado_general == EstadoGeneral::Rechazada {
        // Same reason again is an idempotent repeat; a different reason on a
        // terminal request is a bug on the caller's side.
        if solicitud.motivo_rechazo.as_deref() == Some(motivo) {
            return Ok(Transicion {
                solicitud: solicitud.clone(),
                efecto: Efecto::Ninguno,
            });
        }
        return Err(WorkflowError::EstadoInvalido {
            estado: EstadoGeneral::Rechazada,
            operacion: "rechazar",
        });
    }

    let tenia_empresa = solicitud.empresa_id.is_some();
    let mut actualizada = solicitud.clone();

    if let Some(info) = actualizada.etapas.get_mut(&solicitud.etapa_actual) {
        info.estado = EstadoEtapa::Rechazada;
        info.fecha_fin = Some(ahora);
        info.revisor = Some(revisor.to_string());
        info.comentarios = Some(motivo.to_string());
    }

    actualizada.estado_general = EstadoGeneral::Rechazada;
    actualizada.motivo_rechazo = Some(motivo.to_string());
    actualizada.empresa_activa = false;
    actualizada.fecha_actualizacion = ahora;

    Ok(Transicion {
        solicitud: actualizada,
        efecto: Efecto::Rechazada { tenia_empresa },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn solicitud_de_prueba(tipo: TipoSolicitud) -> Solicitud {
        let ahora = Utc::now();
        Solicitud {
            id: Uuid::new_v4(),
            tipo,
            nombre: "Prueba".into(),
            email: "prueba@x.cl".into(),
            rut: "12.345.678-5".into(),
            telefono: "+56912345678".into(),
            datos: json!({}),
            etapas: mapa_inicial(tipo, ahora),
            estado_general: EstadoGeneral::Enviada,
            etapa_actual: etapa_inicial(tipo).to_string(),
            progreso_porcentaje: PROGRESO_INICIAL,
            motivo_rechazo: None,
            empresa_id: None,
            empresa_activa: false,
            version: 1,
            fecha_creacion: ahora,
            fecha_actualizacion: ahora,
        }
    }

    #[test]
    fn progreso_sigue_la_formula() {
        // cliente has 5 stages: 20/40/60/80/100
        assert_eq!(
            progreso_para(TipoSolicitud::Cliente, "revision_inicial"),
            Some(20)
        );
        assert_eq!(
            progreso_para(TipoSolicitud::Cliente, "aprobacion_final"),
            Some(100)
        );
        // proveedor has 4 stages: 25/50/75/100
        assert_eq!(
            progreso_para(TipoSolicitud::Proveedor, "validacion_documentos"),
            Some(50)
        );
        assert_eq!(progreso_para(TipoSolicitud::Cliente, "inexistente"), None);
    }

    #[test]
    fn avanzar_cierra_y_abre_etapas() {
        let s = solicitud_de_prueba(TipoSolicitud::Cliente);
        let evento = Evento::AvanzarEtapa {
            hacia: "validacion_datos".into(),
            comentarios: Some("ok".into()),
        };
        let t = aplicar(&s, &evento, "admin", Utc::now()).unwrap();
        assert_eq!(t.efecto, Efecto::EtapaAvanzada);

        let nueva = t.solicitud;
        assert_eq!(nueva.estado_general, EstadoGeneral::EnRevision);
        assert_eq!(nueva.etapa_actual, "validacion_datos");
        assert_eq!(nueva.progreso_porcentaje, 40);

        let cerrada = &nueva.etapas["revision_inicial"];
        assert_eq!(cerrada.estado, EstadoEtapa::Completada);
        assert_eq!(cerrada.comentarios.as_deref(), Some("ok"));
        assert_eq!(cerrada.revisor.as_deref(), Some("admin"));
        assert!(cerrada.fecha_fin.is_some());

        let abierta = &nueva.etapas["validacion_datos"];
        assert_eq!(abierta.estado, EstadoEtapa::EnProceso);
        assert!(abierta.fecha_inicio.is_some());
    }

    #[test]
    fn avanzar_rechaza_retrocesos_y_la_misma_etapa() {
        let s = solicitud_de_prueba(TipoSolicitud::Cliente);
        let adelantada = aplicar(
            &s,
            &Evento::AvanzarEtapa {
                hacia: "asignacion_agente".into(),
                comentarios: None,
            },
            "admin",
            Utc::now(),
        )
        .unwrap()
        .solicitud;

        for hacia in ["validacion_datos", "asignacion_agente", "revision_inicial"] {
            let err = aplicar(
                &adelantada,
                &Evento::AvanzarEtapa {
                    hacia: hacia.into(),
                    comentarios: None,
                },
                "admin",
                Utc::now(),
            )
            .unwrap_err();
            assert!(
                matches!(err, WorkflowError::RetrocesoNoPermitido { .. }),
                "hacia={} err={:?}",
                hacia,
                err
            );
        }
    }

    #[test]
    fn avanzar_permite_saltos_hacia_adelante() {
        let s = solicitud_de_prueba(TipoSolicitud::Cliente);
        let t = aplicar(
            &s,
            &Evento::AvanzarEtapa {
                hacia: "entrevista".into(),
                comentarios: None,
            },
            "admin",
            Utc::now(),
        )
        .unwrap();
        assert_eq!(t.solicitud.etapa_actual, "entrevista");
        // Skipped stages stay pendiente; only one stage is en_proceso.
        assert_eq!(
            t.solicitud.etapas["validacion_datos"].estado,
            EstadoEtapa::Pendiente
        );
        let en_proceso = t
            .solicitud
            .etapas
            .values()
            .filter(|e| e.estado == EstadoEtapa::EnProceso)
            .count();
        assert_eq!(en_proceso, 1);
    }

    #[test]
    fn avanzar_con_etapa_desconocida_falla() {
        let s = solicitud_de_prueba(TipoSolicitud::Proveedor);
        let err = aplicar(
            &s,
            &Evento::AvanzarEtapa {
                hacia: "entrevista".into(), // cliente-only stage
                comentarios: None,
            },
            "admin",
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::EtapaDesconocida { .. }));
    }

    #[test]
    fn aprobar_completa_todo_y_es_idempotente() {
        let s = solicitud_de_prueba(TipoSolicitud::Empresa);
        let t = aplicar(&s, &Evento::Aprobar, "admin", Utc::now()).unwrap();
        assert_eq!(t.efecto, Efecto::Aprobada);

        let mut aprobada = t.solicitud;
        assert_eq!(aprobada.estado_general, EstadoGeneral::Aprobada);
        assert_eq!(aprobada.etapa_actual, "aprobacion_final");
        assert_eq!(aprobada.progreso_porcentaje, 100);
        assert!(aprobada.empresa_activa);
        assert!(aprobada
            .etapas
            .values()
            .all(|e| e.estado == EstadoEtapa::Completada));

        // Second approval is a pure no-op.
        aprobada.empresa_id = Some(Uuid::new_v4());
        let repetida = aplicar(&aprobada, &Evento::Aprobar, "admin", Utc::now()).unwrap();
        assert_eq!(repetida.efecto, Efecto::Ninguno);
        assert_eq!(
            repetida.solicitud.empresa_id, aprobada.empresa_id,
            "repeat approval must not touch the linked entity"
        );
    }

    #[test]
    fn aprobar_tras_rechazo_falla() {
        let s = solicitud_de_prueba(TipoSolicitud::Cliente);
        let rechazada = aplicar(
            &s,
            &Evento::Rechazar {
                motivo: "datos falsos".into(),
            },
            "admin",
            Utc::now(),
        )
        .unwrap()
        .solicitud;

        let err = aplicar(&rechazada, &Evento::Aprobar, "admin", Utc::now()).unwrap_err();
        assert!(matches!(err, WorkflowError::EstadoInvalido { .. }));
    }

    #[test]
    fn rechazar_requiere_motivo() {
        let s = solicitud_de_prueba(TipoSolicitud::Cliente);
        let err = aplicar(
            &s,
            &Evento::Rechazar { motivo: "  ".into() },
            "admin",
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err, WorkflowError::MotivoVacio);
    }

    #[test]
    fn rechazar_una_aprobada_marca_la_reversion() {
        let s = solicitud_de_prueba(TipoSolicitud::Empresa);
        let mut aprobada = aplicar(&s, &Evento::Aprobar, "admin", Utc::now())
            .unwrap()
            .solicitud;
        aprobada.empresa_id = Some(Uuid::new_v4());

        let t = aplicar(
            &aprobada,
            &Evento::Rechazar {
                motivo: "documentación vencida".into(),
            },
            "admin",
            Utc::now(),
        )
        .unwrap();
        assert_eq!(t.efecto, Efecto::Rechazada { tenia_empresa: true });
        assert_eq!(t.solicitud.estado_general, EstadoGeneral::Rechazada);
        assert!(!t.solicitud.empresa_activa);
        assert_eq!(
            t.solicitud.motivo_rechazo.as_deref(),
            Some("documentación vencida")
        );
    }

    #[test]
    fn rechazar_repetido_con_mismo_motivo_es_noop() {
        let s = solicitud_de_prueba(TipoSolicitud::Cliente);
        let rechazada = aplicar(
            &s,
            &Evento::Rechazar {
                motivo: "incompleta".into(),
            },
            "admin",
            Utc::now(),
        )
        .unwrap()
        .solicitud;

        let otra_vez = aplicar(
            &rechazada,
            &Evento::Rechazar {
                motivo: "incompleta".into(),
            },
            "admin",
            Utc::now(),
        )
        .unwrap();
        assert_eq!(otra_vez.efecto, Efecto::Ninguno);

        let err = aplicar(
            &rechazada,
            &Evento::Rechazar {
                motivo: "otro motivo".into(),
            },
            "admin",
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, WorkflowError::EstadoInvalido { .. }));
    }
}
