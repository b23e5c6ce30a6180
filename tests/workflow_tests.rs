/// Tests for the onboarding state machine and admin console filtering,
/// exercising full review lifecycles over wizard-built requests
use av10julio_api::models::{
    EstadoEtapa, EstadoGeneral, ListarSolicitudesParams, Solicitud, TipoSolicitud,
};
use av10julio_api::store::aplicar_filtros;
use av10julio_api::wizard::construir_solicitud;
use av10julio_api::workflow::{aplicar, orden_etapas, progreso_para, Efecto, Evento};
use chrono::Utc;
use std::collections::HashMap;

fn solicitud(tipo: TipoSolicitud, nombre: &str, email: &str) -> Solicitud {
    let mut campos = HashMap::new();
    match tipo {
        TipoSolicitud::Cliente => {
            campos.insert("nombres".to_string(), nombre.to_string());
            campos.insert("apellidos".to_string(), "Pérez".to_string());
        }
        TipoSolicitud::Proveedor => {
            campos.insert("razon_social".to_string(), nombre.to_string());
            campos.insert("giro".to_string(), "Repuestos automotrices".to_string());
        }
        TipoSolicitud::Empresa => {
            campos.insert("nombre_empresa".to_string(), nombre.to_string());
            campos.insert("rubro".to_string(), "Vulcanización".to_string());
        }
    }
    campos.insert("rut".to_string(), "12.345.678-5".to_string());
    campos.insert("email".to_string(), email.to_string());
    campos.insert("telefono".to_string(), "912345678".to_string());
    campos.insert("acepta_terminos".to_string(), "true".to_string());
    construir_solicitud(tipo, &campos, Utc::now())
}

#[test]
fn ciclo_completo_de_revision_etapa_por_etapa() {
    let mut actual = solicitud(TipoSolicitud::Cliente, "Ana", "ana@x.cl");
    let orden = orden_etapas(TipoSolicitud::Cliente);

    // Walk every stage in order; progress must follow the formula at each hop.
    for etapa in &orden[1..] {
        let t = aplicar(
            &actual,
            &Evento::AvanzarEtapa {
                hacia: etapa.to_string(),
                comentarios: None,
            },
            "admin",
            Utc::now(),
        )
        .unwrap();
        actual = t.solicitud;

        assert_eq!(actual.etapa_actual, *etapa);
        assert_eq!(actual.estado_general, EstadoGeneral::EnRevision);
        assert_eq!(
            actual.progreso_porcentaje,
            progreso_para(TipoSolicitud::Cliente, etapa).unwrap()
        );
        // The stage map never has more than one stage open.
        let abiertas = actual
            .etapas
            .values()
            .filter(|e| e.estado == EstadoEtapa::EnProceso)
            .count();
        assert_eq!(abiertas, 1);
    }

    // Final stage of a 5-stage flow sits at 100 even before approval.
    assert_eq!(actual.progreso_porcentaje, 100);

    let aprobada = aplicar(&actual, &Evento::Aprobar, "admin", Utc::now())
        .unwrap()
        .solicitud;
    assert_eq!(aprobada.estado_general, EstadoGeneral::Aprobada);
    assert_eq!(aprobada.progreso_porcentaje, 100);
}

#[test]
fn progreso_cubre_todos_los_tipos() {
    for tipo in [
        TipoSolicitud::Cliente,
        TipoSolicitud::Proveedor,
        TipoSolicitud::Empresa,
    ] {
        let orden = orden_etapas(tipo);
        for (i, etapa) in orden.iter().enumerate() {
            let esperado = (100 * (i as i32 + 1)) / orden.len() as i32;
            assert_eq!(progreso_para(tipo, etapa), Some(esperado), "{} {}", tipo, etapa);
        }
        // Last stage always lands exactly on 100.
        assert_eq!(progreso_para(tipo, orden[orden.len() - 1]), Some(100));
    }
}

#[test]
fn rechazo_tras_aprobacion_exige_desactivar_la_empresa() {
    let enviada = solicitud(TipoSolicitud::Empresa, "Frenos Sur", "contacto@frenossur.cl");
    let mut aprobada = aplicar(&enviada, &Evento::Aprobar, "admin", Utc::now())
        .unwrap()
        .solicitud;
    aprobada.empresa_id = Some(uuid::Uuid::new_v4());

    let t = aplicar(
        &aprobada,
        &Evento::Rechazar {
            motivo: "patente comercial vencida".to_string(),
        },
        "admin",
        Utc::now(),
    )
    .unwrap();

    // The effect tells the store it owes the entity deactivation.
    assert_eq!(t.efecto, Efecto::Rechazada { tenia_empresa: true });
    assert_eq!(
        t.solicitud.motivo_rechazo.as_deref(),
        Some("patente comercial vencida")
    );
    assert!(!t.solicitud.empresa_activa);
}

#[test]
fn filtrado_por_estado_exacto_y_en_orden() {
    let mut s1 = solicitud(TipoSolicitud::Cliente, "Uno", "uno@x.cl");
    let mut s2 = solicitud(TipoSolicitud::Cliente, "Dos", "dos@x.cl");
    let s3 = solicitud(TipoSolicitud::Cliente, "Tres", "tres@x.cl");
    let mut s4 = solicitud(TipoSolicitud::Cliente, "Cuatro", "cuatro@x.cl");

    s1.estado_general = EstadoGeneral::Aprobada;
    s2.estado_general = EstadoGeneral::Rechazada;
    s4.estado_general = EstadoGeneral::Aprobada;

    let entrada = vec![s1.clone(), s2, s3, s4.clone()];
    let params = ListarSolicitudesParams {
        estado: Some("aprobada".to_string()),
        ..Default::default()
    };
    let filtradas = aplicar_filtros(entrada, &params);

    let ids: Vec<_> = filtradas.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![s1.id, s4.id], "subset exacto, orden preservado");
    assert!(filtradas
        .iter()
        .all(|s| s.estado_general == EstadoGeneral::Aprobada));
}

#[test]
fn filtrado_por_texto_busca_nombre_y_email() {
    let s1 = solicitud(TipoSolicitud::Proveedor, "Lubricantes Matta", "ventas@lubmatta.cl");
    let s2 = solicitud(TipoSolicitud::Proveedor, "Frenos Express", "hola@frenex.cl");

    let params = ListarSolicitudesParams {
        q: Some("matta".to_string()),
        ..Default::default()
    };
    let filtradas = aplicar_filtros(vec![s1.clone(), s2], &params);
    assert_eq!(filtradas.len(), 1);
    assert_eq!(filtradas[0].id, s1.id);

    // Email matches too.
    let params = ListarSolicitudesParams {
        q: Some("FRENEX".to_string()),
        ..Default::default()
    };
    let otra = solicitud(TipoSolicitud::Proveedor, "Frenos Express", "hola@frenex.cl");
    let filtradas = aplicar_filtros(vec![otra.clone()], &params);
    assert_eq!(filtradas.len(), 1);
}

#[test]
fn filtrado_por_etapa_actual() {
    let s1 = solicitud(TipoSolicitud::Cliente, "Uno", "uno@x.cl");
    let avanzada = aplicar(
        &s1,
        &Evento::AvanzarEtapa {
            hacia: "validacion_datos".to_string(),
            comentarios: None,
        },
        "admin",
        Utc::now(),
    )
    .unwrap()
    .solicitud;
    let s2 = solicitud(TipoSolicitud::Cliente, "Dos", "dos@x.cl");

    let params = ListarSolicitudesParams {
        etapa: Some("validacion_datos".to_string()),
        ..Default::default()
    };
    let filtradas = aplicar_filtros(vec![avanzada.clone(), s2], &params);
    assert_eq!(filtradas.len(), 1);
    assert_eq!(filtradas[0].id, avanzada.id);
}
