/// Unit tests for the registration wizard engine
/// Tests field validation, fail-closed step gating, and initial document construction
use av10julio_api::models::{EstadoEtapa, EstadoGeneral, TipoSolicitud};
use av10julio_api::wizard::{
    construir_solicitud, es_email_valido, esquema, validar_completo, validar_paso,
};
use chrono::Utc;
use std::collections::HashMap;

fn campos_cliente_validos() -> HashMap<String, String> {
    let mut campos = HashMap::new();
    campos.insert("nombres".to_string(), "Ana".to_string());
    campos.insert("apellidos".to_string(), "Rojas".to_string());
    campos.insert("rut".to_string(), "12.345.678-5".to_string());
    campos.insert("email".to_string(), "ana@x.cl".to_string());
    campos.insert("telefono".to_string(), "912345678".to_string());
    campos.insert("acepta_terminos".to_string(), "true".to_string());
    campos
}

#[cfg(test)]
mod email_validation_tests {
    use super::*;

    #[test]
    fn test_valid_emails() {
        assert!(es_email_valido("user@example.com"));
        assert!(es_email_valido("test.user@example.com"));
        assert!(es_email_valido("user+tag@example.co.uk"));
        assert!(es_email_valido("ana@x.cl"));
    }

    #[test]
    fn test_invalid_emails_basic() {
        assert!(!es_email_valido("userexample.com"));
        assert!(!es_email_valido("user@examplecom"));
        assert!(!es_email_valido("@example.com"));
        assert!(!es_email_valido("user@"));
        assert!(!es_email_valido("a@b"));
        assert!(!es_email_valido(""));
    }

    #[test]
    fn test_invalid_emails_fake_patterns() {
        assert!(!es_email_valido("11999999999@example.com"));
        assert!(!es_email_valido("1111111111@gmail.com"));
        assert!(!es_email_valido("000000@example.com"));
        assert!(!es_email_valido("test123456789@example.com"));
    }
}

#[cfg(test)]
mod step_validation_tests {
    use super::*;

    #[test]
    fn esquemas_tienen_el_numero_correcto_de_pasos() {
        assert_eq!(esquema(TipoSolicitud::Cliente).len(), 3);
        assert_eq!(esquema(TipoSolicitud::Proveedor).len(), 4);
        assert_eq!(esquema(TipoSolicitud::Empresa).len(), 4);
    }

    #[test]
    fn paso_valido_pasa() {
        let campos = campos_cliente_validos();
        assert!(validar_paso(TipoSolicitud::Cliente, 0, &campos).is_ok());
        assert!(validar_paso(TipoSolicitud::Cliente, 1, &campos).is_ok());
        assert!(validar_paso(TipoSolicitud::Cliente, 2, &campos).is_ok());
    }

    #[test]
    fn paso_con_campo_faltante_no_avanza() {
        let mut campos = campos_cliente_validos();
        campos.remove("rut");
        let errores = validar_paso(TipoSolicitud::Cliente, 0, &campos).unwrap_err();
        assert_eq!(errores.len(), 1);
        assert_eq!(errores[0].campo, "rut");
    }

    #[test]
    fn paso_inexistente_falla_cerrado() {
        let campos = campos_cliente_validos();
        let errores = validar_paso(TipoSolicitud::Cliente, 99, &campos).unwrap_err();
        assert_eq!(errores[0].campo, "_paso");
    }

    #[test]
    fn rut_invalido_se_reporta_por_campo() {
        let mut campos = campos_cliente_validos();
        campos.insert("rut".to_string(), "12.345.678-9".to_string());
        let errores = validar_paso(TipoSolicitud::Cliente, 0, &campos).unwrap_err();
        assert!(errores.iter().any(|e| e.campo == "rut"));
    }

    #[test]
    fn terminos_no_aceptados_bloquean() {
        let mut campos = campos_cliente_validos();
        campos.insert("acepta_terminos".to_string(), "false".to_string());
        assert!(validar_paso(TipoSolicitud::Cliente, 2, &campos).is_err());
        assert!(validar_completo(TipoSolicitud::Cliente, &campos).is_err());
    }

    #[test]
    fn validar_completo_acumula_errores_de_todos_los_pasos() {
        let mut campos = campos_cliente_validos();
        campos.remove("nombres");
        campos.insert("email".to_string(), "no-es-email".to_string());
        let errores = validar_completo(TipoSolicitud::Cliente, &campos).unwrap_err();
        let campos_con_error: Vec<&str> =
            errores.iter().map(|e| e.campo.as_str()).collect();
        assert!(campos_con_error.contains(&"nombres"));
        assert!(campos_con_error.contains(&"email"));
    }

    #[test]
    fn proveedor_requiere_razon_social() {
        let mut campos = HashMap::new();
        campos.insert("rut".to_string(), "12.345.678-5".to_string());
        campos.insert("giro".to_string(), "Repuestos".to_string());
        let errores = validar_paso(TipoSolicitud::Proveedor, 0, &campos).unwrap_err();
        assert!(errores.iter().any(|e| e.campo == "razon_social"));
    }
}

#[cfg(test)]
mod submission_tests {
    use super::*;

    /// Scenario: client registration with nombres="Ana", email="ana@x.cl".
    #[test]
    fn solicitud_inicial_de_cliente() {
        let campos = campos_cliente_validos();
        assert!(validar_completo(TipoSolicitud::Cliente, &campos).is_ok());

        let solicitud = construir_solicitud(TipoSolicitud::Cliente, &campos, Utc::now());

        assert_eq!(solicitud.estado_general, EstadoGeneral::Enviada);
        assert_eq!(solicitud.etapa_actual, "revision_inicial");
        assert_eq!(solicitud.progreso_porcentaje, 10);
        assert_eq!(solicitud.nombre, "Ana Rojas");
        assert_eq!(solicitud.email, "ana@x.cl");
        assert_eq!(solicitud.telefono, "+56912345678");
        assert!(solicitud.empresa_id.is_none());
        assert!(!solicitud.empresa_activa);
    }

    /// The stage map must contain every declared stage with a known estado,
    /// and survive a serialization round trip unchanged.
    #[test]
    fn mapa_de_etapas_completo_y_round_trip() {
        let campos = campos_cliente_validos();
        let solicitud = construir_solicitud(TipoSolicitud::Cliente, &campos, Utc::now());

        let declaradas = av10julio_api::workflow::orden_etapas(TipoSolicitud::Cliente);
        assert_eq!(solicitud.etapas.len(), declaradas.len());
        for etapa in declaradas {
            assert!(solicitud.etapas.contains_key(*etapa), "falta {}", etapa);
        }

        // First stage open, the rest pending.
        assert_eq!(
            solicitud.etapas["revision_inicial"].estado,
            EstadoEtapa::EnProceso
        );
        assert!(solicitud.etapas["revision_inicial"].fecha_inicio.is_some());
        for etapa in &declaradas[1..] {
            assert_eq!(solicitud.etapas[*etapa].estado, EstadoEtapa::Pendiente);
        }

        let json = serde_json::to_value(&solicitud.etapas).unwrap();
        let vuelta: av10julio_api::models::MapaEtapas = serde_json::from_value(json).unwrap();
        assert_eq!(vuelta, solicitud.etapas);
    }

    #[test]
    fn campos_extra_quedan_en_datos() {
        let mut campos = campos_cliente_validos();
        campos.insert("comuna".to_string(), "Santiago".to_string());
        let solicitud = construir_solicitud(TipoSolicitud::Cliente, &campos, Utc::now());

        assert_eq!(solicitud.datos["comuna"], "Santiago");
        // Identity fields are split out, not duplicated inside datos.
        assert!(solicitud.datos.get("email").is_none());
        assert!(solicitud.datos.get("rut").is_none());
    }

    #[test]
    fn email_se_normaliza_a_minusculas() {
        let mut campos = campos_cliente_validos();
        campos.insert("email".to_string(), "Ana@X.CL".to_string());
        let solicitud = construir_solicitud(TipoSolicitud::Cliente, &campos, Utc::now());
        assert_eq!(solicitud.email, "ana@x.cl");
    }
}
