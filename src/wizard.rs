//! Registration wizard engine.
//!
//! One schema-driven implementation for the three onboarding variants. Each
//! request type declares an ordered list of steps, each step a list of field
//! specs with validators; `validar_paso` fails closed so a step never
//! advances past invalid input, and `validar_completo` re-runs everything
//! server-side on submit regardless of what the client claims.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashMap;
use uuid::Uuid;

use crate::errors::ErrorCampo;
use crate::models::{EstadoGeneral, Solicitud, TipoSolicitud};
use crate::workflow;

/// Format validator attached to a field spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validador {
    Email,
    TelefonoCl,
    Rut,
    /// Minimum trimmed length.
    MinLen(usize),
    /// Checkbox that must be "true" (terms acceptance).
    Aceptacion,
}

/// One wizard form field.
#[derive(Debug, Clone, Copy)]
pub struct Campo {
    pub nombre: &'static str,
    pub etiqueta: &'static str,
    pub requerido: bool,
    pub validador: Option<Validador>,
}

/// One wizard step: a titled group of fields validated together.
#[derive(Debug, Clone, Copy)]
pub struct Paso {
    pub nombre: &'static str,
    pub titulo: &'static str,
    pub campos: &'static [Campo],
}

const fn campo(
    nombre: &'static str,
    etiqueta: &'static str,
    requerido: bool,
    validador: Option<Validador>,
) -> Campo {
    Campo {
        nombre,
        etiqueta,
        requerido,
        validador,
    }
}

static PASOS_CLIENTE: &[Paso] = &[
    Paso {
        nombre: "datos_personales",
        titulo: "Datos personales",
        campos: &[
            campo("nombres", "Nombres", true, Some(Validador::MinLen(2))),
            campo("apellidos", "Apellidos", true, Some(Validador::MinLen(2))),
            campo("rut", "RUT", true, Some(Validador::Rut)),
        ],
    },
    Paso {
        nombre: "contacto",
        titulo: "Información de contacto",
        campos: &[
            campo("email", "Email", true, Some(Validador::Email)),
            campo("telefono", "Teléfono", true, Some(Validador::TelefonoCl)),
            campo("direccion", "Dirección", false, None),
            campo("comuna", "Comuna", false, None),
        ],
    },
    Paso {
        nombre: "preferencias",
        titulo: "Preferencias y confirmación",
        campos: &[
            campo("tipo_vehiculo", "Tipo de vehículo", false, None),
            campo(
                "acepta_terminos",
                "Acepta los términos",
                true,
                Some(Validador::Aceptacion),
            ),
        ],
    },
];

static PASOS_PROVEEDOR: &[Paso] = &[
    Paso {
        nombre: "datos_empresa",
        titulo: "Datos de la empresa",
        campos: &[
            campo("razon_social", "Razón social", true, Some(Validador::MinLen(3))),
            campo("rut", "RUT", true, Some(Validador::Rut)),
            campo("giro", "Giro comercial", true, Some(Validador::MinLen(3))),
        ],
    },
    Paso {
        nombre: "contacto",
        titulo: "Información de contacto",
        campos: &[
            campo("email", "Email", true, Some(Validador::Email)),
            campo("telefono", "Teléfono", true, Some(Validador::TelefonoCl)),
            campo("direccion", "Dirección", false, None),
        ],
    },
    Paso {
        nombre: "antecedentes",
        titulo: "Antecedentes comerciales",
        campos: &[
            campo("categorias", "Categorías de productos", false, None),
            campo("anos_experiencia", "Años de experiencia", false, None),
            campo("sitio_web", "Sitio web", false, None),
        ],
    },
    Paso {
        nombre: "confirmacion",
        titulo: "Confirmación",
        campos: &[campo(
            "acepta_terminos",
            "Acepta los términos",
            true,
            Some(Validador::Aceptacion),
        )],
    },
];

static PASOS_EMPRESA: &[Paso] = &[
    Paso {
        nombre: "datos_empresa",
        titulo: "Datos de la empresa",
        campos: &[
            campo("nombre_empresa", "Nombre de la empresa", true, Some(Validador::MinLen(3))),
            campo("rut", "RUT", true, Some(Validador::Rut)),
            campo("rubro", "Rubro", true, Some(Validador::MinLen(3))),
        ],
    },
    Paso {
        nombre: "contacto",
        titulo: "Información de contacto",
        campos: &[
            campo("email", "Email", true, Some(Validador::Email)),
            campo("telefono", "Teléfono", true, Some(Validador::TelefonoCl)),
            campo("direccion", "Dirección", false, None),
            campo("comuna", "Comuna", false, None),
        ],
    },
    Paso {
        nombre: "local",
        titulo: "Datos del local",
        campos: &[
            campo("numero_local", "Número de local", false, None),
            campo("horario", "Horario de atención", false, None),
        ],
    },
    Paso {
        nombre: "confirmacion",
        titulo: "Confirmación",
        campos: &[campo(
            "acepta_terminos",
            "Acepta los términos",
            true,
            Some(Validador::Aceptacion),
        )],
    },
];

/// Step schema for a request type. Cliente runs 3 steps, proveedor and
/// empresa run 4.
pub fn esquema(tipo: TipoSolicitud) -> &'static [Paso] {
    match tipo {
        TipoSolicitud::Cliente => PASOS_CLIENTE,
        TipoSolicitud::Proveedor => PASOS_PROVEEDOR,
        TipoSolicitud::Empresa => PASOS_EMPRESA,
    }
}

/// Email validation: basic shape checks, fake-pattern rejection, then a
/// simplified RFC 5322 regex.
pub fn es_email_valido(email: &str) -> bool {
    if email.len() < 5 || !email.contains('@') || !email.contains('.') {
        return false;
    }

    // Repeated-digit throwaways show up constantly in contact forms.
    let patrones_falsos = ["999999", "111111", "000000", "123456789"];
    for patron in &patrones_falsos {
        if email.contains(patron) {
            tracing::warn!("Email con patrón falso '{}' rechazado: {}", patron, email);
            return false;
        }
    }

    let email_regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
    ).unwrap();
    email_regex.is_match(email)
}

/// Validates and normalizes a Chilean phone number to `+56XXXXXXXXX`.
///
/// Accepts mobile (9 digits starting with 9) and fixed (9 digits starting
/// with 2) numbers, with or without the 56 country prefix and formatting
/// characters. Returns `(valid, normalized)`.
pub fn validar_telefono_cl(telefono: &str) -> (bool, String) {
    let digitos: String = telefono.chars().filter(|c| c.is_ascii_digit()).collect();
    if digitos.is_empty() {
        return (false, String::new());
    }

    let nacional = if let Some(resto) = digitos.strip_prefix("56") {
        resto.to_string()
    } else {
        digitos
    };

    if nacional.len() != 9 {
        return (false, String::new());
    }
    if !nacional.starts_with('9') && !nacional.starts_with('2') {
        return (false, String::new());
    }

    (true, format!("+56{}", nacional))
}

/// Validates a Chilean RUT with its mod-11 check digit.
///
/// Accepts "12.345.678-5", "12345678-5" and "123456785"; the check digit may
/// be K/k.
pub fn validar_rut(rut: &str) -> bool {
    let limpio: String = rut
        .chars()
        .filter(|c| *c != '.' && *c != '-' && !c.is_whitespace())
        .collect();
    if limpio.len() < 2 {
        return false;
    }

    let (cuerpo, dv) = limpio.split_at(limpio.len() - 1);
    if cuerpo.is_empty() || cuerpo.len() > 8 || !cuerpo.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }

    let mut suma: u32 = 0;
    let mut factor: u32 = 2;
    for c in cuerpo.chars().rev() {
        suma += c.to_digit(10).unwrap() * factor;
        factor = if factor == 7 { 2 } else { factor + 1 };
    }

    let resto = 11 - (suma % 11);
    let dv_esperado = match resto {
        11 => "0".to_string(),
        10 => "K".to_string(),
        n => n.to_string(),
    };

    dv.to_uppercase() == dv_esperado
}

fn validar_campo(campo: &Campo, valor: Option<&str>) -> Option<ErrorCampo> {
    let valor = valor.map(str::trim).unwrap_or("");

    if valor.is_empty() {
        if campo.requerido {
            return Some(ErrorCampo::new(
                campo.nombre,
                format!("{} es obligatorio", campo.etiqueta),
            ));
        }
        return None;
    }

    match campo.validador {
        Some(Validador::Email) if !es_email_valido(valor) => Some(ErrorCampo::new(
            campo.nombre,
            "Email inválido".to_string(),
        )),
        Some(Validador::TelefonoCl) if !validar_telefono_cl(valor).0 => Some(ErrorCampo::new(
            campo.nombre,
            "Teléfono chileno inválido".to_string(),
        )),
        Some(Validador::Rut) if !validar_rut(valor) => Some(ErrorCampo::new(
            campo.nombre,
            "RUT inválido".to_string(),
        )),
        Some(Validador::MinLen(min)) if valor.chars().count() < min => Some(ErrorCampo::new(
            campo.nombre,
            format!("{} debe tener al menos {} caracteres", campo.etiqueta, min),
        )),
        Some(Validador::Aceptacion) if valor != "true" => Some(ErrorCampo::new(
            campo.nombre,
            "Debe aceptar los términos para continuar".to_string(),
        )),
        _ => None,
    }
}

/// Validates one step against the accumulated form fields. Fails closed: an
/// out-of-range step index is itself an error, never a silent pass.
pub fn validar_paso(
    tipo: TipoSolicitud,
    paso_idx: usize,
    campos: &HashMap<String, String>,
) -> Result<(), Vec<ErrorCampo>> {
    let pasos = esquema(tipo);
    let paso = pasos.get(paso_idx).ok_or_else(|| {
        vec![ErrorCampo::new(
            "_paso",
            format!("Paso {} no existe para tipo {}", paso_idx, tipo),
        )]
    })?;

    let errores: Vec<ErrorCampo> = paso
        .campos
        .iter()
        .filter_map(|c| validar_campo(c, campos.get(c.nombre).map(String::as_str)))
        .collect();

    if errores.is_empty() {
        Ok(())
    } else {
        Err(errores)
    }
}

/// Validates every step of the schema; used on submit.
pub fn validar_completo(
    tipo: TipoSolicitud,
    campos: &HashMap<String, String>,
) -> Result<(), Vec<ErrorCampo>> {
    let mut errores = Vec::new();
    for paso in esquema(tipo) {
        errores.extend(
            paso.campos
                .iter()
                .filter_map(|c| validar_campo(c, campos.get(c.nombre).map(String::as_str))),
        );
    }
    if errores.is_empty() {
        Ok(())
    } else {
        Err(errores)
    }
}

/// Display name for the request: person name for clientes, business name
/// otherwise.
fn nombre_para(tipo: TipoSolicitud, campos: &HashMap<String, String>) -> String {
    match tipo {
        TipoSolicitud::Cliente => {
            let nombres = campos.get("nombres").map(String::as_str).unwrap_or("");
            let apellidos = campos.get("apellidos").map(String::as_str).unwrap_or("");
            format!("{} {}", nombres, apellidos).trim().to_string()
        }
        TipoSolicitud::Proveedor => campos
            .get("razon_social")
            .cloned()
            .unwrap_or_default(),
        TipoSolicitud::Empresa => campos
            .get("nombre_empresa")
            .cloned()
            .unwrap_or_default(),
    }
}

/// Builds the initial request document from validated wizard fields: first
/// stage open, `estado_general = enviada`, progress at the seeded value.
///
/// Assumes `validar_completo` already passed; the scalar identity fields are
/// split out, everything else lands in `datos`.
pub fn construir_solicitud(
    tipo: TipoSolicitud,
    campos: &HashMap<String, String>,
    ahora: DateTime<Utc>,
) -> Solicitud {
    let email = campos
        .get("email")
        .map(|e| e.trim().to_lowercase())
        .unwrap_or_default();
    let rut = campos.get("rut").map(|r| r.trim().to_string()).unwrap_or_default();
    let (_, telefono) = campos
        .get("telefono")
        .map(|t| validar_telefono_cl(t))
        .unwrap_or((false, String::new()));

    let conocidos = ["email", "rut", "telefono"];
    let datos: Value = Value::Object(
        campos
            .iter()
            .filter(|(k, _)| !conocidos.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), json!(v)))
            .collect(),
    );

    Solicitud {
        id: Uuid::new_v4(),
        tipo,
        nombre: nombre_para(tipo, campos),
        email,
        rut,
        telefono,
        datos,
        etapas: workflow::mapa_inicial(tipo, ahora),
        estado_general: EstadoGeneral::Enviada,
        etapa_actual: workflow::etapa_inicial(tipo).to_string(),
        progreso_porcentaje: workflow::PROGRESO_INICIAL,
        motivo_rechazo: None,
        empresa_id: None,
        empresa_activa: false,
        version: 1,
        fecha_creacion: ahora,
        fecha_actualizacion: ahora,
    }
}
