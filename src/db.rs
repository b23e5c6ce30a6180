use sqlx::{postgres::PgPoolOptions, PgPool};

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        bootstrap_schema(&pool).await?;

        Ok(Self { pool })
    }
}

/// Creates the collection tables if they do not exist yet.
///
/// Each collection is a table with indexed scalar columns plus JSONB for the
/// free-form rest. Idempotent, runs on every startup.
async fn bootstrap_schema(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS solicitudes (
            id UUID PRIMARY KEY,
            tipo TEXT NOT NULL,
            nombre TEXT NOT NULL,
            email TEXT NOT NULL,
            rut TEXT NOT NULL,
            telefono TEXT NOT NULL,
            datos JSONB NOT NULL DEFAULT '{}'::jsonb,
            etapas JSONB NOT NULL,
            estado_general TEXT NOT NULL,
            etapa_actual TEXT NOT NULL,
            progreso_porcentaje INT NOT NULL,
            motivo_rechazo TEXT,
            empresa_id UUID,
            empresa_activa BOOLEAN NOT NULL DEFAULT FALSE,
            version INT NOT NULL DEFAULT 1,
            fecha_creacion TIMESTAMPTZ NOT NULL,
            fecha_actualizacion TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_solicitudes_tipo_estado
         ON solicitudes (tipo, estado_general)",
    )
    .execute(pool)
    .await?;

    // One live request per (tipo, email); rejected ones may resubmit. This
    // is what stops two concurrent submissions that both pass the in-memory
    // and in-transaction duplicate checks.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS uniq_solicitudes_activas
         ON solicitudes (tipo, lower(email)) WHERE estado_general <> 'rechazada'",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS empresas (
            id UUID PRIMARY KEY,
            solicitud_id UUID NOT NULL UNIQUE,
            tipo TEXT NOT NULL,
            nombre TEXT NOT NULL,
            email TEXT NOT NULL,
            rut TEXT NOT NULL,
            estado TEXT NOT NULL,
            motivo_desactivacion TEXT,
            datos JSONB NOT NULL DEFAULT '{}'::jsonb,
            verificada BOOLEAN NOT NULL DEFAULT FALSE,
            fecha_creacion TIMESTAMPTZ NOT NULL,
            fecha_actualizacion TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notificaciones (
            id UUID PRIMARY KEY,
            user_id TEXT NOT NULL,
            tipo TEXT NOT NULL,
            titulo TEXT NOT NULL,
            mensaje TEXT NOT NULL,
            metadatos JSONB NOT NULL DEFAULT '{}'::jsonb,
            leida BOOLEAN NOT NULL DEFAULT FALSE,
            fecha_creacion TIMESTAMPTZ NOT NULL,
            fecha_vencimiento TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_notificaciones_user
         ON notificaciones (user_id, leida)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS email_logs (
            id UUID PRIMARY KEY,
            destinatario TEXT NOT NULL,
            asunto TEXT NOT NULL,
            cuerpo TEXT NOT NULL,
            estado TEXT NOT NULL DEFAULT 'registrado',
            fecha_creacion TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tickets (
            id UUID PRIMARY KEY,
            tipo TEXT NOT NULL,
            nombre TEXT NOT NULL,
            email TEXT NOT NULL,
            mensaje TEXT NOT NULL,
            estado TEXT NOT NULL,
            respuestas JSONB NOT NULL DEFAULT '[]'::jsonb,
            visto BOOLEAN NOT NULL DEFAULT FALSE,
            resuelto BOOLEAN NOT NULL DEFAULT FALSE,
            fecha_creacion TIMESTAMPTZ NOT NULL,
            fecha_actualizacion TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS outbox_eventos (
            id UUID PRIMARY KEY,
            evento TEXT NOT NULL,
            payload JSONB NOT NULL,
            despachado BOOLEAN NOT NULL DEFAULT FALSE,
            intentos INT NOT NULL DEFAULT 0,
            fecha_creacion TIMESTAMPTZ NOT NULL,
            fecha_despacho TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "ALTER TABLE outbox_eventos
         ADD COLUMN IF NOT EXISTS intentos INT NOT NULL DEFAULT 0",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_outbox_pendientes
         ON outbox_eventos (fecha_creacion) WHERE NOT despachado",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS referencias (
            id UUID PRIMARY KEY,
            coleccion TEXT NOT NULL,
            nombre TEXT NOT NULL,
            datos JSONB NOT NULL DEFAULT '{}'::jsonb,
            UNIQUE (coleccion, nombre)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_referencias_coleccion
         ON referencias (coleccion)",
    )
    .execute(pool)
    .await?;

    seed_referencias(pool).await?;

    Ok(())
}

/// Seeds the read-only reference collections consumed by the storefront
/// UIs. Idempotent via the (coleccion, nombre) unique constraint.
async fn seed_referencias(pool: &PgPool) -> anyhow::Result<()> {
    let semillas: &[(&str, &str)] = &[
        ("categorias", "Frenos"),
        ("categorias", "Suspensión"),
        ("categorias", "Lubricantes"),
        ("categorias", "Neumáticos"),
        ("categorias", "Eléctrico"),
        ("marcas", "Toyota"),
        ("marcas", "Chevrolet"),
        ("marcas", "Hyundai"),
        ("marcas", "Nissan"),
        ("centros_revision", "PRT Av. Matta"),
        ("centros_revision", "PRT San Joaquín"),
        ("companias_seguros", "Seguros del Sur"),
        ("companias_seguros", "Aseguradora Central"),
        ("vulcanizadoras", "Vulcanización Express 10 de Julio"),
    ];

    for (coleccion, nombre) in semillas {
        sqlx::query(
            "INSERT INTO referencias (id, coleccion, nombre)
             VALUES ($1, $2, $3)
             ON CONFLICT (coleccion, nombre) DO NOTHING",
        )
        .bind(uuid::Uuid::new_v4())
        .bind(coleccion)
        .bind(nombre)
        .execute(pool)
        .await?;
    }

    Ok(())
}
