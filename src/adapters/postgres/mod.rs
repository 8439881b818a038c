mod adapter_impl;
mod helper;

use sqlx::PgPool;

use crate::{attribute::EntityKind, error::Error};

/// PostgreSQL adapter, one table per entity kind with a JSONB attribute document.
///
/// Schema (per kind):
/// ```sql
/// CREATE TABLE public.<kind> (
///     id BIGSERIAL PRIMARY KEY,
///     project BIGINT NOT NULL,
///     type BIGINT NOT NULL,
///     name TEXT NOT NULL,
///     created_datetime TIMESTAMPTZ NOT NULL,
///     modified_datetime TIMESTAMPTZ NOT NULL,
///     archive_state TEXT NOT NULL,
///     elemental_id UUID NOT NULL,
///     section BIGINT,
///     frame BIGINT,
///     media BIGINT,
///     attributes JSONB NOT NULL
/// );
///
/// -- project and type are always bound
/// CREATE INDEX idx_<kind>_project_type ON <kind>(project, type, id);
/// -- text equality renders as `attributes @> {"key": "value"}`
/// CREATE INDEX idx_<kind>_attributes ON <kind> USING GIN (attributes jsonb_path_ops);
/// ```
///
/// States link to media through `state_media(state, media)`. Geographic
/// filters need PostGIS and vector filters need pgvector; see
/// [`PostgresAdapter::init_extensions`].
pub struct PostgresAdapter {
    pub(crate) pool: PgPool,
}

impl PostgresAdapter {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Installs PostGIS and pgvector. Requires a role allowed to create extensions.
    pub async fn init_extensions(&self) -> Result<(), Error> {
        for statement in [
            "CREATE EXTENSION IF NOT EXISTS postgis",
            "CREATE EXTENSION IF NOT EXISTS vector",
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| Error::Storage(e.to_string()))?;
        }
        Ok(())
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<(), Error> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| Error::Storage(err.to_string()))?;

        for kind in EntityKind::ALL {
            let table = kind.table_name();
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS public.{table} (
                    id BIGSERIAL PRIMARY KEY,
                    project BIGINT NOT NULL,
                    type BIGINT NOT NULL,
                    name TEXT NOT NULL,
                    created_datetime TIMESTAMPTZ NOT NULL,
                    modified_datetime TIMESTAMPTZ NOT NULL,
                    archive_state TEXT NOT NULL DEFAULT 'live',
                    elemental_id UUID NOT NULL,
                    section BIGINT,
                    frame BIGINT,
                    media BIGINT,
                    attributes JSONB NOT NULL DEFAULT '{{}}'::jsonb
                );
                "#
            ))
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;

            sqlx::query(&format!(
                r#"
                CREATE INDEX IF NOT EXISTS idx_{table}_project_type
                    ON public.{table}(project, type, id);
                "#
            ))
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;

            sqlx::query(&format!(
                r#"
                CREATE INDEX IF NOT EXISTS idx_{table}_attributes
                    ON public.{table} USING GIN (attributes jsonb_path_ops);
                "#
            ))
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
        }

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_localization_media ON public.localization(media);
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Storage(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS public.state_media (
                state BIGINT NOT NULL REFERENCES public.state(id) ON DELETE CASCADE,
                media BIGINT NOT NULL,
                PRIMARY KEY (state, media)
            );
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Storage(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_state_media_media ON public.state_media(media);
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Storage(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }
}
