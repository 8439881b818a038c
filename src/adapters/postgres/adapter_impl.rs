use sqlx::Row;

use super::{
    PostgresAdapter,
    helper::{SqlBuilder, select_columns},
};
use crate::{
    adapters::Adapter,
    attribute::EntityKind,
    entity::Entity,
    error::Error,
    mutate::AttributeMutation,
    query::{CompiledSearch, Predicate},
};

#[async_trait::async_trait]
impl Adapter for PostgresAdapter {
    async fn insert_entity(&self, entity: Entity) -> Result<Entity, Error> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| Error::Storage(err.to_string()))?;

        let parent = match entity.kind {
            EntityKind::Localization => entity.media.first().copied(),
            _ => None,
        };
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO public.{} (project, type, name, created_datetime, modified_datetime,
                archive_state, elemental_id, section, frame, media, attributes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
            entity.kind.table_name()
        ))
        .bind(entity.project)
        .bind(entity.entity_type)
        .bind(&entity.name)
        .bind(entity.created_datetime)
        .bind(entity.modified_datetime)
        .bind(entity.archive_state.as_str())
        .bind(entity.elemental_id)
        .bind(entity.section)
        .bind(entity.frame)
        .bind(parent)
        .bind(serde_json::Value::Object(entity.attributes.clone()))
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| Error::Storage(err.to_string()))?;
        let id: i64 = row
            .try_get("id")
            .map_err(|err| Error::Deserialize(err.to_string()))?;

        if entity.kind == EntityKind::State {
            for media in &entity.media {
                sqlx::query(
                    r#"
                    INSERT INTO public.state_media (state, media) VALUES ($1, $2)
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(id)
                .bind(*media)
                .execute(&mut *tx)
                .await
                .map_err(|err| Error::Storage(err.to_string()))?;
            }
        }

        tx.commit()
            .await
            .map_err(|err| Error::Storage(err.to_string()))?;
        Ok(Entity { id, ..entity })
    }

    async fn fetch_entity(&self, kind: EntityKind, id: i64) -> Result<Option<Entity>, Error> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM public.{} e
            WHERE e.id = $1
            "#,
            select_columns(kind, "e"),
            kind.table_name()
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| Error::Storage(err.to_string()))?;

        match row {
            Some(r) => Self::map_row_to_entity(r, kind).map(Some),
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip_all, fields(kind = %search.kind))]
    async fn query_entities(&self, search: &CompiledSearch) -> Result<Vec<Entity>, Error> {
        if search.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = SqlBuilder::new();
        let filter = sql.predicate(&search.predicate, "e", search.kind);
        let order = sql.order_clause(&search.order, "e");
        let mut statement = format!(
            "SELECT {} FROM public.{} e WHERE {} {}",
            select_columns(search.kind, "e"),
            search.kind.table_name(),
            filter,
            order
        );
        if let Some(limit) = search.limit {
            let param = sql.bind(super::helper::Bind::Int(limit as i64));
            statement.push_str(&format!(" LIMIT {}", param));
        }
        if let Some(offset) = search.offset {
            let param = sql.bind(super::helper::Bind::Int(offset as i64));
            statement.push_str(&format!(" OFFSET {}", param));
        }
        tracing::debug!(sql = %statement, "query entities");

        let query = Self::query_bind_all(sqlx::query(&statement), sql.into_binds());
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|err| Error::Storage(err.to_string()))?;

        rows.into_iter()
            .map(|row| Self::map_row_to_entity(row, search.kind))
            .collect()
    }

    async fn count_entities(&self, kind: EntityKind, predicate: &Predicate) -> Result<u64, Error> {
        if predicate.is_never() {
            return Ok(0);
        }
        let mut sql = SqlBuilder::new();
        let filter = sql.predicate(predicate, "e", kind);
        let statement = format!(
            "SELECT COUNT(*) AS count FROM public.{} e WHERE {}",
            kind.table_name(),
            filter
        );
        let row = Self::query_bind_all(sqlx::query(&statement), sql.into_binds())
            .fetch_one(&self.pool)
            .await
            .map_err(|err| Error::Storage(err.to_string()))?;
        let count: i64 = row
            .try_get("count")
            .map_err(|err| Error::Deserialize(err.to_string()))?;
        Ok(count.max(0) as u64)
    }

    #[tracing::instrument(skip_all, fields(kind = %kind, mutation = mutation.describe()))]
    async fn apply_mutation(
        &self,
        kind: EntityKind,
        scope: &Predicate,
        mutation: &AttributeMutation,
    ) -> Result<Vec<i64>, Error> {
        if scope.is_never() {
            return Ok(Vec::new());
        }
        let mut sql = SqlBuilder::new();
        let statement = sql.mutation(kind, scope, mutation);
        let rows = Self::query_bind_all(sqlx::query(&statement), sql.into_binds())
            .fetch_all(&self.pool)
            .await
            .map_err(|err| Error::Storage(err.to_string()))?;

        rows.into_iter()
            .map(|row| {
                row.try_get::<i64, _>("id")
                    .map_err(|err| Error::Deserialize(err.to_string()))
            })
            .collect()
    }
}
