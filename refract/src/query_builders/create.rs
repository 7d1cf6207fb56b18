use crate::config::ResolverConfig;
use crate::entity_metadata::{EntityHandle, EntityMetadata, SchemaRegistry};
use crate::filter::Predicate;
use crate::hooks::{compose_details, emit_after, emit_before, QueryEvent, QueryResultMeta};
use crate::hydrate::Record;
use crate::query_builders::relation_fetcher::SeaOrmRowFetcher;
use crate::resolver::{QueryResolver, QueryShape};
use crate::types::{RefractError, RefractResult};
use sea_orm::sea_query::{Alias, Query, SimpleExpr};
use sea_orm::{ConnectionTrait, DatabaseBackend, Value};

/// Query builder for inserting one entity row
pub struct CreateQueryBuilder<'a, C: ConnectionTrait> {
    pub conn: &'a C,
    pub registry: &'a SchemaRegistry,
    pub config: &'a ResolverConfig,
    pub entity: EntityHandle,
    pub values: Vec<(String, Value)>,
}

impl<'a, C> CreateQueryBuilder<'a, C>
where
    C: ConnectionTrait + Send + Sync,
{
    pub fn new(
        conn: &'a C,
        registry: &'a SchemaRegistry,
        config: &'a ResolverConfig,
        entity: &EntityHandle,
    ) -> Self {
        Self {
            conn,
            registry,
            config,
            entity: entity.clone(),
            values: Vec::new(),
        }
    }

    /// Set a column value, replacing an earlier value for the same column.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let column = column.into();
        let value = value.into();
        match self.values.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.values.push((column, value)),
        }
        self
    }

    pub fn values<I, S, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = (S, V)>,
        S: Into<String>,
        V: Into<Value>,
    {
        for (column, value) in values {
            self = self.set(column, value);
        }
        self
    }

    /// Insert the row and return it as stored.
    pub async fn exec(self) -> RefractResult<Record> {
        let entity = self.registry.resolve(&self.entity)?;
        let event = QueryEvent {
            builder: "CreateQueryBuilder",
            entity: entity.name.clone(),
            details: compose_details("insert", &entity.name),
        };
        emit_before(&event);
        let start = std::time::Instant::now();
        let result = self.insert(entity).await;
        emit_after(
            &event,
            &QueryResultMeta {
                row_count: result.as_ref().ok().map(|_| 1),
                error: result.as_ref().err().map(ToString::to_string),
                elapsed_ms: Some(start.elapsed().as_millis()),
            },
        );
        let key = result?;

        let mut shape = QueryShape::new(&self.entity);
        shape.filter = Some(Predicate::all(
            key.into_iter().map(|(column, value)| Predicate::eq(column, value)),
        ));
        let resolver = QueryResolver::new(self.registry, self.config);
        let resolved = resolver.resolve(&shape)?;
        resolver
            .run("CreateQueryBuilder", &resolved, &SeaOrmRowFetcher::new(self.conn))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                RefractError::query_validation(format!("inserted '{}' row not found", entity.name))
            })
    }

    /// Run the INSERT and return the primary key of the new row.
    async fn insert(&self, entity: &EntityMetadata) -> RefractResult<Vec<(String, Value)>> {
        for (column, _) in &self.values {
            entity.require_attribute(column)?;
        }
        let mut values = self.values.clone();
        if entity.timestamps {
            let now = chrono::Utc::now();
            for name in ["created_at", "updated_at"] {
                if !values.iter().any(|(c, _)| c == name) {
                    values.push((name.to_string(), Value::from(now)));
                }
            }
        }

        let mut insert = Query::insert();
        insert.into_table(Alias::new(&entity.table_name));
        if values.is_empty() {
            insert.or_default_values();
        } else {
            insert.columns(values.iter().map(|(c, _)| Alias::new(c)));
            insert.values(values.iter().map(|(_, v)| SimpleExpr::Value(v.clone())))?;
        }

        let backend = self.conn.get_database_backend();
        let generated = match entity.single_primary_key() {
            Some((pk, _)) if entity.auto_increment && !values.iter().any(|(c, _)| c == pk) => {
                Some(pk.to_string())
            }
            _ => None,
        };

        let Some(pk) = generated else {
            self.conn.execute(backend.build(&insert)).await?;
            return entity
                .primary_key
                .iter()
                .map(|pk| {
                    values
                        .iter()
                        .find(|(c, _)| c == pk)
                        .cloned()
                        .ok_or_else(|| {
                            RefractError::query_validation(format!(
                                "missing primary key '{}' for '{}'",
                                pk, entity.name
                            ))
                        })
                })
                .collect();
        };

        let id: i64 = if backend == DatabaseBackend::Postgres {
            insert.returning_col(Alias::new(&pk));
            let row = self
                .conn
                .query_one(backend.build(&insert))
                .await?
                .ok_or_else(|| RefractError::query_validation("INSERT returned no row"))?;
            i64::from(row.try_get::<i32>("", &pk)?)
        } else {
            let res = self.conn.execute(backend.build(&insert)).await?;
            i64::try_from(res.last_insert_id()).map_err(|_| {
                RefractError::query_validation("generated key does not fit in i64")
            })?
        };
        log::trace!("insert '{}': generated {} = {}", entity.name, pk, id);
        let id = match i32::try_from(id) {
            Ok(narrow) => Value::from(narrow),
            Err(_) => Value::from(id),
        };
        Ok(vec![(pk, id)])
    }
}
