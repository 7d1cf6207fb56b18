use crate::config::ResolverConfig;
use crate::entity_metadata::{EntityHandle, SchemaRegistry};
use crate::filter::Predicate;
use crate::hooks::{compose_details, emit_after, emit_before, QueryEvent, QueryResultMeta};
use crate::include::IncludeSpec;
use crate::resolver::{QueryResolver, QueryShape};
use crate::types::RefractResult;
use sea_orm::sea_query::SelectStatement;
use sea_orm::{ConnectionTrait, QueryResult};

/// Query builder for counting distinct roots that satisfy the root filter and
/// every required include
pub struct CountQueryBuilder<'a, C: ConnectionTrait> {
    pub conn: &'a C,
    pub registry: &'a SchemaRegistry,
    pub config: &'a ResolverConfig,
    pub shape: QueryShape,
}

impl<'a, C: ConnectionTrait> CountQueryBuilder<'a, C> {
    pub fn new(
        conn: &'a C,
        registry: &'a SchemaRegistry,
        config: &'a ResolverConfig,
        root: &EntityHandle,
    ) -> Self {
        Self {
            conn,
            registry,
            config,
            shape: QueryShape::new(root),
        }
    }

    pub fn with<T: Into<IncludeSpec>>(mut self, include: T) -> Self {
        self.shape.includes.push(include.into());
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.shape.filter = Some(match self.shape.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    pub fn statement(&self) -> RefractResult<SelectStatement> {
        let resolver = QueryResolver::new(self.registry, self.config);
        let resolved = resolver.resolve(&self.shape)?;
        Ok(resolver.count_statement(&resolved))
    }

    pub async fn exec(self) -> RefractResult<i64> {
        let statement = self.statement()?;
        let backend = self.conn.get_database_backend();
        let entity = self.shape.root.name().to_string();
        let event = QueryEvent {
            builder: "CountQueryBuilder",
            details: compose_details("count", &entity),
            entity,
        };
        emit_before(&event);
        let start = std::time::Instant::now();
        let result = match self.conn.query_one(backend.build(&statement)).await {
            Ok(row) => read_count(row),
            Err(err) => Err(err.into()),
        };
        emit_after(
            &event,
            &QueryResultMeta {
                row_count: result.as_ref().ok().map(|_| 1),
                error: result.as_ref().err().map(ToString::to_string),
                elapsed_ms: Some(start.elapsed().as_millis()),
            },
        );
        result
    }
}

/// Decode the `count` column of a count statement's row. Only a missing row
/// reads as zero.
pub fn read_count(row: Option<QueryResult>) -> RefractResult<i64> {
    match row {
        Some(row) => Ok(row.try_get::<i64>("", "count")?),
        None => Ok(0),
    }
}
