use crate::config::ResolverConfig;
use crate::entity_metadata::{EntityHandle, SchemaRegistry};
use crate::filter::Predicate;
use crate::hydrate::Record;
use crate::include::IncludeSpec;
use crate::key_types::RefractKey;
use crate::query_builders::relation_fetcher::{RowFetcher, SeaOrmRowFetcher};
use crate::resolver::{QueryResolver, QueryShape};
use crate::types::{RefractError, RefractResult};
use sea_orm::ConnectionTrait;

/// Query builder for finding one entity row by primary key
pub struct FindUniqueQueryBuilder<'a, C: ConnectionTrait> {
    pub conn: &'a C,
    pub registry: &'a SchemaRegistry,
    pub config: &'a ResolverConfig,
    pub root: EntityHandle,
    pub key: RefractKey,
    pub includes: Vec<IncludeSpec>,
}

impl<'a, C: ConnectionTrait> FindUniqueQueryBuilder<'a, C> {
    pub fn new(
        conn: &'a C,
        registry: &'a SchemaRegistry,
        config: &'a ResolverConfig,
        root: &EntityHandle,
        key: RefractKey,
    ) -> Self {
        Self {
            conn,
            registry,
            config,
            root: root.clone(),
            key,
            includes: Vec::new(),
        }
    }

    /// Add an association to fetch with the row
    pub fn with<T: Into<IncludeSpec>>(mut self, include: T) -> Self {
        self.includes.push(include.into());
        self
    }

    fn shape(&self) -> RefractResult<QueryShape> {
        let entity = self.registry.resolve(&self.root)?;
        let (pk, ty) = entity.single_primary_key().ok_or_else(|| {
            RefractError::query_validation(format!(
                "'{}' has a composite primary key; use find_all with a filter",
                entity.name
            ))
        })?;
        let mut shape = QueryShape::new(&self.root);
        shape.includes = self.includes.clone();
        shape.filter = Some(Predicate::eq(pk, self.key.to_db_value(ty)));
        Ok(shape)
    }

    pub async fn exec_with(self, fetcher: &dyn RowFetcher) -> RefractResult<Option<Record>> {
        let resolver = QueryResolver::new(self.registry, self.config);
        let resolved = resolver.resolve(&self.shape()?)?;
        let records = resolver
            .run("FindUniqueQueryBuilder", &resolved, fetcher)
            .await?;
        Ok(records.into_iter().next())
    }

    /// Execute the query and return a single result
    pub async fn exec(self) -> RefractResult<Option<Record>>
    where
        C: Send + Sync,
    {
        let conn = self.conn;
        self.exec_with(&SeaOrmRowFetcher::new(conn)).await
    }
}
