use crate::config::ResolverConfig;
use crate::entity_metadata::{EntityHandle, SchemaRegistry};
use crate::filter::Predicate;
use crate::hydrate::Record;
use crate::include::IncludeSpec;
use crate::join_plan::JoinPlan;
use crate::query_builders::relation_fetcher::{RowFetcher, SeaOrmRowFetcher};
use crate::resolver::{QueryResolver, QueryShape, ResolvedQuery};
use crate::statement::FetchRequest;
use crate::types::{IntoOrderSpec, RefractError, RefractResult};
use sea_orm::ConnectionTrait;

/// Query builder for finding every root row that matches the filter and the
/// filtered includes, with the includes hydrated beneath each root.
pub struct FindManyQueryBuilder<'a, C: ConnectionTrait> {
    pub conn: &'a C,
    pub registry: &'a SchemaRegistry,
    pub config: &'a ResolverConfig,
    pub shape: QueryShape,
    pub negative_paging: Option<&'static str>,
}

impl<'a, C: ConnectionTrait> FindManyQueryBuilder<'a, C> {
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
            negative_paging: None,
        }
    }

    /// Include an association (with its own filter and nested includes).
    pub fn with<T: Into<IncludeSpec>>(mut self, include: T) -> Self {
        self.shape.includes.push(include.into());
        self
    }

    /// Filter the root rows. Repeated calls are AND-ed.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.shape.filter = Some(match self.shape.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    /// Order the roots by one of their attributes.
    pub fn order_by<T: IntoOrderSpec>(mut self, order: T) -> Self {
        self.shape.order.push(order.into_order_spec());
        self
    }

    /// Limit the number of roots returned.
    pub fn take(mut self, limit: i64) -> Self {
        if limit < 0 {
            self.negative_paging = Some("take must be >= 0");
        } else {
            self.shape.page.limit = Some(limit as u64);
        }
        self
    }

    /// Skip a number of roots.
    pub fn skip(mut self, offset: i64) -> Self {
        if offset < 0 {
            // Deferred until exec to keep the builder chain infallible
            self.negative_paging = Some("skip must be >= 0");
        } else {
            self.shape.page.offset = Some(offset as u64);
        }
        self
    }

    fn resolve(&self) -> RefractResult<ResolvedQuery> {
        if let Some(message) = self.negative_paging {
            return Err(RefractError::query_validation(message));
        }
        QueryResolver::new(self.registry, self.config).resolve(&self.shape)
    }

    /// The resolved join plan, without touching the database.
    pub fn plan(&self) -> RefractResult<JoinPlan> {
        self.resolve().map(|resolved| resolved.plan)
    }

    /// The statement `exec` would run.
    pub fn statement(&self) -> RefractResult<FetchRequest> {
        let resolved = self.resolve()?;
        Ok(QueryResolver::new(self.registry, self.config).fetch_request(&resolved))
    }

    /// Execute through a caller-supplied fetcher.
    pub async fn exec_with(self, fetcher: &dyn RowFetcher) -> RefractResult<Vec<Record>> {
        let resolved = self.resolve()?;
        QueryResolver::new(self.registry, self.config)
            .run("FindManyQueryBuilder", &resolved, fetcher)
            .await
    }

    /// Execute the query and return the hydrated roots.
    pub async fn exec(self) -> RefractResult<Vec<Record>>
    where
        C: Send + Sync,
    {
        let conn = self.conn;
        self.exec_with(&SeaOrmRowFetcher::new(conn)).await
    }
}
