//! End-to-end query resolution: plan, push filters, coordinate paging, emit
//! the statement, fetch once and hydrate.

use crate::config::ResolverConfig;
use crate::entity_metadata::{EntityHandle, SchemaRegistry};
use crate::filter::{push_filters, Predicate, PredicateTree};
use crate::hooks::{compose_details, emit_after, emit_before, QueryEvent, QueryResultMeta};
use crate::hydrate::{Hydrator, Record};
use crate::include::IncludeSpec;
use crate::join_plan::{build_join_plan, JoinPlan};
use crate::pagination::{PagePlan, Pagination, PaginationCoordinator};
use crate::query_builders::relation_fetcher::RowFetcher;
use crate::statement::{FetchRequest, StatementEmitter};
use crate::types::{OrderSpec, RefractResult};
use sea_orm::sea_query::SelectStatement;

/// Everything a read query asks for.
#[derive(Clone, Debug)]
pub struct QueryShape {
    pub root: EntityHandle,
    pub includes: Vec<IncludeSpec>,
    pub filter: Option<Predicate>,
    pub order: Vec<OrderSpec>,
    pub page: Pagination,
}

impl QueryShape {
    pub fn new(root: &EntityHandle) -> Self {
        Self {
            root: root.clone(),
            includes: Vec::new(),
            filter: None,
            order: Vec::new(),
            page: Pagination::default(),
        }
    }
}

/// A planned query. Building one performs no I/O.
#[derive(Clone, Debug)]
pub struct ResolvedQuery {
    pub plan: JoinPlan,
    pub predicates: PredicateTree,
    pub page: PagePlan,
}

pub struct QueryResolver<'a> {
    registry: &'a SchemaRegistry,
    config: &'a ResolverConfig,
}

impl<'a> QueryResolver<'a> {
    pub fn new(registry: &'a SchemaRegistry, config: &'a ResolverConfig) -> Self {
        Self { registry, config }
    }

    pub fn resolve(&self, shape: &QueryShape) -> RefractResult<ResolvedQuery> {
        let plan = build_join_plan(self.registry, self.config, &shape.root, &shape.includes)?;
        let predicates = push_filters(self.registry, &plan, shape.filter.as_ref())?;
        let page = PaginationCoordinator::new(self.registry, self.config).coordinate(
            &plan,
            &shape.order,
            shape.page,
        )?;
        Ok(ResolvedQuery {
            plan,
            predicates,
            page,
        })
    }

    pub fn fetch_request(&self, resolved: &ResolvedQuery) -> FetchRequest {
        StatementEmitter::new(self.registry, &resolved.plan, &resolved.predicates).fetch(&resolved.page)
    }

    pub fn count_statement(&self, resolved: &ResolvedQuery) -> SelectStatement {
        StatementEmitter::new(self.registry, &resolved.plan, &resolved.predicates).count()
    }

    /// Issue the single fetch for `resolved` and hydrate the rows.
    pub async fn run(
        &self,
        builder: &'static str,
        resolved: &ResolvedQuery,
        fetcher: &dyn RowFetcher,
    ) -> RefractResult<Vec<Record>> {
        let request = self.fetch_request(resolved);
        let event = QueryEvent {
            builder,
            entity: request.root.clone(),
            details: compose_details("select", &request.root),
        };
        emit_before(&event);
        let start = std::time::Instant::now();
        let result = match fetcher.fetch(&request).await {
            Ok(rows) => Hydrator::new(self.registry, &resolved.plan).hydrate(&rows),
            Err(e) => Err(e),
        };
        emit_after(
            &event,
            &QueryResultMeta {
                row_count: result.as_ref().ok().map(Vec::len),
                error: result.as_ref().err().map(ToString::to_string),
                elapsed_ms: Some(start.elapsed().as_millis()),
            },
        );
        result
    }
}
