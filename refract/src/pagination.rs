//! Pagination coordinator.
//!
//! A `LIMIT` applied to a join that multiplies rows counts joined rows, not
//! roots. When the plan contains a hasMany or belongsToMany step, paging is
//! done on the distinct ordered root keys first and everything else is joined
//! onto that page.

use crate::config::ResolverConfig;
use crate::entity_metadata::SchemaRegistry;
use crate::join_plan::JoinPlan;
use crate::types::{OrderSpec, RefractError, RefractResult, SortOrder};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Pagination {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Pagination {
    pub fn new(limit: Option<u64>, offset: Option<u64>) -> Self {
        Self { limit, offset }
    }

    pub fn is_paged(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageStrategy {
    Unpaged,
    /// No step multiplies rows, so limit/offset apply to the joined rows.
    Direct(Pagination),
    /// Page the distinct root keys first.
    KeysFirst(Pagination),
}

impl PageStrategy {
    pub fn pagination(&self) -> Option<Pagination> {
        match self {
            Self::Unpaged => None,
            Self::Direct(page) | Self::KeysFirst(page) => Some(*page),
        }
    }

    pub fn is_keys_first(&self) -> bool {
        matches!(self, Self::KeysFirst(_))
    }
}

/// Decision for one query: how to page, and the full root ordering.
#[derive(Clone, Debug)]
pub struct PagePlan {
    pub strategy: PageStrategy,
    /// Root ordering with the primary key appended as a tie-breaker.
    pub order: Vec<OrderSpec>,
}

pub struct PaginationCoordinator<'a> {
    registry: &'a SchemaRegistry,
    config: &'a ResolverConfig,
}

impl<'a> PaginationCoordinator<'a> {
    pub fn new(registry: &'a SchemaRegistry, config: &'a ResolverConfig) -> Self {
        Self { registry, config }
    }

    pub fn coordinate(
        &self,
        plan: &JoinPlan,
        order: &[OrderSpec],
        page: Pagination,
    ) -> RefractResult<PagePlan> {
        let root = self.registry.entity_by_id(plan.root().entity);
        for spec in order {
            root.require_attribute(&spec.column)?;
        }

        let strategy = if !page.is_paged() {
            PageStrategy::Unpaged
        } else if plan.multiplies_rows() {
            if order.is_empty() && self.config.require_order_for_pagination {
                return Err(RefractError::AmbiguousOrder {
                    entity: root.name.clone(),
                });
            }
            PageStrategy::KeysFirst(page)
        } else {
            PageStrategy::Direct(page)
        };

        let mut full_order = order.to_vec();
        for pk in &root.primary_key {
            if !full_order.iter().any(|o| &o.column == pk) {
                full_order.push(OrderSpec {
                    column: pk.clone(),
                    order: SortOrder::Asc,
                });
            }
        }

        log::debug!(
            "pagination: {:?} over '{}' ordered by [{}]",
            strategy,
            root.name,
            full_order
                .iter()
                .map(|o| format!("{} {:?}", o.column, o.order))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(PagePlan {
            strategy,
            order: full_order,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity_metadata::{
        AssociationOptions, AttributeType, EntityDef, EntityHandle, SchemaBuilder,
    };
    use crate::include::IncludeSpec;
    use crate::join_plan::build_join_plan;

    fn registry() -> (SchemaRegistry, EntityHandle, EntityHandle) {
        let mut schema = SchemaBuilder::new();
        let user = schema
            .define(EntityDef::new("User").attribute("username", AttributeType::String))
            .unwrap();
        let project = schema
            .define(EntityDef::new("Project").attribute("title", AttributeType::String))
            .unwrap();
        schema.has_many(&user, &project, AssociationOptions::new()).unwrap();
        schema.belongs_to(&project, &user, AssociationOptions::new()).unwrap();
        (schema.finish(), user, project)
    }

    #[test]
    fn test_has_many_page_goes_keys_first() {
        let (registry, user, project) = registry();
        let config = ResolverConfig::default();
        let plan = build_join_plan(&registry, &config, &user, &[IncludeSpec::new(&project)]).unwrap();
        let page = PaginationCoordinator::new(&registry, &config)
            .coordinate(&plan, &[OrderSpec::asc("username")], Pagination::new(Some(2), None))
            .unwrap();
        assert!(page.strategy.is_keys_first());
        let cols: Vec<_> = page.order.iter().map(|o| o.column.as_str()).collect();
        assert_eq!(cols, vec!["username", "id"]);
    }

    #[test]
    fn test_belongs_to_page_is_direct() {
        let (registry, user, project) = registry();
        let config = ResolverConfig::default();
        let plan = build_join_plan(&registry, &config, &project, &[IncludeSpec::new(&user)]).unwrap();
        let page = PaginationCoordinator::new(&registry, &config)
            .coordinate(&plan, &[], Pagination::new(Some(2), Some(1)))
            .unwrap();
        assert_eq!(page.strategy, PageStrategy::Direct(Pagination::new(Some(2), Some(1))));
        assert_eq!(page.order.len(), 1);
    }

    #[test]
    fn test_keys_first_without_order_is_ambiguous() {
        let (registry, user, project) = registry();
        let config = ResolverConfig::default();
        let plan = build_join_plan(&registry, &config, &user, &[IncludeSpec::new(&project)]).unwrap();
        let coordinator = PaginationCoordinator::new(&registry, &config);
        let err = coordinator
            .coordinate(&plan, &[], Pagination::new(Some(2), None))
            .unwrap_err();
        assert!(matches!(err, RefractError::AmbiguousOrder { ref entity } if entity == "User"));

        let relaxed = ResolverConfig {
            require_order_for_pagination: false,
            ..ResolverConfig::default()
        };
        let page = PaginationCoordinator::new(&registry, &relaxed)
            .coordinate(&plan, &[], Pagination::new(Some(2), None))
            .unwrap();
        assert!(page.strategy.is_keys_first());
    }

    #[test]
    fn test_order_by_unknown_column_fails() {
        let (registry, user, _) = registry();
        let config = ResolverConfig::default();
        let plan = build_join_plan(&registry, &config, &user, &[]).unwrap();
        let err = PaginationCoordinator::new(&registry, &config)
            .coordinate(&plan, &[OrderSpec::desc("title")], Pagination::default())
            .unwrap_err();
        assert!(matches!(err, RefractError::UnknownAttribute { .. }));
    }
}
