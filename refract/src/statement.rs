//! SQL emission for a resolved plan.
//!
//! One `SELECT` per query. Every visible step contributes all of its
//! attributes under positional labels (`s<step>_c<column>`); step predicates
//! sit in the `ON` clause of their join so that optional steps only filter
//! the included rows. Keys-first pages select their roots in a derived table
//! (`__page`) that the outer query joins back onto.

use crate::entity_metadata::{AttributeType, EntityMetadata, SchemaRegistry};
use crate::filter::PredicateTree;
use crate::join_plan::{JoinKind, JoinPlan, JoinStep};
use crate::pagination::{PagePlan, PageStrategy, Pagination};
use crate::types::OrderSpec;
use sea_orm::sea_query::{Alias, Condition, Expr, JoinType, Query, SelectStatement};
use sea_orm::{DatabaseBackend, Statement};

const PAGE_ALIAS: &str = "__page";
const KEYS_ALIAS: &str = "__keys";

/// One selected column and the label it comes back under.
#[derive(Clone, Debug)]
pub struct ColumnLabel {
    pub name: String,
    pub label: String,
    pub ty: AttributeType,
}

/// Columns selected for one plan step.
#[derive(Clone, Debug)]
pub struct StepLayout {
    pub step: usize,
    pub columns: Vec<ColumnLabel>,
    /// Positions in `columns` of the step's primary key.
    pub key_columns: Vec<usize>,
}

/// A statement ready for a [`crate::RowFetcher`], plus the layout needed to
/// split each result row back into per-step tuples.
#[derive(Clone, Debug)]
pub struct FetchRequest {
    pub root: String,
    pub statement: SelectStatement,
    pub layout: Vec<StepLayout>,
    /// Number of steps in the plan; every `FlatRow` has this many slots.
    pub step_count: usize,
}

impl FetchRequest {
    pub fn build(&self, backend: DatabaseBackend) -> Statement {
        backend.build(&self.statement)
    }
}

fn col(alias: &str, column: &str) -> Expr {
    Expr::col((Alias::new(alias), Alias::new(column)))
}

fn join_condition(step: &JoinStep) -> Condition {
    let mut cond = Condition::all();
    if let Some(on) = &step.on {
        cond = cond.add(
            col(&step.alias, &on.column)
                .equals((Alias::new(&on.parent_alias), Alias::new(&on.parent_column))),
        );
    }
    cond
}

fn layout_for(step: usize, entity: &EntityMetadata) -> StepLayout {
    let columns: Vec<ColumnLabel> = entity
        .attributes
        .iter()
        .enumerate()
        .map(|(i, attr)| ColumnLabel {
            name: attr.name.clone(),
            label: format!("s{}_c{}", step, i),
            ty: attr.ty,
        })
        .collect();
    let key_columns = entity
        .primary_key
        .iter()
        .filter_map(|pk| columns.iter().position(|c| &c.name == pk))
        .collect();
    StepLayout {
        step,
        columns,
        key_columns,
    }
}

fn apply_page(select: &mut SelectStatement, page: Pagination) {
    if let Some(limit) = page.limit {
        select.limit(limit);
    }
    if let Some(offset) = page.offset {
        select.offset(offset);
    }
}

/// Builds the fetch and count statements for one plan.
pub struct StatementEmitter<'a> {
    registry: &'a SchemaRegistry,
    plan: &'a JoinPlan,
    predicates: &'a PredicateTree,
}

impl<'a> StatementEmitter<'a> {
    pub fn new(registry: &'a SchemaRegistry, plan: &'a JoinPlan, predicates: &'a PredicateTree) -> Self {
        Self {
            registry,
            plan,
            predicates,
        }
    }

    fn entity(&self, step: &JoinStep) -> &'a EntityMetadata {
        self.registry.entity_by_id(step.entity)
    }

    fn join_step(&self, select: &mut SelectStatement, step: &JoinStep, kind: JoinKind, with_predicate: bool) {
        let mut on = join_condition(step);
        if with_predicate {
            if let Some(bound) = self.predicates.for_step(step.index) {
                on = on.add(bound.to_condition());
            }
        }
        select.join_as(
            JoinType::from(kind),
            Alias::new(&self.entity(step).table_name),
            Alias::new(&step.alias),
            on,
        );
    }

    pub fn fetch(&self, page: &PagePlan) -> FetchRequest {
        let root = self.plan.root();
        let root_entity = self.entity(root);
        let mut select = Query::select();
        let mut layout = Vec::new();

        match &page.strategy {
            PageStrategy::KeysFirst(pagination) => {
                select.from_subquery(self.page_query(page, *pagination), Alias::new(PAGE_ALIAS));
                let mut on = Condition::all();
                for (i, pk) in root_entity.primary_key.iter().enumerate() {
                    on = on.add(
                        col(&root.alias, pk)
                            .equals((Alias::new(PAGE_ALIAS), Alias::new(format!("k{}", i)))),
                    );
                }
                select.join_as(
                    JoinType::InnerJoin,
                    Alias::new(&root_entity.table_name),
                    Alias::new(&root.alias),
                    on,
                );
            }
            _ => {
                select.from_as(Alias::new(&root_entity.table_name), Alias::new(&root.alias));
            }
        }

        for step in self.plan.steps() {
            if step.index > 0 {
                self.join_step(&mut select, step, step.join, true);
            }
            if step.is_hidden() {
                continue;
            }
            let step_layout = layout_for(step.index, self.entity(step));
            for column in &step_layout.columns {
                select.expr_as(col(&step.alias, &column.name), Alias::new(&column.label));
            }
            layout.push(step_layout);
        }

        if let Some(root_filter) = &self.predicates.root {
            select.cond_where(root_filter.to_condition());
        }

        match &page.strategy {
            PageStrategy::KeysFirst(_) => {
                for i in 0..page.order.len() {
                    select.order_by(
                        (Alias::new(PAGE_ALIAS), Alias::new(format!("o{}", i))),
                        page.order[i].order.into(),
                    );
                }
            }
            _ => {
                for spec in &page.order {
                    select.order_by(
                        (Alias::new(&root.alias), Alias::new(&spec.column)),
                        spec.order.into(),
                    );
                }
            }
        }
        // Children come back in key order under each parent.
        for step in self.plan.steps().iter().skip(1).filter(|s| !s.is_hidden()) {
            for pk in &self.entity(step).primary_key {
                select.order_by(
                    (Alias::new(&step.alias), Alias::new(pk)),
                    sea_orm::Order::Asc,
                );
            }
        }
        if let PageStrategy::Direct(pagination) = page.strategy {
            apply_page(&mut select, pagination);
        }

        FetchRequest {
            root: root_entity.name.clone(),
            statement: select,
            layout,
            step_count: self.plan.len(),
        }
    }

    /// Distinct root keys that satisfy the root filter and every required
    /// step, without ordering or paging.
    fn key_query(&self, order: &[OrderSpec]) -> SelectStatement {
        let root = self.plan.root();
        let root_entity = self.entity(root);
        let mut keys = Query::select();
        keys.distinct();
        keys.from_as(Alias::new(&root_entity.table_name), Alias::new(&root.alias));
        for (i, pk) in root_entity.primary_key.iter().enumerate() {
            keys.expr_as(col(&root.alias, pk), Alias::new(format!("k{}", i)));
        }
        for (i, spec) in order.iter().enumerate() {
            keys.expr_as(col(&root.alias, &spec.column), Alias::new(format!("o{}", i)));
        }
        let required = self.plan.required_steps();
        for index in &required {
            self.join_step(&mut keys, self.plan.step(*index), JoinKind::Inner, false);
        }
        let filter = self.predicates.combined(&required);
        if !filter.is_empty() {
            keys.cond_where(filter);
        }
        keys
    }

    fn page_query(&self, page: &PagePlan, pagination: Pagination) -> SelectStatement {
        let mut keys = self.key_query(&page.order);
        for i in 0..page.order.len() {
            keys.order_by(Alias::new(format!("o{}", i)), page.order[i].order.into());
        }
        apply_page(&mut keys, pagination);
        keys
    }

    /// `COUNT` of distinct roots matching the filter and required includes.
    pub fn count(&self) -> SelectStatement {
        let mut count = Query::select();
        count
            .expr_as(Expr::cust("COUNT(*)"), Alias::new("count"))
            .from_subquery(self.key_query(&[]), Alias::new(KEYS_ALIAS));
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolverConfig;
    use crate::entity_metadata::{AssociationOptions, AttributeType, EntityDef, EntityHandle, SchemaBuilder};
    use crate::filter::{push_filters, Predicate};
    use crate::include::IncludeSpec;
    use crate::join_plan::build_join_plan;
    use crate::pagination::PaginationCoordinator;
    use sea_orm::sea_query::{QueryStatementWriter, SqliteQueryBuilder};

    struct Fixture {
        registry: SchemaRegistry,
        user: EntityHandle,
        project: EntityHandle,
        task: EntityHandle,
    }

    fn fixture() -> Fixture {
        let mut schema = SchemaBuilder::new();
        let user = schema
            .define(EntityDef::new("User").attribute("username", AttributeType::String))
            .unwrap();
        let project = schema
            .define(EntityDef::new("Project").attribute("title", AttributeType::String))
            .unwrap();
        let task = schema
            .define(EntityDef::new("Task").attribute("title", AttributeType::String))
            .unwrap();
        schema.belongs_to(&project, &user, AssociationOptions::new()).unwrap();
        schema.has_many(&user, &project, AssociationOptions::new()).unwrap();
        schema.belongs_to(&task, &project, AssociationOptions::new()).unwrap();
        schema.has_many(&project, &task, AssociationOptions::new()).unwrap();
        Fixture {
            registry: schema.finish(),
            user,
            project,
            task,
        }
    }

    fn render(
        f: &Fixture,
        root: &EntityHandle,
        includes: &[IncludeSpec],
        order: &[OrderSpec],
        page: Pagination,
    ) -> (FetchRequest, String) {
        let config = ResolverConfig::default();
        let plan = build_join_plan(&f.registry, &config, root, includes).unwrap();
        let predicates = push_filters(&f.registry, &plan, None).unwrap();
        let page = PaginationCoordinator::new(&f.registry, &config)
            .coordinate(&plan, order, page)
            .unwrap();
        let request = StatementEmitter::new(&f.registry, &plan, &predicates).fetch(&page);
        let sql = request.statement.to_string(SqliteQueryBuilder);
        (request, sql)
    }

    #[test]
    fn test_nested_filter_lands_in_join_condition() {
        let f = fixture();
        let (request, sql) = render(
            &f,
            &f.task,
            &[IncludeSpec::new(&f.project)
                .include(IncludeSpec::new(&f.user).filter(Predicate::eq("username", "leia")))],
            &[],
            Pagination::default(),
        );
        assert!(sql.contains(r#"INNER JOIN "project" AS "Project""#), "{}", sql);
        assert!(
            sql.contains(r#"INNER JOIN "user" AS "Project->User" ON "Project->User"."id" = "Project"."user_id""#),
            "{}",
            sql
        );
        let on_clause = &sql[sql.find(r#"AS "Project->User" ON"#).unwrap()..];
        assert!(on_clause.contains(r#""Project->User"."username" = 'leia'"#), "{}", sql);
        assert!(!sql.contains("WHERE"), "{}", sql);
        assert_eq!(sql.matches(r#"JOIN "user""#).count(), 1);
        assert_eq!(request.layout.len(), 3);
        assert_eq!(request.layout[0].columns[0].label, "s0_c0");
    }

    #[test]
    fn test_keys_first_page_selects_roots_in_derived_table() {
        let f = fixture();
        let (_, sql) = render(
            &f,
            &f.user,
            &[IncludeSpec::new(&f.project)],
            &[OrderSpec::asc("username")],
            Pagination::new(Some(2), Some(0)),
        );
        assert!(sql.contains(r#"FROM (SELECT DISTINCT "User"."id" AS "k0""#), "{}", sql);
        assert!(sql.contains("LIMIT 2"), "{}", sql);
        assert!(sql.contains(r#"AS "__page""#), "{}", sql);
        assert!(sql.contains(r#"LEFT JOIN "project" AS "Project""#), "{}", sql);
        // The unfiltered hasMany step stays out of the key query.
        let inner = &sql[..sql.find(r#"AS "__page""#).unwrap()];
        assert!(!inner.contains(r#""project""#), "{}", sql);
    }

    #[test]
    fn test_direct_page_limits_joined_rows() {
        let f = fixture();
        let (_, sql) = render(
            &f,
            &f.task,
            &[IncludeSpec::new(&f.project)],
            &[],
            Pagination::new(Some(1), None),
        );
        assert!(!sql.contains("__page"), "{}", sql);
        assert!(sql.ends_with("LIMIT 1"), "{}", sql);
    }

    #[test]
    fn test_count_uses_required_joins_only() {
        let f = fixture();
        let config = ResolverConfig::default();
        let plan = build_join_plan(
            &f.registry,
            &config,
            &f.user,
            &[
                IncludeSpec::new(&f.project)
                    .include(IncludeSpec::new(&f.task).filter(Predicate::eq("title", "fight empire"))),
            ],
        )
        .unwrap();
        let predicates = push_filters(&f.registry, &plan, None).unwrap();
        let sql = StatementEmitter::new(&f.registry, &plan, &predicates)
            .count()
            .to_string(SqliteQueryBuilder);
        assert!(sql.starts_with("SELECT COUNT(*) AS \"count\" FROM (SELECT DISTINCT"), "{}", sql);
        assert!(sql.contains(r#""Project->Task"."title" = 'fight empire'"#), "{}", sql);
    }
}
