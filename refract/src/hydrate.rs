//! Result hydration.
//!
//! A fetch returns one [`FlatRow`] per joined row, holding an optional tuple
//! for every plan step. Hydration folds those rows into one [`Record`] per
//! distinct root key, nesting included rows under the association they were
//! reached through. Child identity is scoped to the parent node, so a row
//! repeated by a sibling hasMany collapses instead of duplicating.

use crate::entity_metadata::{AssociationKind, SchemaRegistry};
use crate::join_plan::{JoinPlan, JoinStep, StepKind};
use crate::key_types::RowKey;
use crate::types::{RefractError, RefractResult};
use sea_orm::Value;
use serde_json::{Map, Number, Value as Json};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Column name / value pairs of one entity row.
pub type Tuple = Vec<(String, Value)>;

/// One joined row split per plan step. `None` marks a step that did not match
/// (outer-join miss) or a hidden through step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlatRow {
    pub tuples: Vec<Option<Tuple>>,
}

impl FlatRow {
    pub fn new(step_count: usize) -> Self {
        Self {
            tuples: vec![None; step_count],
        }
    }

    pub fn set(&mut self, step: usize, tuple: Tuple) {
        if step >= self.tuples.len() {
            self.tuples.resize(step + 1, None);
        }
        self.tuples[step] = Some(tuple);
    }

    pub fn tuple(&self, step: usize) -> Option<&Tuple> {
        self.tuples.get(step).and_then(Option::as_ref)
    }

    pub fn value(&self, step: usize, column: &str) -> Option<&Value> {
        self.tuple(step).and_then(|t| lookup(t, column))
    }
}

fn lookup<'t>(tuple: &'t [(String, Value)], column: &str) -> Option<&'t Value> {
    tuple.iter().find(|(name, _)| name == column).map(|(_, v)| v)
}

/// Included rows under one association.
#[derive(Clone, Debug, PartialEq)]
pub enum Association {
    One(Option<Box<Record>>),
    Many(Vec<Record>),
}

/// A hydrated entity row with its included associations in declared order.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub entity: String,
    pub attributes: Tuple,
    pub associations: Vec<(String, Association)>,
}

impl Record {
    pub fn get(&self, column: &str) -> Option<&Value> {
        lookup(&self.attributes, column)
    }

    pub fn get_string(&self, column: &str) -> Option<String> {
        match self.get(column)? {
            Value::String(Some(s)) => Some((**s).clone()),
            _ => None,
        }
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        match self.get(column)? {
            Value::TinyInt(Some(v)) => Some(i64::from(*v)),
            Value::SmallInt(Some(v)) => Some(i64::from(*v)),
            Value::Int(Some(v)) => Some(i64::from(*v)),
            Value::BigInt(Some(v)) => Some(*v),
            Value::Unsigned(Some(v)) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn association(&self, name: &str) -> Option<&Association> {
        self.associations
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, a)| a)
    }

    /// The single included row of a belongsTo association.
    pub fn one(&self, name: &str) -> Option<&Record> {
        match self.association(name)? {
            Association::One(record) => record.as_deref(),
            Association::Many(_) => None,
        }
    }

    /// Included rows of a hasMany/belongsToMany association; empty when the
    /// association was not included.
    pub fn many(&self, name: &str) -> &[Record] {
        match self.association(name) {
            Some(Association::Many(records)) => records,
            _ => &[],
        }
    }

    pub fn to_json(&self) -> Json {
        let mut map = Map::new();
        for (name, value) in &self.attributes {
            map.insert(name.clone(), value_to_json(value));
        }
        for (name, association) in &self.associations {
            let json = match association {
                Association::One(Some(record)) => record.to_json(),
                Association::One(None) => Json::Null,
                Association::Many(records) => {
                    Json::Array(records.iter().map(Record::to_json).collect())
                }
            };
            map.insert(name.clone(), json);
        }
        Json::Object(map)
    }
}

fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Bool(Some(b)) => Json::Bool(*b),
        Value::TinyInt(Some(v)) => Json::from(*v),
        Value::SmallInt(Some(v)) => Json::from(*v),
        Value::Int(Some(v)) => Json::from(*v),
        Value::BigInt(Some(v)) => Json::from(*v),
        Value::TinyUnsigned(Some(v)) => Json::from(*v),
        Value::SmallUnsigned(Some(v)) => Json::from(*v),
        Value::Unsigned(Some(v)) => Json::from(*v),
        Value::BigUnsigned(Some(v)) => Json::from(*v),
        Value::Float(Some(v)) => Number::from_f64(f64::from(*v)).map_or(Json::Null, Json::Number),
        Value::Double(Some(v)) => Number::from_f64(*v).map_or(Json::Null, Json::Number),
        Value::String(Some(s)) => Json::String((**s).clone()),
        Value::Decimal(Some(d)) => Json::String(d.to_string()),
        Value::ChronoDateTimeUtc(Some(dt)) => Json::String(dt.to_rfc3339()),
        Value::Uuid(Some(u)) => Json::String(u.to_string()),
        Value::Json(Some(j)) => (**j).clone(),
        _ => Json::Null,
    }
}

struct Node {
    step: usize,
    attributes: Tuple,
    /// One list per visible child step of `step`, in plan order.
    children: Vec<Vec<usize>>,
}

/// Folds flat rows into records, and expands records back into rows.
pub struct Hydrator<'a> {
    registry: &'a SchemaRegistry,
    plan: &'a JoinPlan,
    children_of: Vec<Vec<usize>>,
    slot_of: Vec<usize>,
}

impl<'a> Hydrator<'a> {
    pub fn new(registry: &'a SchemaRegistry, plan: &'a JoinPlan) -> Self {
        let children_of: Vec<Vec<usize>> = (0..plan.len())
            .map(|i| plan.visible_children(i).map(|s| s.index).collect())
            .collect();
        let mut slot_of = vec![0; plan.len()];
        for kids in &children_of {
            for (pos, kid) in kids.iter().enumerate() {
                slot_of[*kid] = pos;
            }
        }
        Self {
            registry,
            plan,
            children_of,
            slot_of,
        }
    }

    fn key_of(&self, step: &JoinStep, tuple: &[(String, Value)]) -> Option<RowKey> {
        let entity = self.registry.entity_by_id(step.entity);
        let values: Option<Vec<&Value>> = entity
            .primary_key
            .iter()
            .map(|pk| lookup(tuple, pk))
            .collect();
        RowKey::from_values(values?)
    }

    fn association_name(&self, step: &JoinStep) -> String {
        step.association
            .map(|id| self.registry.association(id).name.clone())
            .unwrap_or_else(|| step.alias.clone())
    }

    pub fn hydrate(&self, rows: &[FlatRow]) -> RefractResult<Vec<Record>> {
        let root = self.plan.root();
        let mut arena: Vec<Node> = Vec::new();
        let mut roots: Vec<usize> = Vec::new();
        let mut seen: HashMap<(Option<usize>, usize, RowKey), usize> = HashMap::new();

        for row in rows {
            let mut node_at: Vec<Option<usize>> = vec![None; self.plan.len()];
            let root_tuple = row
                .tuple(0)
                .ok_or_else(|| RefractError::query_validation("row without a root tuple"))?;
            let root_key = self.key_of(root, root_tuple).ok_or_else(|| {
                RefractError::query_validation(format!("row without a '{}' key", root.alias))
            })?;
            let root_node = match seen.entry((None, 0, root_key)) {
                Entry::Occupied(e) => *e.get(),
                Entry::Vacant(e) => {
                    arena.push(Node {
                        step: 0,
                        attributes: root_tuple.clone(),
                        children: vec![Vec::new(); self.children_of[0].len()],
                    });
                    roots.push(arena.len() - 1);
                    *e.insert(arena.len() - 1)
                }
            };
            node_at[0] = Some(root_node);

            for step in self.plan.steps().iter().skip(1) {
                if step.is_hidden() {
                    continue;
                }
                let Some(parent) = step.owner.and_then(|o| node_at[o]) else {
                    continue;
                };
                let Some(tuple) = row.tuple(step.index) else {
                    continue;
                };
                let Some(key) = self.key_of(step, tuple) else {
                    continue;
                };
                let node = match seen.entry((Some(parent), step.index, key)) {
                    Entry::Occupied(e) => *e.get(),
                    Entry::Vacant(e) => {
                        arena.push(Node {
                            step: step.index,
                            attributes: tuple.clone(),
                            children: vec![Vec::new(); self.children_of[step.index].len()],
                        });
                        let id = arena.len() - 1;
                        arena[parent].children[self.slot_of[step.index]].push(id);
                        *e.insert(id)
                    }
                };
                node_at[step.index] = Some(node);
            }
        }

        log::trace!(
            "hydrate: {} row(s) -> {} '{}' record(s)",
            rows.len(),
            roots.len(),
            root.alias
        );
        Ok(roots.iter().map(|id| self.build(&arena, *id)).collect())
    }

    fn build(&self, arena: &[Node], id: usize) -> Record {
        let node = &arena[id];
        let step = self.plan.step(node.step);
        let associations = self.children_of[node.step]
            .iter()
            .zip(&node.children)
            .map(|(child_step, ids)| {
                let child = self.plan.step(*child_step);
                let association = if child.kind == StepKind::BelongsTo {
                    Association::One(ids.first().map(|id| Box::new(self.build(arena, *id))))
                } else {
                    Association::Many(ids.iter().map(|id| self.build(arena, *id)).collect())
                };
                (self.association_name(child), association)
            })
            .collect();
        Record {
            entity: self.registry.entity_by_id(step.entity).name.clone(),
            attributes: node.attributes.clone(),
            associations,
        }
    }

    /// Expand records back into the rows a fetch of this plan would return.
    /// Through steps are filled with the pair of keys linking both sides.
    pub fn flatten(&self, records: &[Record]) -> Vec<FlatRow> {
        let mut rows = Vec::new();
        for record in records {
            for parts in self.expand(record, 0) {
                let mut row = FlatRow::new(self.plan.len());
                for (step, tuple) in parts {
                    row.set(step, tuple);
                }
                rows.push(row);
            }
        }
        rows
    }

    fn expand(&self, record: &Record, step: usize) -> Vec<Vec<(usize, Tuple)>> {
        let mut acc = vec![vec![(step, record.attributes.clone())]];
        for child_index in &self.children_of[step] {
            let child_step = self.plan.step(*child_index);
            let children: Vec<&Record> = match record.association(&self.association_name(child_step)) {
                Some(Association::One(Some(child))) => vec![child.as_ref()],
                Some(Association::Many(children)) => children.iter().collect(),
                _ => Vec::new(),
            };
            let mut options = Vec::new();
            for child in children {
                for mut part in self.expand(child, *child_index) {
                    if let Some(link) = self.through_tuple(child_step, record, child) {
                        part.push(link);
                    }
                    options.push(part);
                }
            }
            if options.is_empty() {
                continue;
            }
            acc = acc
                .into_iter()
                .flat_map(|prefix| {
                    options.iter().map(move |option| {
                        let mut row = prefix.clone();
                        row.extend(option.iter().cloned());
                        row
                    })
                })
                .collect();
        }
        acc
    }

    fn through_tuple(&self, step: &JoinStep, parent: &Record, child: &Record) -> Option<(usize, Tuple)> {
        if step.kind != StepKind::BelongsToMany {
            return None;
        }
        let association = self.registry.association(step.association?);
        if association.kind != AssociationKind::BelongsToMany {
            return None;
        }
        let source = self.registry.entity_by_id(association.source);
        let target = self.registry.entity_by_id(association.target);
        let parent_key = parent.get(source.primary_key.first()?)?.clone();
        let child_key = child.get(target.primary_key.first()?)?.clone();
        Some((
            step.parent?,
            vec![
                (association.foreign_key.clone(), parent_key),
                (association.other_key.clone()?, child_key),
            ],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolverConfig;
    use crate::entity_metadata::{AssociationOptions, AttributeType, EntityDef, SchemaBuilder};
    use crate::include::IncludeSpec;
    use crate::join_plan::build_join_plan;

    fn tuple(pairs: &[(&str, Value)]) -> Tuple {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn user(id: i32, name: &str) -> Tuple {
        tuple(&[("id", Value::from(id)), ("username", Value::from(name))])
    }

    fn project(id: i32, title: &str, user_id: Option<i32>) -> Tuple {
        tuple(&[
            ("id", Value::from(id)),
            ("title", Value::from(title)),
            ("user_id", Value::from(user_id)),
        ])
    }

    fn setup() -> (SchemaRegistry, JoinPlan) {
        let mut schema = SchemaBuilder::new();
        let u = schema
            .define(EntityDef::new("User").attribute("username", AttributeType::String))
            .unwrap();
        let p = schema
            .define(EntityDef::new("Project").attribute("title", AttributeType::String))
            .unwrap();
        schema.has_many(&u, &p, AssociationOptions::new()).unwrap();
        let registry = schema.finish();
        let plan = build_join_plan(&registry, &ResolverConfig::default(), &u, &[IncludeSpec::new(&p)])
            .unwrap();
        (registry, plan)
    }

    fn row(user_tuple: Tuple, project_tuple: Option<Tuple>) -> FlatRow {
        let mut row = FlatRow::new(2);
        row.set(0, user_tuple);
        if let Some(p) = project_tuple {
            row.set(1, p);
        }
        row
    }

    #[test]
    fn test_rows_collapse_into_one_record_per_root() {
        let (registry, plan) = setup();
        let rows = vec![
            row(user(1, "leia"), Some(project(1, "republic", Some(1)))),
            row(user(1, "leia"), Some(project(2, "empire", Some(1)))),
            row(user(2, "vader"), None),
            row(user(1, "leia"), Some(project(1, "republic", Some(1)))),
        ];
        let records = Hydrator::new(&registry, &plan).hydrate(&rows).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get_string("username").as_deref(), Some("leia"));
        let titles: Vec<_> = records[0]
            .many("Project")
            .iter()
            .filter_map(|p| p.get_string("title"))
            .collect();
        assert_eq!(titles, vec!["republic", "empire"]);
        assert!(records[1].many("Project").is_empty());
        assert!(matches!(records[1].association("Project"), Some(Association::Many(v)) if v.is_empty()));
    }

    #[test]
    fn test_null_keyed_tuple_is_treated_as_absent() {
        let (registry, plan) = setup();
        let rows = vec![row(
            user(3, "han"),
            Some(tuple(&[
                ("id", Value::Int(None)),
                ("title", Value::String(None)),
                ("user_id", Value::Int(None)),
            ])),
        )];
        let records = Hydrator::new(&registry, &plan).hydrate(&rows).unwrap();
        assert!(records[0].many("Project").is_empty());
    }

    #[test]
    fn test_flatten_round_trip_keeps_foreign_keys() {
        let (registry, plan) = setup();
        let rows = vec![
            row(user(1, "leia"), Some(project(1, "republic", Some(1)))),
            row(user(1, "leia"), Some(project(2, "empire", Some(1)))),
            row(user(2, "vader"), None),
        ];
        let hydrator = Hydrator::new(&registry, &plan);
        let records = hydrator.hydrate(&rows).unwrap();
        let flat = hydrator.flatten(&records);
        assert_eq!(flat, rows);
        for r in &flat {
            if let Some(fk) = r.value(1, "user_id") {
                assert_eq!(Some(fk), r.value(0, "id"));
            }
        }
        assert_eq!(hydrator.hydrate(&flat).unwrap(), records);
    }

    #[test]
    fn test_record_renders_as_json() {
        let (registry, plan) = setup();
        let rows = vec![row(user(1, "leia"), Some(project(1, "republic", Some(1))))];
        let records = Hydrator::new(&registry, &plan).hydrate(&rows).unwrap();
        let json = records[0].to_json();
        assert_eq!(json["username"], "leia");
        assert_eq!(json["Project"][0]["title"], "republic");
        assert_eq!(json["Project"][0]["user_id"], 1);
    }
}
