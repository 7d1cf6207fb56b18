//! Include-graph builder.
//!
//! Turns a root entity plus a tree of nested includes into a
//! [`JoinPlan`]: one [`JoinStep`] per distinct association path. Steps are
//! keyed by the path of association ids from the root, so two include nodes
//! that walk the same path collapse into one join whose predicates are AND-ed.

use crate::config::ResolverConfig;
use crate::entity_metadata::{
    AssociationId, AssociationKind, AssociationMetadata, EntityHandle, EntityId, SchemaRegistry,
};
use crate::filter::{merge_at_alias, Predicate};
use crate::include::IncludeSpec;
use crate::types::{RefractError, RefractResult};
use sea_orm::sea_query::JoinType;
use std::collections::HashMap;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StepKind {
    Root,
    BelongsTo,
    HasMany,
    BelongsToMany,
    /// Join entity of a belongsToMany; joined but never hydrated.
    Through,
}

impl From<AssociationKind> for StepKind {
    fn from(kind: AssociationKind) -> Self {
        match kind {
            AssociationKind::BelongsTo => Self::BelongsTo,
            AssociationKind::HasMany => Self::HasMany,
            AssociationKind::BelongsToMany => Self::BelongsToMany,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

impl From<JoinKind> for JoinType {
    fn from(kind: JoinKind) -> Self {
        match kind {
            JoinKind::Inner => JoinType::InnerJoin,
            JoinKind::Left => JoinType::LeftJoin,
        }
    }
}

/// `<step alias>.<column> = <parent_alias>.<parent_column>`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinOn {
    pub parent_alias: String,
    pub parent_column: String,
    pub column: String,
}

#[derive(Clone, Debug)]
pub struct JoinStep {
    pub index: usize,
    pub entity: EntityId,
    pub alias: String,
    pub kind: StepKind,
    pub association: Option<AssociationId>,
    /// Step this one is joined onto (a through step for belongsToMany targets).
    pub parent: Option<usize>,
    /// Step this one is hydrated under; skips through steps.
    pub owner: Option<usize>,
    pub path: Vec<AssociationId>,
    pub on: Option<JoinOn>,
    pub predicate: Option<Predicate>,
    pub explicit_required: Option<bool>,
    pub required: bool,
    pub join: JoinKind,
    pub depth: usize,
}

impl JoinStep {
    pub fn is_hidden(&self) -> bool {
        self.kind == StepKind::Through
    }

    pub fn multiplies_rows(&self) -> bool {
        matches!(self.kind, StepKind::HasMany | StepKind::BelongsToMany)
    }
}

/// Resolved join plan. Step 0 is the root; parents precede their children.
#[derive(Clone, Debug)]
pub struct JoinPlan {
    steps: Vec<JoinStep>,
}

impl JoinPlan {
    pub fn root(&self) -> &JoinStep {
        &self.steps[0]
    }

    pub fn steps(&self) -> &[JoinStep] {
        &self.steps
    }

    pub fn step(&self, index: usize) -> &JoinStep {
        &self.steps[index]
    }

    pub fn step_by_alias(&self, alias: &str) -> Option<&JoinStep> {
        self.steps.iter().find(|s| s.alias == alias)
    }

    /// Hydrated children of `owner`, in plan order.
    pub fn visible_children(&self, owner: usize) -> impl Iterator<Item = &JoinStep> {
        self.steps
            .iter()
            .filter(move |s| s.owner == Some(owner) && !s.is_hidden())
    }

    /// Whether joining this plan can yield more than one row per root.
    pub fn multiplies_rows(&self) -> bool {
        self.steps.iter().any(JoinStep::multiplies_rows)
    }

    /// Non-root steps that must match for a root row to qualify.
    pub fn required_steps(&self) -> Vec<usize> {
        self.steps
            .iter()
            .skip(1)
            .filter(|s| s.required)
            .map(|s| s.index)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Depth-first include-graph builder.
pub struct IncludeGraphBuilder<'a> {
    registry: &'a SchemaRegistry,
    config: &'a ResolverConfig,
    steps: Vec<JoinStep>,
    by_path: HashMap<Vec<AssociationId>, usize>,
    /// Alias -> step index; every table alias in one statement is distinct.
    aliases: HashMap<String, usize>,
}

impl<'a> IncludeGraphBuilder<'a> {
    pub fn new(registry: &'a SchemaRegistry, config: &'a ResolverConfig) -> Self {
        Self {
            registry,
            config,
            steps: Vec::new(),
            by_path: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    pub fn build(mut self, root: &EntityHandle, includes: &[IncludeSpec]) -> RefractResult<JoinPlan> {
        let root_meta = self.registry.resolve(root)?;
        let root_alias = self.fit_alias(root_meta.name.clone(), 0);
        self.aliases.insert(root_alias.clone(), 0);
        self.steps.push(JoinStep {
            index: 0,
            entity: root_meta.id,
            alias: root_alias,
            kind: StepKind::Root,
            association: None,
            parent: None,
            owner: None,
            path: Vec::new(),
            on: None,
            predicate: None,
            explicit_required: Some(true),
            required: true,
            join: JoinKind::Inner,
            depth: 0,
        });
        for spec in includes {
            self.visit(0, spec, 1)?;
        }
        self.resolve_join_kinds();

        log::debug!(
            "plan: root '{}' with {} step(s): [{}]",
            root_meta.name,
            self.steps.len(),
            self.steps
                .iter()
                .map(|s| format!("{}:{:?}", s.alias, s.join))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(JoinPlan { steps: self.steps })
    }

    fn visit(&mut self, owner: usize, spec: &IncludeSpec, depth: usize) -> RefractResult<()> {
        if depth > self.config.max_include_depth {
            return Err(RefractError::IncludeTooDeep {
                depth,
                max: self.config.max_include_depth,
            });
        }
        let association = self.resolve_association(self.steps[owner].entity, spec)?;
        let mut path = self.steps[owner].path.clone();
        path.push(association.id);

        let index = match self.by_path.get(&path).copied() {
            Some(existing) => {
                let step = &mut self.steps[existing];
                log::debug!("plan: reusing alias '{}' for repeated include", step.alias);
                step.predicate =
                    merge_at_alias(&step.alias, step.predicate.take(), spec.filter.clone())?;
                step.explicit_required = match (step.explicit_required, spec.required) {
                    (Some(a), Some(b)) => Some(a || b),
                    (a, b) => a.or(b),
                };
                existing
            }
            None => {
                let index = self.push_steps(owner, association, path.clone(), spec, depth)?;
                self.by_path.insert(path, index);
                index
            }
        };

        for child in &spec.include {
            self.visit(index, child, depth + 1)?;
        }
        Ok(())
    }

    fn resolve_association(
        &self,
        owner_entity: EntityId,
        spec: &IncludeSpec,
    ) -> RefractResult<&'a AssociationMetadata> {
        let registry = self.registry;
        let target = registry.resolve(&spec.target)?;
        let source = registry.entity_by_id(owner_entity);
        let not_found = || RefractError::AssociationNotFound {
            source_entity: source.name.clone(),
            target: spec.alias.clone().unwrap_or_else(|| target.name.clone()),
        };

        if let Some(alias) = &spec.alias {
            return registry
                .association_named(owner_entity, alias)
                .filter(|a| a.target == target.id)
                .ok_or_else(not_found);
        }

        let candidates: Vec<&AssociationMetadata> = registry
            .associations_of(owner_entity)
            .filter(|a| a.target == target.id)
            .collect();
        match candidates.as_slice() {
            [] => Err(not_found()),
            [only] => Ok(*only),
            many => Err(RefractError::AmbiguousAssociation {
                source_entity: source.name.clone(),
                target: target.name.clone(),
                candidates: many.iter().map(|a| a.name.clone()).collect(),
            }),
        }
    }

    fn alias_for(&self, owner: usize, name: &str) -> String {
        let sep = &self.config.alias_separator;
        let owner_step = &self.steps[owner];
        if owner == 0 && name != owner_step.alias {
            name.to_string()
        } else {
            format!("{}{}{}", owner_step.alias, sep, name)
        }
    }

    /// Shorten an alias past `max_alias_len` to a prefix plus `~<n>`.
    fn fit_alias(&self, alias: String, n: usize) -> String {
        let max = self.config.max_alias_len;
        if alias.len() <= max {
            return alias;
        }
        let suffix = format!("~{}", n);
        let mut cut = max.saturating_sub(suffix.len());
        while !alias.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}{}", &alias[..cut], suffix)
    }

    /// First free alias for a hidden through step, starting from `base`.
    fn free_through_alias(&self, base: &str, index: usize) -> String {
        let candidate = self.fit_alias(base.to_string(), index);
        if !self.aliases.contains_key(&candidate) {
            return candidate;
        }
        let sep = &self.config.alias_separator;
        let mut n = index;
        loop {
            let candidate = self.fit_alias(format!("{}{}{}", base, sep, n), n);
            if !self.aliases.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Reserve `alias` for a visible step. A through step holding it is
    /// moved to a free alias; two visible steps never share one.
    fn claim_alias(&mut self, alias: &str) -> RefractResult<()> {
        let Some(holder) = self.aliases.get(alias).copied() else {
            return Ok(());
        };
        if !self.steps[holder].is_hidden() {
            return Err(RefractError::DuplicateAlias {
                alias: alias.to_string(),
            });
        }
        let moved = self.free_through_alias(alias, holder);
        log::debug!("plan: through alias '{}' moved to '{}'", alias, moved);
        self.aliases.remove(alias);
        self.aliases.insert(moved.clone(), holder);
        for step in self.steps.iter_mut() {
            if step.parent != Some(holder) {
                continue;
            }
            if let Some(on) = step.on.as_mut() {
                on.parent_alias = moved.clone();
            }
        }
        self.steps[holder].alias = moved;
        Ok(())
    }

    fn push_steps(
        &mut self,
        owner: usize,
        association: &AssociationMetadata,
        path: Vec<AssociationId>,
        spec: &IncludeSpec,
        depth: usize,
    ) -> RefractResult<usize> {
        let registry = self.registry;
        let with_through = association.kind == AssociationKind::BelongsToMany;
        let index = self.steps.len() + usize::from(with_through);
        let alias = self.fit_alias(self.alias_for(owner, &association.name), index);
        self.claim_alias(&alias)?;
        let owner_alias = self.steps[owner].alias.clone();
        let source = registry.entity_by_id(association.source);
        let target = registry.entity_by_id(association.target);
        // Associations are only declared against single-column keys.
        let source_pk = source.primary_key.first().cloned().unwrap_or_default();
        let target_pk = target.primary_key.first().cloned().unwrap_or_default();

        let mut parent = owner;
        let on = match association.kind {
            AssociationKind::BelongsTo => JoinOn {
                parent_alias: owner_alias,
                parent_column: association.foreign_key.clone(),
                column: target_pk,
            },
            AssociationKind::HasMany => JoinOn {
                parent_alias: owner_alias,
                parent_column: source_pk,
                column: association.foreign_key.clone(),
            },
            AssociationKind::BelongsToMany => {
                let through_id = association.through.unwrap_or(association.target);
                let through = registry.entity_by_id(through_id);
                let through_index = self.steps.len();
                let through_alias = self.free_through_alias(
                    &format!("{}{}{}", alias, self.config.alias_separator, through.name),
                    through_index,
                );
                self.aliases.insert(through_alias.clone(), through_index);
                self.steps.push(JoinStep {
                    index: through_index,
                    entity: through_id,
                    alias: through_alias.clone(),
                    kind: StepKind::Through,
                    association: Some(association.id),
                    parent: Some(owner),
                    owner: Some(owner),
                    path: path.clone(),
                    on: Some(JoinOn {
                        parent_alias: owner_alias,
                        parent_column: source_pk,
                        column: association.foreign_key.clone(),
                    }),
                    predicate: None,
                    explicit_required: None,
                    required: false,
                    join: JoinKind::Left,
                    depth,
                });
                parent = through_index;
                JoinOn {
                    parent_alias: through_alias,
                    parent_column: association.other_key.clone().unwrap_or_default(),
                    column: target_pk,
                }
            }
        };

        self.aliases.insert(alias.clone(), index);
        self.steps.push(JoinStep {
            index,
            entity: association.target,
            alias,
            kind: association.kind.into(),
            association: Some(association.id),
            parent: Some(parent),
            owner: Some(owner),
            path,
            on: Some(on),
            predicate: spec.filter.clone(),
            explicit_required: spec.required,
            required: false,
            join: JoinKind::Left,
            depth,
        });
        Ok(index)
    }

    /// A step is required when it is filtered (or explicitly required) or has
    /// a required descendant. `required(false)` makes its whole subtree
    /// optional.
    fn resolve_join_kinds(&mut self) {
        let n = self.steps.len();
        let mut optional_subtree = vec![false; n];
        for i in 1..n {
            let step = &self.steps[i];
            let inherited = step.owner.map(|o| optional_subtree[o]).unwrap_or(false);
            optional_subtree[i] = inherited || step.explicit_required == Some(false);
        }

        let mut child_required = vec![false; n];
        for i in (1..n).rev() {
            let step = &self.steps[i];
            if step.is_hidden() {
                continue;
            }
            let wanted = step
                .explicit_required
                .unwrap_or_else(|| step.predicate.is_some());
            let required = !optional_subtree[i] && (wanted || child_required[i]);
            if let Some(owner) = step.owner {
                child_required[owner] |= required;
            }
            self.steps[i].required = required;
        }

        for i in 1..n {
            if self.steps[i].is_hidden() {
                let required = self
                    .steps
                    .iter()
                    .find(|s| s.parent == Some(i))
                    .map(|s| s.required)
                    .unwrap_or(false);
                self.steps[i].required = required;
            }
            self.steps[i].join = if self.steps[i].required {
                JoinKind::Inner
            } else {
                JoinKind::Left
            };
        }
    }
}

/// Build the join plan for `root` with `includes`.
pub fn build_join_plan(
    registry: &SchemaRegistry,
    config: &ResolverConfig,
    root: &EntityHandle,
    includes: &[IncludeSpec],
) -> RefractResult<JoinPlan> {
    IncludeGraphBuilder::new(registry, config).build(root, includes)
}
