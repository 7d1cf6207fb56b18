//! Schema registry: entity definitions and the associations between them.
//!
//! A registry is assembled once through [`SchemaBuilder`] and then frozen into
//! a [`SchemaRegistry`], which is immutable and safe to share between
//! concurrent queries.

use crate::types::{RefractError, RefractResult};
use heck::{ToSnakeCase, ToUpperCamelCase};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Column types understood by the resolver.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    Integer,
    BigInteger,
    String,
    Text,
    Boolean,
    Double,
    Decimal,
    DateTime,
    Uuid,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AttributeOrigin {
    Declared,
    PrimaryKey,
    ForeignKey,
    Timestamp,
}

#[derive(Clone, Debug)]
pub struct AttributeMetadata {
    pub name: String,
    pub ty: AttributeType,
    pub nullable: bool,
    pub origin: AttributeOrigin,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub(crate) usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssociationId(pub(crate) usize);

/// Cheap reference to a registered entity, returned by [`SchemaBuilder::define`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntityHandle {
    id: EntityId,
    name: String,
}

impl EntityHandle {
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Entity definition passed to [`SchemaBuilder::define`].
#[derive(Clone, Debug)]
pub struct EntityDef {
    name: String,
    table_name: Option<String>,
    attributes: Vec<AttributeMetadata>,
    primary_key: Option<(String, AttributeType)>,
    join_table: bool,
    timestamps: bool,
}

impl EntityDef {
    /// An entity with an auto-increment integer `id` primary key.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table_name: None,
            attributes: Vec::new(),
            primary_key: None,
            join_table: false,
            timestamps: false,
        }
    }

    /// A join entity for belongsToMany. Its primary key is the pair of
    /// foreign keys added when the association is declared.
    pub fn join_table(name: impl Into<String>) -> Self {
        Self {
            join_table: true,
            ..Self::new(name)
        }
    }

    pub fn table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, ty: AttributeType) -> Self {
        self.attributes.push(AttributeMetadata {
            name: name.into(),
            ty,
            nullable: true,
            origin: AttributeOrigin::Declared,
        });
        self
    }

    pub fn required_attribute(mut self, name: impl Into<String>, ty: AttributeType) -> Self {
        self.attributes.push(AttributeMetadata {
            name: name.into(),
            ty,
            nullable: false,
            origin: AttributeOrigin::Declared,
        });
        self
    }

    /// Replace the default `id` key. Only `Integer` keys auto-increment.
    pub fn primary_key(mut self, name: impl Into<String>, ty: AttributeType) -> Self {
        self.primary_key = Some((name.into(), ty));
        self
    }

    /// Add `created_at` / `updated_at`, filled on insert.
    pub fn timestamps(mut self) -> Self {
        self.timestamps = true;
        self
    }
}

/// Registered entity.
#[derive(Clone, Debug)]
pub struct EntityMetadata {
    pub id: EntityId,
    pub name: String,
    pub table_name: String,
    pub attributes: Vec<AttributeMetadata>,
    pub primary_key: Vec<String>,
    pub auto_increment: bool,
    pub timestamps: bool,
    pub join_table: bool,
}

impl EntityMetadata {
    pub fn attribute(&self, name: &str) -> Option<&AttributeMetadata> {
        self.attributes.iter().find(|attr| attr.name == name)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }

    pub fn require_attribute(&self, name: &str) -> RefractResult<&AttributeMetadata> {
        self.attribute(name)
            .ok_or_else(|| RefractError::unknown_attribute(&self.name, name))
    }

    /// Type of the primary key when it is a single column.
    pub fn single_primary_key(&self) -> Option<(&str, AttributeType)> {
        match self.primary_key.as_slice() {
            [pk] => self.attribute(pk).map(|attr| (attr.name.as_str(), attr.ty)),
            _ => None,
        }
    }

    pub fn handle(&self) -> EntityHandle {
        EntityHandle {
            id: self.id,
            name: self.name.clone(),
        }
    }

    fn add_foreign_key(&mut self, name: &str, ty: AttributeType, nullable: bool) {
        if self.has_attribute(name) {
            return;
        }
        self.attributes.push(AttributeMetadata {
            name: name.to_string(),
            ty,
            nullable,
            origin: AttributeOrigin::ForeignKey,
        });
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationKind {
    BelongsTo,
    HasMany,
    BelongsToMany,
}

/// Options for [`SchemaBuilder::declare_association`].
#[derive(Clone, Debug, Default)]
pub struct AssociationOptions {
    alias: Option<String>,
    foreign_key: Option<String>,
    other_key: Option<String>,
    through: Option<EntityHandle>,
}

impl AssociationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name the association (`as`). Defaults to the target entity's name.
    pub fn named(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn foreign_key(mut self, column: impl Into<String>) -> Self {
        self.foreign_key = Some(column.into());
        self
    }

    /// Join-entity column pointing at the target (belongsToMany only).
    pub fn other_key(mut self, column: impl Into<String>) -> Self {
        self.other_key = Some(column.into());
        self
    }

    pub fn through(mut self, join: &EntityHandle) -> Self {
        self.through = Some(join.clone());
        self
    }
}

/// Declared association.
///
/// Where the foreign key lives depends on the kind:
/// - `BelongsTo`: on the source, pointing at the target key.
/// - `HasMany`: on the target, pointing at the source key.
/// - `BelongsToMany`: on the join entity, pointing at the source; `other_key`
///   points at the target.
#[derive(Clone, Debug)]
pub struct AssociationMetadata {
    pub id: AssociationId,
    pub name: String,
    pub kind: AssociationKind,
    pub source: EntityId,
    pub target: EntityId,
    pub foreign_key: String,
    pub other_key: Option<String>,
    pub through: Option<EntityId>,
}

/// Mutable registry used during schema setup.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    entities: Vec<EntityMetadata>,
    associations: Vec<AssociationMetadata>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, def: EntityDef) -> RefractResult<EntityHandle> {
        if self.entities.iter().any(|e| e.name == def.name) {
            return Err(RefractError::DuplicateEntity { entity: def.name });
        }
        let id = EntityId(self.entities.len());
        let table_name = def
            .table_name
            .unwrap_or_else(|| def.name.to_snake_case());

        let mut attributes = Vec::new();
        let mut primary_key = Vec::new();
        let mut auto_increment = false;
        if !def.join_table {
            let (pk_name, pk_ty) = def
                .primary_key
                .unwrap_or_else(|| ("id".to_string(), AttributeType::Integer));
            auto_increment = pk_ty == AttributeType::Integer;
            attributes.push(AttributeMetadata {
                name: pk_name.clone(),
                ty: pk_ty,
                nullable: false,
                origin: AttributeOrigin::PrimaryKey,
            });
            primary_key.push(pk_name);
        }
        for attr in def.attributes {
            if attributes.iter().any(|a: &AttributeMetadata| a.name == attr.name) {
                continue;
            }
            attributes.push(attr);
        }
        if def.timestamps {
            for name in ["created_at", "updated_at"] {
                attributes.push(AttributeMetadata {
                    name: name.to_string(),
                    ty: AttributeType::DateTime,
                    nullable: true,
                    origin: AttributeOrigin::Timestamp,
                });
            }
        }

        log::debug!("schema: defined entity '{}' (table '{}')", def.name, table_name);
        let entity = EntityMetadata {
            id,
            name: def.name,
            table_name,
            attributes,
            primary_key,
            auto_increment,
            timestamps: def.timestamps,
            join_table: def.join_table,
        };
        let handle = entity.handle();
        self.entities.push(entity);
        Ok(handle)
    }

    pub fn belongs_to(
        &mut self,
        source: &EntityHandle,
        target: &EntityHandle,
        options: AssociationOptions,
    ) -> RefractResult<AssociationId> {
        self.declare_association(AssociationKind::BelongsTo, source, target, options)
    }

    pub fn has_many(
        &mut self,
        source: &EntityHandle,
        target: &EntityHandle,
        options: AssociationOptions,
    ) -> RefractResult<AssociationId> {
        self.declare_association(AssociationKind::HasMany, source, target, options)
    }

    pub fn belongs_to_many(
        &mut self,
        source: &EntityHandle,
        target: &EntityHandle,
        options: AssociationOptions,
    ) -> RefractResult<AssociationId> {
        self.declare_association(AssociationKind::BelongsToMany, source, target, options)
    }

    pub fn declare_association(
        &mut self,
        kind: AssociationKind,
        source: &EntityHandle,
        target: &EntityHandle,
        options: AssociationOptions,
    ) -> RefractResult<AssociationId> {
        let source_id = self.lookup(source)?;
        let target_id = self.lookup(target)?;
        let through_id = match &options.through {
            Some(join) => Some(self.lookup(join)?),
            None => None,
        };

        let source_name = self.entities[source_id.0].name.clone();
        let target_name = self.entities[target_id.0].name.clone();
        let name = options.alias.clone().unwrap_or_else(|| target_name.clone());
        if self
            .associations
            .iter()
            .any(|a| a.source == source_id && a.name == name)
        {
            return Err(RefractError::DuplicateAssociation {
                source_entity: source_name,
                name,
            });
        }
        let invalid = |reason: &str| RefractError::InvalidAssociation {
            name: name.clone(),
            reason: reason.to_string(),
        };

        let (foreign_key, other_key) = match kind {
            AssociationKind::BelongsTo => {
                let (_, pk_ty) = self.entities[target_id.0]
                    .single_primary_key()
                    .ok_or_else(|| invalid("belongsTo target needs a single-column primary key"))?;
                let fk = options
                    .foreign_key
                    .clone()
                    .unwrap_or_else(|| format!("{}_id", target_name.to_snake_case()));
                self.entities[source_id.0].add_foreign_key(&fk, pk_ty, true);
                (fk, None)
            }
            AssociationKind::HasMany => {
                let (_, pk_ty) = self.entities[source_id.0]
                    .single_primary_key()
                    .ok_or_else(|| invalid("hasMany source needs a single-column primary key"))?;
                let fk = options
                    .foreign_key
                    .clone()
                    .unwrap_or_else(|| format!("{}_id", source_name.to_snake_case()));
                self.entities[target_id.0].add_foreign_key(&fk, pk_ty, true);
                (fk, None)
            }
            AssociationKind::BelongsToMany => {
                let through_id =
                    through_id.ok_or_else(|| invalid("belongsToMany requires a through entity"))?;
                let (_, source_ty) = self.entities[source_id.0]
                    .single_primary_key()
                    .ok_or_else(|| invalid("belongsToMany source needs a single-column primary key"))?;
                let (_, target_ty) = self.entities[target_id.0]
                    .single_primary_key()
                    .ok_or_else(|| invalid("belongsToMany target needs a single-column primary key"))?;
                let fk = options
                    .foreign_key
                    .clone()
                    .unwrap_or_else(|| format!("{}_id", source_name.to_snake_case()));
                let other = options
                    .other_key
                    .clone()
                    .unwrap_or_else(|| format!("{}_id", target_name.to_snake_case()));
                if fk == other {
                    return Err(invalid(
                        "foreign key and other key collide; name them explicitly",
                    ));
                }
                let join = &mut self.entities[through_id.0];
                join.add_foreign_key(&fk, source_ty, false);
                join.add_foreign_key(&other, target_ty, false);
                if join.join_table {
                    for key in [&fk, &other] {
                        if !join.primary_key.contains(key) {
                            join.primary_key.push(key.clone());
                        }
                    }
                }
                (fk, Some(other))
            }
        };

        let id = AssociationId(self.associations.len());
        log::debug!(
            "schema: {:?} '{}' {} -> {} (fk '{}')",
            kind,
            name,
            source_name,
            target_name,
            foreign_key
        );
        self.associations.push(AssociationMetadata {
            id,
            name,
            kind,
            source: source_id,
            target: target_id,
            foreign_key,
            other_key,
            through: if kind == AssociationKind::BelongsToMany {
                through_id
            } else {
                None
            },
        });
        Ok(id)
    }

    /// Freeze the schema.
    pub fn finish(self) -> SchemaRegistry {
        let by_name = self
            .entities
            .iter()
            .map(|e| (e.name.clone(), e.id))
            .collect();
        SchemaRegistry {
            entities: self.entities,
            associations: self.associations,
            by_name,
        }
    }

    fn lookup(&self, handle: &EntityHandle) -> RefractResult<EntityId> {
        match self.entities.get(handle.id.0) {
            Some(entity) if entity.name == handle.name => Ok(entity.id),
            _ => Err(RefractError::unknown_entity(&handle.name)),
        }
    }
}

/// Immutable schema shared by every query.
#[derive(Debug)]
pub struct SchemaRegistry {
    entities: Vec<EntityMetadata>,
    associations: Vec<AssociationMetadata>,
    by_name: HashMap<String, EntityId>,
}

impl SchemaRegistry {
    pub fn entities(&self) -> impl Iterator<Item = &EntityMetadata> {
        self.entities.iter()
    }

    pub fn associations(&self) -> impl Iterator<Item = &AssociationMetadata> {
        self.associations.iter()
    }

    /// Look up an entity by name. Accepts namespaced (`blog::User`) and
    /// snake_case (`user`) spellings as fallbacks.
    pub fn entity(&self, name: &str) -> Option<&EntityMetadata> {
        if let Some(id) = self.by_name.get(name) {
            return self.entities.get(id.0);
        }
        if let Some(colon_pos) = name.rfind("::") {
            if let Some(id) = self.by_name.get(&name[colon_pos + 2..]) {
                return self.entities.get(id.0);
            }
        }
        let pascal = name.to_upper_camel_case();
        self.by_name.get(&pascal).and_then(|id| self.entities.get(id.0))
    }

    pub fn handle(&self, name: &str) -> RefractResult<EntityHandle> {
        self.entity(name)
            .map(EntityMetadata::handle)
            .ok_or_else(|| RefractError::unknown_entity(name))
    }

    pub fn entity_by_id(&self, id: EntityId) -> &EntityMetadata {
        &self.entities[id.0]
    }

    /// Resolve a handle, rejecting handles minted by a different registry.
    pub fn resolve(&self, handle: &EntityHandle) -> RefractResult<&EntityMetadata> {
        match self.entities.get(handle.id.0) {
            Some(entity) if entity.name == handle.name => Ok(entity),
            _ => Err(RefractError::unknown_entity(&handle.name)),
        }
    }

    pub fn association(&self, id: AssociationId) -> &AssociationMetadata {
        &self.associations[id.0]
    }

    pub fn associations_of(&self, entity: EntityId) -> impl Iterator<Item = &AssociationMetadata> {
        self.associations.iter().filter(move |a| a.source == entity)
    }

    pub fn association_named(&self, entity: EntityId, name: &str) -> Option<&AssociationMetadata> {
        self.associations_of(entity).find(|a| a.name == name)
    }
}

static GLOBAL_REGISTRY: OnceCell<Arc<SchemaRegistry>> = OnceCell::new();

/// Install the process-wide registry. Only the first call succeeds.
pub fn install(registry: SchemaRegistry) -> RefractResult<Arc<SchemaRegistry>> {
    let registry = Arc::new(registry);
    GLOBAL_REGISTRY
        .set(registry.clone())
        .map_err(|_| RefractError::RegistryAlreadyInstalled)?;
    Ok(registry)
}

pub fn global() -> Option<Arc<SchemaRegistry>> {
    GLOBAL_REGISTRY.get().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_and_projects() -> (SchemaBuilder, EntityHandle, EntityHandle) {
        let mut schema = SchemaBuilder::new();
        let user = schema
            .define(EntityDef::new("User").attribute("username", AttributeType::String))
            .unwrap();
        let project = schema
            .define(EntityDef::new("Project").attribute("title", AttributeType::String))
            .unwrap();
        (schema, user, project)
    }

    #[test]
    fn test_duplicate_entity_is_rejected() {
        let (mut schema, _, _) = users_and_projects();
        let err = schema.define(EntityDef::new("User")).unwrap_err();
        assert!(matches!(err, RefractError::DuplicateEntity { ref entity } if entity == "User"));
    }

    #[test]
    fn test_association_to_unknown_entity_is_rejected() {
        let (mut schema, user, _) = users_and_projects();
        let mut other = SchemaBuilder::new();
        let ghost = other.define(EntityDef::new("Ghost")).unwrap();
        let err = schema
            .belongs_to(&user, &ghost, AssociationOptions::new())
            .unwrap_err();
        assert!(matches!(err, RefractError::UnknownEntity { ref entity } if entity == "Ghost"));
    }

    #[test]
    fn test_belongs_to_and_has_many_share_the_foreign_key() {
        let (mut schema, user, project) = users_and_projects();
        schema
            .belongs_to(&project, &user, AssociationOptions::new())
            .unwrap();
        schema
            .has_many(&user, &project, AssociationOptions::new())
            .unwrap();
        let registry = schema.finish();

        let project = registry.entity("Project").unwrap();
        let fks: Vec<_> = project
            .attributes
            .iter()
            .filter(|a| a.origin == AttributeOrigin::ForeignKey)
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(fks, vec!["user_id"]);
        assert_eq!(registry.associations().count(), 2);
    }

    #[test]
    fn test_belongs_to_many_builds_composite_join_key() {
        let (mut schema, user, project) = users_and_projects();
        let join = schema.define(EntityDef::join_table("UsersProjects")).unwrap();
        schema
            .belongs_to_many(&user, &project, AssociationOptions::new().through(&join))
            .unwrap();
        schema
            .belongs_to_many(&project, &user, AssociationOptions::new().through(&join))
            .unwrap();
        let registry = schema.finish();

        let join = registry.entity("UsersProjects").unwrap();
        assert_eq!(join.table_name, "users_projects");
        assert_eq!(join.primary_key, vec!["user_id", "project_id"]);
        assert_eq!(join.attributes.len(), 2);
    }

    #[test]
    fn test_belongs_to_many_without_through_is_invalid() {
        let (mut schema, user, project) = users_and_projects();
        let err = schema
            .belongs_to_many(&user, &project, AssociationOptions::new())
            .unwrap_err();
        assert!(matches!(err, RefractError::InvalidAssociation { .. }));
    }

    #[test]
    fn test_duplicate_association_name_is_rejected() {
        let (mut schema, user, project) = users_and_projects();
        schema
            .has_many(&user, &project, AssociationOptions::new())
            .unwrap();
        let err = schema
            .has_many(&user, &project, AssociationOptions::new())
            .unwrap_err();
        assert!(matches!(err, RefractError::DuplicateAssociation { .. }));

        schema
            .has_many(
                &user,
                &project,
                AssociationOptions::new().named("OwnedProjects").foreign_key("owner_id"),
            )
            .unwrap();
    }

    #[test]
    fn test_namespace_aware_lookup() {
        let (schema, _, _) = users_and_projects();
        let registry = schema.finish();
        assert_eq!(registry.entity("blog::User").unwrap().name, "User");
        assert_eq!(registry.entity("project").unwrap().name, "Project");
        assert!(registry.entity("Task").is_none());
    }

    #[test]
    fn test_global_registry_installs_once() {
        let (schema, _, _) = users_and_projects();
        let installed = install(schema.finish()).unwrap();
        let fetched = global().unwrap();
        assert!(Arc::ptr_eq(&installed, &fetched));

        let (again, _, _) = users_and_projects();
        let err = install(again.finish()).unwrap_err();
        assert!(matches!(err, RefractError::RegistryAlreadyInstalled));
    }

    #[test]
    fn test_registry_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SchemaRegistry>();
    }
}
