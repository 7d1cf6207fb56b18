use crate::config::{database_url_from_env, ResolverConfig};
use crate::entity_metadata::{EntityHandle, SchemaRegistry};
use crate::key_types::RefractKey;
use crate::query_builders::{
    CountQueryBuilder, CreateManyQueryBuilder, CreateQueryBuilder, FindManyQueryBuilder,
    FindUniqueQueryBuilder, SetAssociationsQueryBuilder,
};
use crate::types::RefractResult;
use sea_orm::{Database, DatabaseConnection};
use std::sync::Arc;

/// Entry point for queries against one database and one frozen schema.
#[derive(Clone, Debug)]
pub struct RefractClient {
    db: DatabaseConnection,
    registry: Arc<SchemaRegistry>,
    config: ResolverConfig,
}

impl RefractClient {
    pub fn new(db: DatabaseConnection, registry: Arc<SchemaRegistry>) -> Self {
        Self {
            db,
            registry,
            config: ResolverConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    /// Connect to `DATABASE_URL` (in-memory sqlite when unset) with settings
    /// from the `REFRACT_*` environment.
    pub async fn from_env(registry: Arc<SchemaRegistry>) -> RefractResult<Self> {
        let db = Database::connect(database_url_from_env()).await?;
        Ok(Self::new(db, registry).with_config(ResolverConfig::from_env()?))
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Create every registered table; with `force`, drop them first.
    pub async fn sync(&self, force: bool) -> RefractResult<()> {
        crate::sync::sync(&self.db, &self.registry, force).await
    }

    pub fn find_all(&self, entity: &EntityHandle) -> FindManyQueryBuilder<'_, DatabaseConnection> {
        FindManyQueryBuilder::new(&self.db, &self.registry, &self.config, entity)
    }

    pub fn find(
        &self,
        entity: &EntityHandle,
        key: impl Into<RefractKey>,
    ) -> FindUniqueQueryBuilder<'_, DatabaseConnection> {
        FindUniqueQueryBuilder::new(&self.db, &self.registry, &self.config, entity, key.into())
    }

    pub fn count(&self, entity: &EntityHandle) -> CountQueryBuilder<'_, DatabaseConnection> {
        CountQueryBuilder::new(&self.db, &self.registry, &self.config, entity)
    }

    pub fn create(&self, entity: &EntityHandle) -> CreateQueryBuilder<'_, DatabaseConnection> {
        CreateQueryBuilder::new(&self.db, &self.registry, &self.config, entity)
    }

    pub fn bulk_create(&self, entity: &EntityHandle) -> CreateManyQueryBuilder<'_, DatabaseConnection> {
        CreateManyQueryBuilder::new(&self.db, &self.registry, &self.config, entity)
    }

    /// Replace the rows linked to `key` through the hasMany or belongsToMany
    /// association `association` of `source`.
    pub fn set_associations<K, I>(
        &self,
        source: &EntityHandle,
        association: &str,
        key: K,
        targets: I,
    ) -> SetAssociationsQueryBuilder<'_, DatabaseConnection>
    where
        K: Into<RefractKey>,
        I: IntoIterator,
        I::Item: Into<RefractKey>,
    {
        SetAssociationsQueryBuilder::new(
            &self.db,
            &self.registry,
            source,
            association,
            key.into(),
            targets.into_iter().map(Into::into).collect(),
        )
    }
}
