use super::create::CreateQueryBuilder;
use crate::config::ResolverConfig;
use crate::entity_metadata::{EntityHandle, SchemaRegistry};
use crate::hydrate::Record;
use crate::types::RefractResult;
use sea_orm::{ConnectionTrait, TransactionTrait, Value};

/// Query builder for creating many records in one transaction; returns the
/// stored rows in insertion order
pub struct CreateManyQueryBuilder<'a, C: ConnectionTrait + TransactionTrait> {
    pub conn: &'a C,
    pub registry: &'a SchemaRegistry,
    pub config: &'a ResolverConfig,
    pub entity: EntityHandle,
    pub rows: Vec<Vec<(String, Value)>>,
}

impl<'a, C> CreateManyQueryBuilder<'a, C>
where
    C: ConnectionTrait + TransactionTrait,
{
    pub fn new(
        conn: &'a C,
        registry: &'a SchemaRegistry,
        config: &'a ResolverConfig,
        entity: &EntityHandle,
    ) -> Self {
        Self {
            conn,
            registry,
            config,
            entity: entity.clone(),
            rows: Vec::new(),
        }
    }

    pub fn row<I, S, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = (S, V)>,
        S: Into<String>,
        V: Into<Value>,
    {
        self.rows.push(
            values
                .into_iter()
                .map(|(column, value)| (column.into(), value.into()))
                .collect(),
        );
        self
    }

    /// Execute all inserts in a transaction. Any failure rolls back the batch.
    pub async fn exec(self) -> RefractResult<Vec<Record>> {
        let txn = self.conn.begin().await?;
        let mut created = Vec::with_capacity(self.rows.len());
        for values in self.rows {
            let record = CreateQueryBuilder::new(&txn, self.registry, self.config, &self.entity)
                .values(values)
                .exec()
                .await?;
            created.push(record);
        }
        txn.commit().await?;
        log::debug!("bulk create '{}': {} row(s)", self.entity.name(), created.len());
        Ok(created)
    }
}
