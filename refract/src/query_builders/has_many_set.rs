use crate::entity_metadata::{AssociationKind, AssociationMetadata, EntityHandle, SchemaRegistry};
use crate::key_types::RefractKey;
use crate::types::{RefractError, RefractResult};
use sea_orm::sea_query::{Alias, Expr, Query, SimpleExpr};
use sea_orm::{ConnectionTrait, DatabaseTransaction, TransactionTrait, Value};

/// Query builder replacing the rows linked to one source row through a
/// hasMany or belongsToMany association
pub struct SetAssociationsQueryBuilder<'a, C: ConnectionTrait + TransactionTrait> {
    pub conn: &'a C,
    pub registry: &'a SchemaRegistry,
    pub source: EntityHandle,
    pub association: String,
    pub key: RefractKey,
    pub targets: Vec<RefractKey>,
}

impl<'a, C> SetAssociationsQueryBuilder<'a, C>
where
    C: ConnectionTrait + TransactionTrait,
{
    pub fn new(
        conn: &'a C,
        registry: &'a SchemaRegistry,
        source: &EntityHandle,
        association: impl Into<String>,
        key: RefractKey,
        targets: Vec<RefractKey>,
    ) -> Self {
        Self {
            conn,
            registry,
            source: source.clone(),
            association: association.into(),
            key,
            targets,
        }
    }

    fn association(&self) -> RefractResult<&'a AssociationMetadata> {
        let source = self.registry.resolve(&self.source)?;
        self.registry
            .association_named(source.id, &self.association)
            .ok_or_else(|| RefractError::AssociationNotFound {
                source_entity: source.name.clone(),
                target: self.association.clone(),
            })
    }

    /// Execute the set inside its own transaction.
    pub async fn exec(self) -> RefractResult<()> {
        self.association()?;
        let txn = self.conn.begin().await?;
        self.exec_in_txn(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    /// Execute the set inside an existing transaction.
    pub async fn exec_in_txn(&self, txn: &DatabaseTransaction) -> RefractResult<()> {
        let association = self.association()?;
        match association.kind {
            AssociationKind::HasMany => self.set_has_many(txn, association).await,
            AssociationKind::BelongsToMany => self.set_belongs_to_many(txn, association).await,
            AssociationKind::BelongsTo => Err(RefractError::query_validation(format!(
                "'{}' is a belongsTo association; set the foreign key instead",
                association.name
            ))),
        }
    }

    async fn set_has_many(
        &self,
        txn: &DatabaseTransaction,
        association: &AssociationMetadata,
    ) -> RefractResult<()> {
        let source = self.registry.entity_by_id(association.source);
        let target = self.registry.entity_by_id(association.target);
        let (_, source_ty) = source
            .single_primary_key()
            .ok_or_else(|| RefractError::query_validation("hasMany source needs a single key"))?;
        let (target_pk, target_ty) = target
            .single_primary_key()
            .ok_or_else(|| RefractError::query_validation("hasMany target needs a single key"))?;
        let parent = self.key.to_db_value(source_ty);
        let ids: Vec<Value> = self.targets.iter().map(|k| k.to_db_value(target_ty)).collect();
        let fk_nullable = target
            .attribute(&association.foreign_key)
            .map(|a| a.nullable)
            .unwrap_or(true);
        let table = Alias::new(&target.table_name);
        let fk = Alias::new(&association.foreign_key);
        let backend = txn.get_database_backend();

        // Detach rows that are linked now but not in the new set.
        let mut still_linked = Expr::col(fk.clone()).eq(parent.clone());
        if !ids.is_empty() {
            still_linked = still_linked.and(Expr::col(Alias::new(target_pk)).is_not_in(ids.clone()));
        }
        if fk_nullable {
            let mut detach = Query::update();
            detach
                .table(table.clone())
                .value(fk.clone(), SimpleExpr::Value(Value::Int(None)))
                .and_where(still_linked);
            txn.execute(backend.build(&detach)).await?;
        } else {
            let mut delete = Query::delete();
            delete.from_table(table.clone()).and_where(still_linked);
            txn.execute(backend.build(&delete)).await?;
        }

        if !ids.is_empty() {
            let mut attach = Query::update();
            attach
                .table(table)
                .value(fk, SimpleExpr::Value(parent))
                .and_where(Expr::col(Alias::new(target_pk)).is_in(ids));
            txn.execute(backend.build(&attach)).await?;
        }
        log::debug!(
            "set '{}': {} linked to {}",
            association.name,
            self.targets.len(),
            self.key
        );
        Ok(())
    }

    async fn set_belongs_to_many(
        &self,
        txn: &DatabaseTransaction,
        association: &AssociationMetadata,
    ) -> RefractResult<()> {
        let through_id = association
            .through
            .ok_or_else(|| RefractError::query_validation("belongsToMany without a through entity"))?;
        let other_key = association
            .other_key
            .clone()
            .ok_or_else(|| RefractError::query_validation("belongsToMany without an other key"))?;
        let through = self.registry.entity_by_id(through_id);
        let source_ty = through
            .attribute(&association.foreign_key)
            .map(|a| a.ty)
            .ok_or_else(|| RefractError::unknown_attribute(&through.name, &association.foreign_key))?;
        let target_ty = through
            .attribute(&other_key)
            .map(|a| a.ty)
            .ok_or_else(|| RefractError::unknown_attribute(&through.name, &other_key))?;
        let parent = self.key.to_db_value(source_ty);
        let table = Alias::new(&through.table_name);
        let backend = txn.get_database_backend();

        let mut unlink = Query::delete();
        unlink
            .from_table(table.clone())
            .and_where(Expr::col(Alias::new(&association.foreign_key)).eq(parent.clone()));
        txn.execute(backend.build(&unlink)).await?;

        if !self.targets.is_empty() {
            let mut columns = vec![Alias::new(&association.foreign_key), Alias::new(&other_key)];
            let mut stamps = Vec::new();
            if through.timestamps {
                let now = Value::from(chrono::Utc::now());
                for name in ["created_at", "updated_at"] {
                    columns.push(Alias::new(name));
                    stamps.push(SimpleExpr::Value(now.clone()));
                }
            }
            let mut link = Query::insert();
            link.into_table(table).columns(columns);
            for target in &self.targets {
                let mut row = vec![
                    SimpleExpr::Value(parent.clone()),
                    SimpleExpr::Value(target.to_db_value(target_ty)),
                ];
                row.extend(stamps.iter().cloned());
                link.values(row)?;
            }
            txn.execute(backend.build(&link)).await?;
        }
        log::debug!(
            "set '{}': {} linked to {}",
            association.name,
            self.targets.len(),
            self.key
        );
        Ok(())
    }
}
