//! Materialise the registry as tables.

use crate::entity_metadata::{AttributeType, EntityMetadata, SchemaRegistry};
use crate::types::RefractResult;
use sea_orm::sea_query::{Alias, ColumnDef, Index, Table, TableCreateStatement};
use sea_orm::ConnectionTrait;

fn column_def(entity: &EntityMetadata, name: &str, ty: AttributeType, nullable: bool) -> ColumnDef {
    let mut def = ColumnDef::new(Alias::new(name));
    match ty {
        AttributeType::Integer => def.integer(),
        AttributeType::BigInteger => def.big_integer(),
        AttributeType::String => def.string(),
        AttributeType::Text => def.text(),
        AttributeType::Boolean => def.boolean(),
        AttributeType::Double => def.double(),
        AttributeType::Decimal => def.decimal(),
        AttributeType::DateTime => def.timestamp_with_time_zone(),
        AttributeType::Uuid => def.uuid(),
    };
    if !nullable {
        def.not_null();
    }
    if let [pk] = entity.primary_key.as_slice() {
        if pk == name {
            def.primary_key();
            if entity.auto_increment {
                def.auto_increment();
            }
        }
    }
    def
}

/// `CREATE TABLE IF NOT EXISTS` for one entity. Join entities get a
/// composite primary key over their foreign keys.
pub fn create_table_statement(entity: &EntityMetadata) -> TableCreateStatement {
    let mut table = Table::create();
    table.table(Alias::new(&entity.table_name)).if_not_exists();
    for attr in &entity.attributes {
        let mut def = column_def(entity, &attr.name, attr.ty, attr.nullable);
        table.col(&mut def);
    }
    if entity.primary_key.len() > 1 {
        let mut pk = Index::create();
        for column in &entity.primary_key {
            pk.col(Alias::new(column));
        }
        table.primary_key(&mut pk);
    }
    table
}

/// Create every table of `registry`; with `force`, drop them first.
pub async fn sync<C: ConnectionTrait>(
    conn: &C,
    registry: &SchemaRegistry,
    force: bool,
) -> RefractResult<()> {
    let backend = conn.get_database_backend();
    if force {
        for entity in registry.entities().collect::<Vec<_>>().into_iter().rev() {
            let mut stmt = Table::drop();
            stmt.table(Alias::new(&entity.table_name)).if_exists();
            conn.execute(backend.build(&stmt)).await?;
        }
    }
    for entity in registry.entities() {
        conn.execute(backend.build(&create_table_statement(entity)))
            .await?;
        log::debug!("sync: table '{}' ready", entity.table_name);
    }
    Ok(())
}
