use crate::entity_metadata::AttributeType;
use crate::hydrate::{FlatRow, Tuple};
use crate::statement::{ColumnLabel, FetchRequest, StepLayout};
use crate::types::RefractResult;
use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DbErr, QueryResult, Value};

/// Executes one plan statement and splits each result row per step.
#[async_trait]
pub trait RowFetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> RefractResult<Vec<FlatRow>>;
}

/// SeaORM-backed row fetcher over any connection or transaction.
pub struct SeaOrmRowFetcher<'a, C: ConnectionTrait> {
    pub conn: &'a C,
}

impl<'a, C: ConnectionTrait> SeaOrmRowFetcher<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }
}

fn read_column(row: &QueryResult, column: &ColumnLabel) -> Result<Value, DbErr> {
    let label = column.label.as_str();
    Ok(match column.ty {
        AttributeType::Integer => Value::from(row.try_get::<Option<i32>>("", label)?),
        AttributeType::BigInteger => Value::from(row.try_get::<Option<i64>>("", label)?),
        AttributeType::String | AttributeType::Text => {
            Value::from(row.try_get::<Option<String>>("", label)?)
        }
        AttributeType::Boolean => Value::from(row.try_get::<Option<bool>>("", label)?),
        AttributeType::Double => Value::from(row.try_get::<Option<f64>>("", label)?),
        AttributeType::Decimal => {
            Value::from(row.try_get::<Option<rust_decimal::Decimal>>("", label)?)
        }
        AttributeType::DateTime => Value::from(
            row.try_get::<Option<chrono::DateTime<chrono::Utc>>>("", label)?,
        ),
        AttributeType::Uuid => Value::from(row.try_get::<Option<uuid::Uuid>>("", label)?),
    })
}

/// Read one step's tuple; `None` when every key column is NULL.
fn read_tuple(row: &QueryResult, layout: &StepLayout) -> Result<Option<Tuple>, DbErr> {
    let mut tuple = Vec::with_capacity(layout.columns.len());
    for column in &layout.columns {
        tuple.push((column.name.clone(), read_column(row, column)?));
    }
    let missing = !layout.key_columns.is_empty()
        && layout
            .key_columns
            .iter()
            .all(|i| crate::key_types::RefractKey::from_db_value(&tuple[*i].1).is_none());
    Ok(if missing { None } else { Some(tuple) })
}

pub fn split_row(row: &QueryResult, request: &FetchRequest) -> Result<FlatRow, DbErr> {
    let mut flat = FlatRow::new(request.step_count);
    for layout in &request.layout {
        if let Some(tuple) = read_tuple(row, layout)? {
            flat.set(layout.step, tuple);
        }
    }
    Ok(flat)
}

#[async_trait]
impl<'a, C> RowFetcher for SeaOrmRowFetcher<'a, C>
where
    C: ConnectionTrait + Send + Sync,
{
    async fn fetch(&self, request: &FetchRequest) -> RefractResult<Vec<FlatRow>> {
        let statement = request.build(self.conn.get_database_backend());
        log::debug!("fetch '{}': {}", request.root, statement);
        let rows = self.conn.query_all(statement).await?;
        log::trace!("fetch '{}': {} row(s)", request.root, rows.len());
        let mut flat = Vec::with_capacity(rows.len());
        for row in &rows {
            flat.push(split_row(row, request)?);
        }
        Ok(flat)
    }
}
