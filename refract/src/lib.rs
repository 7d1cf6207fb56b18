//! Association-aware query resolution over sea-orm.
//!
//! Entities and associations are registered at runtime into a
//! [`SchemaRegistry`]. A query names a root entity and a tree of
//! [`IncludeSpec`]s; the resolver turns that into a single SQL statement with
//! filters pushed into the right joins and pagination that stays correct
//! across one-to-many joins, then hydrates the rows into nested [`Record`]s.

pub mod client;
pub mod config;
pub mod entity_metadata;
pub mod filter;
pub mod hooks;
pub mod hydrate;
pub mod include;
pub mod join_plan;
pub mod key_types;
pub mod pagination;
pub mod query_builders;
pub mod resolver;
pub mod statement;
pub mod sync;
pub mod types;

pub use client::RefractClient;
pub use config::ResolverConfig;
pub use entity_metadata::{
    AssociationKind, AssociationOptions, AttributeType, EntityDef, EntityHandle, SchemaBuilder,
    SchemaRegistry,
};
pub use filter::Predicate;
pub use hydrate::{Association, FlatRow, Record};
pub use include::IncludeSpec;
pub use join_plan::{JoinKind, JoinPlan, JoinStep};
pub use key_types::{RefractKey, RowKey};
pub use pagination::{PageStrategy, Pagination};
pub use query_builders::{RowFetcher, SeaOrmRowFetcher};
pub use statement::FetchRequest;
pub use types::{OrderSpec, RefractError, RefractResult, SortOrder};

pub use sea_orm;
