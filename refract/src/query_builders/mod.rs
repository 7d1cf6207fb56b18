pub mod count;
pub mod create;
pub mod create_many;
pub mod has_many_set;
pub mod many;
pub mod relation_fetcher;
pub mod unique;

pub use count::CountQueryBuilder;
pub use create::CreateQueryBuilder;
pub use create_many::CreateManyQueryBuilder;
pub use has_many_set::SetAssociationsQueryBuilder;
pub use many::FindManyQueryBuilder;
pub use relation_fetcher::{RowFetcher, SeaOrmRowFetcher};
pub use unique::FindUniqueQueryBuilder;
