use thiserror::Error;

// Crate-wide result alias
pub type RefractResult<T> = std::result::Result<T, RefractError>;

/// Typed resolver errors.
///
/// Everything except [`RefractError::Database`] is raised while the query plan
/// is being built, before any statement reaches the database.
#[derive(Debug, Error)]
pub enum RefractError {
    // Schema registry errors
    #[error("RefractError::DuplicateEntity: entity='{entity}'")]
    DuplicateEntity { entity: String },
    #[error("RefractError::UnknownEntity: entity='{entity}'")]
    UnknownEntity { entity: String },
    #[error("RefractError::DuplicateAssociation: source='{source_entity}' name='{name}'")]
    DuplicateAssociation { source_entity: String, name: String },
    #[error("RefractError::InvalidAssociation: name='{name}' reason='{reason}'")]
    InvalidAssociation { name: String, reason: String },
    #[error("RefractError::RegistryAlreadyInstalled")]
    RegistryAlreadyInstalled,

    // Include/plan errors
    #[error("RefractError::AssociationNotFound: source='{source_entity}' target='{target}'")]
    AssociationNotFound { source_entity: String, target: String },
    #[error("RefractError::AmbiguousAssociation: source='{source_entity}' target='{target}' candidates={candidates:?}")]
    AmbiguousAssociation {
        source_entity: String,
        target: String,
        candidates: Vec<String>,
    },
    #[error("RefractError::DuplicateAlias: alias='{alias}'")]
    DuplicateAlias { alias: String },
    #[error("RefractError::IncludeTooDeep: depth={depth} max={max}")]
    IncludeTooDeep { depth: usize, max: usize },
    #[error("RefractError::UnknownAttribute: entity='{entity}' attribute='{attribute}'")]
    UnknownAttribute { entity: String, attribute: String },
    #[error("RefractError::ConflictingAliasPredicate: alias='{alias}' column='{column}' detail='{detail}'")]
    ConflictingAliasPredicate {
        alias: String,
        column: String,
        detail: String,
    },
    #[error("RefractError::AmbiguousOrder: entity='{entity}' paginates across a row-multiplying include without an order")]
    AmbiguousOrder { entity: String },
    #[error("RefractError::QueryValidation: {message}")]
    QueryValidation { message: String },

    // Configuration errors
    #[error("RefractError::Config: key='{key}' message='{message}'")]
    Config { key: String, message: String },

    // Fetch-level failures pass through untouched
    #[error(transparent)]
    Database(#[from] sea_orm::DbErr),
}

impl RefractError {
    pub fn unknown_entity(entity: impl Into<String>) -> Self {
        Self::UnknownEntity {
            entity: entity.into(),
        }
    }

    pub fn unknown_attribute(entity: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::UnknownAttribute {
            entity: entity.into(),
            attribute: attribute.into(),
        }
    }

    pub fn query_validation(message: impl Into<String>) -> Self {
        Self::QueryValidation {
            message: message.into(),
        }
    }

    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            message: message.into(),
        }
    }

    /// True for errors raised while planning, i.e. before any fetch ran.
    pub fn is_plan_error(&self) -> bool {
        !matches!(self, Self::Database(_))
    }
}

impl From<RefractError> for sea_orm::DbErr {
    fn from(err: RefractError) -> Self {
        match err {
            RefractError::Database(inner) => inner,
            other => sea_orm::DbErr::Custom(other.to_string()),
        }
    }
}

impl From<sea_orm::sea_query::error::Error> for RefractError {
    fn from(err: sea_orm::sea_query::error::Error) -> Self {
        Self::query_validation(err.to_string())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl From<SortOrder> for sea_orm::Order {
    fn from(order: SortOrder) -> Self {
        match order {
            SortOrder::Asc => sea_orm::Order::Asc,
            SortOrder::Desc => sea_orm::Order::Desc,
        }
    }
}

/// One `ORDER BY` term on a root attribute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderSpec {
    pub column: String,
    pub order: SortOrder,
}

impl OrderSpec {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            order: SortOrder::Desc,
        }
    }
}

/// Conversion used by `order_by` on the query builders.
pub trait IntoOrderSpec {
    fn into_order_spec(self) -> OrderSpec;
}

impl IntoOrderSpec for OrderSpec {
    fn into_order_spec(self) -> OrderSpec {
        self
    }
}

impl<S: Into<String>> IntoOrderSpec for (S, SortOrder) {
    fn into_order_spec(self) -> OrderSpec {
        OrderSpec {
            column: self.0.into(),
            order: self.1,
        }
    }
}
