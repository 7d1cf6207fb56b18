use crate::types::{RefractError, RefractResult};
use serde::Deserialize;

const DEFAULT_DATABASE_URL: &str = "sqlite::memory:";
const MIN_ALIAS_LEN: usize = 16;

/// Resolver settings. Every field has a default, so a partial JSON document
/// or an empty environment is valid.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverConfig {
    /// Joins nested association names into table aliases (`Project->User`).
    pub alias_separator: String,
    /// Deepest include nesting accepted before planning fails.
    pub max_include_depth: usize,
    /// Reject limit/offset across a row-multiplying include without an order.
    pub require_order_for_pagination: bool,
    /// Longest table alias emitted; longer paths are shortened. Postgres
    /// truncates identifiers past 63 bytes.
    pub max_alias_len: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            alias_separator: "->".to_string(),
            max_include_depth: 8,
            require_order_for_pagination: true,
            max_alias_len: 63,
        }
    }
}

impl ResolverConfig {
    pub fn from_json(json: &str) -> RefractResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| RefractError::config("json", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read `REFRACT_ALIAS_SEPARATOR`, `REFRACT_MAX_INCLUDE_DEPTH`,
    /// `REFRACT_REQUIRE_ORDER` and `REFRACT_MAX_ALIAS_LEN`, falling back to
    /// defaults.
    pub fn from_env() -> RefractResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> RefractResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(sep) = lookup("REFRACT_ALIAS_SEPARATOR") {
            config.alias_separator = sep;
        }
        if let Some(depth) = lookup("REFRACT_MAX_INCLUDE_DEPTH") {
            config.max_include_depth = depth.parse().map_err(|_| {
                RefractError::config("REFRACT_MAX_INCLUDE_DEPTH", format!("not a number: {}", depth))
            })?;
        }
        if let Some(len) = lookup("REFRACT_MAX_ALIAS_LEN") {
            config.max_alias_len = len.parse().map_err(|_| {
                RefractError::config("REFRACT_MAX_ALIAS_LEN", format!("not a number: {}", len))
            })?;
        }
        if let Some(flag) = lookup("REFRACT_REQUIRE_ORDER") {
            config.require_order_for_pagination = match flag.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(RefractError::config(
                        "REFRACT_REQUIRE_ORDER",
                        format!("not a boolean: {}", other),
                    ))
                }
            };
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> RefractResult<()> {
        if self.alias_separator.is_empty() {
            return Err(RefractError::config("alias_separator", "must not be empty"));
        }
        if self.max_include_depth == 0 {
            return Err(RefractError::config("max_include_depth", "must be at least 1"));
        }
        if self.max_alias_len < MIN_ALIAS_LEN {
            return Err(RefractError::config(
                "max_alias_len",
                format!("must be at least {}", MIN_ALIAS_LEN),
            ));
        }
        Ok(())
    }
}

/// `DATABASE_URL`, or an in-memory sqlite database when unset.
pub fn database_url_from_env() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}
