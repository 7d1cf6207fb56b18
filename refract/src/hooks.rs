//! Query lifecycle hooks.
//!
//! Every fetch emits a [`QueryEvent`] before it runs and the same event plus a
//! [`QueryResultMeta`] after. Events always go to the `log` facade; a hook
//! installed with [`set_query_hook`] receives them too.

use once_cell::sync::Lazy;
use std::sync::{Arc, RwLock};

#[derive(Clone, Debug)]
pub struct QueryEvent {
    pub builder: &'static str,
    pub entity: String,
    pub details: String,
}

#[derive(Clone, Debug, Default)]
pub struct QueryResultMeta {
    pub row_count: Option<usize>,
    pub error: Option<String>,
    pub elapsed_ms: Option<u128>,
}

pub trait QueryHook: Send + Sync {
    fn before(&self, event: &QueryEvent);
    fn after(&self, event: &QueryEvent, meta: &QueryResultMeta);
}

static QUERY_HOOK: Lazy<RwLock<Option<Arc<dyn QueryHook>>>> = Lazy::new(|| RwLock::new(None));

/// Install (or with `None`, remove) the process-wide hook.
pub fn set_query_hook(hook: Option<Arc<dyn QueryHook>>) {
    match QUERY_HOOK.write() {
        Ok(mut slot) => *slot = hook,
        Err(poisoned) => *poisoned.into_inner() = hook,
    }
}

fn current_hook() -> Option<Arc<dyn QueryHook>> {
    match QUERY_HOOK.read() {
        Ok(slot) => slot.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

pub fn compose_details(operation: &str, entity: &str) -> String {
    format!("{} {}", operation, entity)
}

pub fn emit_before(event: &QueryEvent) {
    log::debug!("{}: {}", event.builder, event.details);
    if let Some(hook) = current_hook() {
        hook.before(event);
    }
}

pub fn emit_after(event: &QueryEvent, meta: &QueryResultMeta) {
    match &meta.error {
        Some(error) => log::warn!(
            "{}: {} failed after {}ms: {}",
            event.builder,
            event.details,
            meta.elapsed_ms.unwrap_or_default(),
            error
        ),
        None => log::debug!(
            "{}: {} -> {} row(s) in {}ms",
            event.builder,
            event.details,
            meta.row_count.unwrap_or_default(),
            meta.elapsed_ms.unwrap_or_default()
        ),
    }
    if let Some(hook) = current_hook() {
        hook.after(event, meta);
    }
}

/// Initialise `env_logger` from `RUST_LOG`. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .is_test(cfg!(test))
        .try_init();
}
