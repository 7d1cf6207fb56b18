use crate::entity_metadata::EntityHandle;
use crate::filter::Predicate;

/// One node of a nested `include`: which association to join, how to filter
/// it, and what to include beneath it.
#[derive(Clone, Debug)]
pub struct IncludeSpec {
    pub target: EntityHandle,
    pub alias: Option<String>,
    pub filter: Option<Predicate>,
    pub required: Option<bool>,
    pub include: Vec<IncludeSpec>,
}

impl IncludeSpec {
    pub fn new(target: &EntityHandle) -> Self {
        Self {
            target: target.clone(),
            alias: None,
            filter: None,
            required: None,
            include: Vec::new(),
        }
    }

    /// Select the association by its `as` name instead of by target.
    pub fn named(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Filter the included rows. Repeated calls are AND-ed.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    /// Override whether a matching row is required for the parent to be
    /// returned. Filtered includes are required unless this says otherwise.
    pub fn required(mut self, required: bool) -> Self {
        self.required = Some(required);
        self
    }

    pub fn include(mut self, child: IncludeSpec) -> Self {
        self.include.push(child);
        self
    }
}

impl From<&EntityHandle> for IncludeSpec {
    fn from(target: &EntityHandle) -> Self {
        Self::new(target)
    }
}
