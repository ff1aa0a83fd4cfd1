// registry.rs — Name → filter lookup.

use std::collections::BTreeMap;

use crate::filter::Filter;

/// Filters available to callers, keyed by `Filter::name`.
#[derive(Default)]
pub struct FilterRegistry {
    filters: BTreeMap<String, Box<dyn Filter>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filter under its own name. A filter already registered
    /// under that name is replaced and returned.
    pub fn register(&mut self, filter: Box<dyn Filter>) -> Option<Box<dyn Filter>> {
        let name = filter.name().to_owned();
        let previous = self.filters.insert(name.clone(), filter);
        if previous.is_some() {
            log::warn!("[rudolf-filters] filter `{name}` re-registered, previous instance replaced");
        } else {
            log::debug!("[rudolf-filters] registered filter `{name}`");
        }
        previous
    }

    pub fn get(&self, name: &str) -> Option<&dyn Filter> {
        self.filters.get(name).map(|f| f.as_ref())
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.filters.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Filter> {
        self.filters.values().map(|f| f.as_ref())
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}
