//! # Asset Registries
//!
//! Components, partials and filters are looked up by name. A lookup tries the
//! name verbatim, then its camelCase form, then its PascalCase form.
//!
//! ## Inheritance
//!
//! - **strict**: an instance sees the global registries plus its own.
//! - **inheriting**: global, then the parent's merged registries, then its own.
//!
//! Later layers win on name conflicts.

use std::fmt;

use indexmap::IndexMap;

use crate::common::{dash_to_camel_case, dash_to_upper_camel_case};
use crate::component::ComponentRef;
use crate::element::Template;
use crate::expression::Filter;

#[derive(Clone)]
pub struct Registry<T> {
    entries: IndexMap<String, T>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }
}

impl<T> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

impl<T: Clone> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, entry: T) {
        self.entries.insert(name.to_string(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve `name` with the casing fallback. Returns the registered name
    /// that matched along with the entry.
    pub fn lookup(&self, name: &str) -> Option<(String, &T)> {
        if name.is_empty() {
            return None;
        }
        if let Some(entry) = self.entries.get(name) {
            return Some((name.to_string(), entry));
        }
        let camel = dash_to_camel_case(name);
        if let Some(entry) = self.entries.get(&camel) {
            return Some((camel, entry));
        }
        let pascal = dash_to_upper_camel_case(name);
        self.entries.get(&pascal).map(|entry| (pascal, entry))
    }

    pub fn layered(layers: &[&Registry<T>]) -> Self {
        let mut merged = Self::new();
        for layer in layers {
            for (name, entry) in &layer.entries {
                merged.entries.insert(name.clone(), entry.clone());
            }
        }
        merged
    }
}

#[derive(Clone, Default, Debug)]
pub struct Assets {
    pub components: Registry<ComponentRef>,
    pub partials: Registry<Template>,
    pub filters: Registry<Filter>,
}

impl Assets {
    pub fn merge(strict: bool, global: &Assets, inherited: Option<&Assets>, own: &Assets) -> Assets {
        match inherited {
            Some(parent) if !strict => Assets {
                components: Registry::layered(&[
                    &global.components,
                    &parent.components,
                    &own.components,
                ]),
                partials: Registry::layered(&[&global.partials, &parent.partials, &own.partials]),
                filters: Registry::layered(&[&global.filters, &parent.filters, &own.filters]),
            },
            _ => Assets {
                components: Registry::layered(&[&global.components, &own.components]),
                partials: Registry::layered(&[&global.partials, &own.partials]),
                filters: Registry::layered(&[&global.filters, &own.filters]),
            },
        }
    }

    /// Registries for a loop scope: only filters are carried.
    pub fn filters_only(strict: bool, global: &Assets, inherited: &Assets) -> Assets {
        let filters = if strict {
            global.filters.clone()
        } else {
            Registry::layered(&[&global.filters, &inherited.filters])
        };
        Assets {
            filters,
            ..Default::default()
        }
    }
}
