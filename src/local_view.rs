//! Session-local working copy of the item list.
//!
//! Edits and deletes here change only this copy. Nothing is written back to
//! the store or to the CSV source; reloading discards them.

use tracing::debug;

use crate::item::Item;

/// Narrowing applied by [`LocalItemView::filter`]. Empty fields match all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewFilter {
    pub query: String,
    pub category: Option<String>,
    pub supplier: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LocalItemView {
    items: Vec<Item>,
}

fn push_unique(acc: &mut Vec<String>, value: &str) {
    if !value.trim().is_empty() && !acc.iter().any(|v| v == value) {
        acc.push(value.to_string());
    }
}

fn contains_ci(haystack: &str, needle_lower: &str) -> bool {
    haystack.to_lowercase().contains(needle_lower)
}

impl LocalItemView {
    pub fn new(items: Vec<Item>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Replace the item at `index`. Returns `false` if out of range.
    pub fn edit(&mut self, index: usize, item: Item) -> bool {
        match self.items.get_mut(index) {
            Some(slot) => {
                debug!(index, name = %item.name, "local edit (not persisted)");
                *slot = item;
                true
            }
            None => false,
        }
    }

    /// Remove and return the item at `index`.
    pub fn delete(&mut self, index: usize) -> Option<Item> {
        if index >= self.items.len() {
            return None;
        }
        let removed = self.items.remove(index);
        debug!(index, name = %removed.name, "local delete (not persisted)");
        Some(removed)
    }

    /// Case-insensitive substring search over name, category and supplier.
    /// An empty query returns everything.
    pub fn search(&self, query: &str) -> Vec<&Item> {
        self.filter(&ViewFilter {
            query: query.to_string(),
            ..ViewFilter::default()
        })
    }

    pub fn filter(&self, filter: &ViewFilter) -> Vec<&Item> {
        let needle = filter.query.to_lowercase();
        self.items
            .iter()
            .filter(|item| {
                needle.is_empty()
                    || contains_ci(&item.name, &needle)
                    || contains_ci(&item.category, &needle)
                    || contains_ci(&item.default_supplier, &needle)
            })
            .filter(|item| filter.category.as_ref().map_or(true, |c| &item.category == c))
            .filter(|item| {
                filter
                    .supplier
                    .as_ref()
                    .map_or(true, |s| &item.default_supplier == s)
            })
            .collect()
    }

    /// First item whose name equals `query`, ignoring case.
    pub fn exact_match(&self, query: &str) -> Option<&Item> {
        let needle = query.to_lowercase();
        self.items.iter().find(|item| item.name.to_lowercase() == needle)
    }

    /// The exact match if there is one, else the first search hit.
    pub fn best_match(&self, query: &str) -> Option<&Item> {
        if query.is_empty() {
            return None;
        }
        self.exact_match(query)
            .or_else(|| self.search(query).into_iter().next())
    }

    /// Distinct non-blank categories in first-seen order.
    pub fn categories(&self) -> Vec<String> {
        let mut acc = Vec::new();
        for item in &self.items {
            push_unique(&mut acc, &item.category);
        }
        acc
    }

    /// Distinct non-blank default suppliers in first-seen order.
    pub fn suppliers(&self) -> Vec<String> {
        let mut acc = Vec::new();
        for item in &self.items {
            push_unique(&mut acc, &item.default_supplier);
        }
        acc
    }

    /// Autocomplete values matching `query`: names, categories and
    /// suppliers, deduplicated.
    pub fn suggestions(&self, query: &str) -> Vec<String> {
        let needle = query.to_lowercase();
        let mut acc = Vec::new();
        for item in &self.items {
            for value in [&item.name, &item.category, &item.default_supplier] {
                if contains_ci(value, &needle) {
                    push_unique(&mut acc, value);
                }
            }
        }
        acc
    }
}
