use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A category hierarchy: every known category mapped to its direct parents.
///
/// Serialises as `{"child": ["parent"], "parent": []}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Taxonomy {
    parents: BTreeMap<String, BTreeSet<String>>,
}

impl Taxonomy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, category: &str) -> bool {
        self.parents.contains_key(category)
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.parents.keys().map(String::as_str)
    }

    pub fn parents(&self, category: &str) -> Option<&BTreeSet<String>> {
        self.parents.get(category)
    }

    pub fn children(&self, category: &str) -> BTreeSet<String> {
        self.parents
            .iter()
            .filter(|(_, parents)| parents.contains(category))
            .map(|(child, _)| child.clone())
            .collect()
    }

    /// All transitive parents of `category`.
    pub fn ancestors(&self, category: &str) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        let mut stack: Vec<&str> = vec![category];
        while let Some(current) = stack.pop() {
            if let Some(parents) = self.parents.get(current) {
                for parent in parents {
                    if result.insert(parent.clone()) {
                        stack.push(parent);
                    }
                }
            }
        }
        result
    }

    /// All transitive children of `category`.
    pub fn descendants(&self, category: &str) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        let mut stack = vec![category.to_string()];
        while let Some(current) = stack.pop() {
            for child in self.children(&current) {
                if result.insert(child.clone()) {
                    stack.push(child);
                }
            }
        }
        result
    }

    pub fn add_category(&mut self, category: &str) {
        self.parents.entry(category.to_string()).or_default();
    }

    /// Add `parent` as a direct parent of `child`, creating either category
    /// if needed.
    ///
    /// Returns the categories whose ancestor set changed; empty when the
    /// link was already present.
    pub fn add_parent(
        &mut self,
        child: &str,
        parent: &str,
    ) -> Result<BTreeSet<String>> {
        if child == parent {
            return Err(Error::InvalidValue(format!(
                "category {child:?} cannot be its own parent"
            )));
        }
        if self.ancestors(parent).contains(child) {
            return Err(Error::InvalidValue(format!(
                "adding {parent:?} as a parent of {child:?} would create a loop"
            )));
        }
        self.add_category(parent);
        let inserted = self
            .parents
            .entry(child.to_string())
            .or_default()
            .insert(parent.to_string());
        if !inserted {
            return Ok(BTreeSet::new());
        }

        let mut modified = self.descendants(child);
        modified.insert(child.to_string());
        Ok(modified)
    }

    /// Remove the direct link between `child` and `parent`.
    pub fn remove_parent(
        &mut self,
        child: &str,
        parent: &str,
    ) -> BTreeSet<String> {
        let removed = self
            .parents
            .get_mut(child)
            .is_some_and(|parents| parents.remove(parent));
        if !removed {
            return BTreeSet::new();
        }
        let mut modified = self.descendants(child);
        modified.insert(child.to_string());
        modified
    }

    /// Remove a category and every link pointing at it.
    pub fn remove(&mut self, category: &str) -> BTreeSet<String> {
        if !self.parents.contains_key(category) {
            return BTreeSet::new();
        }
        let mut modified = self.descendants(category);
        modified.insert(category.to_string());
        self.parents.remove(category);
        for parents in self.parents.values_mut() {
            parents.remove(category);
        }
        modified
    }
}
