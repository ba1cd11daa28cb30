use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    pipe::Pipe,
    taxonomy::Taxonomy,
};

/// Per-collection configuration: pipes, taxonomies, and which document
/// fields hold categories from which taxonomy.
///
/// Stored as the commit payload of the collection's index, and cached in the
/// config database for the processing stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pipes: BTreeMap<String, Pipe>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub taxonomies: BTreeMap<String, Taxonomy>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub category_fields: BTreeMap<String, String>,
}

impl CollectionConfig {
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let config: Self = serde_json::from_value(value).map_err(|e| {
            Error::InvalidValue(format!("invalid collection config: {e}"))
        })?;
        config.check()?;
        Ok(config)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    /// Every category field must name a taxonomy that exists.
    fn check(&self) -> Result<()> {
        for (field, taxonomy) in &self.category_fields {
            if !self.taxonomies.contains_key(taxonomy) {
                return Err(Error::InvalidValue(format!(
                    "field {field:?} refers to unknown taxonomy {taxonomy:?}"
                )));
            }
        }
        Ok(())
    }

    pub fn pipe(&self, name: &str) -> Result<&Pipe> {
        self.pipes
            .get(name)
            .ok_or_else(|| Error::not_found("pipe", name))
    }

    pub fn taxonomy(&self, name: &str) -> Result<&Taxonomy> {
        self.taxonomies
            .get(name)
            .ok_or_else(|| Error::not_found("taxonomy", name))
    }

    pub fn taxonomy_for_field(&self, field: &str) -> Option<&Taxonomy> {
        self.category_fields
            .get(field)
            .and_then(|name| self.taxonomies.get(name))
    }

    /// Fields whose categories come from the given taxonomy.
    pub fn fields_for_taxonomy(&self, taxonomy: &str) -> Vec<String> {
        self.category_fields
            .iter()
            .filter(|(_, t)| t.as_str() == taxonomy)
            .map(|(f, _)| f.clone())
            .collect()
    }

    pub fn category_add_parent(
        &mut self,
        taxonomy: &str,
        category: &str,
        parent: &str,
    ) -> Result<BTreeSet<String>> {
        self.taxonomies
            .entry(taxonomy.to_string())
            .or_default()
            .add_parent(category, parent)
    }

    pub fn category_remove_parent(
        &mut self,
        taxonomy: &str,
        category: &str,
        parent: &str,
    ) -> Result<BTreeSet<String>> {
        let tax = self
            .taxonomies
            .get_mut(taxonomy)
            .ok_or_else(|| Error::not_found("taxonomy", taxonomy))?;
        Ok(tax.remove_parent(category, parent))
    }

    pub fn category_remove(
        &mut self,
        taxonomy: &str,
        category: &str,
    ) -> Result<BTreeSet<String>> {
        let tax = self
            .taxonomies
            .get_mut(taxonomy)
            .ok_or_else(|| Error::not_found("taxonomy", taxonomy))?;
        Ok(tax.remove(category))
    }
}
