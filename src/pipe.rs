use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::document::{ID_FIELD, TYPE_FIELD};

/// A named field mapping applied to documents before they are indexed.
///
/// Each mapping produces one output document. Output documents go to the
/// `target` pipe when one is set, otherwise they are indexed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipe {
    #[serde(default)]
    pub mappings: Vec<Mapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    #[serde(default)]
    pub map: Vec<FieldMap>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMap {
    #[serde(deserialize_with = "one_or_many")]
    pub from: Vec<String>,
    pub to: String,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

impl Pipe {
    /// Apply every mapping to a normalised input document.
    ///
    /// The input's `id` and `type` fields are carried over unless a mapping
    /// writes them itself.
    pub fn apply(&self, input: &Map<String, Value>) -> Vec<Map<String, Value>> {
        self.mappings
            .iter()
            .map(|mapping| {
                let mut output = Map::new();
                for field_map in &mapping.map {
                    for from in &field_map.from {
                        let Some(values) = input.get(from) else {
                            continue;
                        };
                        let slot = output
                            .entry(field_map.to.clone())
                            .or_insert_with(|| Value::Array(Vec::new()));
                        if let (Value::Array(dest), Value::Array(src)) =
                            (slot, values)
                        {
                            dest.extend(src.iter().cloned());
                        }
                    }
                }
                for carried in [ID_FIELD, TYPE_FIELD] {
                    if !output.contains_key(carried)
                        && let Some(value) = input.get(carried)
                    {
                        output.insert(carried.to_string(), value.clone());
                    }
                }
                output
            })
            .collect()
    }
}
