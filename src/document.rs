use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::{
    collection_config::CollectionConfig,
    error::{Error, Result},
    validation::{validate_doc_id, validate_doc_type},
};

pub const ID_FIELD: &str = "id";
pub const TYPE_FIELD: &str = "type";
pub const DEFAULT_DOC_TYPE: &str = "default";

/// Exact-value, category and ancestor term markers.
const EXACT_MARKER: char = 'E';
const CATEGORY_MARKER: char = 'C';
const ANCESTOR_MARKER: char = 'A';

/// A document ready to be written to a collection's index.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedDoc {
    pub id_term: String,
    pub doc_type: String,
    pub doc_id: String,
    pub data: Map<String, Value>,
    pub text: String,
    pub terms: BTreeSet<String>,
}

/// Turn an arbitrary JSON object into the stored form, where every field
/// value is an array of scalars.
pub fn normalize(doc: Value) -> Result<Map<String, Value>> {
    let Value::Object(fields) = doc else {
        return Err(Error::InvalidValue(
            "document must be a JSON object".into(),
        ));
    };

    let mut out = Map::with_capacity(fields.len());
    for (name, value) in fields {
        let values = match value {
            Value::Array(values) => values,
            scalar => vec![scalar],
        };
        if let Some(bad) = values.iter().find(|v| v.is_array() || v.is_object())
        {
            return Err(Error::InvalidValue(format!(
                "field {name:?} contains a nested value: {bad}"
            )));
        }
        out.insert(name, Value::Array(values));
    }
    Ok(out)
}

/// Work out the (type, id) pair of a normalised document.
///
/// Explicit values win, but must agree with the document's own `type` / `id`
/// fields when those are present.
pub fn resolve_identity(
    fields: &Map<String, Value>,
    doc_type: Option<&str>,
    doc_id: Option<&str>,
) -> Result<(String, String)> {
    let field_type = single_string(fields, TYPE_FIELD)?;
    let field_id = single_string(fields, ID_FIELD)?;

    let doc_type = match (doc_type, field_type) {
        (Some(given), Some(stored)) if given != stored => {
            return Err(Error::InvalidValue(format!(
                "document type {given:?} does not match type field {stored:?}"
            )));
        }
        (Some(given), _) => given.to_string(),
        (None, Some(stored)) => stored,
        (None, None) => DEFAULT_DOC_TYPE.to_string(),
    };

    let doc_id = match (doc_id, field_id) {
        (Some(given), Some(stored)) if given != stored => {
            return Err(Error::InvalidValue(format!(
                "document id {given:?} does not match id field {stored:?}"
            )));
        }
        (Some(given), _) => given.to_string(),
        (None, Some(stored)) => stored,
        (None, None) => {
            return Err(Error::InvalidValue("no document id supplied".into()));
        }
    };

    validate_doc_type(&doc_type)?;
    validate_doc_id(&doc_id)?;
    Ok((doc_type, doc_id))
}

fn single_string(
    fields: &Map<String, Value>,
    name: &str,
) -> Result<Option<String>> {
    let Some(Value::Array(values)) = fields.get(name) else {
        return Ok(None);
    };
    match values.as_slice() {
        [] => Ok(None),
        [value] => Ok(scalar_text(value)),
        _ => Err(Error::InvalidValue(format!(
            "multiple values in field {name:?}"
        ))),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub fn id_term(doc_type: &str, doc_id: &str) -> String {
    format!("\t{doc_type}\t{doc_id}")
}

pub fn exact_term(field: &str, value: &str) -> String {
    format!("{field}\t{EXACT_MARKER}{value}")
}

pub fn category_term(field: &str, category: &str) -> String {
    format!("{field}\t{CATEGORY_MARKER}{category}")
}

pub fn ancestor_term(field: &str, category: &str) -> String {
    format!("{field}\t{ANCESTOR_MARKER}{category}")
}

/// Compute the index representation of a normalised document.
pub fn process_doc(
    config: &CollectionConfig,
    doc_type: &str,
    doc_id: &str,
    data: Map<String, Value>,
) -> Result<ProcessedDoc> {
    let mut text = String::new();
    let mut terms = BTreeSet::new();

    for (field, values) in &data {
        let Value::Array(values) = values else {
            return Err(Error::InvalidValue(format!(
                "field {field:?} is not normalised"
            )));
        };
        let taxonomy = config.taxonomy_for_field(field);

        for value in values {
            let Some(value_text) = scalar_text(value) else {
                continue;
            };
            if value.is_string() {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&value_text);
            }
            match taxonomy {
                Some(taxonomy) => {
                    terms.insert(category_term(field, &value_text));
                    for ancestor in taxonomy.ancestors(&value_text) {
                        terms.insert(ancestor_term(field, &ancestor));
                    }
                }
                None => {
                    terms.insert(exact_term(field, &value_text));
                }
            }
        }
    }

    Ok(ProcessedDoc {
        id_term: id_term(doc_type, doc_id),
        doc_type: doc_type.to_string(),
        doc_id: doc_id.to_string(),
        data,
        text,
        terms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_wraps_scalars() {
        let out = normalize(json!({"a": "x", "b": [1, 2], "c": null})).unwrap();
        assert_eq!(
            Value::Object(out),
            json!({"a": ["x"], "b": [1, 2], "c": [null]})
        );
    }

    #[test]
    fn normalize_rejects_nesting_and_non_objects() {
        assert!(normalize(json!({"a": {"b": 1}})).is_err());
        assert!(normalize(json!({"a": [[1]]})).is_err());
        assert!(normalize(json!([1, 2])).is_err());
    }

    #[test]
    fn identity_from_fields_or_arguments() {
        let fields = normalize(json!({"id": 7, "type": "blurb"})).unwrap();
        assert_eq!(
            resolve_identity(&fields, None, None).unwrap(),
            ("blurb".to_string(), "7".to_string())
        );

        let fields = normalize(json!({"text": "hi"})).unwrap();
        assert_eq!(
            resolve_identity(&fields, None, Some("x")).unwrap(),
            ("default".to_string(), "x".to_string())
        );
        assert!(resolve_identity(&fields, None, None).is_err());

        let fields = normalize(json!({"id": "1"})).unwrap();
        assert!(resolve_identity(&fields, None, Some("2")).is_err());
    }

    #[test]
    fn category_fields_get_ancestor_terms() {
        let mut config = CollectionConfig::from_json(json!({
            "taxonomies": {"Foo": {}},
            "category_fields": {"foo": "Foo"}
        }))
        .unwrap();
        config.category_add_parent("Foo", "child", "parent").unwrap();

        let data = normalize(json!({"foo": ["world", "child"], "tag": "t"}))
            .unwrap();
        let doc = process_doc(&config, "default", "1", data).unwrap();

        assert_eq!(doc.id_term, "\tdefault\t1");
        assert!(doc.terms.contains("foo\tCchild"));
        assert!(doc.terms.contains("foo\tCworld"));
        assert!(doc.terms.contains("foo\tAparent"));
        assert!(doc.terms.contains("tag\tEt"));
        assert!(doc.text.contains("world"));
    }
}
