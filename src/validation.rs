//! Name checks for collections, document types and document ids.

use crate::error::{Error, Result};

const MAX_COLLECTION_NAME_LEN: usize = 64;
const MAX_DOC_TYPE_LEN: usize = 64;
const MAX_DOC_ID_LEN: usize = 255;

/// Characters that would be unsafe in a storage directory name.
const COLLECTION_NAME_FORBIDDEN: &[char] =
    &['/', '\\', '.', ',', ':', '[', ']', '{', '}', '"'];

pub fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidValue("empty collection name".into()));
    }
    if name.len() > MAX_COLLECTION_NAME_LEN {
        return Err(Error::InvalidValue(format!(
            "collection name longer than {MAX_COLLECTION_NAME_LEN} bytes"
        )));
    }
    if name.starts_with('_') {
        return Err(Error::InvalidValue(format!(
            "collection name may not start with '_': {name:?}"
        )));
    }
    if let Some(c) = name
        .chars()
        .find(|c| c.is_control() || COLLECTION_NAME_FORBIDDEN.contains(c))
    {
        return Err(Error::InvalidValue(format!(
            "invalid character {c:?} in collection name {name:?}"
        )));
    }
    Ok(())
}

pub fn validate_doc_type(doc_type: &str) -> Result<()> {
    validate_term_part("document type", doc_type, MAX_DOC_TYPE_LEN)
}

pub fn validate_doc_id(doc_id: &str) -> Result<()> {
    validate_term_part("document id", doc_id, MAX_DOC_ID_LEN)
}

// Types and ids are joined with tabs into the id term.
fn validate_term_part(what: &str, value: &str, max_len: usize) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidValue(format!("empty {what}")));
    }
    if value.len() > max_len {
        return Err(Error::InvalidValue(format!(
            "{what} longer than {max_len} bytes"
        )));
    }
    if value.chars().any(char::is_control) {
        return Err(Error::InvalidValue(format!(
            "{what} contains control characters: {value:?}"
        )));
    }
    Ok(())
}
