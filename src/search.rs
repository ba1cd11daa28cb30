use serde::{Deserialize, Serialize};
use serde_json::Value;
use tantivy::{
    Index,
    Term,
    query::{
        AllQuery,
        BooleanQuery,
        EmptyQuery,
        Occur,
        Query as TantivyQuery,
        QueryParser,
        TermQuery,
    },
    schema::IndexRecordOption,
};

use crate::{
    collection::SchemaFields,
    document::{ancestor_term, category_term, exact_term},
    error::{Error, Result},
};

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 1000;

/// Structured query over a collection.
///
/// JSON forms: `"match_all"`, `{"text": "hello"}`,
/// `{"field": {"name": "tag", "value": "x"}}`,
/// `{"category": {"field": "cat", "category": "c", "include_descendants": true}}`,
/// `{"and": [...]}`, `{"or": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Query {
    MatchAll,
    MatchNothing,
    Text(String),
    Field {
        name: String,
        value: Value,
    },
    Category {
        field: String,
        category: String,
        #[serde(default)]
        include_descendants: bool,
    },
    And(Vec<Query>),
    Or(Vec<Query>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(default = "match_all")]
    pub query: Query,
    #[serde(default)]
    pub from: usize,
    #[serde(default = "default_size")]
    pub size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
}

fn match_all() -> Query {
    Query::MatchAll
}

fn default_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl SearchRequest {
    pub fn from_json(value: Value) -> Result<Self> {
        let request: Self = serde_json::from_value(value).map_err(|e| {
            Error::InvalidValue(format!("invalid search request: {e}"))
        })?;
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<()> {
        if self.size > MAX_PAGE_SIZE {
            return Err(Error::InvalidValue(format!(
                "page size {} exceeds the limit of {MAX_PAGE_SIZE}",
                self.size
            )));
        }
        Ok(())
    }

    /// Parse a command-line query: a JSON request if it looks like one,
    /// otherwise a plain full-text query.
    pub fn parse_cli(input: &str) -> Result<Self> {
        let trimmed = input.trim_start();
        if trimmed.starts_with('{') {
            return Self::from_json(serde_json::from_str(trimmed)?);
        }
        Ok(Self {
            query: Query::Text(input.to_string()),
            from: 0,
            size: DEFAULT_PAGE_SIZE,
            doc_type: None,
        })
    }
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub from: usize,
    pub size: usize,
    pub total_matches: usize,
    pub items: Vec<SearchHit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub rank: usize,
    pub score: f32,
    pub doc_type: String,
    pub doc_id: String,
    pub data: Value,
}

fn term_query(fields: &SchemaFields, term: &str) -> Box<dyn TantivyQuery> {
    Box::new(TermQuery::new(
        Term::from_field_text(fields.terms, term),
        IndexRecordOption::Basic,
    ))
}

/// Translate a structured query into a tantivy query.
pub fn build_query(
    query: &Query,
    index: &Index,
    fields: &SchemaFields,
) -> Result<Box<dyn TantivyQuery>> {
    Ok(match query {
        Query::MatchAll => Box::new(AllQuery),
        Query::MatchNothing => Box::new(EmptyQuery),
        Query::Text(text) => {
            let parser = QueryParser::for_index(index, vec![fields.text]);
            let (parsed, _errors) = parser.parse_query_lenient(text);
            parsed
        }
        Query::Field { name, value } => {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(Error::InvalidValue(format!(
                        "field query on {name:?} needs a scalar value, got {other}"
                    )));
                }
            };
            term_query(fields, &exact_term(name, &value))
        }
        Query::Category {
            field,
            category,
            include_descendants,
        } => {
            let exact = term_query(fields, &category_term(field, category));
            if *include_descendants {
                Box::new(BooleanQuery::new(vec![
                    (Occur::Should, exact),
                    (
                        Occur::Should,
                        term_query(fields, &ancestor_term(field, category)),
                    ),
                ]))
            } else {
                exact
            }
        }
        Query::And(subqueries) | Query::Or(subqueries) => {
            let occur = if matches!(query, Query::And(_)) {
                Occur::Must
            } else {
                Occur::Should
            };
            if subqueries.is_empty() {
                return Ok(Box::new(EmptyQuery));
            }
            let clauses = subqueries
                .iter()
                .map(|q| Ok((occur, build_query(q, index, fields)?)))
                .collect::<Result<Vec<_>>>()?;
            Box::new(BooleanQuery::new(clauses))
        }
    })
}

/// Restrict a query to one document type.
pub fn filter_doc_type(
    query: Box<dyn TantivyQuery>,
    fields: &SchemaFields,
    doc_type: &str,
) -> Box<dyn TantivyQuery> {
    let type_query = TermQuery::new(
        Term::from_field_text(fields.doc_type, doc_type),
        IndexRecordOption::Basic,
    );
    Box::new(BooleanQuery::new(vec![
        (Occur::Must, query),
        (Occur::Must, Box::new(type_query)),
    ]))
}
