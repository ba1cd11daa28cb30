use std::{
    collections::{BTreeSet, HashMap},
    path::{Path, PathBuf},
};

use serde_json::{Map, Value, json};
use tantivy::{
    DocAddress,
    Index,
    IndexReader,
    IndexWriter,
    ReloadPolicy,
    Searcher,
    TantivyDocument,
    Term,
    collector::{Count, TopDocs},
    query::{BooleanQuery, Occur, Query as TantivyQuery, TermQuery},
    schema::{
        Field,
        IndexRecordOption,
        STORED,
        STRING,
        Schema,
        TextFieldIndexing,
        TextOptions,
        Value as _,
    },
    tokenizer::{
        LowerCaser,
        RemoveLongFilter,
        SimpleTokenizer,
        Stemmer,
        TextAnalyzer,
    },
};

use crate::{
    collection_config::CollectionConfig,
    document::{self, ProcessedDoc, category_term},
    error::{Error, Result},
    search::{self, SearchHit, SearchRequest, SearchResults},
};

/// Memory budget for a collection's single indexing thread.
const WRITER_MEMORY_BUDGET: usize = 50_000_000;

/// Field names used in the schema.
pub mod fields {
    pub const ID_TERM: &str = "id_term";
    pub const DOC_TYPE: &str = "doc_type";
    pub const DOC_ID: &str = "doc_id";
    pub const DATA: &str = "data";
    pub const TEXT: &str = "text";
    pub const TERMS: &str = "terms";
}

/// Resolved field handles for the schema.
#[derive(Debug, Clone, Copy)]
pub struct SchemaFields {
    pub id_term: Field,
    pub doc_type: Field,
    pub doc_id: Field,
    pub data: Field,
    pub text: Field,
    pub terms: Field,
}

fn build_schema() -> (Schema, SchemaFields) {
    let mut builder = Schema::builder();

    let id_term = builder.add_text_field(fields::ID_TERM, STRING | STORED);
    let doc_type = builder.add_text_field(fields::DOC_TYPE, STRING | STORED);
    let doc_id = builder.add_text_field(fields::DOC_ID, STRING | STORED);
    let data = builder.add_text_field(fields::DATA, STORED);

    let text_opts = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer("en_stem")
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    );
    let text = builder.add_text_field(fields::TEXT, text_opts);
    let terms = builder.add_text_field(fields::TERMS, STRING | STORED);

    let schema = builder.build();
    let fields = SchemaFields {
        id_term,
        doc_type,
        doc_id,
        data,
        text,
        terms,
    };

    (schema, fields)
}

fn register_tokenizers(index: &Index) {
    let en_stem = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(tantivy::tokenizer::Language::English))
        .build();
    index.tokenizers().register("en_stem", en_stem);
}

/// Uncommitted state held by the single writable handle.
struct WriteState {
    writer: IndexWriter,
    /// Documents written since the last commit, keyed by id term. `None`
    /// marks a deletion.
    pending: HashMap<String, Option<ProcessedDoc>>,
    dirty: bool,
}

struct Opened {
    index: Index,
    reader: IndexReader,
    fields: SchemaFields,
    write: Option<WriteState>,
}

/// One collection's index, opened either readonly (a snapshot of the last
/// commit) or writable (the only writer for this collection).
pub struct Collection {
    name: String,
    path: PathBuf,
    config: CollectionConfig,
    opened: Option<Opened>,
}

impl Collection {
    pub fn new(name: &str, path: &Path) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            config: CollectionConfig::default(),
            opened: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.opened.is_some()
    }

    pub fn is_writable(&self) -> bool {
        self.opened.as_ref().is_some_and(|o| o.write.is_some())
    }

    pub fn has_uncommitted_changes(&self) -> bool {
        self.opened
            .as_ref()
            .and_then(|o| o.write.as_ref())
            .is_some_and(|w| w.dirty)
    }

    fn open_index(&self, create: bool) -> Result<Index> {
        if create {
            std::fs::create_dir_all(&self.path)?;
        } else if !self.path.is_dir() {
            return Err(Error::not_found("collection", &self.name));
        }

        let (schema, _) = build_schema();
        let mmap_dir = tantivy::directory::MmapDirectory::open(&self.path)?;
        let exists = Index::exists(&mmap_dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?;
        let index = if exists {
            Index::open(mmap_dir)?
        } else if create {
            Index::create(mmap_dir, schema, tantivy::IndexSettings::default())?
        } else {
            return Err(Error::not_found("collection", &self.name));
        };

        register_tokenizers(&index);
        Ok(index)
    }

    fn attach(&mut self, index: Index, write: Option<WriteState>) -> Result<()> {
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let fields = resolve_fields(&index.schema())?;
        self.config = load_config(&index)?;
        self.opened = Some(Opened {
            index,
            reader,
            fields,
            write,
        });
        Ok(())
    }

    /// Open as the collection's writer, creating the index if needed.
    pub fn open_writable(&mut self) -> Result<()> {
        self.close()?;
        let index = self.open_index(true)?;
        let writer: IndexWriter =
            index.writer_with_num_threads(1, WRITER_MEMORY_BUDGET)?;
        self.attach(
            index,
            Some(WriteState {
                writer,
                pending: HashMap::new(),
                dirty: false,
            }),
        )?;
        tracing::debug!(collection = %self.name, "opened writable");
        Ok(())
    }

    /// Open a snapshot of the latest commit. Fails if the collection does
    /// not exist.
    pub fn open_readonly(&mut self) -> Result<()> {
        self.close()?;
        let index = self.open_index(false)?;
        self.attach(index, None)
    }

    /// Move a readonly handle to the latest commit.
    pub fn refresh(&mut self) -> Result<()> {
        let opened = self.opened()?;
        if opened.write.is_some() {
            return Ok(());
        }
        opened.reader.reload()?;
        let config = load_config(&opened.index)?;
        self.config = config;
        Ok(())
    }

    /// Close the handle, committing any uncommitted writes first.
    pub fn close(&mut self) -> Result<()> {
        if self.has_uncommitted_changes() {
            self.commit()?;
        }
        self.opened = None;
        Ok(())
    }

    fn opened(&self) -> Result<&Opened> {
        self.opened.as_ref().ok_or_else(|| {
            Error::InvalidState(format!("collection {:?} is not open", self.name))
        })
    }

    fn write_state(&mut self) -> Result<&mut WriteState> {
        let name = &self.name;
        self.opened
            .as_mut()
            .and_then(|o| o.write.as_mut())
            .ok_or_else(|| {
                Error::InvalidState(format!(
                    "collection {name:?} is not open for writing"
                ))
            })
    }

    pub fn config(&self) -> Result<&CollectionConfig> {
        self.opened()?;
        Ok(&self.config)
    }

    /// Replace the configuration. Documents are re-indexed when the category
    /// setup changed.
    pub fn set_config(&mut self, config: CollectionConfig) -> Result<()> {
        self.write_state()?;
        let categories_changed = config.taxonomies != self.config.taxonomies
            || config.category_fields != self.config.category_fields;
        self.config = config;
        self.write_state()?.dirty = true;
        if categories_changed {
            self.reindex_where(None)?;
        }
        Ok(())
    }

    /// Flush uncommitted writes and the current configuration to disk.
    pub fn commit(&mut self) -> Result<()> {
        let payload = serde_json::to_string(&self.config)?;
        let name = self.name.clone();
        let opened = self.opened.as_mut().ok_or_else(|| {
            Error::InvalidState(format!("collection {name:?} is not open"))
        })?;
        let state = opened.write.as_mut().ok_or_else(|| {
            Error::InvalidState(format!(
                "collection {name:?} is not open for writing"
            ))
        })?;

        let mut prepared = state.writer.prepare_commit()?;
        prepared.set_payload(&payload);
        prepared.commit()?;
        state.pending.clear();
        state.dirty = false;
        opened.reader.reload()?;

        tracing::debug!(collection = %name, "committed");
        Ok(())
    }

    pub fn process_doc(
        &self,
        doc_type: &str,
        doc_id: &str,
        data: Map<String, Value>,
    ) -> Result<ProcessedDoc> {
        document::process_doc(&self.config, doc_type, doc_id, data)
    }

    /// Add or replace a document.
    pub fn update_document(&mut self, doc: ProcessedDoc) -> Result<()> {
        let fields = self.opened()?.fields;
        let state = self.write_state()?;

        let mut tdoc = TantivyDocument::default();
        tdoc.add_text(fields.id_term, &doc.id_term);
        tdoc.add_text(fields.doc_type, &doc.doc_type);
        tdoc.add_text(fields.doc_id, &doc.doc_id);
        tdoc.add_text(
            fields.data,
            serde_json::to_string(&Value::Object(doc.data.clone()))?,
        );
        tdoc.add_text(fields.text, &doc.text);
        for term in &doc.terms {
            tdoc.add_text(fields.terms, term);
        }

        state
            .writer
            .delete_term(Term::from_field_text(fields.id_term, &doc.id_term));
        state.writer.add_document(tdoc)?;
        state.pending.insert(doc.id_term.clone(), Some(doc));
        state.dirty = true;
        Ok(())
    }

    pub fn delete_document(&mut self, doc_type: &str, doc_id: &str) -> Result<()> {
        let fields = self.opened()?.fields;
        let state = self.write_state()?;
        let id_term = document::id_term(doc_type, doc_id);
        state
            .writer
            .delete_term(Term::from_field_text(fields.id_term, &id_term));
        state.pending.insert(id_term, None);
        state.dirty = true;
        Ok(())
    }

    /// Number of documents. Readonly handles count their snapshot; the
    /// writable handle also counts its own uncommitted writes.
    pub fn doc_count(&self) -> Result<u64> {
        let opened = self.opened()?;
        let searcher = opened.reader.searcher();
        let mut count = searcher.num_docs() as i64;

        if let Some(state) = &opened.write {
            for (id_term, entry) in &state.pending {
                let committed = count_term(&searcher, opened.fields.id_term, id_term)? > 0;
                match (entry.is_some(), committed) {
                    (true, false) => count += 1,
                    (false, true) => count -= 1,
                    _ => {}
                }
            }
        }
        Ok(count.max(0) as u64)
    }

    /// Fetch a stored document as `{"data": {...}, "terms": [...]}`.
    pub fn get_document(
        &self,
        doc_type: &str,
        doc_id: &str,
    ) -> Result<Option<Value>> {
        let opened = self.opened()?;
        let id_term = document::id_term(doc_type, doc_id);

        if let Some(state) = &opened.write
            && let Some(entry) = state.pending.get(&id_term)
        {
            return Ok(entry.as_ref().map(|doc| {
                json!({
                    "data": Value::Object(doc.data.clone()),
                    "terms": doc.terms.iter().collect::<Vec<_>>(),
                })
            }));
        }

        let searcher = opened.reader.searcher();
        let query = TermQuery::new(
            Term::from_field_text(opened.fields.id_term, &id_term),
            IndexRecordOption::Basic,
        );
        let top = searcher.search(&query, &TopDocs::with_limit(1))?;
        let Some((_, address)) = top.first() else {
            return Ok(None);
        };
        let stored = read_stored(&searcher, &opened.fields, *address)?;
        Ok(Some(json!({
            "data": stored.data,
            "terms": stored.terms,
        })))
    }

    /// Run a search against the committed state.
    pub fn search(&self, request: &SearchRequest) -> Result<SearchResults> {
        let opened = self.opened()?;
        let searcher = opened.reader.searcher();

        let mut query =
            search::build_query(&request.query, &opened.index, &opened.fields)?;
        if let Some(doc_type) = &request.doc_type {
            query = search::filter_doc_type(query, &opened.fields, doc_type);
        }

        let collector = (
            Count,
            TopDocs::with_limit(request.size.max(1)).and_offset(request.from),
        );
        let (total_matches, top_docs) = searcher.search(&*query, &collector)?;

        let mut items = Vec::with_capacity(top_docs.len());
        for (i, (score, address)) in
            top_docs.into_iter().take(request.size).enumerate()
        {
            let stored = read_stored(&searcher, &opened.fields, address)?;
            items.push(SearchHit {
                rank: request.from + i,
                score,
                doc_type: stored.doc_type,
                doc_id: stored.doc_id,
                data: stored.data,
            });
        }

        Ok(SearchResults {
            from: request.from,
            size: request.size,
            total_matches,
            items,
        })
    }

    pub fn category_add_parent(
        &mut self,
        taxonomy: &str,
        category: &str,
        parent: &str,
    ) -> Result<()> {
        self.write_state()?;
        let modified =
            self.config.category_add_parent(taxonomy, category, parent)?;
        self.after_category_edit(taxonomy, &modified)
    }

    pub fn category_remove_parent(
        &mut self,
        taxonomy: &str,
        category: &str,
        parent: &str,
    ) -> Result<()> {
        self.write_state()?;
        let modified =
            self.config.category_remove_parent(taxonomy, category, parent)?;
        self.after_category_edit(taxonomy, &modified)
    }

    pub fn category_remove(&mut self, taxonomy: &str, category: &str) -> Result<()> {
        self.write_state()?;
        let modified = self.config.category_remove(taxonomy, category)?;
        self.after_category_edit(taxonomy, &modified)
    }

    fn after_category_edit(
        &mut self,
        taxonomy: &str,
        modified: &BTreeSet<String>,
    ) -> Result<()> {
        if modified.is_empty() {
            return Ok(());
        }
        self.write_state()?.dirty = true;

        let terms: Vec<String> = self
            .config
            .fields_for_taxonomy(taxonomy)
            .iter()
            .flat_map(|field| {
                modified.iter().map(move |cat| category_term(field, cat))
            })
            .collect();
        if terms.is_empty() {
            return Ok(());
        }
        self.reindex_where(Some(&terms))
    }

    /// Re-process stored documents so their terms reflect the current
    /// configuration. With `terms`, only documents carrying one of them are
    /// touched.
    fn reindex_where(&mut self, terms: Option<&[String]>) -> Result<()> {
        let opened = self.opened()?;
        let state = opened.write.as_ref().ok_or_else(|| {
            Error::InvalidState("reindex needs a writable collection".into())
        })?;
        let searcher = opened.reader.searcher();
        let fields = opened.fields;

        let query: Box<dyn TantivyQuery> = match terms {
            None => Box::new(tantivy::query::AllQuery),
            Some(terms) => Box::new(BooleanQuery::new(
                terms
                    .iter()
                    .map(|t| {
                        let q: Box<dyn TantivyQuery> = Box::new(TermQuery::new(
                            Term::from_field_text(fields.terms, t),
                            IndexRecordOption::Basic,
                        ));
                        (Occur::Should, q)
                    })
                    .collect(),
            )),
        };

        let mut targets: Vec<(String, String, Map<String, Value>)> = Vec::new();
        let limit = (searcher.num_docs() as usize).max(1);
        for (_, address) in searcher.search(&*query, &TopDocs::with_limit(limit))? {
            let stored = read_stored(&searcher, &fields, address)?;
            let id_term = document::id_term(&stored.doc_type, &stored.doc_id);
            if state.pending.contains_key(&id_term) {
                continue;
            }
            if let Value::Object(data) = stored.data {
                targets.push((stored.doc_type, stored.doc_id, data));
            }
        }
        for doc in state.pending.values().flatten() {
            let matches = match terms {
                None => true,
                Some(terms) => terms.iter().any(|t| doc.terms.contains(t)),
            };
            if matches {
                targets.push((
                    doc.doc_type.clone(),
                    doc.doc_id.clone(),
                    doc.data.clone(),
                ));
            }
        }

        tracing::debug!(
            collection = %self.name,
            documents = targets.len(),
            "re-indexing after configuration change"
        );
        for (doc_type, doc_id, data) in targets {
            let doc = self.process_doc(&doc_type, &doc_id, data)?;
            self.update_document(doc)?;
        }
        Ok(())
    }

    /// Summary used by the info task.
    pub fn info(&self) -> Result<Value> {
        Ok(json!({
            "name": self.name,
            "doc_count": self.doc_count()?,
            "config": self.config()?.to_json(),
        }))
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("writable", &self.is_writable())
            .finish_non_exhaustive()
    }
}

fn resolve_fields(schema: &Schema) -> Result<SchemaFields> {
    let f = |name: &str| {
        schema.get_field(name).map_err(|_| {
            Error::InvalidState(format!("index schema is missing field {name:?}"))
        })
    };
    Ok(SchemaFields {
        id_term: f(fields::ID_TERM)?,
        doc_type: f(fields::DOC_TYPE)?,
        doc_id: f(fields::DOC_ID)?,
        data: f(fields::DATA)?,
        text: f(fields::TEXT)?,
        terms: f(fields::TERMS)?,
    })
}

fn load_config(index: &Index) -> Result<CollectionConfig> {
    match index.load_metas()?.payload {
        Some(payload) if !payload.is_empty() => Ok(serde_json::from_str(&payload)?),
        _ => Ok(CollectionConfig::default()),
    }
}

fn count_term(searcher: &Searcher, field: Field, text: &str) -> Result<usize> {
    let query = TermQuery::new(
        Term::from_field_text(field, text),
        IndexRecordOption::Basic,
    );
    Ok(searcher.search(&query, &Count)?)
}

struct StoredDoc {
    doc_type: String,
    doc_id: String,
    data: Value,
    terms: Vec<String>,
}

fn read_stored(
    searcher: &Searcher,
    fields: &SchemaFields,
    address: DocAddress,
) -> Result<StoredDoc> {
    let doc: TantivyDocument = searcher.doc(address)?;
    let data = extract_text(&doc, fields.data);
    Ok(StoredDoc {
        doc_type: extract_text(&doc, fields.doc_type),
        doc_id: extract_text(&doc, fields.doc_id),
        data: serde_json::from_str(&data)?,
        terms: doc
            .get_all(fields.terms)
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .collect(),
    })
}

fn extract_text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::normalize;

    fn add(coll: &mut Collection, doc_type: &str, id: &str, doc: Value) {
        let data = normalize(doc).unwrap();
        let processed = coll.process_doc(doc_type, id, data).unwrap();
        coll.update_document(processed).unwrap();
    }

    fn writable(tmp: &tempfile::TempDir, name: &str) -> Collection {
        let mut c = Collection::new(name, &tmp.path().join(name));
        c.open_writable().unwrap();
        c
    }

    #[test]
    fn readonly_open_of_missing_collection_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let mut c = Collection::new("ghost", &tmp.path().join("ghost"));
        let err = c.open_readonly().unwrap_err();
        assert_eq!(err.kind(), "not_found");
        assert!(!c.is_open());
    }

    #[test]
    fn closed_collection_rejects_reads() {
        let tmp = tempfile::tempdir().unwrap();
        let mut c = writable(&tmp, "test");
        c.close().unwrap();
        assert_eq!(c.doc_count().unwrap_err().kind(), "invalid_state");
        assert_eq!(c.config().unwrap_err().kind(), "invalid_state");
    }

    #[test]
    fn writes_are_invisible_to_readers_until_commit() {
        let tmp = tempfile::tempdir().unwrap();
        let mut w = writable(&tmp, "test");
        add(&mut w, "default", "1", json!({"text": "Hello world"}));
        assert_eq!(w.doc_count().unwrap(), 1);

        let mut r = Collection::new("test", &tmp.path().join("test"));
        r.open_readonly().unwrap();
        assert_eq!(r.doc_count().unwrap(), 0);

        w.commit().unwrap();
        assert_eq!(r.doc_count().unwrap(), 0);
        r.refresh().unwrap();
        assert_eq!(r.doc_count().unwrap(), 1);
    }

    #[test]
    fn update_replaces_and_delete_removes() {
        let tmp = tempfile::tempdir().unwrap();
        let mut w = writable(&tmp, "test");
        add(&mut w, "default", "1", json!({"text": "old content"}));
        w.commit().unwrap();
        add(&mut w, "default", "1", json!({"text": "new content"}));
        assert_eq!(w.doc_count().unwrap(), 1);
        w.commit().unwrap();

        let doc = w.get_document("default", "1").unwrap().unwrap();
        assert_eq!(doc["data"]["text"], json!(["new content"]));

        w.delete_document("default", "1").unwrap();
        assert_eq!(w.doc_count().unwrap(), 0);
        assert!(w.get_document("default", "1").unwrap().is_none());
        w.commit().unwrap();
        assert_eq!(w.doc_count().unwrap(), 0);
    }

    #[test]
    fn config_is_persisted_in_commits() {
        let tmp = tempfile::tempdir().unwrap();
        let mut w = writable(&tmp, "test");
        let config = CollectionConfig::from_json(json!({
            "pipes": {"default": {"mappings": [{"map": [{"from": "foo", "to": "bar"}]}]}}
        }))
        .unwrap();
        w.set_config(config.clone()).unwrap();
        w.commit().unwrap();
        w.close().unwrap();

        let mut r = Collection::new("test", &tmp.path().join("test"));
        r.open_readonly().unwrap();
        assert_eq!(r.config().unwrap(), &config);
    }

    #[test]
    fn search_text_field_and_type() {
        let tmp = tempfile::tempdir().unwrap();
        let mut w = writable(&tmp, "test");
        add(&mut w, "blurb", "1", json!({"text": "Hello world", "tag": "A tag"}));
        add(&mut w, "blurb", "2", json!({"text": "Goodbye moon"}));
        add(&mut w, "note", "3", json!({"text": "hello again"}));
        w.commit().unwrap();

        let results = w
            .search(&SearchRequest::parse_cli("hello").unwrap())
            .unwrap();
        assert_eq!(results.total_matches, 2);

        let results = w
            .search(
                &SearchRequest::from_json(json!({
                    "query": {"text": "hello"},
                    "doc_type": "blurb"
                }))
                .unwrap(),
            )
            .unwrap();
        assert_eq!(results.total_matches, 1);
        assert_eq!(results.items[0].doc_id, "1");

        let results = w
            .search(
                &SearchRequest::from_json(json!({
                    "query": {"field": {"name": "tag", "value": "A tag"}}
                }))
                .unwrap(),
            )
            .unwrap();
        assert_eq!(results.items.len(), 1);
        assert_eq!(results.items[0].data["tag"], json!(["A tag"]));
    }

    #[test]
    fn paging() {
        let tmp = tempfile::tempdir().unwrap();
        let mut w = writable(&tmp, "test");
        for i in 0..5 {
            add(&mut w, "default", &i.to_string(), json!({"n": i}));
        }
        w.commit().unwrap();

        let results = w
            .search(
                &SearchRequest::from_json(json!({"from": 3, "size": 10}))
                    .unwrap(),
            )
            .unwrap();
        assert_eq!(results.total_matches, 5);
        assert_eq!(results.items.len(), 2);
        assert_eq!(results.items[0].rank, 3);
    }

    #[test]
    fn category_edits_reindex_documents() {
        let tmp = tempfile::tempdir().unwrap();
        let mut w = writable(&tmp, "test");
        w.set_config(
            CollectionConfig::from_json(json!({
                "taxonomies": {"Foo": {}},
                "category_fields": {"foo": "Foo"}
            }))
            .unwrap(),
        )
        .unwrap();
        add(&mut w, "default", "1", json!({"foo": ["world", "child"]}));
        w.commit().unwrap();

        w.category_add_parent("Foo", "child", "parent").unwrap();
        w.category_add_parent("Foo", "parent", "grand").unwrap();
        let doc = w.get_document("default", "1").unwrap().unwrap();
        let terms: Vec<&str> = doc["terms"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|t| t.as_str())
            .collect();
        assert!(terms.contains(&"foo\tAparent"));
        assert!(terms.contains(&"foo\tAgrand"));
        w.commit().unwrap();

        let by_ancestor = SearchRequest::from_json(json!({
            "query": {"category": {
                "field": "foo",
                "category": "grand",
                "include_descendants": true
            }}
        }))
        .unwrap();
        assert_eq!(w.search(&by_ancestor).unwrap().total_matches, 1);

        w.category_remove("Foo", "child").unwrap();
        w.commit().unwrap();
        assert_eq!(w.search(&by_ancestor).unwrap().total_matches, 0);
    }

    #[test]
    fn only_one_writer_per_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let _w = writable(&tmp, "test");
        let mut second = Collection::new("test", &tmp.path().join("test"));
        assert!(second.open_writable().is_err());
    }
}
