//! The Search Adapter (§2): a thin full-text entry point over message
//! content, not itself a search engine and not a replacement for the
//! Rolling Partition Store. Wraps an in-memory `tantivy` index so callers
//! can route newly stored messages through it and get back uuids to look
//! up against [`crate::storage::MessageStore`] -- this adapter never
//! returns message bodies itself.

use parking_lot::Mutex;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};

use claudelens_core::{CoreError, CoreResult, Message};

/// Per-segment write buffer size. Small on purpose -- this index holds
/// searchable text, not the documents of record.
const WRITER_BUFFER_BYTES: usize = 15_000_000;

/// One hit: the message uuid and its relevance score, in descending
/// score order.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub uuid: String,
    pub session_id: String,
    pub score: f32,
}

struct Fields {
    uuid: Field,
    session_id: Field,
    content: Field,
}

pub struct SearchAdapter {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: Fields,
}

impl SearchAdapter {
    pub fn new() -> CoreResult<Self> {
        let mut builder = Schema::builder();
        let uuid = builder.add_text_field("uuid", STRING | STORED);
        let session_id = builder.add_text_field("session_id", STRING | STORED);
        let content = builder.add_text_field("content", TEXT);
        let schema = builder.build();

        let index = Index::create_in_ram(schema);
        let writer = index
            .writer(WRITER_BUFFER_BYTES)
            .map_err(|e| CoreError::Internal(e.into()))?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| CoreError::Internal(e.into()))?;

        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            fields: Fields { uuid, session_id, content },
        })
    }

    /// Queues one message's already-extracted plain text for indexing. This
    /// adapter is content-shape agnostic: the caller (the ingestion
    /// boundary) is responsible for flattening `Message::content` into
    /// `searchable_text` however it sees fit.
    pub fn index_message(&self, message: &Message, searchable_text: &str) -> CoreResult<()> {
        self.writer
            .lock()
            .add_document(doc!(
                self.fields.uuid => message.uuid.clone(),
                self.fields.session_id => message.session_id.clone(),
                self.fields.content => searchable_text.to_string(),
            ))
            .map_err(|e| CoreError::Internal(e.into()))?;
        Ok(())
    }

    /// Removes a message's indexed text, e.g. after a backfill overwrite.
    pub fn remove_message(&self, uuid: &str) -> CoreResult<()> {
        let term = tantivy::Term::from_field_text(self.fields.uuid, uuid);
        self.writer.lock().delete_term(term);
        Ok(())
    }

    /// Commits pending writes and reloads the reader so they're visible to
    /// the next [`Self::search`] call. Called once per ingest batch rather
    /// than per document, matching the batching discipline the Ingestion
    /// Pipeline already applies to its own rollups.
    pub fn commit(&self) -> CoreResult<()> {
        self.writer.lock().commit().map_err(|e| CoreError::Internal(e.into()))?;
        self.reader.reload().map_err(|e| CoreError::Internal(e.into()))?;
        Ok(())
    }

    /// Full-text query over indexed content, optionally narrowed to a set
    /// of session ids (the Ownership Resolver's filtered scope is applied
    /// by the caller passing that set in, not by this adapter resolving
    /// ownership itself).
    pub fn search(&self, query: &str, session_ids: Option<&[String]>, limit: usize) -> CoreResult<Vec<SearchHit>> {
        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.fields.content]);
        let parsed = parser.parse_query(query).map_err(|e| CoreError::ValidationFailure {
            message: format!("invalid search query: {e}"),
            fields: std::collections::BTreeMap::new(),
        })?;

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(limit))
            .map_err(|e| CoreError::Internal(e.into()))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address).map_err(|e| CoreError::Internal(e.into()))?;
            let uuid = field_value(&doc, self.fields.uuid);
            let session_id = field_value(&doc, self.fields.session_id);
            if let Some(ids) = session_ids {
                if !ids.contains(&session_id) {
                    continue;
                }
            }
            hits.push(SearchHit { uuid, session_id, score });
        }
        Ok(hits)
    }
}

fn field_value(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
