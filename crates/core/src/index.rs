//! Incremental full-text index over the archive, keyed by content digest.

use crate::error::IndexError;
use crate::models::{ArchivedDocument, ContentDigest, DocumentRecord, SearchHit, SearchQuery};
use crate::normalize::normalize_arabic;
use crate::record::archived_records;
use crate::traits::DocumentIndex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tantivy::collector::{Count, TopDocs};
use tantivy::query::{QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, Value, INDEXED, STORED, STRING, TEXT};
use tantivy::{
    doc, Index, IndexReader, IndexWriter, ReloadPolicy, SnippetGenerator, TantivyDocument, Term,
};
use tracing::{debug, info, warn};

const WRITER_HEAP_BYTES: usize = 50_000_000;
const EXCERPT_CHARS: usize = 300;
/// Upper bound on page hits collected before deduplicating by PDF.
const MAX_CANDIDATES: usize = 10_000;

/// How the on-disk index was found when it was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// No index existed; a fresh one was created.
    Created,
    Opened,
    /// The existing index was unreadable and has been recreated empty.
    Reset,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkReport {
    pub indexed: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy)]
struct IndexFields {
    title: Field,
    content: Field,
    path: Field,
    pdf: Field,
    image: Field,
    sha512: Field,
    page: Field,
}

impl IndexFields {
    fn schema() -> Schema {
        let mut builder = Schema::builder();
        builder.add_text_field("title", TEXT | STORED);
        builder.add_text_field("content", TEXT | STORED);
        builder.add_text_field("path", STRING | STORED);
        builder.add_text_field("pdf", STRING | STORED);
        builder.add_text_field("image", STRING | STORED);
        builder.add_text_field("sha512", STRING | STORED);
        builder.add_u64_field("page", INDEXED | STORED);
        builder.build()
    }

    fn resolve(schema: &Schema) -> Result<Self, IndexError> {
        let field = |name: &str| {
            schema
                .get_field(name)
                .map_err(|_| IndexError::Schema(format!("missing field `{name}`")))
        };
        Ok(Self {
            title: field("title")?,
            content: field("content")?,
            path: field("path")?,
            pdf: field("pdf")?,
            image: field("image")?,
            sha512: field("sha512")?,
            page: field("page")?,
        })
    }
}

pub struct ArchiveIndex {
    dir: PathBuf,
    index: Index,
    reader: IndexReader,
    fields: IndexFields,
    writer: Mutex<Option<IndexWriter>>,
    state: IndexState,
}

impl std::fmt::Debug for ArchiveIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveIndex")
            .field("dir", &self.dir)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ArchiveIndex {
    /// Opens the index in `dir`, creating it when absent and recreating it
    /// empty when the existing one cannot be opened.
    pub fn open_or_repair(dir: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let dir = dir.into();

        if !dir.join("meta.json").exists() {
            return Self::create(dir, IndexState::Created);
        }

        match Self::open_existing(&dir) {
            Ok(index) => Ok(index),
            Err(error) => {
                warn!(index = %dir.display(), %error, "index unreadable, rebuilding empty");
                fs::remove_dir_all(&dir)?;
                Self::create(dir, IndexState::Reset)
            }
        }
    }

    fn open_existing(dir: &Path) -> Result<Self, IndexError> {
        let index = Index::open_in_dir(dir)?;
        let fields = IndexFields::resolve(&index.schema())?;
        let reader = Self::build_reader(&index)?;
        info!(index = %dir.display(), docs = reader.searcher().num_docs(), "opened index");

        Ok(Self {
            dir: dir.to_path_buf(),
            index,
            reader,
            fields,
            writer: Mutex::new(None),
            state: IndexState::Opened,
        })
    }

    fn create(dir: PathBuf, state: IndexState) -> Result<Self, IndexError> {
        fs::create_dir_all(&dir)?;
        let index = Index::create_in_dir(&dir, IndexFields::schema())?;
        let fields = IndexFields::resolve(&index.schema())?;
        let reader = Self::build_reader(&index)?;
        info!(index = %dir.display(), ?state, "created index");

        Ok(Self {
            dir,
            index,
            reader,
            fields,
            writer: Mutex::new(None),
            state,
        })
    }

    fn build_reader(index: &Index) -> Result<IndexReader, IndexError> {
        Ok(index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?)
    }

    pub fn state(&self) -> IndexState {
        self.state
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of page entries visible to readers.
    pub fn num_entries(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    fn ensure_writer<'a>(
        &self,
        guard: &'a mut Option<IndexWriter>,
    ) -> Result<&'a mut IndexWriter, IndexError> {
        let writer = match guard.take() {
            Some(writer) => writer,
            None => self.index.writer_with_num_threads(1, WRITER_HEAP_BYTES)?,
        };
        Ok(guard.insert(writer))
    }

    /// Drops whatever was indexed under the document's PDF path, then adds
    /// its pages. A PDF path never carries entries for two digests.
    fn replace_entries(
        &self,
        writer: &IndexWriter,
        document: &ArchivedDocument,
    ) -> Result<usize, IndexError> {
        writer.delete_term(Term::from_field_text(
            self.fields.pdf,
            &document.pdf_path.to_string_lossy(),
        ));
        self.add_entries(writer, document)
    }

    fn add_entries(
        &self,
        writer: &IndexWriter,
        document: &ArchivedDocument,
    ) -> Result<usize, IndexError> {
        let title = normalize_arabic(&document.title());
        let path = document.record_path.to_string_lossy().to_string();
        let pdf = document.pdf_path.to_string_lossy().to_string();
        let image = document
            .image_path
            .as_ref()
            .map(|image| image.to_string_lossy().to_string())
            .unwrap_or_default();
        let digest = document.digest().as_str();

        let mut added = 0;
        for page in &document.record.contents {
            if page.text.trim().is_empty() {
                continue;
            }
            writer.add_document(doc!(
                self.fields.title => title.as_str(),
                self.fields.content => normalize_arabic(&page.text),
                self.fields.path => path.as_str(),
                self.fields.pdf => pdf.as_str(),
                self.fields.image => image.as_str(),
                self.fields.sha512 => digest,
                self.fields.page => u64::from(page.page),
            ))?;
            added += 1;
        }

        if added == 0 {
            writer.add_document(doc!(
                self.fields.title => title.as_str(),
                self.fields.content => "",
                self.fields.path => path.as_str(),
                self.fields.pdf => pdf.as_str(),
                self.fields.image => image.as_str(),
                self.fields.sha512 => digest,
                self.fields.page => 0u64,
            ))?;
            added = 1;
        }

        Ok(added)
    }

    /// Re-indexes an archive from its persisted records in one commit.
    ///
    /// `on_progress` receives `(processed, total)` after every record.
    pub fn index_archive(
        &self,
        root: &Path,
        mut on_progress: impl FnMut(usize, usize),
    ) -> Result<BulkReport, IndexError> {
        let records = archived_records(root);
        let total = records.len();
        let mut report = BulkReport::default();
        let mut seen = HashSet::new();

        let mut guard = self.writer.lock().map_err(|_| IndexError::LockPoisoned)?;
        let writer = self.ensure_writer(&mut guard)?;

        for (position, (record_path, pdf_path)) in records.into_iter().enumerate() {
            match load_record(&record_path) {
                Ok(record) if record.sha512.is_empty() => {
                    debug!(record = %record_path.display(), "record without digest");
                    report.skipped += 1;
                }
                Ok(record) => {
                    let digest = record.sha512.clone();
                    if !seen.insert(digest.clone()) || self.contains_digest(&digest)? {
                        report.skipped += 1;
                    } else {
                        let image = record_path.with_extension("jpg");
                        let document = ArchivedDocument {
                            record,
                            record_path: record_path.clone(),
                            pdf_path,
                            image_path: image.is_file().then_some(image),
                        };
                        self.replace_entries(writer, &document)?;
                        report.indexed += 1;
                    }
                }
                Err(error) => {
                    warn!(record = %record_path.display(), %error, "unreadable record");
                    report.failed += 1;
                }
            }
            on_progress(position + 1, total);
        }

        writer.commit()?;
        drop(guard);
        self.reader.reload()?;

        info!(
            root = %root.display(),
            indexed = report.indexed,
            skipped = report.skipped,
            failed = report.failed,
            "bulk index finished"
        );
        Ok(report)
    }

    pub fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, IndexError> {
        let text = normalize_arabic(query.text.trim());
        if text.is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }

        let mut parser =
            QueryParser::for_index(&self.index, vec![self.fields.title, self.fields.content]);
        if !query.match_any {
            parser.set_conjunction_by_default();
        }
        let parsed = parser.parse_query(&text)?;

        let searcher = self.reader.searcher();
        // Several pages of one PDF can match; fetch extra so deduplication
        // still fills the requested limit.
        let candidates = query.limit.saturating_mul(5).min(MAX_CANDIDATES);
        let top_docs = searcher.search(&*parsed, &TopDocs::with_limit(candidates))?;

        let mut snippets = SnippetGenerator::create(&searcher, &*parsed, self.fields.content)?;
        snippets.set_max_num_chars(EXCERPT_CHARS);

        let mut seen_pdfs = HashSet::new();
        let mut hits = Vec::new();
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            let pdf_path = self.text_of(&doc, self.fields.pdf);
            if !seen_pdfs.insert(pdf_path.clone()) {
                continue;
            }

            let highlighted = snippets.snippet_from_doc(&doc).to_html();
            let excerpt = if highlighted.trim().is_empty() {
                self.text_of(&doc, self.fields.content)
                    .chars()
                    .take(EXCERPT_CHARS)
                    .collect()
            } else {
                highlighted
            };
            let image = self.text_of(&doc, self.fields.image);

            hits.push(SearchHit {
                title: self.text_of(&doc, self.fields.title),
                pdf_path,
                page: doc
                    .get_first(self.fields.page)
                    .and_then(|value| value.as_u64())
                    .unwrap_or(0),
                image_path: (!image.is_empty()).then_some(image),
                excerpt,
                score,
            });
            if hits.len() == query.limit {
                break;
            }
        }

        debug!(query = %text, hits = hits.len(), "search finished");
        Ok(hits)
    }

    fn text_of(&self, doc: &TantivyDocument, field: Field) -> String {
        doc.get_first(field)
            .and_then(|value| value.as_str())
            .unwrap_or("")
            .to_string()
    }
}

impl DocumentIndex for ArchiveIndex {
    fn contains_digest(&self, digest: &ContentDigest) -> Result<bool, IndexError> {
        let query = TermQuery::new(
            Term::from_field_text(self.fields.sha512, digest.as_str()),
            IndexRecordOption::Basic,
        );
        Ok(self.reader.searcher().search(&query, &Count)? > 0)
    }

    fn upsert_document(&self, document: &ArchivedDocument) -> Result<usize, IndexError> {
        let mut guard = self.writer.lock().map_err(|_| IndexError::LockPoisoned)?;

        if self.contains_digest(document.digest())? {
            debug!(digest = %document.digest(), "already indexed");
            return Ok(0);
        }

        let writer = self.ensure_writer(&mut guard)?;
        let added = self.replace_entries(writer, document)?;
        writer.commit()?;
        self.reader.reload()?;

        info!(
            pdf = %document.pdf_path.display(),
            digest = %document.digest(),
            entries = added,
            "indexed document"
        );
        Ok(added)
    }
}

fn load_record(path: &Path) -> Result<DocumentRecord, IndexError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}
