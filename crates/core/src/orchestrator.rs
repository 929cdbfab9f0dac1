use crate::error::IngestError;
use crate::extractor::{PdftoppmRasterizer, PdftoppmThumbnailer, TesseractOcr};
use crate::ingest::digest_file;
use crate::keywords::{NoEntities, TfIdfKeywords};
use crate::models::{
    ArchiveConfig, ArchivedDocument, ContentDigest, DocumentRecord, IngestOutcome, Keyword,
    NamedEntity, PageContent, RecordPatch,
};
use crate::normalize::TextCleaner;
use crate::record::{archived_records, read_record, write_record};
use crate::shard::{move_file, ArchivedSlot, ShardedStore};
use crate::title::synthesize_title;
use crate::traits::{
    DocumentIndex, EntityExtractor, KeywordExtractor, OcrEngine, PageRasterizer, Thumbnailer,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use tracing::{debug, error, info, warn};

/// Drives one PDF from the inbox into the archive and the index.
///
/// The index is consulted before anything touches the file. Digests
/// currently being processed are tracked: a second copy of the same bytes
/// waits until the first copy settles, then checks the index again.
pub struct Ingestor {
    config: ArchiveConfig,
    store: ShardedStore,
    index: Arc<dyn DocumentIndex>,
    rasterizer: Box<dyn PageRasterizer>,
    ocr: Box<dyn OcrEngine>,
    cleaner: TextCleaner,
    keywords: Box<dyn KeywordExtractor>,
    entities: Box<dyn EntityExtractor>,
    thumbnailer: Option<Box<dyn Thumbnailer>>,
    in_flight: InFlightDigests,
}

/// Counts from [`Ingestor::enrich_archive`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichReport {
    pub enriched: usize,
    pub complete: usize,
    pub failed: usize,
}

impl Ingestor {
    pub fn new(config: ArchiveConfig, index: Arc<dyn DocumentIndex>) -> Result<Self, IngestError> {
        let store = ShardedStore::new(&config.archive_dir, config.shard_capacity)?;
        let cleaner = TextCleaner::new(config.min_word_chars, config.max_word_chars)?
            .with_word_lists(&config.stop_word_files)?;
        let thumbnailer = PdftoppmThumbnailer {
            width: config.thumbnail_width,
            ..PdftoppmThumbnailer::default()
        };

        Ok(Self {
            store,
            index,
            rasterizer: Box::new(PdftoppmRasterizer::default()),
            ocr: Box::new(TesseractOcr::default()),
            cleaner,
            keywords: Box::new(TfIdfKeywords::new()?),
            entities: Box::new(NoEntities),
            thumbnailer: Some(Box::new(thumbnailer)),
            in_flight: InFlightDigests::default(),
            config,
        })
    }

    pub fn with_rasterizer(mut self, rasterizer: impl PageRasterizer + 'static) -> Self {
        self.rasterizer = Box::new(rasterizer);
        self
    }

    pub fn with_ocr(mut self, ocr: impl OcrEngine + 'static) -> Self {
        self.ocr = Box::new(ocr);
        self
    }

    pub fn with_keywords(mut self, keywords: impl KeywordExtractor + 'static) -> Self {
        self.keywords = Box::new(keywords);
        self
    }

    pub fn with_entities(mut self, entities: impl EntityExtractor + 'static) -> Self {
        self.entities = Box::new(entities);
        self
    }

    /// `None` disables thumbnails.
    pub fn with_thumbnailer(mut self, thumbnailer: Option<Box<dyn Thumbnailer>>) -> Self {
        self.thumbnailer = thumbnailer;
        self
    }

    pub fn store(&self) -> &ShardedStore {
        &self.store
    }

    pub fn ingest(&self, source: &Path) -> Result<IngestOutcome, IngestError> {
        let digest = digest_file(source)?;

        let _claim = self.claim_digest(&digest)?;

        if self.index.contains_digest(&digest)? {
            info!(source = %source.display(), %digest, "duplicate, leaving source in place");
            return Ok(IngestOutcome::Duplicate { digest });
        }

        let (contents, first_page_raw) = self.read_pages(source)?;

        let slot = self.store.claim(source)?;
        let record_path = slot.allocation.file("json");
        let mut record = DocumentRecord::new(digest, contents);
        if let Err(error) = write_record(&record_path, &record) {
            self.release_slot(&slot, source);
            return Err(error);
        }

        let patch = self.enrich(&record, &first_page_raw);
        record.merge(patch);
        write_record(&record_path, &record)?;

        let image_path = self.thumbnail(&slot);
        let document = ArchivedDocument {
            record,
            record_path,
            pdf_path: slot.pdf_path,
            image_path,
        };

        let entries = self.index.upsert_document(&document)?;
        info!(
            source = %source.display(),
            pdf = %document.pdf_path.display(),
            title = %document.title(),
            entries,
            "archived"
        );

        Ok(IngestOutcome::Archived(Box::new(document)))
    }

    /// Blocks while another worker holds `digest`, then takes it. The claim
    /// is released when the returned guard drops.
    fn claim_digest(&self, digest: &ContentDigest) -> Result<InFlight<'_>, IngestError> {
        let mut claimed = self
            .in_flight
            .claimed
            .lock()
            .map_err(|_| IngestError::Poisoned("in-flight digests"))?;

        while claimed.contains(digest) {
            debug!(%digest, "same content in flight, waiting");
            claimed = self
                .in_flight
                .released
                .wait(claimed)
                .map_err(|_| IngestError::Poisoned("in-flight digests"))?;
        }
        claimed.insert(digest.clone());

        Ok(InFlight {
            digests: &self.in_flight,
            digest: digest.clone(),
        })
    }

    /// OCRs every page in order. Returns the cleaned pages and the raw text
    /// of page 1, which still has the line breaks the title heuristic needs.
    fn read_pages(&self, source: &Path) -> Result<(Vec<PageContent>, String), IngestError> {
        let page_count = self.rasterizer.page_count(source)?;
        let mut contents = Vec::with_capacity(page_count as usize);
        let mut first_page_raw = String::new();

        for page in 1..=page_count {
            let raw = match self.rasterizer.rasterize(source, page, self.config.dpi)? {
                Some(image) => self
                    .ocr
                    .text_from_image(image.path(), &self.config.ocr_language)?,
                None => {
                    warn!(source = %source.display(), page, "page produced no image");
                    String::new()
                }
            };

            if page == 1 {
                first_page_raw = raw.clone();
            }
            contents.push(PageContent {
                page,
                text: self.cleaner.clean(&raw),
            });
            debug!(source = %source.display(), page, page_count, "page read");
        }

        Ok((contents, first_page_raw))
    }

    fn enrich(&self, record: &DocumentRecord, first_page_raw: &str) -> RecordPatch {
        let keywords = self.keywords_for(record);
        let entities = self.entities_for(record);

        RecordPatch {
            book_name: Some(synthesize_title(first_page_raw, &keywords, &entities)),
            wordcloud_data: Some(keywords),
            book_info: Some(entities),
        }
    }

    /// Fields a stored record is missing. Fields already present are never
    /// recomputed; the title falls back to the cleaned first page because
    /// raw OCR lines are not persisted.
    fn backfill(&self, record: &DocumentRecord) -> RecordPatch {
        let mut patch = RecordPatch::default();
        if record.wordcloud_data.is_none() {
            patch.wordcloud_data = Some(self.keywords_for(record));
        }
        if record.book_info.is_none() {
            patch.book_info = Some(self.entities_for(record));
        }

        if record.book_name.is_none() {
            let keywords = patch
                .wordcloud_data
                .clone()
                .unwrap_or_else(|| record.ranked_keywords());
            let entities = patch
                .book_info
                .as_ref()
                .or(record.book_info.as_ref())
                .cloned()
                .unwrap_or_default();
            let first_page = record
                .contents
                .first()
                .map(|page| page.text.as_str())
                .unwrap_or("");
            patch.book_name = Some(synthesize_title(first_page, &keywords, &entities));
        }

        patch
    }

    fn keywords_for(&self, record: &DocumentRecord) -> Vec<Keyword> {
        self.keywords.top_keywords(
            &record.joined_text(usize::MAX),
            self.config.keyword_min_chars,
            self.config.keyword_count,
        )
    }

    fn entities_for(&self, record: &DocumentRecord) -> Vec<NamedEntity> {
        match self.entities.entities(
            &record.joined_text(self.config.entity_pages),
            self.config.entity_count,
            self.config.entity_min_chars,
        ) {
            Ok(entities) => entities,
            Err(error) => {
                warn!(digest = %record.sha512, %error, "entity extraction failed");
                Vec::new()
            }
        }
    }

    /// Adds keywords, entities and a title to every archived record that
    /// lacks them, rewriting each changed record in place.
    ///
    /// `on_progress` receives `(processed, total)` after every record.
    pub fn enrich_archive(
        &self,
        root: &Path,
        mut on_progress: impl FnMut(usize, usize),
    ) -> EnrichReport {
        let records = archived_records(root);
        let total = records.len();
        let mut report = EnrichReport::default();

        for (position, (record_path, _)) in records.into_iter().enumerate() {
            match self.enrich_record(&record_path) {
                Ok(true) => report.enriched += 1,
                Ok(false) => report.complete += 1,
                Err(error) => {
                    warn!(record = %record_path.display(), %error, "record not enriched");
                    report.failed += 1;
                }
            }
            on_progress(position + 1, total);
        }

        info!(
            root = %root.display(),
            enriched = report.enriched,
            complete = report.complete,
            failed = report.failed,
            "archive enrichment finished"
        );
        report
    }

    fn enrich_record(&self, record_path: &Path) -> Result<bool, IngestError> {
        let mut record = read_record(record_path)?;
        let patch = self.backfill(&record);
        if patch.is_empty() {
            return Ok(false);
        }

        record.merge(patch);
        write_record(record_path, &record)?;
        debug!(record = %record_path.display(), "record enriched");
        Ok(true)
    }

    fn thumbnail(&self, slot: &ArchivedSlot) -> Option<PathBuf> {
        let thumbnailer = self.thumbnailer.as_ref()?;
        let target = slot.allocation.file("jpg");
        match thumbnailer.thumbnail(&slot.pdf_path, &target) {
            Ok(image) => Some(image),
            Err(error) => {
                warn!(pdf = %slot.pdf_path.display(), %error, "thumbnail skipped");
                None
            }
        }
    }

    /// Puts the PDF back where it came from after its record could not be
    /// written, so the file can be retried.
    fn release_slot(&self, slot: &ArchivedSlot, source: &Path) {
        match move_file(&slot.pdf_path, source) {
            Ok(()) => warn!(
                source = %source.display(),
                "record write failed, source restored"
            ),
            Err(restore_error) => error!(
                source = %source.display(),
                pdf = %slot.pdf_path.display(),
                %restore_error,
                "record write failed and the pdf could not be moved back"
            ),
        }
    }
}

#[derive(Default)]
struct InFlightDigests {
    claimed: Mutex<HashSet<ContentDigest>>,
    released: Condvar,
}

struct InFlight<'a> {
    digests: &'a InFlightDigests,
    digest: ContentDigest,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut claimed) = self.digests.claimed.lock() {
            claimed.remove(&self.digest);
        }
        self.digests.released.notify_all();
    }
}
