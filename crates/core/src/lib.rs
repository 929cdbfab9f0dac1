pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod keywords;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod pool;
pub mod record;
pub mod shard;
pub mod title;
pub mod traits;

#[cfg(test)]
mod testing;

pub use error::{IndexError, IngestError};
pub use extractor::{
    HttpOcrEngine, OcrEndpointConfig, PdftoppmRasterizer, PdftoppmThumbnailer, RasterizedPage,
    TesseractOcr,
};
pub use index::{ArchiveIndex, BulkReport, IndexState};
pub use ingest::{digest_file, discover_pdf_files};
pub use keywords::{HttpEntityExtractor, NerEndpointConfig, NoEntities, TfIdfKeywords};
pub use models::{
    ArchiveConfig, ArchivedDocument, ContentDigest, DocumentRecord, EntityKind, IngestOutcome,
    Keyword, NamedEntity, PageContent, RecordPatch, SearchHit, SearchQuery, WordCloud,
};
pub use normalize::{normalize_arabic, normalize_whitespace, TextCleaner};
pub use orchestrator::{EnrichReport, Ingestor};
pub use pool::{
    BatchProgress, BatchReport, BatchStatus, FailedPdf, IngestJob, TaskOutcome, WorkerPool,
};
pub use record::{
    archived_records, find_duplicate_digests, read_record, record_files, write_record,
    DuplicateGroup,
};
pub use shard::{ShardedStore, SlotAllocation, DEFAULT_SHARD_CAPACITY};
pub use title::{synthesize_title, UNKNOWN_TITLE};
pub use traits::{
    DocumentIndex, EntityExtractor, KeywordExtractor, OcrEngine, PageRasterizer, Thumbnailer,
};
pub use tokio_util::sync::CancellationToken;
