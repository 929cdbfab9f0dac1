use crate::error::{IndexError, IngestError};
use crate::extractor::RasterizedPage;
use crate::models::{ArchivedDocument, ContentDigest, Keyword, NamedEntity};
use std::path::{Path, PathBuf};

pub trait PageRasterizer: Send + Sync {
    fn page_count(&self, pdf: &Path) -> Result<u32, IngestError>;

    /// Renders one 1-based page. `Ok(None)` means the page produced no image.
    fn rasterize(
        &self,
        pdf: &Path,
        page: u32,
        dpi: u32,
    ) -> Result<Option<RasterizedPage>, IngestError>;
}

pub trait OcrEngine: Send + Sync {
    fn text_from_image(&self, image: &Path, language: &str) -> Result<String, IngestError>;
}

pub trait KeywordExtractor: Send + Sync {
    fn top_keywords(&self, text: &str, min_chars: usize, max_count: usize) -> Vec<Keyword>;
}

pub trait EntityExtractor: Send + Sync {
    fn entities(
        &self,
        text: &str,
        max_count: usize,
        min_chars: usize,
    ) -> Result<Vec<NamedEntity>, IngestError>;
}

pub trait Thumbnailer: Send + Sync {
    fn thumbnail(&self, pdf: &Path, target: &Path) -> Result<PathBuf, IngestError>;
}

pub trait DocumentIndex: Send + Sync {
    fn contains_digest(&self, digest: &ContentDigest) -> Result<bool, IndexError>;

    /// Indexes every page of a document not yet known by digest and returns
    /// the number of entries written (zero when the digest was present).
    fn upsert_document(&self, document: &ArchivedDocument) -> Result<usize, IndexError>;
}
