//! In-memory collaborators shared by the orchestrator and pool tests.

use crate::error::{IndexError, IngestError};
use crate::extractor::RasterizedPage;
use crate::models::{ArchivedDocument, ContentDigest};
use crate::traits::{DocumentIndex, OcrEngine, PageRasterizer, Thumbnailer};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Writes each page's "OCR text" into the page image itself so the fake
/// OCR engine can read it back.
pub struct FakeRasterizer {
    pub pages: u32,
    pub blank_pages: HashSet<u32>,
    pub scratch: PathBuf,
    counter: AtomicUsize,
}

impl FakeRasterizer {
    pub fn new(pages: u32, scratch: &Path) -> Self {
        Self {
            pages,
            blank_pages: HashSet::new(),
            scratch: scratch.to_path_buf(),
            counter: AtomicUsize::new(0),
        }
    }

    pub fn with_blank_page(mut self, page: u32) -> Self {
        self.blank_pages.insert(page);
        self
    }
}

fn page_text(page: u32) -> String {
    if page == 1 {
        "شرح قانون العمل الجديد\nمسؤولية صاحب العمل عن إصابات العمال".to_string()
    } else {
        format!("الفصل رقم {page}\nأحكام العقد والتزامات العامل تجاه صاحب العمل")
    }
}

impl PageRasterizer for FakeRasterizer {
    fn page_count(&self, _pdf: &Path) -> Result<u32, IngestError> {
        Ok(self.pages)
    }

    fn rasterize(
        &self,
        _pdf: &Path,
        page: u32,
        _dpi: u32,
    ) -> Result<Option<RasterizedPage>, IngestError> {
        if self.blank_pages.contains(&page) {
            return Ok(None);
        }

        let serial = self.counter.fetch_add(1, Ordering::SeqCst);
        let image = self.scratch.join(format!("page-{serial}.png"));
        fs::write(&image, page_text(page))?;
        Ok(Some(RasterizedPage::from_file(image)))
    }
}

/// Returns the image file's content, failing on a chosen call number.
#[derive(Default)]
pub struct FakeOcr {
    pub fail_on_call: Option<usize>,
    calls: AtomicUsize,
}

impl FakeOcr {
    pub fn failing_on_call(call: usize) -> Self {
        Self {
            fail_on_call: Some(call),
            calls: AtomicUsize::new(0),
        }
    }
}

impl OcrEngine for FakeOcr {
    fn text_from_image(&self, image: &Path, _language: &str) -> Result<String, IngestError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on_call == Some(call) {
            return Err(IngestError::OcrFailed(format!(
                "engine crashed on {}",
                image.display()
            )));
        }
        Ok(fs::read_to_string(image)?)
    }
}

pub struct FakeThumbnailer;

impl Thumbnailer for FakeThumbnailer {
    fn thumbnail(&self, _pdf: &Path, target: &Path) -> Result<PathBuf, IngestError> {
        fs::write(target, b"jpeg")?;
        Ok(target.to_path_buf())
    }
}

#[derive(Default)]
pub struct FakeDocumentIndex {
    pub known: Mutex<HashSet<ContentDigest>>,
}

impl DocumentIndex for FakeDocumentIndex {
    fn contains_digest(&self, digest: &ContentDigest) -> Result<bool, IndexError> {
        let known = self.known.lock().map_err(|_| IndexError::LockPoisoned)?;
        Ok(known.contains(digest))
    }

    fn upsert_document(&self, document: &ArchivedDocument) -> Result<usize, IndexError> {
        let mut known = self.known.lock().map_err(|_| IndexError::LockPoisoned)?;
        if !known.insert(document.digest().clone()) {
            return Ok(0);
        }
        Ok(document.record.contents.len().max(1))
    }
}

/// Every `.pdf` file under `root`, sorted.
pub fn pdfs_under(root: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "pdf"))
        .collect();
    found.sort();
    found
}
