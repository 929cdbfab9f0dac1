use crate::error::IngestError;
use crate::traits::{OcrEngine, PageRasterizer, Thumbnailer};
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::Document;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;
use tracing::{debug, warn};

/// A rendered page image. The file is deleted when this value is dropped,
/// whichever way the page's processing ends.
#[derive(Debug)]
pub struct RasterizedPage {
    image: PathBuf,
    workspace: Option<TempDir>,
}

impl RasterizedPage {
    pub fn in_workspace(workspace: TempDir, image: PathBuf) -> Self {
        Self {
            image,
            workspace: Some(workspace),
        }
    }

    /// Takes ownership of a standalone image file.
    pub fn from_file(image: PathBuf) -> Self {
        Self {
            image,
            workspace: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.image
    }
}

impl Drop for RasterizedPage {
    fn drop(&mut self) {
        if self.workspace.is_none() {
            if let Err(error) = fs::remove_file(&self.image) {
                debug!(image = %self.image.display(), %error, "rasterized page already gone");
            }
        }
    }
}

fn run_tool(binary: &Path, command: &mut Command) -> Result<Output, IngestError> {
    command.output().map_err(|error| {
        IngestError::OcrFailed(format!(
            "failed to run {} (is it installed?): {error}",
            binary.display()
        ))
    })
}

/// Counts pages with lopdf and renders them with poppler's `pdftoppm`.
#[derive(Debug, Clone)]
pub struct PdftoppmRasterizer {
    pub binary: PathBuf,
    pub temp_root: Option<PathBuf>,
}

impl Default for PdftoppmRasterizer {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("pdftoppm"),
            temp_root: None,
        }
    }
}

impl PdftoppmRasterizer {
    fn workspace(&self) -> Result<TempDir, IngestError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("page-");
        let workspace = match &self.temp_root {
            Some(root) => {
                fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(workspace)
    }
}

impl PageRasterizer for PdftoppmRasterizer {
    fn page_count(&self, pdf: &Path) -> Result<u32, IngestError> {
        let document =
            Document::load(pdf).map_err(|error| IngestError::PdfParse(error.to_string()))?;
        let pages = document.get_pages().len() as u32;

        if pages == 0 {
            return Err(IngestError::PdfParse(format!(
                "pdf has no pages: {}",
                pdf.display()
            )));
        }

        Ok(pages)
    }

    fn rasterize(
        &self,
        pdf: &Path,
        page: u32,
        dpi: u32,
    ) -> Result<Option<RasterizedPage>, IngestError> {
        let workspace = self.workspace()?;
        let prefix = workspace.path().join("page");
        let page_arg = page.to_string();

        let output = run_tool(
            &self.binary,
            Command::new(&self.binary)
                .args(["-r", dpi.to_string().as_str()])
                .args(["-f", page_arg.as_str(), "-l", page_arg.as_str()])
                .args(["-gray", "-png", "-singlefile"])
                .arg(pdf)
                .arg(&prefix),
        )?;

        if !output.status.success() {
            warn!(
                pdf = %pdf.display(),
                page,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "pdftoppm rendered nothing"
            );
            return Ok(None);
        }

        let image = prefix.with_extension("png");
        if !image.is_file() {
            return Ok(None);
        }

        Ok(Some(RasterizedPage::in_workspace(workspace, image)))
    }
}

#[derive(Debug, Clone)]
pub struct TesseractOcr {
    pub binary: PathBuf,
    pub page_segmentation_mode: u8,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            page_segmentation_mode: 6,
        }
    }
}

impl OcrEngine for TesseractOcr {
    fn text_from_image(&self, image: &Path, language: &str) -> Result<String, IngestError> {
        let output = run_tool(
            &self.binary,
            Command::new(&self.binary)
                .arg(image)
                .arg("stdout")
                .args(["-l", language])
                .args(["--psm", self.page_segmentation_mode.to_string().as_str()]),
        )?;

        if !output.status.success() {
            return Err(IngestError::OcrFailed(format!(
                "tesseract exited with {} on {}: {}",
                output.status,
                image.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[derive(Debug, Clone)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct LlmOcrRequest<'a> {
    image_base64: String,
    language: &'a str,
    source_path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrResponse {
    #[serde(default)]
    pages: Option<Vec<LlmOcrPage>>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrPage {
    #[serde(default)]
    text: Option<String>,
}

/// OCR through a multimodal HTTP endpoint that accepts a base64 page image.
#[derive(Debug, Clone)]
pub struct HttpOcrEngine {
    config: OcrEndpointConfig,
}

impl HttpOcrEngine {
    pub fn new(config: OcrEndpointConfig) -> Self {
        Self { config }
    }
}

impl OcrEngine for HttpOcrEngine {
    fn text_from_image(&self, image: &Path, language: &str) -> Result<String, IngestError> {
        let payload = LlmOcrRequest {
            image_base64: STANDARD.encode(fs::read(image)?),
            language,
            source_path: image.to_string_lossy().to_string(),
        };

        let mut request = Client::new()
            .post(&self.config.endpoint)
            .header("content-type", "application/json")
            .json(&payload);

        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send()?;

        if !response.status().is_success() {
            return Err(IngestError::OcrFailed(format!(
                "OCR request to {} returned {}",
                self.config.endpoint,
                response.status()
            )));
        }

        let payload: LlmOcrResponse = response.json()?;
        payload_to_text(&payload, image)
    }
}

fn payload_to_text(payload: &LlmOcrResponse, image: &Path) -> Result<String, IngestError> {
    if let Some(listed) = &payload.pages {
        let joined = listed
            .iter()
            .filter_map(|page| page.text.as_deref())
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        if !joined.is_empty() {
            return Ok(joined);
        }
    }

    if let Some(raw_text) = &payload.text {
        return Ok(raw_text.trim().to_string());
    }

    Err(IngestError::OcrFailed(format!(
        "OCR response carried no text field for {}",
        image.display()
    )))
}

/// Renders page 1 as a JPEG of fixed width with `pdftoppm`.
#[derive(Debug, Clone)]
pub struct PdftoppmThumbnailer {
    pub binary: PathBuf,
    pub width: u32,
}

impl Default for PdftoppmThumbnailer {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("pdftoppm"),
            width: 600,
        }
    }
}

impl Thumbnailer for PdftoppmThumbnailer {
    fn thumbnail(&self, pdf: &Path, target: &Path) -> Result<PathBuf, IngestError> {
        let prefix = target.with_extension("");
        let output = run_tool(
            &self.binary,
            Command::new(&self.binary)
                .args(["-jpeg", "-jpegopt", "quality=100"])
                .args(["-f", "1", "-l", "1"])
                .args(["-scale-to-x", self.width.to_string().as_str()])
                .args(["-scale-to-y", "-1"])
                .arg("-singlefile")
                .arg(pdf)
                .arg(&prefix),
        )?;

        let produced = prefix.with_extension("jpg");
        if !output.status.success() || !produced.is_file() {
            return Err(IngestError::PdfParse(format!(
                "no thumbnail rendered for {}: {}",
                pdf.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        if produced != target {
            fs::rename(&produced, target)?;
        }

        Ok(target.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ocr_payload_with_pages_skips_blank_entries() -> Result<(), IngestError> {
        let response = LlmOcrResponse {
            pages: Some(vec![
                LlmOcrPage {
                    text: Some("  ".to_string()),
                },
                LlmOcrPage {
                    text: Some("الصفحة الأولى".to_string()),
                },
            ]),
            text: None,
        };

        let text = payload_to_text(&response, Path::new("page.png"))?;
        assert_eq!(text, "الصفحة الأولى");
        Ok(())
    }

    #[test]
    fn ocr_payload_falls_back_to_text_field() -> Result<(), IngestError> {
        let response = LlmOcrResponse {
            pages: Some(Vec::new()),
            text: Some(" نص كامل \n".to_string()),
        };

        assert_eq!(payload_to_text(&response, Path::new("page.png"))?, "نص كامل");
        Ok(())
    }

    #[test]
    fn ocr_payload_without_text_is_an_error() {
        let response = LlmOcrResponse {
            pages: None,
            text: None,
        };
        assert!(matches!(
            payload_to_text(&response, Path::new("page.png")),
            Err(IngestError::OcrFailed(_))
        ));
    }

    #[test]
    fn standalone_page_image_is_removed_on_drop() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let image = dir.path().join("page.png");
        fs::write(&image, b"png")?;

        drop(RasterizedPage::from_file(image.clone()));
        assert!(!image.exists());
        Ok(())
    }

    #[test]
    fn workspace_page_image_is_removed_on_drop() -> Result<(), Box<dyn std::error::Error>> {
        let workspace = tempfile::tempdir()?;
        let root = workspace.path().to_path_buf();
        let image = root.join("page.png");
        fs::write(&image, b"png")?;

        drop(RasterizedPage::in_workspace(workspace, image));
        assert!(!root.exists());
        Ok(())
    }

    #[test]
    fn unparseable_pdf_has_no_page_count() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let pdf = dir.path().join("broken.pdf");
        fs::write(&pdf, b"%PDF-1.4\n%broken")?;

        let result = PdftoppmRasterizer::default().page_count(&pdf);
        assert!(matches!(result, Err(IngestError::PdfParse(_))));
        Ok(())
    }

    #[test]
    fn missing_binary_is_reported_as_ocr_failure() {
        let engine = TesseractOcr {
            binary: PathBuf::from("/nonexistent/tesseract"),
            page_segmentation_mode: 6,
        };
        let result = engine.text_from_image(Path::new("page.png"), "ara");
        assert!(matches!(result, Err(IngestError::OcrFailed(_))));
    }
}
