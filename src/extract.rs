use std::{
    path::{Path, PathBuf},
    process::Command,
};

use lopdf::Document;

use crate::error::{Error, Result};

/// Turns a document file into plain text.
///
/// An empty string means the file had no recoverable text; an error means
/// the file could not be read at all.
pub trait TextExtractor: Send + Sync {
    fn extract_text(&self, path: &Path) -> Result<String>;
}

/// External programs used to OCR scanned PDFs.
#[derive(Debug, Clone)]
pub struct OcrTools {
    /// Rasterizes PDF pages (poppler's `pdftoppm`).
    pub pdftoppm: PathBuf,
    pub tesseract: PathBuf,
    pub dpi: u32,
}

impl Default for OcrTools {
    fn default() -> Self {
        Self {
            pdftoppm: PathBuf::from("pdftoppm"),
            tesseract: PathBuf::from("tesseract"),
            dpi: 300,
        }
    }
}

/// Extracts PDF text with lopdf, falling back to OCR for scanned reports.
#[derive(Debug, Clone, Default)]
pub struct PdfExtractor {
    ocr: Option<OcrTools>,
}

impl PdfExtractor {
    pub fn new(ocr: OcrTools) -> Self {
        Self { ocr: Some(ocr) }
    }

    /// An extractor that never shells out to OCR tools.
    pub fn without_ocr() -> Self {
        Self { ocr: None }
    }

    fn extract_embedded(&self, path: &Path) -> Result<String> {
        let doc = Document::load(path).map_err(|e| {
            Error::Pdf(format!("failed to load {}: {e}", path.display()))
        })?;

        let mut text = String::new();
        // get_pages is keyed by page number, so this walks in page order.
        for page in doc.get_pages().into_keys() {
            match doc.extract_text(&[page]) {
                Ok(page_text) if !page_text.trim().is_empty() => {
                    text.push_str(&page_text);
                    text.push('\n');
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(
                        path = %path.display(),
                        page,
                        error = %e,
                        "could not extract page text"
                    );
                }
            }
        }
        Ok(text)
    }
}

impl TextExtractor for PdfExtractor {
    fn extract_text(&self, path: &Path) -> Result<String> {
        let text = self.extract_embedded(path)?;
        if !text.trim().is_empty() {
            return Ok(text);
        }

        let Some(tools) = &self.ocr else {
            return Ok(text);
        };

        tracing::warn!(
            path = %path.display(),
            "no embedded text, trying OCR"
        );
        match ocr_pdf(path, tools) {
            Ok(ocr_text) => Ok(ocr_text),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "OCR failed");
                Ok(String::new())
            }
        }
    }
}

/// Rasterize every page and OCR the images in page order.
fn ocr_pdf(path: &Path, tools: &OcrTools) -> Result<String> {
    let scratch = tempfile::tempdir()?;
    let prefix = scratch.path().join("page");

    let output = Command::new(&tools.pdftoppm)
        .arg("-r")
        .arg(tools.dpi.to_string())
        .arg("-png")
        .arg(path)
        .arg(&prefix)
        .output()
        .map_err(|e| {
            Error::Ocr(format!("could not run {}: {e}", tools.pdftoppm.display()))
        })?;
    if !output.status.success() {
        return Err(Error::Ocr(format!(
            "{} failed: {}",
            tools.pdftoppm.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let images = page_images(scratch.path())?;
    let mut text = String::new();
    for image in &images {
        text.push_str(&ocr_image(image, tools)?);
        text.push('\n');
    }

    tracing::info!(
        path = %path.display(),
        pages = images.len(),
        chars = text.chars().count(),
        "OCR complete"
    );
    Ok(text)
}

/// Page images written by pdftoppm, in page order.
///
/// pdftoppm zero-pads page numbers to a common width, so a lexical sort
/// is a page sort.
fn page_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut images: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "png"))
        .collect();
    images.sort();
    Ok(images)
}

fn ocr_image(image: &Path, tools: &OcrTools) -> Result<String> {
    let output = Command::new(&tools.tesseract)
        .arg(image)
        .arg("stdout")
        .output()
        .map_err(|e| {
            Error::Ocr(format!("could not run {}: {e}", tools.tesseract.display()))
        })?;
    if !output.status.success() {
        return Err(Error::Ocr(format!(
            "{} failed on {}: {}",
            tools.tesseract.display(),
            image.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
