//! PDF page rasterization through poppler's command-line tools.
//!
//! `pdfinfo` gives the page count and `pdftoppm` renders one page at a time
//! into the scratch directory. Each image lives only as long as the
//! [`RenderedPage`] guard that owns it.

use crate::error::{EvalError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Source of per-page images for page-mode uploads.
#[allow(async_fn_in_trait)]
pub trait Rasterizer {
    /// Number of pages in `pdf`.
    async fn page_count(&self, pdf: &Path) -> Result<u32>;

    /// Render one page (1-based) into a file owned by the returned guard.
    async fn render_page(&self, pdf: &Path, page: u32) -> Result<RenderedPage>;
}

/// Renders PDF pages to PNG files.
#[derive(Debug, Clone)]
pub struct PageRenderer {
    scratch_dir: PathBuf,
    dpi: u32,
}

impl PageRenderer {
    pub fn new(scratch_dir: impl Into<PathBuf>, dpi: u32) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            dpi,
        }
    }
}

impl Rasterizer for PageRenderer {
    async fn page_count(&self, pdf: &Path) -> Result<u32> {
        let output = Command::new("pdfinfo")
            .arg(pdf)
            .output()
            .await
            .map_err(|e| render_error(pdf, format!("failed to execute pdfinfo: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(render_error(
                pdf,
                format!("pdfinfo returned non-zero exit status: {}", stderr.trim()),
            ));
        }

        parse_page_count(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| render_error(pdf, "pdfinfo output has no page count"))
    }

    async fn render_page(&self, pdf: &Path, page: u32) -> Result<RenderedPage> {
        fs::create_dir_all(&self.scratch_dir).map_err(|e| EvalError::io(&self.scratch_dir, e))?;

        let stem = pdf
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("pdf");
        let output_root = self
            .scratch_dir
            .join(format!("{}_{}_page_{}", stem, std::process::id(), page));
        let guard = RenderedPage::new(output_root.with_extension("png"), page);

        let output = Command::new("pdftoppm")
            .arg("-f")
            .arg(page.to_string())
            .arg("-l")
            .arg(page.to_string())
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg("-singlefile")
            .arg("-png")
            .arg(pdf)
            .arg(&output_root)
            .output()
            .await
            .map_err(|e| render_error(pdf, format!("failed to execute pdftoppm: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(render_error(
                pdf,
                format!(
                    "pdftoppm returned non-zero exit status for page {}: {}",
                    page,
                    stderr.trim()
                ),
            ));
        }

        if !guard.path.exists() {
            return Err(render_error(
                pdf,
                format!("pdftoppm did not produce an image for page {}", page),
            ));
        }

        Ok(guard)
    }
}

/// A rendered page image, deleted when dropped.
#[derive(Debug)]
pub struct RenderedPage {
    path: PathBuf,
    page: u32,
}

impl RenderedPage {
    /// Take ownership of an image file; it is removed when the guard drops.
    pub fn new(path: impl Into<PathBuf>, page: u32) -> Self {
        Self {
            path: path.into(),
            page,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    /// Image bytes, base64-encoded.
    pub fn to_base64(&self) -> Result<String> {
        encode_file(&self.path)
    }
}

impl Drop for RenderedPage {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = fs::remove_file(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove page image");
            }
        }
    }
}

/// Read a file and base64-encode it.
pub fn encode_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|e| EvalError::io(path, e))?;
    Ok(STANDARD.encode(bytes))
}

/// Extract `Pages:` from `pdfinfo` output.
pub fn parse_page_count(pdfinfo: &str) -> Option<u32> {
    pdfinfo.lines().find_map(|line| {
        line.strip_prefix("Pages:")
            .and_then(|rest| rest.trim().parse().ok())
    })
}

pub(crate) fn render_error(path: &Path, reason: impl Into<String>) -> EvalError {
    EvalError::Render {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_page_count() {
        let output = "Title:          Annual Report\nProducer:       pdfTeX\nPages:          14\nEncrypted:      no\n";
        assert_eq!(parse_page_count(output), Some(14));
        assert_eq!(parse_page_count("Title: x\n"), None);
    }

    #[test]
    fn test_encode_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("7.pdf");
        fs::write(&path, b"%PDF-1.4").unwrap();
        assert_eq!(encode_file(&path).unwrap(), "JVBERi0xLjQ=");
    }

    #[test]
    fn test_rendered_page_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("7_page_1.png");
        fs::write(&path, b"png").unwrap();

        let page = RenderedPage::new(&path, 1);
        assert_eq!(page.to_base64().unwrap(), "cG5n");
        drop(page);

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_missing_pdf_is_render_error() {
        let dir = TempDir::new().unwrap();
        let renderer = PageRenderer::new(dir.path(), 72);
        // Fails whether or not poppler is installed
        let err = renderer
            .page_count(&dir.path().join("absent.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::Render { .. }));
    }
}
