use std::mem;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use image::RgbaImage;
use pdfium_render::prelude::*;
use pdftile_core::{
    Bitmap, DocumentInfo, DocumentMetadata, DocumentProvider, OpenError, PageRenderingError,
    PageSource, PixelRect, Size,
};
use tracing::{debug, instrument, warn};

use crate::copy_rgba;

const LIBRARY_PATH_VAR: &str = "PDFTILE_PDFIUM_LIBRARY_PATH";

/// Opens PDF files with a shared pdfium binding.
pub struct PdfiumProvider {
    pdfium: Arc<Pdfium>,
}

impl PdfiumProvider {
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_env() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

#[async_trait]
impl DocumentProvider for PdfiumProvider {
    #[instrument(skip(self, password))]
    async fn open(
        &self,
        path: &Path,
        password: Option<&str>,
    ) -> Result<Box<dyn PageSource>, OpenError> {
        let absolute = path
            .canonicalize()
            .with_context(|| format!("failed to resolve path for {:?}", path))
            .map_err(OpenError::document)?;
        let document = self
            .pdfium
            .load_pdf_from_file(&absolute, password)
            .map_err(|err| open_error(err, password.is_some(), &absolute))?;
        // SAFETY: the document borrows the bindings owned by `pdfium`. The
        // source keeps its own `Arc` to them and declares `document` first,
        // so the document is dropped while the bindings are still alive.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        let info = build_document_info(&document, &absolute);
        debug!(pages = info.page_count(), "opened pdf");

        Ok(Box::new(PdfiumPageSource {
            document,
            info,
            pdfium: Arc::clone(&self.pdfium),
        }))
    }
}

fn open_error(err: PdfiumError, had_password: bool, path: &Path) -> OpenError {
    match err {
        PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
            if had_password {
                OpenError::InvalidPassword
            } else {
                OpenError::PasswordRequired
            }
        }
        other => OpenError::document(anyhow!("failed to open {:?}: {}", path, other)),
    }
}

/// An open PDF owned by the render worker.
pub struct PdfiumPageSource {
    document: PdfDocument<'static>,
    info: DocumentInfo,
    pdfium: Arc<Pdfium>,
}

impl PdfiumPageSource {
    /// Renders only the part of `page` that `placement` puts under a
    /// `width` x `height` bitmap.
    fn render_window(
        &self,
        page: usize,
        placement: PixelRect,
        width: u32,
        height: u32,
        annotations: bool,
    ) -> Result<RgbaImage> {
        let index = PdfPageIndex::try_from(page)
            .map_err(|_| anyhow!("page {} is out of supported range", page))?;
        let pdf_page = self
            .document
            .pages()
            .get(index)
            .with_context(|| format!("page {} out of range", page))?;
        let page_width = pdf_page.width().value;
        let page_height = pdf_page.height().value;
        if !(page_width > 0.0 && page_height > 0.0) || placement.width <= 0 || placement.height <= 0
        {
            bail!("page {} has no area to render", page);
        }
        let tile_width = i32::try_from(width).context("tile too wide")?;
        let tile_height = i32::try_from(height).context("tile too tall")?;

        // The page is sized to the full raster; the shift is expressed in
        // page points, which pdfium scales along with the page. Form fields
        // are skipped because pdfium cannot draw them through a matrix.
        let shift_x = placement.x as f32 * page_width / placement.width as f32;
        let shift_y = placement.y as f32 * page_height / placement.height as f32;
        let config = PdfRenderConfig::new()
            .set_target_width(placement.width)
            .set_target_height(placement.height)
            .render_form_data(false)
            .render_annotations(annotations)
            .transform(1.0, 0.0, 0.0, 1.0, shift_x, shift_y)?
            .clip(0, 0, tile_width, tile_height);

        let mut bitmap = PdfBitmap::empty(
            tile_width,
            tile_height,
            PdfBitmapFormat::BGRA,
            self.pdfium.bindings(),
        )?;
        pdf_page
            .render_into_bitmap_with_config(&mut bitmap, &config)
            .with_context(|| format!("failed to render page {}", page))?;
        Ok(bitmap.as_image().to_rgba8())
    }
}

impl PageSource for PdfiumPageSource {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    #[instrument(skip(self, target))]
    fn rasterize(
        &mut self,
        page: usize,
        target: &mut Bitmap,
        placement: PixelRect,
        render_annotations: bool,
    ) -> Result<(), PageRenderingError> {
        let image = self
            .render_window(page, placement, target.width, target.height, render_annotations)
            .map_err(|err| {
                warn!(page, error = %err, "pdfium render failed");
                PageRenderingError::new(page, format!("{err:#}"))
            })?;
        copy_rgba(&image, target);
        Ok(())
    }
}

fn build_document_info(document: &PdfDocument<'_>, path: &Path) -> DocumentInfo {
    let page_sizes = document
        .pages()
        .iter()
        .map(|page| Size::new(page.width().value, page.height().value))
        .collect();
    let metadata = document.metadata();
    let tag = |kind| metadata.get(kind).map(|tag| tag.value().to_owned());

    let keywords = tag(PdfDocumentMetadataTagType::Keywords)
        .map(|value| {
            value
                .split(',')
                .map(|s| s.trim().to_owned())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    DocumentInfo {
        path: path.to_path_buf(),
        metadata: DocumentMetadata {
            title: tag(PdfDocumentMetadataTagType::Title),
            author: tag(PdfDocumentMetadataTagType::Author),
            subject: tag(PdfDocumentMetadataTagType::Subject),
            keywords,
        },
        page_sizes,
    }
}

fn bind_pdfium_from_env() -> Option<Pdfium> {
    let path = std::env::var(LIBRARY_PATH_VAR).ok()?;
    if path.is_empty() {
        return None;
    }
    match Pdfium::bind_to_library(&path) {
        Ok(bindings) => Some(Pdfium::new(bindings)),
        Err(err) => {
            warn!("failed to load Pdfium from {}={}: {}", LIBRARY_PATH_VAR, path, err);
            None
        }
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");

    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("{}: {}", cwd_path.display(), err));
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; set {} or install it ({})",
                LIBRARY_PATH_VAR,
                errors.join(", ")
            ))
        }
    }
}
