use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::error::{OpenError, PageRenderingError};
use crate::geometry::Size;
use crate::tile::Bitmap;

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub path: PathBuf,
    pub metadata: DocumentMetadata,
    /// Native size of every page, in document points.
    pub page_sizes: Vec<Size>,
}

impl DocumentInfo {
    pub fn page_count(&self) -> usize {
        self.page_sizes.len()
    }

    pub fn page_size(&self, page: usize) -> Option<Size> {
        self.page_sizes.get(page).copied()
    }
}

/// Where the whole page lands relative to the target bitmap's origin. The
/// bitmap shows the window `(0, 0)..(bitmap.width, bitmap.height)` of a page
/// rendered at `width` x `height` and shifted by `x`, `y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// An opened document. Owned by a single render worker; implementations
/// need not support concurrent calls. Dropping it closes the document.
pub trait PageSource: Send {
    fn info(&self) -> &DocumentInfo;

    fn rasterize(
        &mut self,
        page: usize,
        target: &mut Bitmap,
        placement: PixelRect,
        render_annotations: bool,
    ) -> Result<(), PageRenderingError>;
}

#[async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(
        &self,
        path: &Path,
        password: Option<&str>,
    ) -> Result<Box<dyn PageSource>, OpenError>;
}
