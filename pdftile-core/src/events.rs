use crate::decode::DocumentMetadata;
use crate::tile::{Tile, TileKey};

/// Everything the session reports to its consumer, in emission order.
#[derive(Debug)]
pub enum ViewerEvent {
    LoadComplete {
        page_count: usize,
        metadata: DocumentMetadata,
    },
    /// The source could not be opened; the session holds no document.
    LoadError(String),
    /// The source is encrypted. `rejected` is set when a password was
    /// supplied and refused.
    PasswordRequired { rejected: bool },
    PageChanged { page: usize, page_count: usize },
    PageRenderError { page: usize, reason: String },
    /// First tile delivered since the document was loaded.
    FirstRender { page_count: usize },
    /// A tile intersecting the visible region is now in the cache.
    TileReady { key: TileKey, for_printing: bool },
    /// One whole-page tile per renderable page, ordered by page.
    ReadyForPrinting { tiles: Vec<Tile> },
}
