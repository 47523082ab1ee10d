pub mod cache;
pub mod config;
pub mod decode;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod geometry;
pub mod mapper;
pub mod planner;
pub mod session;
pub mod tile;

#[cfg(test)]
mod testing;

pub use cache::{PutOutcome, TileCache};
pub use config::{EngineLimits, ViewerConfig, ZoomBounds};
pub use decode::{DocumentInfo, DocumentMetadata, DocumentProvider, PageSource, PixelRect};
pub use dispatcher::{
    placement_for, DropReason, RenderDispatcher, RenderOutcome, RenderRequest,
};
pub use error::{
    BitmapAllocationError, ConfigError, OpenError, PageRenderingError, SessionError,
};
pub use events::ViewerEvent;
pub use geometry::{
    layout, DocumentLayout, FitPolicy, LayoutOptions, Orientation, PageLayout, Point, Rect, Size,
    Spacing,
};
pub use mapper::{CoordinateMapper, PagePoint};
pub use planner::{TilePlanner, Viewport};
pub use session::ViewerSession;
pub use tile::{next_cache_order, Bitmap, Tile, TileKey};
