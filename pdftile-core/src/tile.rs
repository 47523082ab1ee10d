use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::BitmapAllocationError;
use crate::geometry::Rect;

static NEXT_CACHE_ORDER: AtomicU64 = AtomicU64::new(1);

/// Next recency marker. Strictly increasing for the life of the process.
pub fn next_cache_order() -> u64 {
    NEXT_CACHE_ORDER.fetch_add(1, Ordering::Relaxed)
}

/// Identity of a rasterized region: the same region at another output
/// resolution is a different key.
#[derive(Debug, Clone, Copy)]
pub struct TileKey {
    pub page: usize,
    /// Sub-region of the page in page-relative units (`0..=1`).
    pub rect: Rect,
    pub width: u32,
    pub height: u32,
    pub thumbnail: bool,
}

impl TileKey {
    pub fn new(page: usize, rect: Rect, width: u32, height: u32, thumbnail: bool) -> Self {
        Self {
            page,
            rect,
            width,
            height,
            thumbnail,
        }
    }

    pub fn whole_page(page: usize, width: u32, height: u32) -> Self {
        Self::new(page, Rect::new(0.0, 0.0, 1.0, 1.0), width, height, true)
    }

    fn rect_bits(&self) -> [u32; 4] {
        // +0.0 folds -0.0 into 0.0 so equal edges hash equally.
        [
            (self.rect.left + 0.0).to_bits(),
            (self.rect.top + 0.0).to_bits(),
            (self.rect.right + 0.0).to_bits(),
            (self.rect.bottom + 0.0).to_bits(),
        ]
    }
}

impl PartialEq for TileKey {
    fn eq(&self, other: &Self) -> bool {
        self.page == other.page
            && self.width == other.width
            && self.height == other.height
            && self.thumbnail == other.thumbnail
            && self.rect_bits() == other.rect_bits()
    }
}

impl Eq for TileKey {}

impl Hash for TileKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.page.hash(state);
        self.rect_bits().hash(state);
        self.width.hash(state);
        self.height.hash(state);
        self.thumbnail.hash(state);
    }
}

/// RGBA8 pixel buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Bitmap {
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Allocates a zeroed bitmap, reporting failure instead of aborting.
    pub fn allocate(width: u32, height: u32) -> Result<Self, BitmapAllocationError> {
        let error = BitmapAllocationError { width, height };
        if width == 0 || height == 0 {
            return Err(error);
        }
        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|px| px.checked_mul(Self::BYTES_PER_PIXEL))
            .ok_or(error)?;
        let mut pixels = Vec::new();
        pixels.try_reserve_exact(len).map_err(|_| error)?;
        pixels.resize(len, 0);
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn stride(&self) -> usize {
        self.width as usize * Self::BYTES_PER_PIXEL
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

impl std::fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Tile {
    pub key: TileKey,
    pub bitmap: Bitmap,
    pub cache_order: u64,
    pub for_printing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn keys_differ_by_resolution() {
        let rect = Rect::new(0.0, 0.0, 0.5, 0.5);
        let low = TileKey::new(0, rect, 128, 128, false);
        let high = TileKey::new(0, rect, 256, 256, false);
        assert_ne!(low, high);

        let mut set = HashSet::new();
        set.insert(low);
        set.insert(TileKey::new(0, Rect::new(-0.0, 0.0, 0.5, 0.5), 128, 128, false));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn cache_order_is_strictly_increasing() {
        let first = next_cache_order();
        let second = next_cache_order();
        assert!(second > first);
    }

    #[test]
    fn allocation_rejects_degenerate_sizes() {
        assert!(Bitmap::allocate(0, 10).is_err());
        assert!(Bitmap::allocate(u32::MAX, u32::MAX).is_err());
        let bitmap = Bitmap::allocate(3, 2).unwrap();
        assert_eq!(bitmap.byte_len(), 24);
        assert_eq!(bitmap.stride(), 12);
    }
}
