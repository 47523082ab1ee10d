//! Decides which tiles the current viewport needs.

use std::collections::HashSet;
use std::ops::RangeInclusive;

use tracing::debug;

use crate::config::EngineLimits;
use crate::geometry::{DocumentLayout, Point, Rect, Size};
use crate::mapper::CoordinateMapper;
use crate::tile::TileKey;

/// Scroll position, size and zoom of the visible window onto the document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Document-space position of the top-left corner at the current zoom.
    pub scroll: Point,
    pub size: Size,
    pub zoom: f32,
}

impl Viewport {
    pub fn new(size: Size) -> Self {
        Self {
            scroll: Point::default(),
            size,
            zoom: 1.0,
        }
    }

    pub fn visible_rect(&self) -> Rect {
        Rect::from_origin_size(self.scroll, self.size)
    }
}

pub struct TilePlanner<'a> {
    limits: &'a EngineLimits,
}

struct Candidate {
    distance: f32,
    page: usize,
    row: u32,
    col: u32,
    key: TileKey,
}

/// One axis of a page's part grid, measured in whole output pixels of the
/// full-page raster.
struct Axis {
    length: u32,
    part: u32,
    cells: u32,
}

impl Axis {
    fn new(length: u32, part: u32) -> Self {
        Self {
            length,
            part,
            cells: length.div_ceil(part).max(1),
        }
    }

    /// Pixel edges of `cell`; only the last cell may be shorter than a part.
    fn edges(&self, cell: u32) -> (u32, u32) {
        let start = cell.saturating_mul(self.part).min(self.length);
        let end = start.saturating_add(self.part).min(self.length);
        (start, end)
    }

    fn unit(&self, pixel: u32) -> f32 {
        pixel as f32 / self.length as f32
    }

    /// Cells overlapping the page-relative interval `start..end`.
    fn span(&self, start: f32, end: f32) -> RangeInclusive<u32> {
        let scale = self.length as f32 / self.part as f32;
        let last = self.cells - 1;
        // Absorb rounding noise so a shared edge never pulls in a neighbour.
        let first = ((start * scale + 1e-4).floor().max(0.0) as u32).min(last);
        let stop = ((end * scale - 1e-4).ceil().max(1.0) as u32 - 1).clamp(first, last);
        first..=stop
    }
}

impl<'a> TilePlanner<'a> {
    pub fn new(limits: &'a EngineLimits) -> Self {
        Self { limits }
    }

    /// Tiles to keep resident, in submission order: the thumbnails of the
    /// touched pages, then parts nearest the centre of `visible` first.
    ///
    /// Parts beyond the part cache capacity and thumbnails beyond the
    /// thumbnail cache capacity are left out, farthest first, so a plan
    /// always fits the cache it feeds.
    pub fn plan(
        &self,
        layout: &DocumentLayout,
        visible: &Rect,
        zoom: f32,
        excluded: &HashSet<usize>,
    ) -> Vec<TileKey> {
        if visible.is_empty() || !(zoom > 0.0) {
            return Vec::new();
        }

        // Plans are made in document space, so the mapper needs no scroll.
        let mapper = CoordinateMapper::new(layout, Point::default(), zoom);
        let region = visible.expand_along(layout.orientation(), self.limits.preload_margin);
        let center = visible.center();

        let mut thumbnails = Vec::new();
        let mut parts = Vec::new();

        for page in layout.pages() {
            let index = page.page_index;
            if excluded.contains(&index) {
                continue;
            }
            let Some(bounds) = layout.page_bounds(index, zoom) else {
                continue;
            };
            if bounds.is_empty() {
                continue;
            }
            let Some(needed) = bounds.intersection(&region) else {
                continue;
            };
            let Some(unit) = mapper.to_unit_rect(index, &needed) else {
                continue;
            };

            thumbnails.push(Candidate {
                distance: distance(bounds.center(), center),
                page: index,
                row: 0,
                col: 0,
                key: self.thumbnail_key(index, page.size()),
            });

            let (raster_width, raster_height) = self.render_size(bounds.width(), bounds.height());
            let columns = Axis::new(raster_width, self.limits.part_size);
            let rows = Axis::new(raster_height, self.limits.part_size);

            for row in rows.span(unit.top, unit.bottom) {
                let (top, bottom) = rows.edges(row);
                for col in columns.span(unit.left, unit.right) {
                    let (left, right) = columns.edges(col);
                    let cell = Rect::new(
                        columns.unit(left),
                        rows.unit(top),
                        columns.unit(right),
                        rows.unit(bottom),
                    );
                    let Some(placed) = mapper.from_unit_rect(index, &cell) else {
                        continue;
                    };
                    parts.push(Candidate {
                        distance: distance(placed.center(), center),
                        page: index,
                        row,
                        col,
                        key: TileKey::new(index, cell, right - left, bottom - top, false),
                    });
                }
            }
        }

        sort_closest_first(&mut thumbnails);
        thumbnails.truncate(self.limits.thumbnail_cache_size);
        thumbnails.sort_by_key(|candidate| candidate.page);

        sort_closest_first(&mut parts);
        if parts.len() > self.limits.cache_size {
            debug!(
                planned = parts.len(),
                kept = self.limits.cache_size,
                "plan larger than the part cache"
            );
            parts.truncate(self.limits.cache_size);
        }

        thumbnails
            .into_iter()
            .chain(parts)
            .map(|candidate| candidate.key)
            .collect()
    }

    /// Whole-page low resolution key, independent of zoom so it is reused
    /// while zooming.
    pub fn thumbnail_key(&self, page: usize, base_size: Size) -> TileKey {
        self.whole_page_key(page, base_size, self.limits.thumbnail_ratio)
    }

    pub fn printing_key(&self, page: usize, base_size: Size) -> TileKey {
        self.whole_page_key(page, base_size, self.limits.printing_thumbnail_ratio)
    }

    fn whole_page_key(&self, page: usize, base_size: Size, ratio: f32) -> TileKey {
        let width = base_size.width * ratio;
        let height = base_size.height * ratio;
        let scale = self.render_scale(width, height);
        TileKey::whole_page(page, to_pixels(width * scale), to_pixels(height * scale))
    }

    /// Pixel size of the full-page raster `key` was cut from at `zoom`.
    pub fn raster_size(
        &self,
        layout: &DocumentLayout,
        key: &TileKey,
        zoom: f32,
    ) -> Option<(u32, u32)> {
        if key.thumbnail {
            return Some((key.width, key.height));
        }
        let bounds = layout.page_bounds(key.page, zoom)?;
        if bounds.is_empty() {
            return None;
        }
        Some(self.render_size(bounds.width(), bounds.height()))
    }

    /// Factor that keeps a full-page raster within the bitmap limit.
    pub fn render_scale(&self, width: f32, height: f32) -> f32 {
        let longest = width.max(height);
        let limit = self.limits.max_bitmap_dimension as f32;
        if longest > limit {
            limit / longest
        } else {
            1.0
        }
    }

    fn render_size(&self, width: f32, height: f32) -> (u32, u32) {
        let scale = self.render_scale(width, height);
        let limit = self.limits.max_bitmap_dimension;
        (
            to_pixels(width * scale).min(limit),
            to_pixels(height * scale).min(limit),
        )
    }
}

fn sort_closest_first(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.page.cmp(&b.page))
            .then_with(|| a.row.cmp(&b.row))
            .then_with(|| a.col.cmp(&b.col))
    });
}

fn distance(a: Point, b: Point) -> f32 {
    (a.x - b.x).hypot(a.y - b.y)
}

fn to_pixels(value: f32) -> u32 {
    if value.is_finite() && value > 0.0 {
        (value.round() as u32).max(1)
    } else {
        0
    }
}
