//! Page placement: how native page sizes become an on-screen strip of pages.
//!
//! Layouts are computed once at zoom 1.0 for a given viewport and
//! [`LayoutOptions`]; every zoomed quantity is a plain multiplication of the
//! base layout, so the same [`DocumentLayout`] serves every zoom level.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub const ZERO: Size = Size {
        width: 0.0,
        height: 0.0,
    };

    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn scale(self, factor: f32) -> Self {
        Self::new(self.width * factor, self.height * factor)
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle. Document and viewport rectangles are in pixels;
/// a [`TileKey`](crate::tile::TileKey) rectangle is in page-relative units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Rect {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_origin_size(origin: Point, size: Size) -> Self {
        Self::new(
            origin.x,
            origin.y,
            origin.x + size.width,
            origin.y + size.height,
        )
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.left + self.right) / 2.0,
            (self.top + self.bottom) / 2.0,
        )
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.left && point.x <= self.right && point.y >= self.top && point.y <= self.bottom
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let rect = Rect::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        if rect.is_empty() {
            None
        } else {
            Some(rect)
        }
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.intersection(other).is_some()
    }

    /// Grows the rectangle by `margin` on both ends of the scroll axis.
    pub fn expand_along(&self, orientation: Orientation, margin: f32) -> Rect {
        match orientation {
            Orientation::Vertical => {
                Rect::new(self.left, self.top - margin, self.right, self.bottom + margin)
            }
            Orientation::Horizontal => {
                Rect::new(self.left - margin, self.top, self.right + margin, self.bottom)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Vertical,
    Horizontal,
}

impl Orientation {
    pub fn primary(self, size: Size) -> f32 {
        match self {
            Orientation::Vertical => size.height,
            Orientation::Horizontal => size.width,
        }
    }

    pub fn secondary(self, size: Size) -> f32 {
        match self {
            Orientation::Vertical => size.width,
            Orientation::Horizontal => size.height,
        }
    }

    pub fn primary_of(self, point: Point) -> f32 {
        match self {
            Orientation::Vertical => point.y,
            Orientation::Horizontal => point.x,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitPolicy {
    #[default]
    Width,
    Height,
    Both,
}

impl FitPolicy {
    /// Scale that maps `page` into `bounds` under this policy.
    pub fn scale(self, page: Size, bounds: Size) -> f32 {
        if page.is_empty() {
            return 0.0;
        }
        let width = bounds.width / page.width;
        let height = bounds.height / page.height;
        match self {
            FitPolicy::Width => width,
            FitPolicy::Height => height,
            FitPolicy::Both => width.min(height),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Spacing {
    /// Gap between consecutive pages.
    pub page_separator: f32,
    /// Leading margin before the first page.
    pub start: f32,
    /// Trailing margin after the last page.
    pub end: f32,
    /// Centre every page in a viewport-sized slot instead of packing pages.
    pub auto_spacing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LayoutOptions {
    pub orientation: Orientation,
    pub fit_policy: FitPolicy,
    pub fit_each_page: bool,
    pub spacing: Spacing,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageLayout {
    pub page_index: usize,
    pub width: f32,
    pub height: f32,
    /// Position of the page's leading edge on the scroll axis.
    pub offset: f32,
    /// Centring offset on the cross axis.
    pub secondary_offset: f32,
}

impl PageLayout {
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn scaled(&self, zoom: f32) -> PageLayout {
        PageLayout {
            page_index: self.page_index,
            width: self.width * zoom,
            height: self.height * zoom,
            offset: self.offset * zoom,
            secondary_offset: self.secondary_offset * zoom,
        }
    }

    pub fn bounds(&self, orientation: Orientation) -> Rect {
        let origin = match orientation {
            Orientation::Vertical => Point::new(self.secondary_offset, self.offset),
            Orientation::Horizontal => Point::new(self.offset, self.secondary_offset),
        };
        Rect::from_origin_size(origin, self.size())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentLayout {
    orientation: Orientation,
    pages: Vec<PageLayout>,
    length: f32,
    max_secondary: f32,
}

impl DocumentLayout {
    pub fn compute(page_sizes: &[Size], viewport: Size, options: &LayoutOptions) -> Self {
        let orientation = options.orientation;
        let sizes = fitted_sizes(page_sizes, viewport, options);
        let max_secondary = sizes
            .iter()
            .map(|size| orientation.secondary(*size))
            .fold(0.0_f32, f32::max);

        let spacing = &options.spacing;
        let count = sizes.len();
        let mut pages = Vec::with_capacity(count);
        let mut cursor = if spacing.auto_spacing {
            0.0
        } else {
            spacing.start
        };

        for (page_index, size) in sizes.iter().enumerate() {
            let extent = orientation.primary(*size);
            let slot = if spacing.auto_spacing {
                extent.max(orientation.primary(viewport))
            } else {
                extent
            };
            pages.push(PageLayout {
                page_index,
                width: size.width,
                height: size.height,
                offset: cursor + (slot - extent) / 2.0,
                secondary_offset: (max_secondary - orientation.secondary(*size)) / 2.0,
            });
            cursor += slot;
            if page_index + 1 < count {
                cursor += spacing.page_separator;
            }
        }

        let length = if spacing.auto_spacing {
            cursor
        } else {
            cursor + spacing.end
        };

        Self {
            orientation,
            pages,
            length,
            max_secondary,
        }
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn pages(&self) -> &[PageLayout] {
        &self.pages
    }

    pub fn page(&self, index: usize) -> Option<&PageLayout> {
        self.pages.get(index)
    }

    pub fn at_zoom(&self, zoom: f32) -> Vec<PageLayout> {
        self.pages.iter().map(|page| page.scaled(zoom)).collect()
    }

    pub fn page_bounds(&self, index: usize, zoom: f32) -> Option<Rect> {
        self.pages
            .get(index)
            .map(|page| page.scaled(zoom).bounds(self.orientation))
    }

    /// Length of the whole strip on the scroll axis.
    pub fn length(&self, zoom: f32) -> f32 {
        self.length * zoom
    }

    /// Size of the whole strip at `zoom`.
    pub fn extent(&self, zoom: f32) -> Size {
        match self.orientation {
            Orientation::Vertical => Size::new(self.max_secondary * zoom, self.length * zoom),
            Orientation::Horizontal => Size::new(self.length * zoom, self.max_secondary * zoom),
        }
    }

    /// Empty space between page `index` and its predecessor.
    pub fn leading_gap(&self, index: usize, zoom: f32) -> f32 {
        if index == 0 || index >= self.pages.len() {
            return 0.0;
        }
        let previous = &self.pages[index - 1];
        let previous_end = previous.offset + self.orientation.primary(previous.size());
        (self.pages[index].offset - previous_end) * zoom
    }

    /// Page owning `offset` on the scroll axis. Each page owns half of the
    /// gap on either side of it.
    pub fn page_at_offset(&self, offset: f32, zoom: f32) -> usize {
        let mut current = 0;
        for index in 1..self.pages.len() {
            let boundary = self.pages[index].offset * zoom - self.leading_gap(index, zoom) / 2.0;
            if offset > boundary {
                current = index;
            } else {
                break;
            }
        }
        current
    }
}

/// Placement of every page at `zoom`.
pub fn layout(
    page_sizes: &[Size],
    viewport: Size,
    options: &LayoutOptions,
    zoom: f32,
) -> Vec<PageLayout> {
    DocumentLayout::compute(page_sizes, viewport, options).at_zoom(zoom)
}

fn fitted_sizes(page_sizes: &[Size], viewport: Size, options: &LayoutOptions) -> Vec<Size> {
    if options.fit_each_page {
        return page_sizes
            .iter()
            .map(|size| size.scale(options.fit_policy.scale(*size, viewport)))
            .collect();
    }

    // The widest and the tallest page bound the shared scale.
    let reference = page_sizes.iter().fold(Size::ZERO, |acc, size| {
        Size::new(acc.width.max(size.width), acc.height.max(size.height))
    });
    let scale = options.fit_policy.scale(reference, viewport);
    page_sizes
        .iter()
        .map(|size| {
            if size.is_empty() {
                Size::ZERO
            } else {
                size.scale(scale)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(fit_policy: FitPolicy, fit_each_page: bool) -> LayoutOptions {
        LayoutOptions {
            orientation: Orientation::Vertical,
            fit_policy,
            fit_each_page,
            spacing: Spacing::default(),
        }
    }

    fn three_pages() -> Vec<Size> {
        vec![
            Size::new(600.0, 800.0),
            Size::new(600.0, 1200.0),
            Size::new(600.0, 800.0),
        ]
    }

    #[test]
    fn uniform_both_fit_uses_tallest_page() {
        let layout = DocumentLayout::compute(
            &three_pages(),
            Size::new(300.0, 400.0),
            &options(FitPolicy::Both, false),
        );

        let scales: Vec<f32> = layout
            .pages()
            .iter()
            .zip(three_pages())
            .map(|(page, native)| page.height / native.height)
            .collect();
        for scale in &scales {
            assert!((scale - 1.0 / 3.0).abs() < 1e-6, "scale {scale}");
        }
        assert!((layout.pages()[1].height - 400.0).abs() < 1e-3);
        assert!((layout.pages()[0].width - 200.0).abs() < 1e-3);
    }

    #[test]
    fn fit_each_page_scales_pages_independently() {
        let layout = DocumentLayout::compute(
            &three_pages(),
            Size::new(300.0, 400.0),
            &options(FitPolicy::Both, true),
        );
        let pages = layout.pages();
        assert!((pages[0].width - 300.0).abs() < 1e-3);
        assert!((pages[0].height - 400.0).abs() < 1e-3);
        assert!((pages[1].height - 400.0).abs() < 1e-3);
        assert!((pages[1].width - 200.0).abs() < 1e-3);
    }

    #[test]
    fn width_fit_matches_viewport_width() {
        let sizes = vec![Size::new(500.0, 700.0), Size::new(250.0, 300.0)];
        let layout = DocumentLayout::compute(
            &sizes,
            Size::new(1000.0, 600.0),
            &options(FitPolicy::Width, false),
        );
        assert!((layout.pages()[0].width - 1000.0).abs() < 1e-3);
        assert!((layout.pages()[1].width - 500.0).abs() < 1e-3);
        // narrower page is centred on the cross axis
        assert!((layout.pages()[1].secondary_offset - 250.0).abs() < 1e-3);
    }

    #[test]
    fn fixed_spacing_offsets_and_length() {
        let mut opts = options(FitPolicy::Width, false);
        opts.spacing = Spacing {
            page_separator: 10.0,
            start: 5.0,
            end: 7.0,
            auto_spacing: false,
        };
        let sizes = vec![Size::new(100.0, 100.0); 3];
        let layout = DocumentLayout::compute(&sizes, Size::new(100.0, 50.0), &opts);

        let offsets: Vec<f32> = layout.pages().iter().map(|p| p.offset).collect();
        assert_eq!(offsets, vec![5.0, 115.0, 225.0]);
        assert!(offsets.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(layout.length(1.0), 5.0 + 300.0 + 20.0 + 7.0);
        assert_eq!(layout.length(2.0), 2.0 * 332.0);
    }

    #[test]
    fn auto_spacing_centres_each_page_in_a_viewport_slot() {
        let mut opts = options(FitPolicy::Width, true);
        opts.spacing.auto_spacing = true;
        let sizes = vec![Size::new(100.0, 100.0), Size::new(100.0, 200.0)];
        let layout = DocumentLayout::compute(&sizes, Size::new(100.0, 400.0), &opts);

        assert_eq!(layout.pages()[0].offset, 150.0);
        assert_eq!(layout.pages()[1].offset, 400.0 + 100.0);
        assert_eq!(layout.length(1.0), 800.0);
    }

    #[test]
    fn page_at_offset_splits_gaps_in_half() {
        let mut opts = options(FitPolicy::Width, false);
        opts.spacing.page_separator = 20.0;
        let sizes = vec![Size::new(100.0, 100.0); 3];
        let layout = DocumentLayout::compute(&sizes, Size::new(100.0, 100.0), &opts);

        assert_eq!(layout.page_at_offset(0.0, 1.0), 0);
        assert_eq!(layout.page_at_offset(109.0, 1.0), 0);
        assert_eq!(layout.page_at_offset(111.0, 1.0), 1);
        assert_eq!(layout.page_at_offset(500.0, 1.0), 2);
        assert_eq!(layout.page_at_offset(222.0, 2.0), 1);
    }

    #[test]
    fn layout_is_deterministic_and_handles_empty_pages() {
        let sizes = vec![Size::new(0.0, 0.0), Size::new(200.0, 100.0)];
        let opts = options(FitPolicy::Both, false);
        let first = layout(&sizes, Size::new(400.0, 400.0), &opts, 1.5);
        let second = layout(&sizes, Size::new(400.0, 400.0), &opts, 1.5);
        assert_eq!(first, second);
        assert_eq!(first[0].width, 0.0);
        assert!((first[1].width - 600.0).abs() < 1e-3);
    }

    #[test]
    fn horizontal_orientation_places_pages_along_x() {
        let mut opts = options(FitPolicy::Height, false);
        opts.orientation = Orientation::Horizontal;
        let sizes = vec![Size::new(100.0, 200.0); 2];
        let layout = DocumentLayout::compute(&sizes, Size::new(300.0, 400.0), &opts);

        let second = layout.page_bounds(1, 1.0).unwrap();
        assert_eq!(second.left, 200.0);
        assert_eq!(second.top, 0.0);
        assert_eq!(layout.extent(1.0), Size::new(400.0, 400.0));
    }
}
