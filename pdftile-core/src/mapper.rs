use crate::geometry::{DocumentLayout, Point, Rect};

/// A location inside a page, `x`/`y` in page-relative units where the page
/// spans `0.0..=1.0` on both axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PagePoint {
    pub page: usize,
    pub x: f32,
    pub y: f32,
}

impl PagePoint {
    pub fn is_inside(&self) -> bool {
        (0.0..=1.0).contains(&self.x) && (0.0..=1.0).contains(&self.y)
    }
}

/// Converts between viewport coordinates and page-relative coordinates.
///
/// `scroll` is the document-space position (at the current zoom) of the
/// viewport's top-left corner.
#[derive(Debug, Clone, Copy)]
pub struct CoordinateMapper<'a> {
    layout: &'a DocumentLayout,
    scroll: Point,
    zoom: f32,
}

impl<'a> CoordinateMapper<'a> {
    pub fn new(layout: &'a DocumentLayout, scroll: Point, zoom: f32) -> Self {
        Self {
            layout,
            scroll,
            zoom,
        }
    }

    pub fn to_document(&self, screen: Point) -> Point {
        Point::new(screen.x + self.scroll.x, screen.y + self.scroll.y)
    }

    pub fn to_screen(&self, document: Point) -> Point {
        Point::new(document.x - self.scroll.x, document.y - self.scroll.y)
    }

    pub fn page_index_at(&self, screen: Point) -> Option<usize> {
        if self.layout.page_count() == 0 {
            return None;
        }
        let document = self.to_document(screen);
        let primary = self.layout.orientation().primary_of(document);
        Some(self.layout.page_at_offset(primary, self.zoom))
    }

    /// Page under `screen` and the point's page-relative position. The
    /// position may fall outside `0..=1` when the point lies in a gap.
    pub fn screen_to_document(&self, screen: Point) -> Option<PagePoint> {
        let page = self.page_index_at(screen)?;
        let bounds = self.layout.page_bounds(page, self.zoom)?;
        if bounds.is_empty() {
            return None;
        }
        let document = self.to_document(screen);
        Some(PagePoint {
            page,
            x: (document.x - bounds.left) / bounds.width(),
            y: (document.y - bounds.top) / bounds.height(),
        })
    }

    /// Forward placement: where a page-relative point lands on screen.
    pub fn document_to_screen(&self, point: PagePoint) -> Option<Point> {
        let bounds = self.layout.page_bounds(point.page, self.zoom)?;
        let document = Point::new(
            bounds.left + point.x * bounds.width(),
            bounds.top + point.y * bounds.height(),
        );
        Some(self.to_screen(document))
    }

    /// Converts a document-space rectangle into page-relative units of `page`.
    pub fn to_unit_rect(&self, page: usize, rect: &Rect) -> Option<Rect> {
        let bounds = self.layout.page_bounds(page, self.zoom)?;
        if bounds.is_empty() {
            return None;
        }
        Some(Rect::new(
            (rect.left - bounds.left) / bounds.width(),
            (rect.top - bounds.top) / bounds.height(),
            (rect.right - bounds.left) / bounds.width(),
            (rect.bottom - bounds.top) / bounds.height(),
        ))
    }

    /// Converts a page-relative rectangle of `page` into document space.
    pub fn from_unit_rect(&self, page: usize, unit: &Rect) -> Option<Rect> {
        let bounds = self.layout.page_bounds(page, self.zoom)?;
        Some(Rect::new(
            bounds.left + unit.left * bounds.width(),
            bounds.top + unit.top * bounds.height(),
            bounds.left + unit.right * bounds.width(),
            bounds.top + unit.bottom * bounds.height(),
        ))
    }
}
