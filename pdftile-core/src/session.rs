//! The interactive side of the engine: owns the viewport, the layout and the
//! tile cache, plans on every viewport change and folds finished renders
//! back into the cache.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use tracing::{debug, info, instrument, warn};

use crate::cache::{PutOutcome, TileCache};
use crate::config::ViewerConfig;
use crate::decode::{DocumentInfo, DocumentProvider, PageSource};
use crate::dispatcher::{
    DispatcherStats, DropReason, RenderDispatcher, RenderOutcome, RenderRequest, SubmitOutcome,
};
use crate::error::{OpenError, SessionError};
use crate::events::ViewerEvent;
use crate::geometry::{DocumentLayout, Orientation, Point, Rect, Size};
use crate::mapper::{CoordinateMapper, PagePoint};
use crate::planner::{TilePlanner, Viewport};
use crate::tile::{next_cache_order, Tile, TileKey};

const PUMP_SLICE: Duration = Duration::from_millis(10);

struct LoadedDocument {
    info: DocumentInfo,
    layout: DocumentLayout,
    dispatcher: RenderDispatcher,
    cache: TileCache,
    failed_pages: HashSet<usize>,
    current_page: usize,
    /// Keys of the most recent plan.
    active: HashSet<TileKey>,
    printing: Option<PrintJob>,
    rendered_once: bool,
}

#[derive(Default)]
struct PrintJob {
    pending: HashSet<usize>,
    tiles: HashMap<usize, Tile>,
    /// Pending pages the worker dropped while stopped, sent again on resume.
    deferred: Vec<TileKey>,
}

pub struct ViewerSession {
    config: ViewerConfig,
    events: Sender<ViewerEvent>,
    viewport: Viewport,
    generation: u64,
    loaded: Option<LoadedDocument>,
}

impl ViewerSession {
    pub fn new(
        config: ViewerConfig,
        viewport_size: Size,
    ) -> Result<(Self, Receiver<ViewerEvent>), SessionError> {
        config.validate()?;
        let (events, receiver) = flume::unbounded();
        let mut viewport = Viewport::new(viewport_size);
        viewport.zoom = config.zoom.min;
        let session = Self {
            config,
            events,
            viewport,
            generation: 0,
            loaded: None,
        };
        Ok((session, receiver))
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    /// Opens `path` through `provider` with the configured password and
    /// replaces any document already shown.
    #[instrument(skip(self, provider))]
    pub async fn open_with<P>(&mut self, provider: &P, path: &Path) -> Result<(), SessionError>
    where
        P: DocumentProvider + ?Sized,
    {
        self.close();
        let password = self.config.password.clone();
        match provider.open(path, password.as_deref()).await {
            Ok(source) => self.install(source),
            Err(err) => {
                match &err {
                    OpenError::PasswordRequired => {
                        self.emit(ViewerEvent::PasswordRequired { rejected: false })
                    }
                    OpenError::InvalidPassword => {
                        self.emit(ViewerEvent::PasswordRequired { rejected: true })
                    }
                    OpenError::Document { .. } => {
                        self.emit(ViewerEvent::LoadError(err.to_string()))
                    }
                }
                warn!(%err, "failed to open document");
                Err(err.into())
            }
        }
    }

    pub async fn open_with_password<P>(
        &mut self,
        provider: &P,
        path: &Path,
        password: impl Into<String>,
    ) -> Result<(), SessionError>
    where
        P: DocumentProvider + ?Sized,
    {
        self.config.password = Some(password.into());
        self.open_with(provider, path).await
    }

    fn install(&mut self, source: Box<dyn PageSource>) -> Result<(), SessionError> {
        let info = source.info().clone();
        let layout = DocumentLayout::compute(
            &info.page_sizes,
            self.viewport.size,
            &self.config.layout_options(),
        );
        let dispatcher = RenderDispatcher::spawn(source).map_err(SessionError::Worker)?;
        let limits = &self.config.limits;
        let cache = TileCache::new(limits.cache_size, limits.thumbnail_cache_size);
        let page_count = info.page_count();
        info!(path = ?info.path, page_count, "document loaded");

        self.emit(ViewerEvent::LoadComplete {
            page_count,
            metadata: info.metadata.clone(),
        });
        let default_page = self.config.default_page.min(page_count.saturating_sub(1));
        self.loaded = Some(LoadedDocument {
            info,
            layout,
            dispatcher,
            cache,
            failed_pages: HashSet::new(),
            current_page: default_page,
            active: HashSet::new(),
            printing: None,
            rendered_once: false,
        });
        self.viewport.scroll = Point::default();
        self.jump_to(default_page);
        self.emit(ViewerEvent::PageChanged {
            page: default_page,
            page_count,
        });
        Ok(())
    }

    /// Releases the document, the worker and every cached tile.
    pub fn close(&mut self) {
        if let Some(mut document) = self.loaded.take() {
            document.dispatcher.shutdown();
            document.cache.clear();
            debug!(path = ?document.info.path, "document closed");
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    pub fn info(&self) -> Option<&DocumentInfo> {
        self.loaded.as_ref().map(|document| &document.info)
    }

    pub fn layout(&self) -> Option<&DocumentLayout> {
        self.loaded.as_ref().map(|document| &document.layout)
    }

    pub fn cache(&self) -> Option<&TileCache> {
        self.loaded.as_ref().map(|document| &document.cache)
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn zoom(&self) -> f32 {
        self.viewport.zoom
    }

    pub fn page_count(&self) -> usize {
        self.loaded
            .as_ref()
            .map_or(0, |document| document.info.page_count())
    }

    pub fn current_page(&self) -> usize {
        self.loaded.as_ref().map_or(0, |document| document.current_page)
    }

    pub fn page_has_error(&self, page: usize) -> bool {
        self.loaded
            .as_ref()
            .is_some_and(|document| document.failed_pages.contains(&page))
    }

    pub fn stats(&self) -> DispatcherStats {
        self.loaded
            .as_ref()
            .map(|document| document.dispatcher.stats())
            .unwrap_or_default()
    }

    /// True once nothing is queued, rendering or waiting to be pumped.
    pub fn is_idle(&self) -> bool {
        self.loaded
            .as_ref()
            .map_or(true, |document| document.dispatcher.is_idle())
    }

    /// Recomputes the layout for a new viewport size, keeping the relative
    /// scroll position.
    pub fn resize(&mut self, size: Size) {
        let position = self.position_offset();
        self.viewport.size = size;
        if let Some(document) = self.loaded.as_mut() {
            document.layout = DocumentLayout::compute(
                &document.info.page_sizes,
                size,
                &self.config.layout_options(),
            );
        }
        self.set_position_offset(position);
    }

    pub fn scroll_to(&mut self, scroll: Point) {
        self.apply_scroll(scroll);
        self.refresh_current_page();
        self.load_pages();
    }

    pub fn scroll_by(&mut self, dx: f32, dy: f32) {
        let scroll = self.viewport.scroll;
        self.scroll_to(Point::new(scroll.x + dx, scroll.y + dy));
    }

    pub fn zoom_to(&mut self, zoom: f32) {
        let size = self.viewport.size;
        self.zoom_center_on(Point::new(size.width / 2.0, size.height / 2.0), zoom);
    }

    /// Zooms so the document point under `focal` (viewport coordinates)
    /// stays put.
    pub fn zoom_center_on(&mut self, focal: Point, zoom: f32) {
        let zoom = self.config.zoom.clamp(zoom);
        let ratio = zoom / self.viewport.zoom;
        let scroll = self.viewport.scroll;
        self.viewport.zoom = zoom;
        self.scroll_to(Point::new(
            (scroll.x + focal.x) * ratio - focal.x,
            (scroll.y + focal.y) * ratio - focal.y,
        ));
    }

    pub fn reset_zoom(&mut self) {
        self.zoom_to(self.config.zoom.min);
    }

    /// Scrolls the leading edge of `page` to the top (or left) of the
    /// viewport and makes it the current page.
    pub fn jump_to(&mut self, page: usize) {
        let Some(document) = self.loaded.as_ref() else {
            return;
        };
        let page = page.min(document.info.page_count().saturating_sub(1));
        let Some(bounds) = document.layout.page_bounds(page, self.viewport.zoom) else {
            return;
        };
        let orientation = document.layout.orientation();
        let scroll = self.viewport.scroll;
        let target = match orientation {
            Orientation::Vertical => Point::new(scroll.x, bounds.top),
            Orientation::Horizontal => Point::new(bounds.left, scroll.y),
        };
        self.apply_scroll(target);
        self.set_current_page(page);
        self.load_pages();
    }

    /// Scroll position along the scroll axis as a fraction of the scrollable
    /// range.
    pub fn position_offset(&self) -> f32 {
        let Some(document) = self.loaded.as_ref() else {
            return 0.0;
        };
        let orientation = document.layout.orientation();
        let range =
            document.layout.length(self.viewport.zoom) - orientation.primary(self.viewport.size);
        if range <= 0.0 {
            return 0.0;
        }
        (orientation.primary_of(self.viewport.scroll) / range).clamp(0.0, 1.0)
    }

    pub fn set_position_offset(&mut self, position: f32) {
        let Some(document) = self.loaded.as_ref() else {
            return;
        };
        let orientation = document.layout.orientation();
        let range = (document.layout.length(self.viewport.zoom)
            - orientation.primary(self.viewport.size))
        .max(0.0);
        let primary = position.clamp(0.0, 1.0) * range;
        let scroll = self.viewport.scroll;
        let target = match orientation {
            Orientation::Vertical => Point::new(scroll.x, primary),
            Orientation::Horizontal => Point::new(primary, scroll.y),
        };
        self.scroll_to(target);
    }

    /// Page shown at `position` (a fraction of the whole strip).
    pub fn page_at_position_offset(&self, position: f32) -> usize {
        self.loaded.as_ref().map_or(0, |document| {
            let zoom = self.viewport.zoom;
            let offset = document.layout.length(zoom) * position.clamp(0.0, 1.0);
            document.layout.page_at_offset(offset, zoom)
        })
    }

    /// Page and page-relative position under a viewport point, if the point
    /// lands on a page.
    pub fn hit_test(&self, point: Point) -> Option<PagePoint> {
        let document = self.loaded.as_ref()?;
        CoordinateMapper::new(&document.layout, self.viewport.scroll, self.viewport.zoom)
            .screen_to_document(point)
            .filter(PagePoint::is_inside)
    }

    /// Viewport rectangle a tile covers at the current scroll and zoom.
    pub fn tile_placement(&self, key: &TileKey) -> Option<Rect> {
        let document = self.loaded.as_ref()?;
        let mapper =
            CoordinateMapper::new(&document.layout, self.viewport.scroll, self.viewport.zoom);
        let rect = mapper.from_unit_rect(key.page, &key.rect)?;
        let origin = mapper.to_screen(Point::new(rect.left, rect.top));
        Some(Rect::new(
            origin.x,
            origin.y,
            origin.x + rect.width(),
            origin.y + rect.height(),
        ))
    }

    /// Cached tiles overlapping the viewport in paint order: thumbnails
    /// first, then parts from oldest to newest.
    pub fn resident_tiles(&self) -> Vec<&Tile> {
        let Some(document) = self.loaded.as_ref() else {
            return Vec::new();
        };
        let visible = self.viewport.visible_rect();
        let mapper =
            CoordinateMapper::new(&document.layout, self.viewport.scroll, self.viewport.zoom);
        let on_screen = |tile: &&Tile| {
            mapper
                .from_unit_rect(tile.key.page, &tile.key.rect)
                .is_some_and(|rect| rect.intersects(&visible))
        };

        let mut tiles: Vec<&Tile> = document.cache.thumbnails().filter(on_screen).collect();
        tiles.sort_by_key(|tile| tile.key.page);
        let mut parts: Vec<&Tile> = document.cache.parts().filter(on_screen).collect();
        parts.sort_by_key(|tile| tile.cache_order);
        tiles.extend(parts);
        tiles
    }

    /// Plans the tiles for the current viewport, keeps the cached ones alive
    /// and queues the rest.
    pub fn load_pages(&mut self) {
        let Some(document) = self.loaded.as_mut() else {
            return;
        };
        self.generation += 1;
        let generation = self.generation;
        document.dispatcher.supersede(generation);

        let visible = self.viewport.visible_rect();
        let zoom = self.viewport.zoom;
        let planner = TilePlanner::new(&self.config.limits);
        let plan = planner.plan(&document.layout, &visible, zoom, &document.failed_pages);
        let evicted = document.cache.evict_except(plan.iter().copied());
        document.active = plan.iter().copied().collect();

        let mut queued = 0;
        for (priority, key) in plan.into_iter().enumerate() {
            let cache_order = next_cache_order();
            if document.cache.touch(&key, cache_order) {
                continue;
            }
            let Some((raster_width, raster_height)) =
                planner.raster_size(&document.layout, &key, zoom)
            else {
                continue;
            };
            let outcome = document.dispatcher.submit(RenderRequest {
                key,
                priority,
                generation,
                cache_order,
                raster_width,
                raster_height,
                for_printing: false,
                render_annotations: self.config.render_annotations,
            });
            if outcome == SubmitOutcome::Accepted {
                queued += 1;
            }
        }
        debug!(
            generation,
            active = document.active.len(),
            queued,
            evicted,
            "planned viewport"
        );
    }

    /// Renders every page once at printing resolution. The tiles bypass the
    /// cache and arrive together in [`ViewerEvent::ReadyForPrinting`].
    pub fn load_pages_for_printing(&mut self) -> Result<usize, SessionError> {
        let document = self.loaded.as_mut().ok_or(SessionError::NotLoaded)?;
        let planner = TilePlanner::new(&self.config.limits);
        let mut job = PrintJob::default();

        for page in document.layout.pages() {
            if document.failed_pages.contains(&page.page_index) || page.size().is_empty() {
                continue;
            }
            let key = planner.printing_key(page.page_index, page.size());
            let outcome = document.dispatcher.submit(printing_request(
                key,
                self.generation,
                self.config.render_annotations,
            ));
            if outcome != SubmitOutcome::Closed {
                job.pending.insert(page.page_index);
            }
        }

        let requested = job.pending.len();
        info!(pages = requested, "rendering pages for printing");
        document.printing = Some(job);
        self.finish_printing_if_done();
        Ok(requested)
    }

    pub fn stop_rendering(&mut self) {
        if let Some(document) = self.loaded.as_ref() {
            document.dispatcher.stop();
        }
    }

    /// Restarts delivery and replans, since results produced while stopped
    /// were released. Printing pages dropped meanwhile are queued again.
    pub fn resume_rendering(&mut self) {
        if let Some(document) = self.loaded.as_mut() {
            document.dispatcher.start();
            let deferred = document
                .printing
                .as_mut()
                .map(|job| std::mem::take(&mut job.deferred))
                .unwrap_or_default();
            if !deferred.is_empty() {
                debug!(pages = deferred.len(), "resubmitting printing pages");
            }
            for key in deferred {
                document.dispatcher.submit(printing_request(
                    key,
                    self.generation,
                    self.config.render_annotations,
                ));
            }
        }
        self.load_pages();
    }

    /// Folds every finished render into the session without blocking.
    /// Returns how many results were handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Some(outcome) = self
            .loaded
            .as_ref()
            .and_then(|document| document.dispatcher.try_recv())
        {
            self.handle_outcome(outcome);
            handled += 1;
        }
        handled
    }

    /// Waits up to `timeout` for the first result, then drains the rest.
    pub fn pump_timeout(&mut self, timeout: Duration) -> usize {
        let Some(first) = self
            .loaded
            .as_ref()
            .and_then(|document| document.dispatcher.recv_timeout(timeout))
        else {
            return 0;
        };
        self.handle_outcome(first);
        1 + self.pump()
    }

    /// Pumps until the worker has nothing left to do. Returns `false` if the
    /// deadline passed first.
    pub fn pump_until_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump_timeout(PUMP_SLICE);
            if self.is_idle() {
                self.pump();
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
        }
    }

    fn handle_outcome(&mut self, outcome: RenderOutcome) {
        match outcome {
            RenderOutcome::Rendered { tile, generation } => self.accept_tile(tile, generation),
            RenderOutcome::PageFailed(err) => {
                let Some(document) = self.loaded.as_mut() else {
                    return;
                };
                if let Some(job) = document.printing.as_mut() {
                    job.pending.remove(&err.page);
                }
                if document.failed_pages.insert(err.page) {
                    self.emit(ViewerEvent::PageRenderError {
                        page: err.page,
                        reason: err.reason,
                    });
                }
                self.finish_printing_if_done();
            }
            RenderOutcome::Dropped { key, reason } => self.printing_dropped(key, reason),
        }
    }

    /// A printing page ended without a tile. Pages dropped by a stop wait
    /// for `resume_rendering` (or go straight back if rendering already
    /// resumed); abandoned pages are left out of the job.
    fn printing_dropped(&mut self, key: TileKey, reason: DropReason) {
        let generation = self.generation;
        let render_annotations = self.config.render_annotations;
        let Some(document) = self.loaded.as_mut() else {
            return;
        };
        let Some(job) = document.printing.as_mut() else {
            return;
        };
        if !job.pending.contains(&key.page) {
            return;
        }
        match reason {
            DropReason::Stopped if document.dispatcher.is_running() => {
                let outcome = document.dispatcher.submit(printing_request(
                    key,
                    generation,
                    render_annotations,
                ));
                if outcome == SubmitOutcome::Closed {
                    job.pending.remove(&key.page);
                }
            }
            DropReason::Stopped => job.deferred.push(key),
            DropReason::Abandoned => {
                warn!(page = key.page, "page left out of printing");
                job.pending.remove(&key.page);
                job.deferred.retain(|deferred| deferred.page != key.page);
            }
        }
        self.finish_printing_if_done();
    }

    fn accept_tile(&mut self, tile: Tile, generation: u64) {
        let visible = self.viewport.visible_rect();
        let Some(document) = self.loaded.as_mut() else {
            return;
        };
        if !document.rendered_once {
            document.rendered_once = true;
            let page_count = document.info.page_count();
            self.emit(ViewerEvent::FirstRender { page_count });
        }
        let Some(document) = self.loaded.as_mut() else {
            return;
        };

        let key = tile.key;
        if tile.for_printing {
            if let Some(job) = document.printing.as_mut() {
                job.pending.remove(&key.page);
                job.tiles.insert(key.page, tile);
            }
            self.emit(ViewerEvent::TileReady {
                key,
                for_printing: true,
            });
            self.finish_printing_if_done();
            return;
        }

        let on_screen =
            CoordinateMapper::new(&document.layout, self.viewport.scroll, self.viewport.zoom)
                .from_unit_rect(key.page, &key.rect)
                .is_some_and(|rect| rect.intersects(&visible));
        let outcome = document.cache.put(tile);
        debug!(page = key.page, generation, ?outcome, on_screen, "tile rendered");
        if matches!(outcome, PutOutcome::Full) {
            warn!(page = key.page, "tile cache full of protected tiles");
        }
        if outcome.is_stored() && on_screen {
            self.emit(ViewerEvent::TileReady {
                key,
                for_printing: false,
            });
        }
    }

    fn finish_printing_if_done(&mut self) {
        let Some(document) = self.loaded.as_mut() else {
            return;
        };
        if !document
            .printing
            .as_ref()
            .is_some_and(|job| job.pending.is_empty())
        {
            return;
        }
        let Some(job) = document.printing.take() else {
            return;
        };
        let mut tiles: Vec<Tile> = job.tiles.into_values().collect();
        tiles.sort_by_key(|tile| tile.key.page);
        info!(pages = tiles.len(), "pages ready for printing");
        self.emit(ViewerEvent::ReadyForPrinting { tiles });
    }

    fn apply_scroll(&mut self, scroll: Point) {
        let extent = self
            .loaded
            .as_ref()
            .map(|document| document.layout.extent(self.viewport.zoom))
            .unwrap_or(Size::ZERO);
        let size = self.viewport.size;
        self.viewport.scroll = Point::new(
            clamp_axis(scroll.x, extent.width, size.width),
            clamp_axis(scroll.y, extent.height, size.height),
        );
    }

    /// Current page is the one under the centre of the viewport.
    fn refresh_current_page(&mut self) {
        let Some(document) = self.loaded.as_ref() else {
            return;
        };
        let orientation = document.layout.orientation();
        let center = orientation.primary_of(self.viewport.scroll)
            + orientation.primary(self.viewport.size) / 2.0;
        let page = document.layout.page_at_offset(center, self.viewport.zoom);
        self.set_current_page(page);
    }

    fn set_current_page(&mut self, page: usize) {
        let Some(document) = self.loaded.as_mut() else {
            return;
        };
        if document.current_page == page {
            return;
        }
        document.current_page = page;
        let page_count = document.info.page_count();
        self.emit(ViewerEvent::PageChanged { page, page_count });
    }

    fn emit(&self, event: ViewerEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}

impl Drop for ViewerSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn printing_request(key: TileKey, generation: u64, render_annotations: bool) -> RenderRequest {
    RenderRequest {
        key,
        priority: key.page,
        generation,
        cache_order: next_cache_order(),
        raster_width: key.width,
        raster_height: key.height,
        for_printing: true,
        render_annotations,
    }
}

/// Keeps the viewport inside the content, centring content that is smaller
/// than the viewport.
fn clamp_axis(value: f32, content: f32, view: f32) -> f32 {
    if content <= view {
        (content - view) / 2.0
    } else {
        value.clamp(0.0, content - view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeProvider, Gate};
    use std::path::PathBuf;
    use std::sync::atomic::Ordering;

    const WAIT: Duration = Duration::from_secs(5);

    fn path() -> PathBuf {
        PathBuf::from("/tmp/fake.pdf")
    }

    fn session(config: ViewerConfig) -> (ViewerSession, Receiver<ViewerEvent>) {
        ViewerSession::new(config, Size::new(300.0, 400.0)).unwrap()
    }

    async fn opened(provider: &FakeProvider) -> (ViewerSession, Receiver<ViewerEvent>) {
        let (mut session, events) = session(ViewerConfig::default());
        session.open_with(provider, &path()).await.unwrap();
        (session, events)
    }

    fn drain(events: &Receiver<ViewerEvent>) -> Vec<ViewerEvent> {
        events.drain().collect()
    }

    #[tokio::test]
    async fn password_is_requested_then_accepted() {
        let mut provider = FakeProvider::new(2);
        provider.password = Some("hunter2".into());
        let (mut session, events) = session(ViewerConfig::default());

        let err = session.open_with(&provider, &path()).await.unwrap_err();
        assert!(matches!(err, SessionError::Open(OpenError::PasswordRequired)));
        assert!(!session.is_loaded());

        let err = session
            .open_with_password(&provider, &path(), "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Open(OpenError::InvalidPassword)));

        session
            .open_with_password(&provider, &path(), "hunter2")
            .await
            .unwrap();
        let events = drain(&events);
        assert!(matches!(events[0], ViewerEvent::PasswordRequired { rejected: false }));
        assert!(matches!(events[1], ViewerEvent::PasswordRequired { rejected: true }));
        assert!(matches!(events[2], ViewerEvent::LoadComplete { page_count: 2, .. }));
        assert_eq!(session.page_count(), 2);
    }

    #[tokio::test]
    async fn broken_source_reports_load_error() {
        let provider = FakeProvider::new(1);
        let (mut session, events) = session(ViewerConfig::default());
        let missing = PathBuf::from("/tmp/missing.pdf");

        assert!(session.open_with(&provider, &missing).await.is_err());
        assert!(matches!(drain(&events)[0], ViewerEvent::LoadError(_)));
        assert!(session.resident_tiles().is_empty());
    }

    #[tokio::test]
    async fn open_renders_visible_tiles() {
        let provider = FakeProvider::new(3);
        let (mut session, events) = opened(&provider).await;
        assert!(session.pump_until_idle(WAIT));

        // Two thumbnails, four parts of page 0 and the top row of page 1.
        let cache = session.cache().unwrap();
        assert_eq!(cache.thumbnail_len(), 2);
        assert_eq!(cache.len(), 6);

        let events = drain(&events);
        assert!(matches!(events[0], ViewerEvent::LoadComplete { page_count: 3, .. }));
        assert!(matches!(events[1], ViewerEvent::PageChanged { page: 0, page_count: 3 }));
        let first_renders = events
            .iter()
            .filter(|event| matches!(event, ViewerEvent::FirstRender { .. }))
            .count();
        assert_eq!(first_renders, 1);

        // Page 1 parts sit in the preload margin, not on screen.
        let ready: Vec<TileKey> = events
            .iter()
            .filter_map(|event| match event {
                ViewerEvent::TileReady { key, .. } => Some(*key),
                _ => None,
            })
            .collect();
        assert_eq!(ready.iter().filter(|key| !key.thumbnail).count(), 4);

        // Parts see the whole 300x400 page raster shifted to their cell.
        let placements = provider.placements.lock().clone();
        assert_eq!(placements.len(), 8);
        for (_, placement) in &placements {
            assert!(matches!(
                (placement.width, placement.height),
                (300, 400) | (90, 120)
            ));
            assert!(placement.x <= 0 && placement.y <= 0);
        }
        assert!(placements
            .iter()
            .any(|(page, placement)| *page == 0 && (placement.x, placement.y) == (-256, -256)));

        let resident = session.resident_tiles();
        assert!(resident[0].key.thumbnail);
        assert!(resident.iter().skip(1).all(|tile| !tile.key.thumbnail));
        let placement = session.tile_placement(&resident[0].key).unwrap();
        assert_eq!(placement, Rect::new(0.0, 0.0, 300.0, 400.0));
    }

    #[tokio::test]
    async fn stopped_render_never_reaches_cache() {
        let gate = Gate::new();
        let mut provider = FakeProvider::new(10);
        provider.gate = Some(gate.clone());
        let (mut session, events) = opened(&provider).await;

        gate.wait_entered();
        session.stop_rendering();
        session.jump_to(8);
        gate.open();
        assert!(session.pump_until_idle(WAIT));

        assert!(session.cache().unwrap().is_empty());
        assert!(!drain(&events)
            .iter()
            .any(|event| matches!(event, ViewerEvent::TileReady { .. })));
    }

    #[tokio::test]
    async fn off_screen_result_is_cached_silently() {
        let gate = Gate::new();
        let mut provider = FakeProvider::new(10);
        provider.gate = Some(gate.clone());
        let (mut session, events) = opened(&provider).await;

        gate.wait_entered();
        let first = TilePlanner::new(&session.config().limits)
            .thumbnail_key(0, session.layout().unwrap().page(0).unwrap().size());
        session.jump_to(8);
        drain(&events);
        gate.open();
        assert!(session.pump_until_idle(WAIT));

        assert!(session.cache().unwrap().contains(&first));
        assert!(!drain(&events).iter().any(
            |event| matches!(event, ViewerEvent::TileReady { key, .. } if *key == first)
        ));
    }

    #[tokio::test]
    async fn replanning_does_not_render_twice() {
        let gate = Gate::new();
        let mut provider = FakeProvider::new(3);
        provider.gate = Some(gate.clone());
        let calls = provider.calls.clone();
        let (mut session, _events) = opened(&provider).await;

        gate.wait_entered();
        session.load_pages();
        session.load_pages();
        gate.open();
        assert!(session.pump_until_idle(WAIT));

        assert_eq!(calls.load(Ordering::SeqCst), 8);
        assert_eq!(session.cache().unwrap().len(), 6);

        // A cached plan only touches entries.
        session.load_pages();
        assert!(session.pump_until_idle(WAIT));
        assert_eq!(calls.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn failing_page_is_reported_once_and_excluded() {
        let mut provider = FakeProvider::new(3);
        provider.failing = vec![0];
        let (mut session, events) = opened(&provider).await;
        assert!(session.pump_until_idle(WAIT));

        assert!(session.page_has_error(0));
        let errors = drain(&events)
            .into_iter()
            .filter(|event| matches!(event, ViewerEvent::PageRenderError { page: 0, .. }))
            .count();
        assert_eq!(errors, 1);

        session.load_pages();
        assert!(session.pump_until_idle(WAIT));
        assert!(session
            .cache()
            .unwrap()
            .parts()
            .chain(session.cache().unwrap().thumbnails())
            .all(|tile| tile.key.page != 0));
    }

    #[tokio::test]
    async fn navigation_tracks_current_page() {
        let provider = FakeProvider::new(5);
        let (mut session, events) = opened(&provider).await;
        drain(&events);

        session.jump_to(3);
        assert_eq!(session.current_page(), 3);
        assert_eq!(session.viewport().scroll, Point::new(0.0, 1200.0));
        assert!(matches!(
            drain(&events)[..],
            [ViewerEvent::PageChanged { page: 3, page_count: 5 }]
        ));

        session.scroll_by(0.0, 10_000.0);
        assert_eq!(session.viewport().scroll.y, 1600.0);
        assert_eq!(session.current_page(), 4);
        assert_eq!(session.position_offset(), 1.0);
        assert_eq!(session.page_at_position_offset(0.5), 2);

        session.zoom_to(10.0);
        assert_eq!(session.zoom(), 3.0);
        session.reset_zoom();
        assert_eq!(session.zoom(), 1.0);

        let hit = session.hit_test(Point::new(150.0, 200.0)).unwrap();
        assert_eq!(hit.page, session.current_page());
    }

    #[tokio::test]
    async fn zoom_keeps_focal_point() {
        let provider = FakeProvider::new(5);
        let (mut session, _events) = opened(&provider).await;
        session.jump_to(1);
        let before = session.hit_test(Point::new(150.0, 200.0)).unwrap();

        session.zoom_center_on(Point::new(150.0, 200.0), 2.0);
        let after = session.hit_test(Point::new(150.0, 200.0)).unwrap();
        assert_eq!(before.page, after.page);
        assert!((before.x - after.x).abs() < 1e-4);
        assert!((before.y - after.y).abs() < 1e-4);
    }

    #[tokio::test]
    async fn printing_collects_every_page_outside_the_cache() {
        let provider = FakeProvider::new(3);
        let (mut session, events) = opened(&provider).await;
        assert!(session.pump_until_idle(WAIT));
        drain(&events);

        assert_eq!(session.load_pages_for_printing().unwrap(), 3);
        assert!(session.pump_until_idle(WAIT));

        let tiles = drain(&events)
            .into_iter()
            .find_map(|event| match event {
                ViewerEvent::ReadyForPrinting { tiles } => Some(tiles),
                _ => None,
            })
            .unwrap();
        let pages: Vec<usize> = tiles.iter().map(|tile| tile.key.page).collect();
        assert_eq!(pages, vec![0, 1, 2]);
        assert!(tiles.iter().all(|tile| tile.for_printing));
        // 300x400 pages at 0.75.
        assert_eq!((tiles[0].key.width, tiles[0].key.height), (225, 300));
        assert!(!session.cache().unwrap().contains(&tiles[0].key));
    }

    fn printed_pages(events: &Receiver<ViewerEvent>) -> Option<Vec<usize>> {
        drain(events).into_iter().find_map(|event| match event {
            ViewerEvent::ReadyForPrinting { tiles } => {
                Some(tiles.iter().map(|tile| tile.key.page).collect())
            }
            _ => None,
        })
    }

    #[tokio::test]
    async fn printing_requested_while_stopped_completes_after_resume() {
        let gate = Gate::new();
        let mut provider = FakeProvider::new(3);
        provider.gate = Some(gate.clone());
        let (mut session, events) = opened(&provider).await;

        gate.wait_entered();
        session.stop_rendering();
        assert_eq!(session.load_pages_for_printing().unwrap(), 3);
        gate.open();
        assert!(session.pump_until_idle(WAIT));
        assert_eq!(printed_pages(&events), None);

        session.resume_rendering();
        assert!(session.pump_until_idle(WAIT));
        assert_eq!(printed_pages(&events), Some(vec![0, 1, 2]));
    }

    #[tokio::test]
    async fn abandoned_printing_page_is_left_out() {
        let gate = Gate::new();
        let mut provider = FakeProvider::new(3);
        provider.gate = Some(gate.clone());
        let (mut session, events) = opened(&provider).await;

        gate.wait_entered();
        session.stop_rendering();
        session.load_pages_for_printing().unwrap();
        gate.open();
        assert!(session.pump_until_idle(WAIT));

        let page = session.layout().unwrap().page(1).unwrap().size();
        let key = TilePlanner::new(&session.config().limits).printing_key(1, page);
        session.handle_outcome(RenderOutcome::Dropped {
            key,
            reason: DropReason::Abandoned,
        });
        assert_eq!(printed_pages(&events), None);

        session.resume_rendering();
        assert!(session.pump_until_idle(WAIT));
        assert_eq!(printed_pages(&events), Some(vec![0, 2]));
    }

    #[tokio::test]
    async fn plan_larger_than_cache_keeps_every_planned_tile() {
        let provider = FakeProvider::new(3);
        let (mut session, _events) =
            ViewerSession::new(ViewerConfig::default(), Size::new(2400.0, 3600.0)).unwrap();
        session.open_with(&provider, &path()).await.unwrap();
        assert!(session.pump_until_idle(WAIT));

        // Page 0 and the top of page 1 make 150 cells; the closest 120 fit.
        let cache = session.cache().unwrap();
        assert_eq!(cache.len(), cache.capacity());
        assert_eq!(cache.thumbnail_len(), 2);
        assert!(cache.thumbnail_len() <= cache.thumbnail_capacity());
        assert!(cache
            .parts()
            .chain(cache.thumbnails())
            .all(|tile| cache.is_protected(&tile.key)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2 + 120);
        assert_eq!(session.stats().rasterized, 2 + 120);

        session.load_pages();
        assert!(session.pump_until_idle(WAIT));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2 + 120);
    }

    #[tokio::test]
    async fn printing_requires_a_document() {
        let (mut session, _events) = session(ViewerConfig::default());
        assert!(matches!(
            session.load_pages_for_printing(),
            Err(SessionError::NotLoaded)
        ));
    }

    #[tokio::test]
    async fn resize_refits_pages() {
        let provider = FakeProvider::new(2);
        let (mut session, _events) = opened(&provider).await;
        session.resize(Size::new(600.0, 400.0));
        let page = session.layout().unwrap().page(0).unwrap();
        assert_eq!(page.width, 600.0);
        assert_eq!(page.height, 800.0);
    }

    #[tokio::test]
    async fn close_releases_everything() {
        let provider = FakeProvider::new(2);
        let (mut session, _events) = opened(&provider).await;
        assert!(session.pump_until_idle(WAIT));
        session.close();

        assert!(!session.is_loaded());
        assert!(session.cache().is_none());
        assert!(session.resident_tiles().is_empty());
        assert!(session.is_idle());
    }
}
