//! Single background worker that owns the document and rasterizes tiles
//! one at a time.
//!
//! Requests travel to the worker over a FIFO channel and finished tiles come
//! back over a second channel; the interactive side drains that channel and
//! is the only writer of the cache. A request for a key that is already
//! queued or being rendered is dropped at submission; the queued copy adopts
//! the newer generation so a replan does not strand it.
//!
//! Printing requests that end without a tile are reported as
//! [`RenderOutcome::Dropped`] so their owner can stop waiting or retry.

use std::collections::{HashMap, HashSet};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::decode::{PageSource, PixelRect};
use crate::error::PageRenderingError;
use crate::geometry::Rect;
use crate::tile::{Bitmap, Tile, TileKey};

#[derive(Debug, Clone, Copy)]
pub struct RenderRequest {
    pub key: TileKey,
    /// Position in the plan that produced it. The queue is FIFO, so this
    /// matches submission order and only shows up in traces.
    pub priority: usize,
    /// Viewport generation that asked for it.
    pub generation: u64,
    pub cache_order: u64,
    /// Pixel size of the full-page raster the key's rectangle is cut from.
    pub raster_width: u32,
    pub raster_height: u32,
    pub for_printing: bool,
    pub render_annotations: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    /// Same key already queued or rendering.
    Deduplicated,
    /// Worker has shut down.
    Closed,
}

#[derive(Debug)]
pub enum RenderOutcome {
    Rendered { tile: Tile, generation: u64 },
    PageFailed(PageRenderingError),
    /// A printing request finished without a tile. View requests are not
    /// reported; the next plan asks for them again.
    Dropped { key: TileKey, reason: DropReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Dequeued or finished while the dispatcher was stopped.
    Stopped,
    /// The bitmap could not be allocated or the page had already failed.
    Abandoned,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub rasterized: u64,
    pub discarded: u64,
    pub superseded: u64,
    pub abandoned: u64,
}

enum Job {
    Render(RenderRequest),
    Shutdown,
}

#[derive(Default)]
struct Shared {
    /// Queued or rendering keys and the newest generation that wants them.
    in_flight: Mutex<HashMap<TileKey, u64>>,
    /// Accepted requests whose outcome has not been sent yet.
    outstanding: AtomicUsize,
    running: AtomicBool,
    live_generation: AtomicU64,
    rasterized: AtomicU64,
    discarded: AtomicU64,
    superseded: AtomicU64,
    abandoned: AtomicU64,
}

pub struct RenderDispatcher {
    jobs: Sender<Job>,
    results: Receiver<RenderOutcome>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl RenderDispatcher {
    pub fn spawn(source: Box<dyn PageSource>) -> io::Result<Self> {
        let (jobs, job_rx) = flume::unbounded();
        let (result_tx, results) = flume::unbounded();
        let shared = Arc::new(Shared::default());
        shared.running.store(true, Ordering::SeqCst);

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("pdftile-render".into())
            .spawn(move || run_worker(source, job_rx, result_tx, worker_shared))?;

        Ok(Self {
            jobs,
            results,
            shared,
            worker: Some(worker),
        })
    }

    /// Queues a request without blocking.
    pub fn submit(&self, request: RenderRequest) -> SubmitOutcome {
        {
            let mut in_flight = self.shared.in_flight.lock();
            if let Some(generation) = in_flight.get_mut(&request.key) {
                *generation = (*generation).max(request.generation);
                return SubmitOutcome::Deduplicated;
            }
            in_flight.insert(request.key, request.generation);
        }
        self.shared.outstanding.fetch_add(1, Ordering::SeqCst);
        if self.jobs.send(Job::Render(request)).is_err() {
            self.shared.in_flight.lock().remove(&request.key);
            self.shared.outstanding.fetch_sub(1, Ordering::SeqCst);
            return SubmitOutcome::Closed;
        }
        SubmitOutcome::Accepted
    }

    /// Queued view requests older than `generation` are skipped unrendered.
    pub fn supersede(&self, generation: u64) {
        self.shared
            .live_generation
            .fetch_max(generation, Ordering::SeqCst);
    }

    /// Results produced from now on are released instead of delivered.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
    }

    pub fn start(&self) {
        self.shared.running.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn is_in_flight(&self, key: &TileKey) -> bool {
        self.shared.in_flight.lock().contains_key(key)
    }

    /// Requests accepted but not yet resolved.
    pub fn in_flight(&self) -> usize {
        self.shared.outstanding.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight() == 0 && self.results.is_empty()
    }

    pub fn try_recv(&self) -> Option<RenderOutcome> {
        self.results.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<RenderOutcome> {
        self.results.recv_timeout(timeout).ok()
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            rasterized: self.shared.rasterized.load(Ordering::Relaxed),
            discarded: self.shared.discarded.load(Ordering::Relaxed),
            superseded: self.shared.superseded.load(Ordering::Relaxed),
            abandoned: self.shared.abandoned.load(Ordering::Relaxed),
        }
    }

    /// Stops delivery, lets the worker finish its current call and joins it.
    pub fn shutdown(&mut self) {
        self.stop();
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = self.jobs.send(Job::Shutdown);
        if worker.join().is_err() {
            warn!("render worker panicked");
        }
        // Anything still queued for the consumer belongs to the dead session.
        let dropped = self.results.drain().count();
        if dropped > 0 {
            debug!(dropped, "released undelivered render results");
        }
    }
}

impl Drop for RenderDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Places a page rendered at `raster_width` x `raster_height` so that the
/// unit sub-rectangle `rect` starts at the bitmap origin.
pub fn placement_for(rect: &Rect, raster_width: u32, raster_height: u32) -> PixelRect {
    PixelRect {
        x: -(rect.left * raster_width as f32).round() as i32,
        y: -(rect.top * raster_height as f32).round() as i32,
        width: clamp_i32(raster_width),
        height: clamp_i32(raster_height),
    }
}

fn clamp_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn run_worker(
    mut source: Box<dyn PageSource>,
    jobs: Receiver<Job>,
    results: Sender<RenderOutcome>,
    shared: Arc<Shared>,
) {
    let mut failed_pages = HashSet::new();
    info!(pages = source.info().page_count(), "render worker started");

    for job in jobs.iter() {
        let request = match job {
            Job::Render(request) => request,
            Job::Shutdown => break,
        };

        let outcome = process(source.as_mut(), &request, &shared, &mut failed_pages);
        // Release the key first so the consumer may resubmit it as soon as
        // it sees the outcome.
        shared.in_flight.lock().remove(&request.key);
        let delivered = match outcome {
            Some(outcome) => results.send(outcome).is_ok(),
            None => true,
        };
        shared.outstanding.fetch_sub(1, Ordering::SeqCst);
        if !delivered {
            break;
        }
    }

    debug!("render worker stopped");
}

/// Handles one request and returns what the consumer should hear about it.
fn process(
    source: &mut dyn PageSource,
    request: &RenderRequest,
    shared: &Shared,
    failed_pages: &mut HashSet<usize>,
) -> Option<RenderOutcome> {
    let key = request.key;
    let generation = shared
        .in_flight
        .lock()
        .get(&key)
        .copied()
        .unwrap_or(request.generation);
    let dropped = |reason| {
        request
            .for_printing
            .then_some(RenderOutcome::Dropped { key, reason })
    };

    if !request.for_printing && generation < shared.live_generation.load(Ordering::SeqCst) {
        shared.superseded.fetch_add(1, Ordering::Relaxed);
        return None;
    }
    if !shared.running.load(Ordering::SeqCst) {
        shared.discarded.fetch_add(1, Ordering::Relaxed);
        return dropped(DropReason::Stopped);
    }
    if failed_pages.contains(&key.page) || key.width == 0 || key.height == 0 {
        return dropped(DropReason::Abandoned);
    }

    let mut bitmap = match Bitmap::allocate(key.width, key.height) {
        Ok(bitmap) => bitmap,
        Err(err) => {
            warn!(page = key.page, %err, "abandoning tile");
            shared.abandoned.fetch_add(1, Ordering::Relaxed);
            return dropped(DropReason::Abandoned);
        }
    };

    let placement = placement_for(&key.rect, request.raster_width, request.raster_height);
    debug!(
        page = key.page,
        priority = request.priority,
        generation,
        ?placement,
        "rasterizing"
    );
    shared.rasterized.fetch_add(1, Ordering::Relaxed);
    let rendered = panic::catch_unwind(AssertUnwindSafe(|| {
        source.rasterize(key.page, &mut bitmap, placement, request.render_annotations)
    }))
    .unwrap_or_else(|_| Err(PageRenderingError::new(key.page, "decoder panicked")));
    if let Err(err) = rendered {
        warn!(page = err.page, reason = %err.reason, "page failed to render");
        failed_pages.insert(key.page);
        return Some(RenderOutcome::PageFailed(err));
    }

    if !shared.running.load(Ordering::SeqCst) {
        debug!(page = key.page, "dispatcher stopped, releasing bitmap");
        shared.discarded.fetch_add(1, Ordering::Relaxed);
        drop(bitmap);
        return dropped(DropReason::Stopped);
    }

    Some(RenderOutcome::Rendered {
        tile: Tile {
            key,
            bitmap,
            cache_order: request.cache_order,
            for_printing: request.for_printing,
        },
        generation,
    })
}
