//! In-memory decode primitive for tests.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::{Condvar, Mutex};

use crate::decode::{DocumentInfo, DocumentMetadata, DocumentProvider, PageSource, PixelRect};
use crate::error::{OpenError, PageRenderingError};
use crate::geometry::Size;
use crate::tile::Bitmap;

const GATE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct GateState {
    entered: bool,
    open: bool,
}

/// Holds the first rasterize call until the test opens it.
#[derive(Clone, Default)]
pub struct Gate {
    inner: Arc<(Mutex<GateState>, Condvar)>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        let (state, signal) = &*self.inner;
        state.lock().open = true;
        signal.notify_all();
    }

    pub fn wait_entered(&self) {
        let (state, signal) = &*self.inner;
        let deadline = Instant::now() + GATE_TIMEOUT;
        let mut guard = state.lock();
        while !guard.entered {
            if signal.wait_until(&mut guard, deadline).timed_out() {
                panic!("rasterize was never called");
            }
        }
    }

    fn pass(&self) {
        let (state, signal) = &*self.inner;
        let deadline = Instant::now() + GATE_TIMEOUT;
        let mut guard = state.lock();
        guard.entered = true;
        signal.notify_all();
        while !guard.open {
            if signal.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
    }
}

/// Every `(page, placement)` a fake document was asked to rasterize.
pub type Placements = Arc<Mutex<Vec<(usize, PixelRect)>>>;

pub struct FakeDocument {
    info: DocumentInfo,
    failing: HashSet<usize>,
    gate: Option<Gate>,
    calls: Arc<AtomicUsize>,
    placements: Placements,
}

impl FakeDocument {
    pub fn new(pages: usize) -> Self {
        Self::with_sizes(vec![Size::new(600.0, 800.0); pages])
    }

    pub fn with_sizes(page_sizes: Vec<Size>) -> Self {
        let path = PathBuf::from("/tmp/fake.pdf");
        Self {
            info: DocumentInfo {
                path,
                metadata: DocumentMetadata {
                    title: Some("Fake".into()),
                    ..DocumentMetadata::default()
                },
                page_sizes,
            },
            failing: HashSet::new(),
            gate: None,
            calls: Arc::new(AtomicUsize::new(0)),
            placements: Placements::default(),
        }
    }

    pub fn failing_page(mut self, page: usize) -> Self {
        self.failing.insert(page);
        self
    }

    pub fn with_gate(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub fn placements(&self) -> Placements {
        Arc::clone(&self.placements)
    }
}

impl PageSource for FakeDocument {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    fn rasterize(
        &mut self,
        page: usize,
        target: &mut Bitmap,
        placement: PixelRect,
        _render_annotations: bool,
    ) -> Result<(), PageRenderingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.placements.lock().push((page, placement));
        if let Some(gate) = &self.gate {
            gate.pass();
        }
        if self.failing.contains(&page) || page >= self.info.page_count() {
            return Err(PageRenderingError::new(page, "corrupt page stream"));
        }
        target.pixels.fill(page as u8);
        Ok(())
    }
}

/// Hands out [`FakeDocument`]s, optionally behind a password.
pub struct FakeProvider {
    pub pages: usize,
    pub password: Option<String>,
    pub failing: Vec<usize>,
    pub gate: Option<Gate>,
    pub calls: Arc<AtomicUsize>,
    pub placements: Placements,
}

impl FakeProvider {
    pub fn new(pages: usize) -> Self {
        Self {
            pages,
            password: None,
            failing: Vec::new(),
            gate: None,
            calls: Arc::new(AtomicUsize::new(0)),
            placements: Placements::default(),
        }
    }
}

#[async_trait]
impl DocumentProvider for FakeProvider {
    async fn open(
        &self,
        path: &Path,
        password: Option<&str>,
    ) -> Result<Box<dyn PageSource>, OpenError> {
        if path.ends_with("missing.pdf") {
            return Err(OpenError::document(anyhow!("no such file {:?}", path)));
        }
        match (self.password.as_deref(), password) {
            (Some(_), None) => return Err(OpenError::PasswordRequired),
            (Some(expected), Some(given)) if expected != given => {
                return Err(OpenError::InvalidPassword)
            }
            _ => {}
        }
        let mut document = FakeDocument::new(self.pages);
        document.calls = Arc::clone(&self.calls);
        document.placements = Arc::clone(&self.placements);
        document.gate = self.gate.clone();
        document.failing = self.failing.iter().copied().collect();
        Ok(Box::new(document))
    }
}
