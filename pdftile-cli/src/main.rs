use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use directories::ProjectDirs;
use flume::Receiver;
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use pdftile_core::{
    DocumentMetadata, OpenError, SessionError, Size, Tile, ViewerConfig, ViewerEvent,
    ViewerSession,
};
use pdftile_render::PdfiumProvider;
use serde::Serialize;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

const CANVAS: Rgba<u8> = Rgba([48, 48, 48, 255]);

#[derive(Debug, Parser)]
#[command(name = "pdftile", version, about = "Tiled PDF rasterizer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Render one viewport of a document to a PNG file
    Render(RenderArgs),
    /// Render every page at printing resolution into a directory
    Print(PrintArgs),
    /// Show page count, metadata and page sizes
    Info(InfoArgs),
}

#[derive(Debug, Args)]
struct OpenArgs {
    /// Path to the PDF file
    file: PathBuf,

    /// Password for encrypted documents
    #[arg(long)]
    password: Option<String>,

    /// Viewer configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Give up waiting for the renderer after this many seconds
    #[arg(long, default_value_t = 60)]
    timeout: u64,
}

#[derive(Debug, Args)]
struct RenderArgs {
    #[command(flatten)]
    open: OpenArgs,

    /// Page to scroll to (0-based)
    #[arg(short, long, default_value_t = 0)]
    page: usize,

    /// Zoom factor, clamped to the configured bounds
    #[arg(short, long)]
    zoom: Option<f32>,

    /// Viewport width in pixels
    #[arg(long, default_value_t = 1024)]
    width: u32,

    /// Viewport height in pixels
    #[arg(long, default_value_t = 768)]
    height: u32,

    /// Output PNG path
    #[arg(short, long, default_value = "viewport.png")]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct PrintArgs {
    #[command(flatten)]
    open: OpenArgs,

    /// Directory receiving one PNG per page
    #[arg(short, long, default_value = "pages")]
    out_dir: PathBuf,
}

#[derive(Debug, Args)]
struct InfoArgs {
    #[command(flatten)]
    open: OpenArgs,

    /// Print machine-readable JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct InfoReport<'a> {
    path: &'a Path,
    page_count: usize,
    metadata: &'a DocumentMetadata,
    page_sizes: Vec<[f32; 2]>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let project_dirs = ProjectDirs::from("net", "pdftile", "pdftile")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    match cli.command {
        Command::Render(args) => render(args).await,
        Command::Print(args) => print(args).await,
        Command::Info(args) => show_info(args).await,
    }
}

async fn open_session(
    args: &OpenArgs,
    viewport: Size,
) -> Result<(ViewerSession, Receiver<ViewerEvent>)> {
    let mut config = match &args.config {
        Some(path) => ViewerConfig::load(path)?,
        None => ViewerConfig::default(),
    };
    if args.password.is_some() {
        config.password = args.password.clone();
    }

    let provider = PdfiumProvider::new()?;
    let (mut session, events) = ViewerSession::new(config, viewport)?;
    match session.open_with(&provider, &args.file).await {
        Ok(()) => Ok((session, events)),
        Err(SessionError::Open(OpenError::PasswordRequired)) => {
            bail!("{:?} is encrypted; pass --password", args.file)
        }
        Err(err) => Err(err).with_context(|| format!("failed to open {:?}", args.file)),
    }
}

async fn render(args: RenderArgs) -> Result<()> {
    if args.width == 0 || args.height == 0 {
        bail!("viewport must not be empty");
    }
    let viewport = Size::new(args.width as f32, args.height as f32);
    let (mut session, events) = open_session(&args.open, viewport).await?;

    session.jump_to(args.page);
    if let Some(zoom) = args.zoom {
        session.zoom_to(zoom);
    }
    wait_for_renderer(&mut session, args.open.timeout)?;
    report_errors(&events);

    let mut canvas = RgbaImage::from_pixel(args.width, args.height, CANVAS);
    let mut drawn = 0;
    for tile in session.resident_tiles() {
        let Some(placement) = session.tile_placement(&tile.key) else {
            continue;
        };
        let Some(image) = tile_image(tile) else {
            continue;
        };
        let width = placement.width().round().max(1.0) as u32;
        let height = placement.height().round().max(1.0) as u32;
        let scaled = if (width, height) == image.dimensions() {
            image
        } else {
            imageops::resize(&image, width, height, FilterType::Triangle)
        };
        imageops::overlay(
            &mut canvas,
            &scaled,
            placement.left.round() as i64,
            placement.top.round() as i64,
        );
        drawn += 1;
    }

    canvas
        .save(&args.out)
        .with_context(|| format!("failed to write {:?}", args.out))?;
    info!(
        tiles = drawn,
        page = session.current_page(),
        zoom = session.zoom(),
        out = ?args.out,
        "viewport written"
    );
    session.close();
    Ok(())
}

async fn print(args: PrintArgs) -> Result<()> {
    let (mut session, events) = open_session(&args.open, Size::new(1024.0, 768.0)).await?;
    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("failed to create {:?}", args.out_dir))?;

    session.load_pages_for_printing()?;
    wait_for_renderer(&mut session, args.open.timeout)?;

    let mut tiles = None;
    for event in events.drain() {
        match event {
            ViewerEvent::ReadyForPrinting { tiles: ready } => tiles = Some(ready),
            ViewerEvent::PageRenderError { page, reason } => {
                warn!(page, %reason, "page skipped")
            }
            _ => {}
        }
    }
    let tiles = tiles.ok_or_else(|| anyhow!("renderer stopped before all pages were ready"))?;

    for tile in &tiles {
        let Some(image) = tile_image(tile) else {
            continue;
        };
        let path = args.out_dir.join(format!("page-{:04}.png", tile.key.page + 1));
        image
            .save(&path)
            .with_context(|| format!("failed to write {:?}", path))?;
    }
    info!(pages = tiles.len(), out = ?args.out_dir, "pages written");
    session.close();
    Ok(())
}

async fn show_info(args: InfoArgs) -> Result<()> {
    let (mut session, _events) = open_session(&args.open, Size::new(1024.0, 768.0)).await?;
    session.stop_rendering();
    let info = session
        .info()
        .ok_or_else(|| anyhow!("document closed unexpectedly"))?;

    let report = InfoReport {
        path: &info.path,
        page_count: info.page_count(),
        metadata: &info.metadata,
        page_sizes: info
            .page_sizes
            .iter()
            .map(|size| [size.width, size.height])
            .collect(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.path.display());
        println!("  pages:    {}", report.page_count);
        if let Some(title) = &report.metadata.title {
            println!("  title:    {title}");
        }
        if let Some(author) = &report.metadata.author {
            println!("  author:   {author}");
        }
        if let Some(subject) = &report.metadata.subject {
            println!("  subject:  {subject}");
        }
        if !report.metadata.keywords.is_empty() {
            println!("  keywords: {}", report.metadata.keywords.join(", "));
        }
        for (index, [width, height]) in report.page_sizes.iter().enumerate() {
            println!("  page {:>4}: {width:.1} x {height:.1} pt", index + 1);
        }
    }
    session.close();
    Ok(())
}

fn wait_for_renderer(session: &mut ViewerSession, timeout_secs: u64) -> Result<()> {
    if !session.pump_until_idle(Duration::from_secs(timeout_secs)) {
        bail!("renderer did not finish within {timeout_secs}s");
    }
    Ok(())
}

fn report_errors(events: &Receiver<ViewerEvent>) {
    for event in events.drain() {
        if let ViewerEvent::PageRenderError { page, reason } = event {
            warn!(page, %reason, "page could not be rendered");
        }
    }
}

fn tile_image(tile: &Tile) -> Option<RgbaImage> {
    let bitmap = &tile.bitmap;
    let image = RgbaImage::from_raw(bitmap.width, bitmap.height, bitmap.pixels.clone());
    if image.is_none() {
        warn!(page = tile.key.page, "tile buffer does not match its size");
    }
    image
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "pdftile.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    let console_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
