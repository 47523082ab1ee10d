use image::RgbaImage;
use pdftile_core::Bitmap;

#[cfg(feature = "pdf")]
mod pdfium;

#[cfg(feature = "pdf")]
pub use pdfium::{PdfiumPageSource, PdfiumProvider};

const BACKGROUND: [u8; 4] = [255, 255, 255, 255];

/// Copies a rendered tile into `target`, anchored at the top-left corner.
/// Pixels the image does not cover are painted white.
pub fn copy_rgba(image: &RgbaImage, target: &mut Bitmap) {
    let stride = target.stride();
    let source_stride = image.width() as usize * Bitmap::BYTES_PER_PIXEL;
    let copied = stride.min(source_stride);
    let source = image.as_raw();

    for (row, line) in target.pixels.chunks_exact_mut(stride).enumerate() {
        if row >= image.height() as usize {
            fill(line);
            continue;
        }
        let start = row * source_stride;
        line[..copied].copy_from_slice(&source[start..start + copied]);
        fill(&mut line[copied..]);
    }
}

fn fill(pixels: &mut [u8]) {
    for pixel in pixels.chunks_exact_mut(Bitmap::BYTES_PER_PIXEL) {
        pixel.copy_from_slice(&BACKGROUND);
    }
}
