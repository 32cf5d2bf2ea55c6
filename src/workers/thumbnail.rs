//! Built-in thumbnail worker: decodes the item's artwork and produces a
//! bounded RGBA picture.
//!
//! Decoding goes through the primary `image` decoder, with a lenient JPEG
//! second pass for the truncated or junk-trailing files that are common
//! in the wild.

use std::fs;
use std::sync::Arc;

use image::{imageops::FilterType, DynamicImage, GenericImageView};
use lofty::file::TaggedFileExt;
use log::debug;
use zune_core::{colorspace::ColorSpace, options::DecoderOptions};
use zune_jpeg::JpegDecoder;

use crate::item::{InputItem, Picture};
use crate::protocol::{SeekSpeed, TaskStatus};
use crate::workers::parse::read_tagged_file;
use crate::workers::{Worker, WorkerContext};

/// Decodes artwork bytes, tolerating the damaged JPEGs that strict
/// decoders reject.
fn decode_artwork(bytes: &[u8]) -> Option<DynamicImage> {
    if let Ok(decoded) = image::load_from_memory(bytes) {
        return Some(decoded);
    }
    decode_lenient_jpeg(bytes)
}

/// Lenient JPEG pass for inputs the general decoder refused: strict mode
/// off, output forced to RGBA so the pixel buffer maps straight onto a
/// picture.
fn decode_lenient_jpeg(bytes: &[u8]) -> Option<DynamicImage> {
    if !bytes.starts_with(&[0xff, 0xd8]) {
        return None;
    }

    let options = DecoderOptions::new_cmd()
        .set_strict_mode(false)
        .jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(bytes, options);
    let pixels = decoder.decode().ok()?;
    let (width, height) = decoder.dimensions()?;
    image::RgbaImage::from_raw(width as u32, height as u32, pixels).map(DynamicImage::ImageRgba8)
}

/// Scales `(width, height)` so the longest edge is at most `max_edge`,
/// keeping the aspect ratio. Degenerate inputs collapse to one pixel.
fn bounded_dimensions(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    let max_edge = max_edge.max(1);
    let long_edge = width.max(height);
    if long_edge == 0 {
        return (1, 1);
    }
    if long_edge <= max_edge {
        return (width, height);
    }
    let scale = f64::from(max_edge) / f64::from(long_edge);
    let shrink = |edge: u32| ((f64::from(edge) * scale).round() as u32).clamp(1, max_edge);
    (shrink(width), shrink(height))
}

/// Artwork bytes for the item, in preference order: attachment referenced
/// by the art URL, local art file, embedded picture.
fn resolve_art_bytes(item: &Arc<InputItem>) -> Option<Vec<u8>> {
    if let Some(url) = item.art_url() {
        if let Some(name) = url.strip_prefix("attachment://") {
            if let Some(attachment) = item.find_attachment(name) {
                return Some(attachment.data);
            }
        }
        if let Some(path) = url.strip_prefix("file://") {
            if let Ok(bytes) = fs::read(path) {
                return Some(bytes);
            }
        }
    }

    let path = item.local_path()?;
    let tagged_file = read_tagged_file(&path)?;
    tagged_file
        .primary_tag()
        .into_iter()
        .chain(tagged_file.tags())
        .find_map(|tag| tag.pictures().first().map(|picture| picture.data().to_vec()))
}

/// Thumbnail worker rendering the item's artwork into a bounded RGBA
/// picture. The seek-speed hint selects the resize filter: `Fast` trades
/// quality for latency.
#[derive(Debug)]
pub struct ArtThumbnailWorker {
    max_edge_px: u32,
}

impl ArtThumbnailWorker {
    pub fn new(max_edge_px: u32) -> Self {
        Self {
            max_edge_px: max_edge_px.max(1),
        }
    }
}

impl Worker for ArtThumbnailWorker {
    fn run(&self, ctx: &WorkerContext) -> TaskStatus {
        if let Some(status) = ctx.cancellation_status() {
            return status;
        }
        let Some(bytes) = resolve_art_bytes(ctx.item()) else {
            debug!(
                "ArtThumbnailWorker: no artwork source for {}",
                ctx.item().uri()
            );
            return TaskStatus::Failed;
        };
        if let Some(status) = ctx.cancellation_status() {
            return status;
        }

        let Some(decoded) = decode_artwork(&bytes) else {
            debug!(
                "ArtThumbnailWorker: artwork of {} is not decodable",
                ctx.item().uri()
            );
            return TaskStatus::Failed;
        };
        if let Some(status) = ctx.cancellation_status() {
            return status;
        }

        let (source_width, source_height) = decoded.dimensions();
        let (target_width, target_height) =
            bounded_dimensions(source_width, source_height, self.max_edge_px);
        let filter = match ctx.seek().speed {
            SeekSpeed::Precise => FilterType::Lanczos3,
            SeekSpeed::Fast => FilterType::Triangle,
        };
        let resized = if (target_width, target_height) == (source_width, source_height) {
            decoded
        } else {
            decoded.resize(target_width, target_height, filter)
        };

        let rgba = resized.to_rgba8();
        let (width, height) = rgba.dimensions();
        let Some(picture) = Picture::from_rgba(width, height, rgba.into_raw()) else {
            return TaskStatus::Failed;
        };
        debug!(
            "ArtThumbnailWorker: produced {width}x{height} thumbnail for {}",
            ctx.item().uri()
        );
        ctx.submit_picture(picture);
        TaskStatus::Ok
    }
}
