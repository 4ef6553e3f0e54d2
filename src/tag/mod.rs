//! Audio tag writing: textual metadata, cover art and lyrics
//!
//! All writers go through lofty so the same call works for MP3, FLAC and
//! M4A outputs. Cover images are normalized to a bounded JPEG before
//! embedding so oversized CDN originals never end up inside the file.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use lofty::config::WriteOptions;
use lofty::picture::{MimeType, Picture, PictureType};
use lofty::prelude::*;
use lofty::probe::Probe;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, warn};

use crate::api::SongMetadata;

/// Maximum dimension for embedded cover art (width or height).
const MAX_COVER_SIZE: u32 = 500;

/// Initial JPEG quality (0-100).
const JPEG_QUALITY: u8 = 85;

/// Maximum embedded cover size in bytes (500KB).
const MAX_COVER_BYTES: usize = 500 * 1024;

/// Write textual metadata into an audio file.
pub fn write_metadata(audio_path: &Path, metadata: &SongMetadata) -> Result<()> {
    let mut tagged_file = open_tagged(audio_path)?;
    let tag = primary_tag(&mut tagged_file)?;

    tag.insert_text(ItemKey::TrackTitle, metadata.title.clone());
    if !metadata.artists.is_empty() {
        tag.insert_text(ItemKey::TrackArtist, metadata.artists.join("&"));
    }
    if let Some(album) = &metadata.album {
        tag.insert_text(ItemKey::AlbumTitle, album.clone());
    }
    if !metadata.album_artists.is_empty() {
        tag.insert_text(ItemKey::AlbumArtist, metadata.album_artists.join("&"));
    }
    if let Some(track) = metadata.track_number {
        tag.insert_text(ItemKey::TrackNumber, track.to_string());
    }
    if let Some(disc) = metadata.disc_number {
        tag.insert_text(ItemKey::DiscNumber, disc.to_string());
    }
    if let Some(genre) = &metadata.genre {
        tag.insert_text(ItemKey::Genre, genre.clone());
    }
    if let Some(company) = &metadata.company {
        tag.insert_text(ItemKey::Label, company.clone());
    }
    if let Some(date) = &metadata.release_date {
        tag.insert_text(ItemKey::RecordingDate, date.clone());
    }

    tagged_file
        .save_to_path(audio_path, WriteOptions::default())
        .context("Failed to save audio file with metadata")?;

    debug!("Wrote metadata to: {}", audio_path.display());
    Ok(())
}

/// Embed a cover image into an audio file.
///
/// The image is decoded, resized to fit within [`MAX_COVER_SIZE`] and
/// re-encoded as baseline JPEG before embedding.
pub fn embed_cover(audio_path: &Path, cover_data: &[u8]) -> Result<()> {
    let processed = process_cover(cover_data)?;

    let mut tagged_file = open_tagged(audio_path)?;
    let tag = primary_tag(&mut tagged_file)?;

    let picture = Picture::new_unchecked(
        PictureType::CoverFront,
        Some(MimeType::Jpeg),
        None,
        processed,
    );

    tag.remove_picture_type(PictureType::CoverFront);
    tag.push_picture(picture);

    tagged_file
        .save_to_path(audio_path, WriteOptions::default())
        .context("Failed to save audio file with embedded cover")?;

    debug!("Embedded cover in: {}", audio_path.display());
    Ok(())
}

/// Embed lyric text into an audio file.
pub fn embed_lyric(audio_path: &Path, lyric: &str) -> Result<()> {
    let mut tagged_file = open_tagged(audio_path)?;
    let tag = primary_tag(&mut tagged_file)?;

    tag.insert_text(ItemKey::Lyrics, lyric.to_string());

    tagged_file
        .save_to_path(audio_path, WriteOptions::default())
        .context("Failed to save audio file with lyrics")?;

    debug!("Embedded lyrics in: {}", audio_path.display());
    Ok(())
}

fn open_tagged(audio_path: &Path) -> Result<lofty::file::TaggedFile> {
    Probe::open(audio_path)
        .with_context(|| format!("Failed to open audio file: {}", audio_path.display()))?
        .read()
        .context("Failed to read audio file tags")
}

fn primary_tag(tagged_file: &mut lofty::file::TaggedFile) -> Result<&mut lofty::tag::Tag> {
    if tagged_file.primary_tag_mut().is_none() && tagged_file.first_tag_mut().is_none() {
        let tag_type = tagged_file.primary_tag_type();
        tagged_file.insert_tag(lofty::tag::Tag::new(tag_type));
    }
    if tagged_file.primary_tag_mut().is_some() {
        return tagged_file.primary_tag_mut().context("Failed to create tag");
    }
    tagged_file.first_tag_mut().context("Failed to create tag")
}

/// Decode, bound and re-encode a cover image as baseline JPEG.
fn process_cover(data: &[u8]) -> Result<Vec<u8>> {
    let img = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .context("Failed to guess cover image format")?
        .decode()
        .context("Failed to decode cover image")?;

    let img = resize_to_fit(img);

    // Reduce quality until the encoded cover fits the byte bound.
    let mut quality = JPEG_QUALITY;
    loop {
        let mut output = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut output, quality);
        encoder
            .encode_image(&img)
            .context("Failed to encode cover as JPEG")?;

        if output.len() <= MAX_COVER_BYTES || quality <= 50 {
            debug!(
                "Processed cover: {}x{} -> {} bytes (quality {})",
                img.width(),
                img.height(),
                output.len(),
                quality
            );
            return Ok(output);
        }

        warn!(
            "Cover too large ({} bytes), reducing quality from {} to {}",
            output.len(),
            quality,
            quality - 10
        );
        quality -= 10;
    }
}

/// Resize an image to fit within [`MAX_COVER_SIZE`], keeping aspect ratio.
fn resize_to_fit(img: DynamicImage) -> DynamicImage {
    let (width, height) = (img.width(), img.height());
    if width <= MAX_COVER_SIZE && height <= MAX_COVER_SIZE {
        return img;
    }

    let (new_width, new_height) = if width > height {
        let ratio = MAX_COVER_SIZE as f64 / width as f64;
        (MAX_COVER_SIZE, (height as f64 * ratio) as u32)
    } else {
        let ratio = MAX_COVER_SIZE as f64 / height as f64;
        ((width as f64 * ratio) as u32, MAX_COVER_SIZE)
    };

    debug!(
        "Resizing cover: {}x{} -> {}x{}",
        width, height, new_width, new_height
    );

    img.resize(new_width, new_height, FilterType::Lanczos3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_small_image_untouched() {
        let img = DynamicImage::new_rgb8(400, 400);
        let resized = resize_to_fit(img);
        assert_eq!(resized.width(), 400);
        assert_eq!(resized.height(), 400);
    }

    #[test]
    fn test_resize_large_image_bounded() {
        let img = DynamicImage::new_rgb8(1500, 1000);
        let resized = resize_to_fit(img);
        assert_eq!(resized.width(), MAX_COVER_SIZE);
        assert!(resized.height() <= MAX_COVER_SIZE);
    }

    #[test]
    fn test_process_cover_produces_jpeg() {
        let img = DynamicImage::new_rgb8(600, 600);
        let mut png = Vec::new();
        img.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let processed = process_cover(&png).unwrap();
        // JPEG SOI marker
        assert_eq!(&processed[..2], &[0xFF, 0xD8]);
    }
}
