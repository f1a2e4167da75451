//! Blocking jobs run off the lifecycle thread: media art and video
//! resolution, wallpaper/subject preparation.

use super::state::{StaticImage, StaticImages};
use crate::bitmap::Bitmap;
use crate::video::validate_source;
use anyhow::{Context, Result};
use common::MediaInfo;
use std::path::{Path, PathBuf};

/// Turns a media update into a renderable video file, or nothing
pub trait VideoResolver: Send + Sync {
    fn resolve(&self, media: &MediaInfo) -> Option<PathBuf>;
}

/// Accepts `video_path` when it is a local, readable, non-empty file
#[derive(Debug, Default)]
pub struct LocalFileResolver;

impl VideoResolver for LocalFileResolver {
    fn resolve(&self, media: &MediaInfo) -> Option<PathBuf> {
        let path = crate::config::expand_path(media.video_path.as_deref()?);
        match validate_source(&path) {
            Ok(()) => Some(path),
            Err(e) => {
                log::warn!("Ignoring video for {} - {}: {}", media.artist, media.title, e);
                None
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedMedia {
    pub art: Option<StaticImage>,
    pub video: Option<PathBuf>,
}

/// Decode the album art (prescaled to `size` when known) and resolve the
/// video file
pub fn resolve_media(
    media: &MediaInfo,
    resolver: &dyn VideoResolver,
    size: Option<(u32, u32)>,
) -> ResolvedMedia {
    let art = media.art_path.as_deref().and_then(|path| {
        let path = crate::config::expand_path(path);
        match load_scaled(&path, size) {
            Ok(bitmap) => Some(StaticImage::new(bitmap)),
            Err(e) => {
                log::warn!("Failed to load media art: {:#}", e);
                None
            }
        }
    });

    ResolvedMedia {
        art,
        video: resolver.resolve(media),
    }
}

fn load_scaled(path: &Path, size: Option<(u32, u32)>) -> Result<Bitmap> {
    let bitmap = Bitmap::load(path)?;
    match size {
        Some((width, height)) => bitmap
            .center_crop(width, height)
            .with_context(|| format!("Failed to scale {}", path.display())),
        None => Ok(bitmap),
    }
}

/// Prepare the wallpaper, the home composite and the fallback gradient for
/// one surface size
pub fn load_static_images(
    size: (u32, u32),
    wallpaper: Option<&Path>,
    subject: Option<&Path>,
    gradient: &[[u8; 3]],
) -> StaticImages {
    let (width, height) = size;
    let gradient = StaticImage::new(Bitmap::gradient(width, height, gradient));

    let load = |path: &Path, what: &str| match load_scaled(path, Some(size)) {
        Ok(bitmap) => Some(bitmap),
        Err(e) => {
            log::warn!("Failed to load {} {}: {:#}", what, path.display(), e);
            None
        }
    };

    let wallpaper = wallpaper.and_then(|path| load(path, "wallpaper"));
    let subject = subject.and_then(|path| load(path, "subject"));

    let home = match (&wallpaper, subject) {
        (_, None) => None,
        (Some(base), Some(subject)) => Some(composite(base.clone(), &subject)),
        (None, Some(subject)) => Some(composite((*gradient.bitmap).clone(), &subject)),
    };

    StaticImages {
        wallpaper: wallpaper.map(StaticImage::new),
        home: home.map(StaticImage::new),
        gradient,
    }
}

/// Source-over `layer` onto `base`; both have the same size
fn composite(mut base: Bitmap, layer: &Bitmap) -> Bitmap {
    let width = base.width().min(layer.width());
    let height = base.height().min(layer.height());
    for y in 0..height {
        for x in 0..width {
            let px = layer.pixel(x, y);
            if px[3] > 0 {
                base.blend_pixel(x as i32, y as i32, px);
            }
        }
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn media(video: Option<&Path>, art: Option<&Path>) -> MediaInfo {
        MediaInfo {
            title: "Title".to_string(),
            artist: "Artist".to_string(),
            album: None,
            art_path: art.map(|p| p.display().to_string()),
            video_path: video.map(|p| p.display().to_string()),
        }
    }

    fn save_png(path: &Path, width: u32, height: u32, rgba: [u8; 4]) {
        image::RgbaImage::from_pixel(width, height, image::Rgba(rgba))
            .save(path)
            .unwrap();
    }

    #[test]
    fn test_local_resolver() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip.mp4");
        std::fs::File::create(&clip).unwrap().write_all(b"data").unwrap();
        let empty = dir.path().join("empty.mp4");
        std::fs::File::create(&empty).unwrap();

        let resolver = LocalFileResolver;
        assert_eq!(resolver.resolve(&media(Some(&clip), None)), Some(clip));
        assert_eq!(resolver.resolve(&media(Some(&empty), None)), None);
        assert_eq!(resolver.resolve(&media(None, None)), None);
    }

    #[test]
    fn test_resolve_media_art() {
        let dir = tempfile::tempdir().unwrap();
        let art = dir.path().join("art.png");
        save_png(&art, 4, 4, [250, 250, 250, 255]);

        let resolved = resolve_media(&media(None, Some(&art)), &LocalFileResolver, Some((8, 2)));
        let art = resolved.art.unwrap();
        assert_eq!((art.bitmap.width(), art.bitmap.height()), (8, 2));
        assert!(art.luminance > 0.9);
        assert!(resolved.video.is_none());

        let missing = resolve_media(
            &media(None, Some(&dir.path().join("gone.png"))),
            &LocalFileResolver,
            None,
        );
        assert!(missing.art.is_none());
    }

    #[test]
    fn test_static_images() {
        let dir = tempfile::tempdir().unwrap();
        let wallpaper = dir.path().join("wall.png");
        let subject = dir.path().join("subject.png");
        save_png(&wallpaper, 20, 10, [0, 0, 255, 255]);
        // Fully transparent subject leaves the wallpaper visible
        save_png(&subject, 20, 10, [255, 0, 0, 0]);

        let images = load_static_images(
            (10, 10),
            Some(&wallpaper),
            Some(&subject),
            &crate::bitmap::DEFAULT_GRADIENT,
        );
        assert_eq!(images.gradient.bitmap.width(), 10);
        let home = images.home.unwrap();
        assert_eq!(home.bitmap.pixel(5, 5), [0, 0, 255, 255]);
        assert_eq!(images.wallpaper.unwrap().bitmap.height(), 10);

        let fallback = load_static_images(
            (10, 10),
            Some(&dir.path().join("missing.png")),
            None,
            &crate::bitmap::DEFAULT_GRADIENT,
        );
        assert!(fallback.wallpaper.is_none());
        assert!(fallback.home.is_none());
    }

    #[test]
    fn test_composite_opaque_layer() {
        let base = Bitmap::solid(2, 2, [0, 0, 0, 255]);
        let layer = Bitmap::solid(2, 2, [255, 255, 255, 255]);
        assert_eq!(composite(base, &layer).pixel(1, 1), [255, 255, 255, 255]);
    }
}
