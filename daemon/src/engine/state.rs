use crate::bitmap::Bitmap;
use crate::config::Settings;
use common::MediaInfo;
use std::path::PathBuf;
use std::sync::Arc;

/// A prepared static bitmap and the mean luminance of its top band
#[derive(Debug, Clone)]
pub struct StaticImage {
    pub bitmap: Arc<Bitmap>,
    pub luminance: f32,
}

impl StaticImage {
    /// Share of the height sampled for the clock color
    pub const LUMINANCE_BAND: f32 = 0.2;

    pub fn new(bitmap: Bitmap) -> Self {
        let luminance = bitmap.top_luminance(Self::LUMINANCE_BAND);
        Self {
            bitmap: Arc::new(bitmap),
            luminance,
        }
    }
}

/// Bitmaps prepared for one surface size
#[derive(Debug, Clone)]
pub struct StaticImages {
    pub wallpaper: Option<StaticImage>,
    /// Wallpaper with the subject layer composited on top
    pub home: Option<StaticImage>,
    pub gradient: StaticImage,
}

/// Single source of truth for what and whether to draw.
/// Only the lifecycle writes it.
#[derive(Debug, Clone)]
pub struct EngineState {
    pub visible: bool,
    pub locked: bool,
    pub ambient: bool,
    pub power_save: bool,
    pub media: Option<MediaInfo>,
    /// Resolved video for the current media identity
    pub video_file: Option<PathBuf>,
    pub media_art: Option<StaticImage>,
    pub images: Option<StaticImages>,
    /// Last bitmap handed to `setBackground`
    pub background_bitmap: Option<Arc<Bitmap>>,
    /// Last bitmap handed to `updateOverlay`
    pub overlay_bitmap: Option<Arc<Bitmap>>,
    pub surface: Option<(u32, u32)>,
    pub settings: Settings,
}

impl EngineState {
    pub fn new(settings: Settings) -> Self {
        Self {
            visible: true,
            locked: false,
            ambient: false,
            power_save: false,
            media: None,
            video_file: None,
            media_art: None,
            images: None,
            background_bitmap: None,
            overlay_bitmap: None,
            surface: None,
            settings,
        }
    }

    pub fn media_id(&self) -> Option<(&str, &str)> {
        self.media.as_ref().map(MediaInfo::identity)
    }

    /// The video the controller should hold, if video art is enabled
    pub fn desired_video(&self) -> Option<&PathBuf> {
        self.video_file
            .as_ref()
            .filter(|_| self.settings.enable_video_art)
    }

    /// Lock-screen static fallback: media art, else wallpaper, else gradient
    pub fn lock_image(&self) -> Option<&StaticImage> {
        self.media_art.as_ref().or_else(|| {
            let images = self.images.as_ref()?;
            Some(images.wallpaper.as_ref().unwrap_or(&images.gradient))
        })
    }

    /// Home-screen composite, else wallpaper, else gradient
    pub fn home_image(&self) -> Option<&StaticImage> {
        let images = self.images.as_ref()?;
        Some(
            images
                .home
                .as_ref()
                .or(images.wallpaper.as_ref())
                .unwrap_or(&images.gradient),
        )
    }
}
