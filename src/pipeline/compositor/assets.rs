use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
};

use image::{RgbaImage, imageops::FilterType};

use super::text::FontFace;
use crate::{config::AssetSettings, types::PostureKind};

/// Fonts and icon images used by the overlay. Anything missing is `None` or
/// [`FontFace::Builtin`], and the compositor draws its own replacement.
#[derive(Debug)]
pub struct OverlayAssets {
    good_font: FontFace,
    alert_font: FontFace,
    icons: HashMap<PostureKind, RgbaImage>,
    resized: Mutex<HashMap<(PostureKind, u32), Arc<RgbaImage>>>,
}

impl OverlayAssets {
    pub fn builtin() -> Self {
        Self {
            good_font: FontFace::Builtin,
            alert_font: FontFace::Builtin,
            icons: HashMap::new(),
            resized: Mutex::new(HashMap::new()),
        }
    }

    pub fn load(settings: &AssetSettings) -> Self {
        let mut icons = HashMap::new();
        for (kind, name) in [
            (PostureKind::Good, &settings.good_icon),
            (PostureKind::Bad, &settings.bad_icon),
            (PostureKind::Error, &settings.error_icon),
        ] {
            if let Some(icon) = load_icon(&settings.path(name)) {
                icons.insert(kind, icon);
            }
        }

        let assets = Self {
            good_font: FontFace::load(&settings.path(&settings.good_font)),
            alert_font: FontFace::load(&settings.path(&settings.alert_font)),
            icons,
            resized: Mutex::new(HashMap::new()),
        };
        log::info!(
            "overlay assets from {}: {} icon(s), good font {}, alert font {}",
            settings.dir.display(),
            assets.icons.len(),
            face_label(&assets.good_font),
            face_label(&assets.alert_font),
        );
        assets
    }

    /// Headline and message font: the good state gets its own face.
    pub fn font_for(&self, kind: PostureKind) -> &FontFace {
        match kind {
            PostureKind::Good => &self.good_font,
            PostureKind::Bad | PostureKind::Error => &self.alert_font,
        }
    }

    pub fn label_font(&self) -> &FontFace {
        &self.alert_font
    }

    /// Icon for `kind` resized to `size` square, cached per size.
    pub fn icon(&self, kind: PostureKind, size: u32) -> Option<Arc<RgbaImage>> {
        let source = self.icons.get(&kind)?;
        let mut cache = self
            .resized
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let icon = cache.entry((kind, size)).or_insert_with(|| {
            Arc::new(image::imageops::resize(
                source,
                size,
                size,
                FilterType::Lanczos3,
            ))
        });
        Some(icon.clone())
    }
}

fn load_icon(path: &Path) -> Option<RgbaImage> {
    match image::open(path) {
        Ok(img) => Some(img.to_rgba8()),
        Err(err) => {
            log::debug!("icon {} unavailable: {err}", path.display());
            None
        }
    }
}

fn face_label(face: &FontFace) -> &'static str {
    if face.is_builtin() { "built-in" } else { "truetype" }
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    #[test]
    fn empty_directory_degrades_to_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let settings = AssetSettings {
            dir: dir.path().to_path_buf(),
            ..AssetSettings::default()
        };
        let assets = OverlayAssets::load(&settings);
        assert!(assets.font_for(PostureKind::Good).is_builtin());
        assert!(assets.icon(PostureKind::Bad, 32).is_none());
    }

    #[test]
    fn icons_are_resized_and_cached() {
        let dir = tempfile::tempdir().unwrap();
        let settings = AssetSettings {
            dir: dir.path().to_path_buf(),
            ..AssetSettings::default()
        };
        RgbaImage::from_pixel(16, 16, Rgba([10, 20, 30, 255]))
            .save(settings.path(&settings.bad_icon))
            .unwrap();

        let assets = OverlayAssets::load(&settings);
        let first = assets.icon(PostureKind::Bad, 40).unwrap();
        assert_eq!(first.dimensions(), (40, 40));
        let second = assets.icon(PostureKind::Bad, 40).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(assets.icon(PostureKind::Good, 40).is_none());
    }
}
