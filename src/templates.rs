//! Template registry
//!
//! Maps template ids to immutable RGBA canvases. File-backed templates are
//! decoded on first use and cached; every caller gets a shared
//! `Arc<RgbaImage>` and composition always works on its own copy.

use crate::config::CompositorConfig;
use crate::error::{CompositorError, Result};
use crate::services::ImageIOService;
use crate::types::TemplateId;
use image::RgbaImage;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct TemplateEntry {
    path: Option<PathBuf>,
    canvas: Option<Arc<RgbaImage>>,
}

/// Registry of template canvases keyed by [`TemplateId`]
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    entries: RwLock<BTreeMap<TemplateId, TemplateEntry>>,
}

impl TemplateRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every template configured in `config`
    ///
    /// Files are not touched until a template is resolved, so a missing
    /// asset only fails the batches that actually use it.
    #[must_use]
    pub fn from_config(config: &CompositorConfig) -> Self {
        let registry = Self::new();
        for (id, path) in config.template_paths() {
            registry.register_path(id, path);
        }
        registry
    }

    /// Register a file-backed template, replacing any previous entry
    pub fn register_path<P: Into<PathBuf>>(&self, id: TemplateId, path: P) {
        let path = path.into();
        debug!(template = %id, path = %path.display(), "registering template file");
        self.write().insert(
            id,
            TemplateEntry {
                path: Some(path),
                canvas: None,
            },
        );
    }

    /// Register an already decoded canvas, replacing any previous entry
    pub fn register_image(&self, id: TemplateId, canvas: RgbaImage) {
        self.write().insert(
            id,
            TemplateEntry {
                path: None,
                canvas: Some(Arc::new(canvas)),
            },
        );
    }

    /// Resolve a template id to its canvas
    ///
    /// # Errors
    /// `TemplateNotFound` when the id is unknown or its file is missing or
    /// cannot be decoded.
    pub fn resolve(&self, id: &TemplateId) -> Result<Arc<RgbaImage>> {
        let path = {
            let entries = self.read();
            let entry = entries
                .get(id)
                .ok_or_else(|| CompositorError::template_not_found(id.as_str()))?;
            if let Some(canvas) = &entry.canvas {
                return Ok(Arc::clone(canvas));
            }
            entry
                .path
                .clone()
                .ok_or_else(|| CompositorError::template_not_found(id.as_str()))?
        };

        let canvas = Arc::new(Self::load_canvas(id, &path)?);

        let mut entries = self.write();
        match entries.get_mut(id) {
            // Another caller may have loaded it meanwhile; keep the first copy.
            Some(entry) if entry.path.as_deref() == Some(path.as_path()) => {
                Ok(Arc::clone(entry.canvas.get_or_insert(canvas)))
            },
            _ => Ok(canvas),
        }
    }

    /// Whether the id is registered (its file may still be missing)
    #[must_use]
    pub fn contains(&self, id: &TemplateId) -> bool {
        self.read().contains_key(id)
    }

    /// Registered ids in sorted order
    #[must_use]
    pub fn ids(&self) -> Vec<TemplateId> {
        self.read().keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn load_canvas(id: &TemplateId, path: &Path) -> Result<RgbaImage> {
        match ImageIOService::load_image(path) {
            Ok(image) => {
                let canvas = image.to_rgba8();
                debug!(
                    template = %id,
                    width = canvas.width(),
                    height = canvas.height(),
                    "template loaded"
                );
                Ok(canvas)
            },
            Err(e) => {
                warn!(template = %id, path = %path.display(), error = %e, "template asset unavailable");
                Err(CompositorError::template_not_found(format!(
                    "{} ({})",
                    id,
                    path.display()
                )))
            },
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<TemplateId, TemplateEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<TemplateId, TemplateEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_in_memory_template() {
        let registry = TemplateRegistry::new();
        registry.register_image(TemplateId::from("1"), RgbaImage::new(40, 30));

        let canvas = registry.resolve(&TemplateId::from("1")).unwrap();
        assert_eq!(canvas.dimensions(), (40, 30));
        assert!(registry.contains(&TemplateId::from("1")));
    }

    #[test]
    fn test_unknown_template() {
        let registry = TemplateRegistry::new();
        let err = registry.resolve(&TemplateId::from("nonexistent")).unwrap_err();
        assert!(matches!(err, CompositorError::TemplateNotFound(_)));
    }

    #[test]
    fn test_missing_template_file() {
        let registry = TemplateRegistry::new();
        registry.register_path(TemplateId::from("2"), "/nonexistent/template2.png");

        assert!(registry.contains(&TemplateId::from("2")));
        let err = registry.resolve(&TemplateId::from("2")).unwrap_err();
        assert!(matches!(err, CompositorError::TemplateNotFound(_)));
    }

    #[test]
    fn test_file_template_is_loaded_once_and_shared() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("template1.png");
        RgbaImage::from_pixel(8, 6, Rgba([0, 0, 255, 255]))
            .save(&path)
            .unwrap();

        let registry = TemplateRegistry::new();
        registry.register_path(TemplateId::from("1"), &path);

        let first = registry.resolve(&TemplateId::from("1")).unwrap();
        std::fs::remove_file(&path).unwrap();
        let second = registry.resolve(&TemplateId::from("1")).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.get_pixel(0, 0), &Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn test_from_config_registers_ids_in_order() {
        let config = CompositorConfig::builder()
            .templates_dir("/assets")
            .template("3", "template3.png")
            .build()
            .unwrap();
        let registry = TemplateRegistry::from_config(&config);

        assert_eq!(
            registry.ids(),
            vec![
                TemplateId::from("1"),
                TemplateId::from("2"),
                TemplateId::from("3")
            ]
        );
    }
}
