use super::types::{SegmentationModel, TensorShape};
use crate::config::LoadPolicy;
use crate::error::{Result, SegmentationError};
use crate::frame::Orientation;
use std::path::PathBuf;

/// Turns a serialized model artifact into a runnable model.
pub trait ModelLoader: Send {
    fn load(&self, orientation: Orientation, bytes: &[u8]) -> Result<Box<dyn SegmentationModel>>;
}

/// Where a model variant's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    File(PathBuf),
    Bytes(Vec<u8>),
}

impl From<PathBuf> for ModelSource {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

/// A loaded model bound to one orientation. Shapes are fixed at load time.
pub struct ModelHandle {
    orientation: Orientation,
    input: TensorShape,
    output: TensorShape,
    model: Box<dyn SegmentationModel>,
}

impl ModelHandle {
    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn input_shape(&self) -> TensorShape {
        self.input
    }

    pub fn output_shape(&self) -> TensorShape {
        self.output
    }

    pub fn model(&self) -> &dyn SegmentationModel {
        self.model.as_ref()
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("orientation", &self.orientation)
            .field("input", &self.input)
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

/// Owns one model handle per orientation for the lifetime of a session.
pub struct ModelRegistry {
    loader: Box<dyn ModelLoader>,
    sources: [Option<ModelSource>; 2],
    handles: [Option<ModelHandle>; 2],
}

impl ModelRegistry {
    pub fn new(loader: impl ModelLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            sources: [None, None],
            handles: [None, None],
        }
    }

    pub fn with_source(mut self, orientation: Orientation, source: impl Into<ModelSource>) -> Self {
        self.sources[orientation.index()] = Some(source.into());
        self
    }

    pub fn has_source(&self, orientation: Orientation) -> bool {
        self.sources[orientation.index()].is_some()
    }

    /// Load the model variant for `orientation`.
    ///
    /// Calling it again after a successful load returns the existing handle
    /// without re-reading the source.
    pub fn load(&mut self, orientation: Orientation) -> Result<&ModelHandle> {
        let slot = orientation.index();
        if self.handles[slot].is_some() {
            tracing::debug!("{} model already loaded", orientation);
        } else {
            let handle = self.load_handle(orientation)?;
            tracing::info!(
                "Loaded {} model: input {}x{} ({:?}), output {}x{}",
                orientation,
                handle.input.width,
                handle.input.height,
                handle.input.layout,
                handle.output.width,
                handle.output.height
            );
            self.handles[slot] = Some(handle);
        }
        self.get(orientation)
    }

    fn load_handle(&self, orientation: Orientation) -> Result<ModelHandle> {
        let source = self.sources[orientation.index()].as_ref().ok_or_else(|| {
            SegmentationError::model_load(orientation, "no model source configured")
        })?;

        let bytes = match source {
            ModelSource::File(path) => {
                tracing::info!("Loading {} model from {}", orientation, path.display());
                std::fs::read(path).map_err(|e| SegmentationError::ModelLoad {
                    orientation,
                    reason: format!("cannot read {}", path.display()),
                    source: Box::new(e),
                })?
            }
            ModelSource::Bytes(bytes) => bytes.clone(),
        };

        if bytes.is_empty() {
            return Err(SegmentationError::model_load(orientation, "model source is empty"));
        }

        let model = self.loader.load(orientation, &bytes)?;
        Ok(ModelHandle {
            orientation,
            input: model.input_shape(),
            output: model.output_shape(),
            model,
        })
    }

    /// Load every configured variant according to `policy`.
    ///
    /// Returns the orientations that are usable afterwards.
    pub fn load_all(&mut self, policy: LoadPolicy) -> Result<Vec<Orientation>> {
        let configured: Vec<_> = Orientation::ALL
            .into_iter()
            .filter(|o| self.has_source(*o))
            .collect();

        if configured.is_empty() {
            return Err(SegmentationError::Configuration {
                message: "no model variant configured".to_string(),
            });
        }

        let mut loaded = Vec::with_capacity(configured.len());
        let mut last_error = None;
        for orientation in configured {
            match self.load(orientation) {
                Ok(_) => loaded.push(orientation),
                Err(e) if policy == LoadPolicy::Degraded => {
                    tracing::warn!("{}; continuing without it", e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        match (loaded.is_empty(), last_error) {
            (true, Some(e)) => Err(e),
            _ => Ok(loaded),
        }
    }

    pub fn get(&self, orientation: Orientation) -> Result<&ModelHandle> {
        self.handles[orientation.index()]
            .as_ref()
            .ok_or(SegmentationError::ModelNotLoaded { orientation })
    }

    pub fn is_loaded(&self, orientation: Orientation) -> bool {
        self.handles[orientation.index()].is_some()
    }

    /// Drop all loaded handles.
    pub fn release(&mut self) {
        for handle in self.handles.iter_mut().filter_map(Option::take) {
            tracing::info!("Released {} model", handle.orientation);
        }
    }
}

impl Drop for ModelRegistry {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{mock_model_bytes, MockLoader};
    use tempfile::TempDir;

    #[test]
    fn get_before_load_fails() {
        let registry = ModelRegistry::new(MockLoader::new(0.0))
            .with_source(Orientation::Portrait, ModelSource::Bytes(mock_model_bytes(4, 4)));

        assert!(matches!(
            registry.get(Orientation::Portrait),
            Err(SegmentationError::ModelNotLoaded {
                orientation: Orientation::Portrait
            })
        ));
    }

    #[test]
    fn load_then_get_returns_handle() -> Result<()> {
        let mut registry = ModelRegistry::new(MockLoader::new(0.0))
            .with_source(Orientation::Landscape, ModelSource::Bytes(mock_model_bytes(8, 4)));

        let handle = registry.load(Orientation::Landscape)?;
        assert_eq!(handle.orientation(), Orientation::Landscape);
        assert_eq!(handle.input_shape(), TensorShape::nchw(8, 4, 3));

        let handle = registry.get(Orientation::Landscape)?;
        assert_eq!(handle.output_shape(), TensorShape::nchw(8, 4, 1));
        assert!(!registry.is_loaded(Orientation::Portrait));
        Ok(())
    }

    #[test]
    fn missing_file_is_a_load_error() {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = ModelRegistry::new(MockLoader::new(0.0)).with_source(
            Orientation::Portrait,
            temp_dir.path().join("selfie_segmenter.onnx"),
        );

        assert!(matches!(
            registry.load(Orientation::Portrait),
            Err(SegmentationError::ModelLoad { .. })
        ));
    }

    #[test]
    fn truncated_bytes_are_a_load_error() {
        let mut registry = ModelRegistry::new(MockLoader::new(0.0))
            .with_source(Orientation::Portrait, ModelSource::Bytes(vec![1, 2, 3]));

        assert!(matches!(
            registry.load(Orientation::Portrait),
            Err(SegmentationError::ModelLoad { .. })
        ));
        assert!(!registry.is_loaded(Orientation::Portrait));
    }

    #[test]
    fn loads_from_file() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("portrait.bin");
        std::fs::write(&path, mock_model_bytes(6, 10)).unwrap();

        let mut registry =
            ModelRegistry::new(MockLoader::new(0.0)).with_source(Orientation::Portrait, path);
        assert_eq!(
            registry.load(Orientation::Portrait)?.input_shape(),
            TensorShape::nchw(6, 10, 3)
        );
        Ok(())
    }

    #[test]
    fn second_load_keeps_existing_handle() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("portrait.bin");
        std::fs::write(&path, mock_model_bytes(4, 4)).unwrap();

        let mut registry = ModelRegistry::new(MockLoader::new(0.0))
            .with_source(Orientation::Portrait, path.clone());
        registry.load(Orientation::Portrait)?;

        std::fs::remove_file(&path).unwrap();
        assert_eq!(
            registry.load(Orientation::Portrait)?.input_shape(),
            TensorShape::nchw(4, 4, 3)
        );
        Ok(())
    }

    #[test]
    fn strict_policy_fails_on_any_broken_variant() {
        let mut registry = ModelRegistry::new(MockLoader::new(0.0))
            .with_source(Orientation::Portrait, ModelSource::Bytes(mock_model_bytes(4, 4)))
            .with_source(Orientation::Landscape, ModelSource::Bytes(vec![0]));

        assert!(matches!(
            registry.load_all(LoadPolicy::Strict),
            Err(SegmentationError::ModelLoad {
                orientation: Orientation::Landscape,
                ..
            })
        ));
    }

    #[test]
    fn degraded_policy_keeps_working_variant() -> Result<()> {
        let mut registry = ModelRegistry::new(MockLoader::new(0.0))
            .with_source(Orientation::Portrait, ModelSource::Bytes(mock_model_bytes(4, 4)))
            .with_source(Orientation::Landscape, ModelSource::Bytes(vec![0]));

        let loaded = registry.load_all(LoadPolicy::Degraded)?;
        assert_eq!(loaded, vec![Orientation::Portrait]);
        assert!(registry.get(Orientation::Landscape).is_err());
        Ok(())
    }

    #[test]
    fn degraded_policy_still_needs_one_variant() {
        let mut registry = ModelRegistry::new(MockLoader::new(0.0))
            .with_source(Orientation::Landscape, ModelSource::Bytes(Vec::new()));

        assert!(registry.load_all(LoadPolicy::Degraded).is_err());
        assert!(matches!(
            ModelRegistry::new(MockLoader::new(0.0)).load_all(LoadPolicy::Degraded),
            Err(SegmentationError::Configuration { .. })
        ));
    }

    #[test]
    fn release_drops_handles() -> Result<()> {
        let mut registry = ModelRegistry::new(MockLoader::new(0.0))
            .with_source(Orientation::Portrait, ModelSource::Bytes(mock_model_bytes(4, 4)));
        registry.load(Orientation::Portrait)?;

        registry.release();
        assert!(!registry.is_loaded(Orientation::Portrait));
        Ok(())
    }
}
