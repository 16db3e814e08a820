//! Inference Bridge
//!
//! Owns the one active configuration: backend, device listing, model,
//! session and staging buffer. Reconfiguration replaces state only after the
//! replacement has been built, so a failed call leaves the previous state
//! usable.
//!
//! The bridge is single-threaded. Share it through [`super::gate`] when more
//! than one thread needs it.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::backend::InferenceBackend;
use super::codec::{self, AlphaPolicy};
use super::devices::{DeviceDescriptor, DeviceRegistry};
use super::model::{InputDims, ModelHandle};
use super::session::Session;
use crate::config::{Config, InferenceConfig};
use crate::error::{BridgeError, Result};

pub struct InferenceBridge<B: InferenceBackend> {
    backend: B,
    registry: DeviceRegistry,
    model: Option<ModelHandle<B::Network>>,
    session: Option<Session<B::Request>>,
    staging: Vec<u8>,
    cache_dir: PathBuf,
    alpha: AlphaPolicy,
}

impl<B: InferenceBackend> InferenceBridge<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, &InferenceConfig::default())
    }

    pub fn with_config(backend: B, config: &InferenceConfig) -> Self {
        Self {
            backend,
            registry: DeviceRegistry::new(),
            model: None,
            session: None,
            staging: Vec::new(),
            cache_dir: config.cache_dir.clone(),
            alpha: config.alpha,
        }
    }

    /// Load the model, list devices and apply cache hints, then size and
    /// compile as `config` asks.
    pub fn bootstrap(&mut self, config: &Config) -> Result<&str> {
        self.initialize(&config.model.path)?;
        match (config.model.width, config.model.height) {
            (Some(width), Some(height)) => {
                self.set_input_dimensions(width, height)?;
            }
            (None, None) => {}
            _ => {
                return Err(BridgeError::Config(
                    "model width and height must be set together".to_string(),
                ))
            }
        }
        self.select_device(config.inference.device_index)
    }

    /// Load a model and prepare the device listing and cache hints
    pub fn initialize(&mut self, model_path: &Path) -> Result<()> {
        self.load_model(model_path)?;
        self.refresh_devices()?;
        self.configure_device_cache();
        Ok(())
    }

    /// Re-enumerate devices. Sessions compiled against the previous listing
    /// are rejected by [`run`](Self::run) until a device is selected again.
    pub fn refresh_devices(&mut self) -> Result<&str> {
        self.registry.refresh(&mut self.backend)?;
        Ok(self.registry.listing())
    }

    /// Comma-joined device identifiers, accelerators first
    pub fn available_devices(&self) -> &str {
        self.registry.listing()
    }

    pub fn devices(&self) -> &[DeviceDescriptor] {
        self.registry.devices()
    }

    /// Enable the compiled-artifact cache on GPU-class devices
    pub fn configure_device_cache(&mut self) -> Vec<String> {
        self.registry
            .apply_device_cache_hints(&mut self.backend, &self.cache_dir)
    }

    /// Replace the current model. The session for the old model is dropped.
    pub fn load_model(&mut self, path: &Path) -> Result<()> {
        let model = ModelHandle::load(&mut self.backend, path)?;
        self.session = None;
        self.model = Some(model);
        Ok(())
    }

    /// Resize the model input. The current session is dropped; select a
    /// device again before running.
    pub fn set_input_dimensions(&mut self, width: usize, height: usize) -> Result<InputDims> {
        let model = self.model.as_mut().ok_or(BridgeError::ModelNotLoaded)?;
        let dims = model.set_input_dimensions(width, height)?;

        self.session = None;
        self.staging = vec![0; codec::rgba_len(width, height)];
        info!("Input dimensions set to {}x{}", width, height);
        Ok(dims)
    }

    /// Compile the current model for the device at `index` and return its id
    pub fn select_device(&mut self, index: usize) -> Result<&str> {
        let model = self.model.as_ref().ok_or(BridgeError::ModelNotLoaded)?;
        let session = Session::compile(&mut self.backend, &self.registry, model, index)?;

        let dims = session.input_dims()?;
        self.staging.resize(codec::rgba_len(dims.width, dims.height), 0);

        let session = self.session.insert(session);
        Ok(&session.device().id)
    }

    /// Run one inference over `pixels`, an RGBA buffer of the configured size.
    ///
    /// The buffer is overwritten only once inference and decoding have both
    /// succeeded.
    pub fn run(&mut self, pixels: &mut [u8]) -> Result<()> {
        let session = self.session.as_mut().ok_or(BridgeError::SessionNotCompiled)?;
        if !session.is_current(&self.registry) {
            return Err(BridgeError::StaleSession);
        }

        let dims = session.input_dims()?;
        let (width, height) = (dims.width, dims.height);
        codec::check_rgba_len(pixels.len(), width, height)?;

        session.encode_input(pixels)?;
        session.infer()?;

        self.staging.clear();
        self.staging.extend_from_slice(pixels);
        codec::decode(session.output_tensor()?, &mut self.staging, width, height)?;
        codec::restore_alpha(&mut self.staging, self.alpha);

        pixels.copy_from_slice(&self.staging);
        debug!("Inference complete for {}x{} on {}", width, height, session.device().id);
        Ok(())
    }

    pub fn model(&self) -> Option<&ModelHandle<B::Network>> {
        self.model.as_ref()
    }

    pub fn current_device(&self) -> Option<&DeviceDescriptor> {
        self.session.as_ref().map(|s| s.device())
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Dimensions `run` expects, from the compiled session
    pub fn input_dims(&self) -> Option<InputDims> {
        self.session.as_ref().and_then(|s| s.input_dims().ok())
    }

    pub fn alpha_policy(&self) -> AlphaPolicy {
        self.alpha
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backend::fake::{FakeBackend, FakeKernel};

    fn ready_bridge(backend: FakeBackend, width: usize, height: usize) -> InferenceBridge<FakeBackend> {
        let mut bridge = InferenceBridge::new(backend);
        bridge.initialize(Path::new("models/style.xml")).unwrap();
        bridge.set_input_dimensions(width, height).unwrap();
        bridge.select_device(0).unwrap();
        bridge
    }

    #[test]
    fn test_initialize_lists_and_caches() {
        let mut bridge = InferenceBridge::new(FakeBackend::new(&["CPU", "GPU.0", "GPU.1"]));
        bridge.initialize(Path::new("m.xml")).unwrap();

        assert_eq!(bridge.available_devices(), "GPU.1,GPU.0,CPU");
        let log = bridge.backend().log.lock();
        let cached: Vec<&str> = log.cache_dirs.iter().map(|(d, _)| d.as_str()).collect();
        assert_eq!(cached, vec!["GPU.1", "GPU.0"]);
    }

    #[test]
    fn test_end_to_end_identity_gray() {
        let mut bridge = ready_bridge(FakeBackend::new(&["CPU"]), 2, 2);
        let mut pixels = vec![128u8; 16];

        bridge.run(&mut pixels).unwrap();

        for px in pixels.chunks_exact(4) {
            assert_eq!(&px[..3], &[128, 128, 128]);
            assert_eq!(px[3], 255);
        }
    }

    #[test]
    fn test_end_to_end_preserves_alpha_when_configured() {
        let config = InferenceConfig {
            alpha: AlphaPolicy::Preserve,
            ..InferenceConfig::default()
        };
        let mut bridge = InferenceBridge::with_config(FakeBackend::new(&["CPU"]), &config);
        bridge.initialize(Path::new("m.xml")).unwrap();
        bridge.set_input_dimensions(2, 2).unwrap();
        bridge.select_device(0).unwrap();

        let mut pixels = vec![128u8; 16];
        pixels[3] = 10;
        pixels[7] = 20;
        bridge.run(&mut pixels).unwrap();

        assert_eq!(pixels[3], 10);
        assert_eq!(pixels[7], 20);
        assert_eq!(pixels[11], 128);
        assert_eq!(&pixels[..3], &[128, 128, 128]);
    }

    #[test]
    fn test_end_to_end_invert() {
        let backend = FakeBackend::new(&["CPU"]).with_kernel(FakeKernel::Invert);
        let mut bridge = ready_bridge(backend, 1, 2);
        let mut pixels = vec![0u8, 100, 255, 7, 10, 20, 30, 7];

        bridge.run(&mut pixels).unwrap();
        assert_eq!(pixels, vec![255, 155, 0, 255, 245, 235, 225, 255]);
    }

    #[test]
    fn test_run_clamps_scripted_output() {
        let backend = FakeBackend::new(&["CPU"])
            .with_kernel(FakeKernel::Fixed(vec![-5.0, 130.0, 999.0]));
        let mut bridge = ready_bridge(backend, 1, 1);
        let mut pixels = vec![1u8, 2, 3, 4];

        bridge.run(&mut pixels).unwrap();
        assert_eq!(pixels, vec![0, 130, 255, 255]);
    }

    #[test]
    fn test_run_without_session() {
        let mut bridge = InferenceBridge::new(FakeBackend::new(&["CPU"]));
        let mut pixels = vec![0u8; 16];
        assert!(matches!(bridge.run(&mut pixels), Err(BridgeError::SessionNotCompiled)));

        bridge.initialize(Path::new("m.xml")).unwrap();
        assert!(matches!(bridge.run(&mut pixels), Err(BridgeError::SessionNotCompiled)));
    }

    #[test]
    fn test_select_device_out_of_range() {
        let mut bridge = InferenceBridge::new(FakeBackend::new(&["CPU", "GPU"]));
        bridge.initialize(Path::new("m.xml")).unwrap();

        assert!(matches!(
            bridge.select_device(2),
            Err(BridgeError::DeviceIndexOutOfRange { index: 2, count: 2 })
        ));
        assert!(!bridge.has_session());
    }

    #[test]
    fn test_select_device_before_model() {
        let mut bridge = InferenceBridge::new(FakeBackend::new(&["CPU"]));
        bridge.refresh_devices().unwrap();
        assert!(matches!(bridge.select_device(0), Err(BridgeError::ModelNotLoaded)));
    }

    #[test]
    fn test_select_device_returns_id() {
        let mut bridge = InferenceBridge::new(FakeBackend::new(&["CPU", "GPU.0"]));
        bridge.initialize(Path::new("m.xml")).unwrap();

        assert_eq!(bridge.select_device(1).unwrap(), "CPU");
        assert_eq!(bridge.select_device(0).unwrap(), "GPU.0");
        assert_eq!(bridge.current_device().unwrap().id, "GPU.0");
    }

    #[test]
    fn test_buffer_size_mismatch_leaves_buffer_untouched() {
        let mut bridge = ready_bridge(FakeBackend::new(&["CPU"]), 2, 2);
        let mut pixels = vec![9u8; 12];

        let err = bridge.run(&mut pixels).unwrap_err();
        assert!(matches!(err, BridgeError::BufferSizeMismatch { expected: 16, actual: 12 }));
        assert!(pixels.iter().all(|&b| b == 9));
        assert_eq!(bridge.backend().log.lock().infer_calls, 0);
    }

    #[test]
    fn test_execution_failure_leaves_buffer_untouched() {
        let mut backend = FakeBackend::new(&["CPU"]).with_kernel(FakeKernel::Invert);
        backend.fail_infer = true;
        let mut bridge = ready_bridge(backend, 2, 2);
        let mut pixels = vec![42u8; 16];

        let err = bridge.run(&mut pixels).unwrap_err();
        assert!(matches!(err, BridgeError::Execution(_)));
        assert!(pixels.iter().all(|&b| b == 42));
    }

    #[test]
    fn test_reshape_drops_session() {
        let mut bridge = ready_bridge(FakeBackend::new(&["CPU"]), 2, 2);
        assert!(bridge.has_session());

        bridge.set_input_dimensions(4, 4).unwrap();
        assert!(!bridge.has_session());
        let mut pixels = vec![0u8; 64];
        assert!(matches!(bridge.run(&mut pixels), Err(BridgeError::SessionNotCompiled)));

        bridge.select_device(0).unwrap();
        bridge.run(&mut pixels).unwrap();
        assert_eq!(bridge.input_dims().unwrap().as_array(), [1, 3, 4, 4]);
    }

    #[test]
    fn test_failed_reload_keeps_previous_state() {
        let mut bridge = ready_bridge(FakeBackend::new(&["CPU"]), 2, 2);
        bridge.backend_mut().fail_read = true;

        assert!(matches!(
            bridge.load_model(Path::new("broken.xml")),
            Err(BridgeError::ModelLoad { .. })
        ));
        assert!(bridge.has_session());
        assert_eq!(bridge.model().unwrap().path(), Path::new("models/style.xml"));

        let mut pixels = vec![128u8; 16];
        bridge.run(&mut pixels).unwrap();
    }

    #[test]
    fn test_successful_reload_drops_session() {
        let backend = FakeBackend::new(&["CPU"]).with_input_dims(&[1, 3, 5, 7]);
        let mut bridge = ready_bridge(backend, 2, 2);
        assert!(bridge.has_session());

        bridge.load_model(Path::new("models/other.xml")).unwrap();
        assert!(!bridge.has_session());
        assert!(bridge.current_device().is_none());

        let mut pixels = vec![128u8; 16];
        assert!(matches!(bridge.run(&mut pixels), Err(BridgeError::SessionNotCompiled)));

        let model = bridge.model().unwrap();
        assert_eq!(model.path(), Path::new("models/other.xml"));
        assert_eq!(model.input_dims().unwrap().as_array(), [1, 3, 5, 7]);
    }

    #[test]
    fn test_static_model_rejects_resize_and_keeps_session() {
        let mut backend = FakeBackend::new(&["CPU"]).with_input_dims(&[1, 3, 2, 2]);
        backend.static_shape = true;
        let mut bridge = ready_bridge(backend, 2, 2);

        assert!(matches!(bridge.set_input_dimensions(64, 48), Err(BridgeError::Backend(_))));
        assert!(bridge.has_session());
        assert_eq!(bridge.input_dims().unwrap().as_array(), [1, 3, 2, 2]);

        let mut pixels = vec![128u8; 16];
        bridge.run(&mut pixels).unwrap();
        assert!(pixels.chunks_exact(4).all(|px| px == [128, 128, 128, 255]));
    }

    #[test]
    fn test_failed_compile_keeps_previous_session() {
        let mut bridge = ready_bridge(FakeBackend::new(&["CPU", "GPU"]), 2, 2);
        assert_eq!(bridge.current_device().unwrap().id, "GPU");
        bridge.backend_mut().fail_compile = true;

        assert!(matches!(bridge.select_device(1), Err(BridgeError::Compile { .. })));
        assert_eq!(bridge.current_device().unwrap().id, "GPU");
    }

    #[test]
    fn test_refresh_makes_session_stale() {
        let mut bridge = ready_bridge(FakeBackend::new(&["CPU"]), 2, 2);
        bridge.refresh_devices().unwrap();

        let mut pixels = vec![0u8; 16];
        assert!(matches!(bridge.run(&mut pixels), Err(BridgeError::StaleSession)));

        bridge.select_device(0).unwrap();
        bridge.run(&mut pixels).unwrap();
    }

    #[test]
    fn test_native_shape_without_reshape() {
        let backend = FakeBackend::new(&["CPU"]).with_input_dims(&[1, 3, 3, 2]);
        let mut bridge = InferenceBridge::new(backend);
        bridge.initialize(Path::new("m.xml")).unwrap();
        bridge.select_device(0).unwrap();

        let mut pixels = vec![50u8; 2 * 3 * 4];
        bridge.run(&mut pixels).unwrap();
        assert!(pixels.chunks_exact(4).all(|px| px == [50, 50, 50, 255]));
    }

    #[test]
    fn test_bootstrap_from_config() {
        let config = Config::from_toml(
            "[model]\npath = \"m.xml\"\nwidth = 8\nheight = 4\n[inference]\ndevice_index = 1\n",
        )
        .unwrap();
        let mut bridge = InferenceBridge::with_config(FakeBackend::new(&["CPU", "GPU"]), &config.inference);

        assert_eq!(bridge.bootstrap(&config).unwrap(), "CPU");
        assert_eq!(bridge.input_dims().unwrap().as_array(), [1, 3, 4, 8]);
    }

    #[test]
    fn test_bootstrap_rejects_half_dimensions() {
        let config = Config::from_toml("[model]\npath = \"m.xml\"\nwidth = 8\n").unwrap();
        let mut bridge = InferenceBridge::new(FakeBackend::new(&["CPU"]));

        assert!(matches!(bridge.bootstrap(&config), Err(BridgeError::Config(_))));
    }
}
