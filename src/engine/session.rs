//! Session
//!
//! A model compiled for one device together with its reusable inference
//! request. Compiling again produces a new Session; dropping the old one
//! releases the compiled artifact and request.

use std::time::Instant;

use tracing::{debug, info};

use super::backend::{InferRequest, InferenceBackend};
use super::codec::{self, nchw_view, nchw_view_mut, TensorView};
use super::devices::{DeviceDescriptor, DeviceRegistry};
use super::model::{InputDims, ModelHandle, TensorPort};
use crate::error::{BridgeError, Result};

pub struct Session<R> {
    request: R,
    device: DeviceDescriptor,
    generation: u64,
    input: TensorPort,
    output: TensorPort,
}

impl<R: InferRequest> Session<R> {
    /// Compile `model` for the device at `device_index` in the current listing
    pub fn compile<B>(
        backend: &mut B,
        registry: &DeviceRegistry,
        model: &ModelHandle<B::Network>,
        device_index: usize,
    ) -> Result<Self>
    where
        B: InferenceBackend<Request = R>,
    {
        let device = registry.get(device_index)?.clone();

        info!("Compiling model for {} ({})", device.id, device.class.as_str());
        let start = Instant::now();
        let request = backend
            .compile(model.network(), &device.id)
            .map_err(|source| BridgeError::Compile {
                device: device.id.clone(),
                source,
            })?;
        info!("Model compiled for {} in {:?}", device.id, start.elapsed());

        Ok(Self {
            request,
            device,
            generation: registry.generation(),
            input: model.input().clone(),
            output: model.output().clone(),
        })
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    /// Input dimensions frozen at compile time
    pub fn input_dims(&self) -> Result<InputDims> {
        InputDims::from_port(&self.input)
    }

    /// Whether the device listing this session was compiled against is still current
    pub fn is_current(&self, registry: &DeviceRegistry) -> bool {
        self.generation == registry.generation()
    }

    /// Pack an RGBA frame into the request's input tensor
    pub fn encode_input(&mut self, rgba: &[u8]) -> Result<()> {
        let name = &self.input.name;
        let (dims, data) = self.request.input_buffer(name).map_err(BridgeError::Backend)?;
        debug!("Input tensor '{}' {:?}", name, dims);
        codec::encode(rgba, name, nchw_view_mut(name, &dims, data)?)
    }

    pub fn output_tensor(&self) -> Result<TensorView<'_>> {
        let (dims, data) = self
            .request
            .output_buffer(&self.output.name)
            .map_err(BridgeError::Backend)?;
        debug!("Output tensor '{}' {:?}", self.output.name, dims);
        nchw_view(&self.output.name, &dims, data)
    }

    /// Run the request synchronously. Blocks until the backend finishes.
    pub fn infer(&mut self) -> Result<()> {
        let start = Instant::now();
        self.request.infer().map_err(BridgeError::Execution)?;
        debug!("Inference on {} took {:?}", self.device.id, start.elapsed());
        Ok(())
    }
}
