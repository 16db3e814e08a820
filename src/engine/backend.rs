//! Inference backend seam
//!
//! The bridge never talks to an engine directly. It drives these traits,
//! which the OpenVINO adapter implements for real hardware and a fake
//! implements for tests.

use std::path::Path;

use anyhow::Result;

/// Name and dimensions of a network input or output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub dims: Vec<usize>,
}

/// Engine that enumerates devices, reads networks and compiles them
pub trait InferenceBackend {
    type Network: NetworkDescription;
    type Request: InferRequest;

    /// Device identifiers in the engine's native order
    fn available_devices(&mut self) -> Result<Vec<String>>;

    /// Enable a persistent compiled-artifact cache for one device
    fn set_cache_dir(&mut self, device: &str, dir: &Path) -> Result<()>;

    fn read_network(&mut self, path: &Path) -> Result<Self::Network>;

    /// Compile `network` for `device` and create one inference request
    fn compile(&mut self, network: &Self::Network, device: &str) -> Result<Self::Request>;
}

/// A loaded, not yet compiled network
pub trait NetworkDescription {
    /// Inputs in declaration order
    fn inputs(&self) -> Vec<PortInfo>;

    /// Outputs in declaration order
    fn outputs(&self) -> Vec<PortInfo>;

    fn set_batch_size(&mut self, batch: usize) -> Result<()>;

    /// Force the named port to 32-bit float at the tensor boundary
    fn set_f32_precision(&mut self, port: &str) -> Result<()>;

    /// Change the shape of one input and propagate shapes through the network
    fn reshape(&mut self, input: &str, dims: &[usize]) -> Result<()>;
}

/// A reusable request bound to one compiled network
pub trait InferRequest {
    fn input_buffer(&mut self, name: &str) -> Result<(Vec<usize>, &mut [f32])>;

    fn output_buffer(&self, name: &str) -> Result<(Vec<usize>, &[f32])>;

    /// Run inference synchronously
    fn infer(&mut self) -> Result<()>;
}
