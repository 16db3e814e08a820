//! Inference engine module
//!
//! Provides the bridge between RGBA pixel buffers and a compiled model:
//! - Device enumeration and cache hints
//! - Model loading and input reshaping
//! - Pixel/tensor layout conversion
//! - Single-slot shared and async execution

pub mod backend;
pub mod bridge;
pub mod codec;
pub mod devices;
pub mod gate;
pub mod model;
pub mod session;

#[cfg(feature = "openvino")]
pub mod openvino;

pub use backend::{InferRequest, InferenceBackend, NetworkDescription, PortInfo};
pub use bridge::InferenceBridge;
pub use codec::AlphaPolicy;
pub use devices::{DeviceClass, DeviceDescriptor, DeviceRegistry};
pub use gate::{InferenceGate, SharedBridge};
pub use model::{InputDims, ModelHandle, TensorPort};
pub use session::Session;

#[cfg(feature = "openvino")]
pub use self::openvino::OpenVinoBackend;
