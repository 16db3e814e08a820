//! OpenVINO Inference Bridge Library

pub mod config;
pub mod engine;
pub mod error;
pub mod utils;

#[cfg(feature = "openvino")]
pub mod ffi;

pub use config::Config;
pub use engine::InferenceBridge;
pub use error::{BridgeError, Result};
