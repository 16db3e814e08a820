//! Model Handle
//!
//! Owns the loaded network description and resolves the tensors the rest of
//! the bridge works with: the first declared input and the first declared
//! output, both forced to f32 at the tensor boundary.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::backend::{InferenceBackend, NetworkDescription, PortInfo};
use crate::error::{BridgeError, Result};

/// Resolved (name, shape) of a network port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorPort {
    pub name: String,
    pub dims: Vec<usize>,
}

impl From<PortInfo> for TensorPort {
    fn from(port: PortInfo) -> Self {
        Self {
            name: port.name,
            dims: port.dims,
        }
    }
}

/// NCHW dimensions of the first input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputDims {
    pub batch: usize,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl InputDims {
    pub fn from_port(port: &TensorPort) -> Result<Self> {
        match port.dims.as_slice() {
            &[batch, channels, height, width] => Ok(Self {
                batch,
                channels,
                height,
                width,
            }),
            dims => Err(BridgeError::UnsupportedInputRank {
                name: port.name.clone(),
                rank: dims.len(),
            }),
        }
    }

    pub fn as_array(&self) -> [usize; 4] {
        [self.batch, self.channels, self.height, self.width]
    }

    pub fn pixels(&self) -> usize {
        self.height * self.width
    }
}

/// The loaded, shape-configured network
pub struct ModelHandle<N> {
    network: N,
    path: PathBuf,
    input: TensorPort,
    output: TensorPort,
}

impl<N: NetworkDescription> ModelHandle<N> {
    /// Read a network from `path` and prepare its first input and output.
    ///
    /// Batch size is forced to 1 whatever the source declares.
    pub fn load<B>(backend: &mut B, path: &Path) -> Result<Self>
    where
        B: InferenceBackend<Network = N>,
    {
        let model_load = |source| BridgeError::ModelLoad {
            path: path.to_path_buf(),
            source,
        };

        info!("Loading model from {}", path.display());
        let mut network = backend.read_network(path).map_err(model_load)?;
        network.set_batch_size(1).map_err(model_load)?;

        let (input, output) = prepare_io(&mut network).map_err(model_load)?;
        info!(
            "Model ready: input '{}' {:?}, output '{}' {:?}",
            input.name, input.dims, output.name, output.dims
        );

        Ok(Self {
            network,
            path: path.to_path_buf(),
            input,
            output,
        })
    }

    /// Resize the first input to `height` x `width`, batch 1, channels unchanged.
    ///
    /// Any session compiled from this handle before the call is outdated.
    pub fn set_input_dimensions(&mut self, width: usize, height: usize) -> Result<InputDims> {
        if width == 0 || height == 0 {
            return Err(BridgeError::InvalidDimensions { width, height });
        }

        let current = InputDims::from_port(&self.input)?;
        let target = InputDims {
            batch: 1,
            channels: current.channels,
            height,
            width,
        };

        self.network
            .reshape(&self.input.name, &target.as_array())
            .map_err(BridgeError::Backend)?;
        self.refresh_ports()?;

        debug!("Reshaped '{}' to {:?}", self.input.name, self.input.dims);
        InputDims::from_port(&self.input)
    }

    pub fn input(&self) -> &TensorPort {
        &self.input
    }

    pub fn output(&self) -> &TensorPort {
        &self.output
    }

    pub fn input_dims(&self) -> Result<InputDims> {
        InputDims::from_port(&self.input)
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // Shapes change after reshape; names do not.
    fn refresh_ports(&mut self) -> Result<()> {
        let input = find_port(self.network.inputs(), &self.input.name)?;
        let output = find_port(self.network.outputs(), &self.output.name)?;
        self.input = input;
        self.output = output;
        Ok(())
    }
}

/// Select the first input and first output by declaration order and force
/// both to f32. Extra ports are ignored.
fn prepare_io<N: NetworkDescription>(network: &mut N) -> anyhow::Result<(TensorPort, TensorPort)> {
    let input: TensorPort = network
        .inputs()
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("network declares no inputs"))?
        .into();
    let output: TensorPort = network
        .outputs()
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("network declares no outputs"))?
        .into();

    network.set_f32_precision(&input.name)?;
    network.set_f32_precision(&output.name)?;

    Ok((input, output))
}

fn find_port(ports: Vec<PortInfo>, name: &str) -> Result<TensorPort> {
    ports
        .into_iter()
        .find(|p| p.name == name)
        .map(TensorPort::from)
        .ok_or_else(|| BridgeError::Backend(anyhow::anyhow!("port '{}' disappeared after reshape", name)))
}
