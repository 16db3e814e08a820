//! OpenVINO adapter for the backend seam
//!
//! Port shapes come from the model's partial shapes at load time. The 0.8
//! bindings cannot reshape a model, so a requested shape is accepted only when
//! every dimension falls inside the range the model declares for it; a static
//! input keeps its native shape. The accepted shape is bound as an input tensor
//! on each request and the output shape is read back after inference.

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use openvino::{
    prepostprocess, Core, DeviceType, Dimension, ElementType, InferRequest as OvRequest, Model,
    Node, RwPropertyKey, Shape, Tensor,
};
use tracing::{debug, info};

use super::backend::{InferRequest, InferenceBackend, NetworkDescription, PortInfo};

/// OpenVINO runtime core
pub struct OpenVinoBackend {
    core: Core,
}

impl OpenVinoBackend {
    pub fn new() -> Result<Self> {
        Ok(Self { core: Core::new()? })
    }
}

/// Range one input dimension accepts. `max` is `None` when unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DimBounds {
    min: usize,
    max: Option<usize>,
}

impl DimBounds {
    fn from_dimension(dim: &Dimension) -> Self {
        let max = dim.get_max();
        Self {
            min: dim.get_min().max(0) as usize,
            max: (max >= 0).then_some(max as usize),
        }
    }

    fn accepts(&self, value: usize) -> bool {
        value >= self.min && self.max.map_or(true, |max| value <= max)
    }

    /// Known size of the dimension, 0 while it is dynamic
    fn nominal(&self) -> usize {
        match self.max {
            Some(max) if max == self.min => max,
            _ => 0,
        }
    }
}

fn check_bounds(port: &str, bounds: &[DimBounds], dims: &[usize]) -> Result<()> {
    if bounds.len() != dims.len() {
        bail!("input '{}' has rank {}, not {}", port, bounds.len(), dims.len());
    }
    for (axis, (range, &value)) in bounds.iter().zip(dims).enumerate() {
        if !range.accepts(value) {
            match range.max {
                Some(max) if max == range.min => bail!(
                    "input '{}' has static size {} on axis {}, cannot use {}",
                    port, max, axis, value
                ),
                Some(max) => bail!(
                    "input '{}' accepts {}..={} on axis {}, not {}",
                    port, range.min, max, axis, value
                ),
                None => bail!(
                    "input '{}' needs at least {} on axis {}, not {}",
                    port, range.min, axis, value
                ),
            }
        }
    }
    Ok(())
}

fn shape_of(dims: &[usize]) -> Result<Shape> {
    let dims: Vec<i64> = dims.iter().map(|&d| d as i64).collect();
    Ok(Shape::new(&dims)?)
}

fn dims_of(tensor: &Tensor) -> Result<Vec<usize>> {
    let shape = tensor.get_shape()?;
    Ok(shape
        .get_dimensions()
        .iter()
        .map(|&d| d.max(0) as usize)
        .collect())
}

fn port_bounds(node: &Node) -> Result<(String, Vec<DimBounds>)> {
    let name = node.get_name()?;
    let shape = node.get_partial_shape()?;
    if shape.get_rank().is_dynamic() {
        bail!("port '{}' has a dynamic rank", name);
    }
    let bounds = shape
        .get_dimensions()
        .iter()
        .map(DimBounds::from_dimension)
        .collect();
    Ok((name, bounds))
}

fn port_info(name: String, bounds: &[DimBounds]) -> PortInfo {
    PortInfo {
        name,
        dims: bounds.iter().map(DimBounds::nominal).collect(),
    }
}

pub struct OpenVinoNetwork {
    model: Model,
    inputs: Vec<PortInfo>,
    outputs: Vec<PortInfo>,
    input_bounds: Vec<Vec<DimBounds>>,
}

impl OpenVinoNetwork {
    fn input_index(&self, name: &str) -> Result<usize> {
        self.inputs
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| anyhow!("unknown input '{}'", name))
    }
}

pub struct OpenVinoRequest {
    request: OvRequest,
    input_name: String,
    output_name: String,
    input: Tensor,
    output: Option<Tensor>,
}

// SAFETY: tensors are only touched through `&mut self` on the request, and
// the bridge serializes requests through `&mut self` or the `SharedBridge` lock.
unsafe impl Send for OpenVinoRequest {}

impl InferenceBackend for OpenVinoBackend {
    type Network = OpenVinoNetwork;
    type Request = OpenVinoRequest;

    fn available_devices(&mut self) -> Result<Vec<String>> {
        let devices = self.core.available_devices()?;
        Ok(devices.iter().map(|d| d.as_ref().to_string()).collect())
    }

    fn set_cache_dir(&mut self, device: &str, dir: &Path) -> Result<()> {
        let dir = dir
            .to_str()
            .ok_or_else(|| anyhow!("cache directory is not valid UTF-8"))?;
        self.core
            .set_property(&DeviceType::from(device), &RwPropertyKey::CacheDir, dir)?;
        Ok(())
    }

    fn read_network(&mut self, path: &Path) -> Result<OpenVinoNetwork> {
        let path = path
            .to_str()
            .ok_or_else(|| anyhow!("model path is not valid UTF-8"))?;
        let model = self
            .core
            .read_model_from_file(path, "")
            .with_context(|| format!("reading {}", path))?;

        let mut inputs = Vec::new();
        let mut input_bounds = Vec::new();
        for i in 0..model.get_inputs_len()? {
            let (name, bounds) = port_bounds(&model.get_input_by_index(i)?)?;
            inputs.push(port_info(name, &bounds));
            input_bounds.push(bounds);
        }
        let mut outputs = Vec::new();
        for i in 0..model.get_outputs_len()? {
            let (name, bounds) = port_bounds(&model.get_output_by_index(i)?)?;
            outputs.push(port_info(name, &bounds));
        }

        info!(
            "Read network {} ({} inputs, {} outputs, {} shapes)",
            path,
            inputs.len(),
            outputs.len(),
            if model.is_dynamic() { "dynamic" } else { "static" }
        );
        Ok(OpenVinoNetwork {
            model,
            inputs,
            outputs,
            input_bounds,
        })
    }

    fn compile(&mut self, network: &OpenVinoNetwork, device: &str) -> Result<OpenVinoRequest> {
        let input = network
            .inputs
            .first()
            .ok_or_else(|| anyhow!("network declares no inputs"))?;
        let output = network
            .outputs
            .first()
            .ok_or_else(|| anyhow!("network declares no outputs"))?;
        if input.dims.contains(&0) {
            bail!(
                "input '{}' has dynamic dimensions {:?}; set input dimensions first",
                input.name,
                input.dims
            );
        }

        let mut compiled = self.core.compile_model(&network.model, DeviceType::from(device))?;
        let request = compiled.create_infer_request()?;

        let input_tensor = Tensor::new(ElementType::F32, &shape_of(&input.dims)?)?;
        debug!("Bound input '{}' {:?} on {}", input.name, input.dims, device);

        Ok(OpenVinoRequest {
            request,
            input_name: input.name.clone(),
            output_name: output.name.clone(),
            input: input_tensor,
            output: None,
        })
    }
}

impl NetworkDescription for OpenVinoNetwork {
    fn inputs(&self) -> Vec<PortInfo> {
        self.inputs.clone()
    }

    fn outputs(&self) -> Vec<PortInfo> {
        self.outputs.clone()
    }

    fn set_batch_size(&mut self, batch: usize) -> Result<()> {
        for (port, bounds) in self.inputs.iter_mut().zip(&self.input_bounds) {
            if let (Some(first), Some(range)) = (port.dims.first_mut(), bounds.first()) {
                if !range.accepts(batch) {
                    bail!("input '{}' cannot run with batch {}", port.name, batch);
                }
                *first = batch;
            }
        }
        for port in &mut self.outputs {
            if let Some(first) = port.dims.first_mut() {
                *first = batch;
            }
        }
        Ok(())
    }

    fn set_f32_precision(&mut self, port: &str) -> Result<()> {
        let pipeline = prepostprocess::Pipeline::new(&self.model)?;
        match self.inputs.iter().position(|p| p.name == port) {
            Some(index) => {
                if self.model.get_input_by_index(index)?.get_element_type()? == ElementType::F32 {
                    return Ok(());
                }
                let dims = &self.inputs[index].dims;
                if dims.contains(&0) {
                    bail!("input '{}' is not f32 and its shape {:?} is dynamic", port, dims);
                }
                // Input tensor info only takes its precision from a template tensor
                let template = Tensor::new(ElementType::F32, &shape_of(dims)?)?;
                pipeline
                    .get_input_info_by_name(port)?
                    .get_tensor_info()?
                    .set_from(&template)?;
            }
            None => {
                pipeline
                    .get_output_info_by_name(port)?
                    .get_tensor_info()?
                    .set_element_type(ElementType::F32)?;
            }
        }
        self.model = pipeline.build_new_model()?;
        Ok(())
    }

    fn reshape(&mut self, input: &str, dims: &[usize]) -> Result<()> {
        let index = self.input_index(input)?;
        check_bounds(input, &self.input_bounds[index], dims)?;
        self.inputs[index].dims = dims.to_vec();

        // Spatial dims follow the input for image-to-image networks
        if let (Some(output), [n, _, h, w]) = (self.outputs.first_mut(), dims) {
            if output.dims.len() == 4 {
                output.dims[0] = *n;
                output.dims[2] = *h;
                output.dims[3] = *w;
            }
        }
        Ok(())
    }
}

impl InferRequest for OpenVinoRequest {
    fn input_buffer(&mut self, name: &str) -> Result<(Vec<usize>, &mut [f32])> {
        if name != self.input_name {
            return Err(anyhow!("no input named '{}'", name));
        }
        let dims = dims_of(&self.input)?;
        Ok((dims, self.input.get_data_mut::<f32>()?))
    }

    fn output_buffer(&self, name: &str) -> Result<(Vec<usize>, &[f32])> {
        if name != self.output_name {
            return Err(anyhow!("no output named '{}'", name));
        }
        let output = self
            .output
            .as_ref()
            .ok_or_else(|| anyhow!("output '{}' is not available before inference", name))?;
        Ok((dims_of(output)?, output.get_data::<f32>()?))
    }

    fn infer(&mut self) -> Result<()> {
        self.request.set_input_tensor(&self.input)?;
        self.request.infer()?;
        self.output = Some(self.request.get_output_tensor()?);
        Ok(())
    }
}
