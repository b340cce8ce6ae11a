use std::fmt::Debug;

use crate::internal::*;

/// Something able to turn a module into an executable.
pub trait Runtime: Debug + Send + Sync {
    fn name(&self) -> StaticName;
    fn prepare(&self, module: HloModule) -> HloResult<Box<dyn Runnable>>;
}

/// A prepared module. Inputs and output are logical arrays of f32 holding
/// values representable in the declared element types.
pub trait Runnable: Debug + Send + Sync {
    fn run(&self, inputs: TVec<ArrayD<f32>>) -> HloResult<ArrayD<f32>>;
}

/// Check inputs against the module parameters and round them to their
/// declared element types.
pub fn bind_parameters(
    module: &HloModule,
    inputs: TVec<ArrayD<f32>>,
) -> HloResult<HashMap<String, ArrayD<f32>>> {
    let params = module.parameters();
    ensure!(
        params.len() == inputs.len(),
        "{} expects {} inputs, got {}",
        module.name,
        params.len(),
        inputs.len()
    );
    params
        .into_iter()
        .zip(inputs)
        .map(|(param, mut input)| {
            ensure!(
                input.shape() == &*param.shape.dims,
                "Input for {} has shape {:?}, expected {}",
                param.name,
                input.shape(),
                param.shape
            );
            let dt = param.shape.element_type;
            input.mapv_inplace(|x| dt.round(x));
            Ok((param.name.clone(), input))
        })
        .collect()
}
