use ndarray::indices;

use crate::internal::*;
use crate::runtime::bind_parameters;

/// Reference runtime: evaluates every instruction over logical coordinates,
/// ignoring layouts.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterpreterRuntime;

impl Runtime for InterpreterRuntime {
    fn name(&self) -> StaticName {
        "interpreter".into()
    }

    fn prepare(&self, module: HloModule) -> HloResult<Box<dyn Runnable>> {
        module.validate()?;
        debug!("Interpreter prepared {}", module.name);
        Ok(Box::new(Arc::new(module)))
    }
}

impl Runnable for Arc<HloModule> {
    fn run(&self, inputs: TVec<ArrayD<f32>>) -> HloResult<ArrayD<f32>> {
        let mut values = bind_parameters(self, inputs)?;
        for inst in &self.instructions {
            let Op::Convolution(conv) = &inst.op else { continue };
            let [lhs, rhs] = &*inst.operands else {
                bail!("convolution {} takes two operands", inst.name)
            };
            let (lhs, rhs) = (values[&lhs.name].view(), values[&rhs.name].view());
            let mut output = convolution(lhs, rhs, conv, &inst.shape.dims);
            let dt = inst.shape.element_type;
            output.mapv_inplace(|x| dt.round(x));
            values.insert(inst.name.clone(), output);
        }
        let root = self.root()?;
        values.remove(&root.name).with_context(|| format!("No value computed for {}", root.name))
    }
}

/// Straightforward grouped convolution over logical coordinates.
///
/// Output position `o` with kernel tap `k` reads the padded and dilated input
/// at `o * stride + k * rhs_dilation - padding_low`; positions that fall in
/// padding or in the holes of the lhs dilation contribute nothing.
pub fn convolution(
    lhs: ArrayViewD<f32>,
    rhs: ArrayViewD<f32>,
    conv: &Convolution,
    output_dims: &[usize],
) -> ArrayD<f32> {
    let dn = &conv.dim_labels;
    let out_per_group = output_dims[dn.output_feature] / conv.feature_group_count;
    let in_per_group = rhs.shape()[dn.kernel_input_feature];
    let kernel_spatial: TVec<usize> = dn.kernel_spatial.iter().map(|&a| rhs.shape()[a]).collect();
    let mut lhs_coords: TVec<usize> = tvec![0; lhs.ndim()];
    let mut rhs_coords: TVec<usize> = tvec![0; rhs.ndim()];
    ArrayD::from_shape_fn(output_dims, |out| {
        let feature = out[dn.output_feature];
        let group = feature / out_per_group;
        lhs_coords[dn.input_batch] = out[dn.output_batch];
        rhs_coords[dn.kernel_output_feature] = feature;
        let mut acc = 0f32;
        'taps: for tap in indices(&*kernel_spatial) {
            for (ix, wd) in conv.window.dims.iter().enumerate() {
                let position = (out[dn.output_spatial[ix]] * wd.stride + tap[ix] * wd.rhs_dilation)
                    as isize
                    - wd.padding_low as isize;
                if position < 0 || position as usize % wd.lhs_dilation != 0 {
                    continue 'taps;
                }
                let x = position as usize / wd.lhs_dilation;
                if x >= lhs.shape()[dn.input_spatial[ix]] {
                    continue 'taps;
                }
                lhs_coords[dn.input_spatial[ix]] = x;
                rhs_coords[dn.kernel_spatial[ix]] = tap[ix];
            }
            for i in 0..in_per_group {
                lhs_coords[dn.input_feature] = group * in_per_group + i;
                rhs_coords[dn.kernel_input_feature] = i;
                acc += lhs[&*lhs_coords] * rhs[&*rhs_coords];
            }
        }
        acc
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::Array4;

    fn module(window: &str, lhs: &str, rhs: &str, out: &str, groups: usize) -> HloModule {
        parse_module(&format!(
            "HloModule t ENTRY e {{
                a = f32[{lhs}] parameter(0)
                k = f32[{rhs}] parameter(1)
                ROOT c = f32[{out}] convolution(a, k), window={{{window}}},
                    dim_labels=b01f_01io->b01f, feature_group_count={groups}
            }}"
        ))
        .unwrap()
    }

    #[test]
    fn depthwise_sum() {
        let m = module("size=2x2", "1,2,2,2", "2,2,1,2", "1,1,1,2", 2);
        let a = Array4::from_shape_fn((1, 2, 2, 2), |(_, h, w, c)| {
            (h * 2 + w) as f32 * (c + 1) as f32
        })
        .into_dyn();
        let k = ArrayD::from_elem(IxDyn(&[2, 2, 1, 2]), 1f32);
        let out = InterpreterRuntime.prepare(m).unwrap().run(tvec!(a, k)).unwrap();
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![6f32, 12.]);
    }

    #[test]
    fn lhs_dilation_inserts_holes() {
        // input 1,2 along h, dilated by 3 -> 1 0 0 2, window 1 stride 1
        let m = module("size=1x1 lhs_dilate=3x1", "1,2,1,1", "1,1,1,1", "1,4,1,1", 1);
        let a = ArrayD::from_shape_vec(IxDyn(&[1, 2, 1, 1]), vec![1f32, 2.]).unwrap();
        let k = ArrayD::from_elem(IxDyn(&[1, 1, 1, 1]), 1f32);
        let out = InterpreterRuntime.prepare(m).unwrap().run(tvec!(a, k)).unwrap();
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![1f32, 0., 0., 2.]);
    }

    #[test]
    fn padding_and_rhs_dilation() {
        // 1x1 input padded to 1x5 (2 each side), window 2 dilated by 2 spans 3
        let m = module("size=1x2 pad=0_0x2_2 rhs_dilate=1x2", "1,1,1,1", "1,2,1,1", "1,1,3,1", 1);
        let a = ArrayD::from_elem(IxDyn(&[1, 1, 1, 1]), 5f32);
        let k = ArrayD::from_shape_vec(IxDyn(&[1, 2, 1, 1]), vec![1f32, 10.]).unwrap();
        let out = InterpreterRuntime.prepare(m).unwrap().run(tvec!(a, k)).unwrap();
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![50f32, 0., 5.]);
    }

    #[test]
    fn bf16_results_are_rounded() {
        let text = "HloModule t ENTRY e {
            a = bf16[1,1,1,1] parameter(0)
            k = bf16[1,1,1,1] parameter(1)
            ROOT c = bf16[1,1,1,1] convolution(a, k), window={size=1x1},
                dim_labels=b01f_01io->b01f
        }";
        let a = ArrayD::from_elem(IxDyn(&[1, 1, 1, 1]), 1.1f32);
        let k = ArrayD::from_elem(IxDyn(&[1, 1, 1, 1]), 3.3f32);
        let m = parse_module(text).unwrap();
        let out = InterpreterRuntime.prepare(m).unwrap().run(tvec!(a, k)).unwrap();
        let found = out.iter().next().copied().unwrap();
        assert_eq!(found, PrimitiveType::BF16.round(found));
        assert_ne!(found, 1.1f32 * 3.3);
        approx::assert_relative_eq!(found, 1.1f32 * 3.3, max_relative = 1e-2);
    }

    #[test]
    fn wrong_input_shape() {
        let m = module("size=2x2", "1,2,2,2", "2,2,1,2", "1,1,1,2", 2);
        let a = ArrayD::zeros(IxDyn(&[1, 2, 2, 3]));
        let k = ArrayD::zeros(IxDyn(&[2, 2, 1, 2]));
        assert!(InterpreterRuntime.prepare(m).unwrap().run(tvec!(a, k)).is_err());
    }
}
