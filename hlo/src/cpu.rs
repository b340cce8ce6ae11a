use ndarray::indices;

use crate::internal::*;
use crate::runtime::bind_parameters;

/// A logical array stored in memory following a layout.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedTensor {
    pub dims: TVec<usize>,
    pub strides: TVec<usize>,
    pub data: Vec<f32>,
}

impl PackedTensor {
    pub fn pack(array: ArrayViewD<f32>, layout: &Layout) -> PackedTensor {
        let dims: TVec<usize> = array.shape().into();
        let strides = layout.strides(&dims);
        let mut data = vec![0f32; array.len()];
        for (coords, v) in array.indexed_iter() {
            data[offset(coords.slice(), &strides)] = *v;
        }
        PackedTensor { dims, strides, data }
    }

    pub fn unpack(&self) -> ArrayD<f32> {
        ArrayD::from_shape_fn(&*self.dims, |coords| {
            self.data[offset(coords.slice(), &self.strides)]
        })
    }
}

fn offset(coords: &[usize], strides: &[usize]) -> usize {
    coords.iter().zip(strides).map(|(c, s)| c * s).sum()
}

/// Backend under test: operands are packed according to their layouts and
/// the convolution walks physical offsets.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuRuntime;

impl Runtime for CpuRuntime {
    fn name(&self) -> StaticName {
        "cpu".into()
    }

    fn prepare(&self, module: HloModule) -> HloResult<Box<dyn Runnable>> {
        module.validate()?;
        for inst in &module.instructions {
            if let Op::Convolution(conv) = &inst.op {
                let depthwise = is_depthwise(conv, &module, inst)?;
                debug!("cpu: {} lowered, depthwise={}", inst.name, depthwise);
            }
        }
        Ok(Box::new(CpuExecutable { module }))
    }
}

fn is_depthwise(conv: &Convolution, module: &HloModule, inst: &Instruction) -> HloResult<bool> {
    let kernel = module.instruction(&inst.operands[1].name)?;
    let in_per_group = kernel.shape.dims[conv.dim_labels.kernel_input_feature];
    let out_per_group = inst.shape.dims[conv.dim_labels.output_feature] / conv.feature_group_count;
    Ok(in_per_group == 1 && out_per_group == 1)
}

#[derive(Debug)]
struct CpuExecutable {
    module: HloModule,
}

impl Runnable for CpuExecutable {
    fn run(&self, inputs: TVec<ArrayD<f32>>) -> HloResult<ArrayD<f32>> {
        let mut values: HashMap<String, PackedTensor> = HashMap::new();
        for (name, array) in bind_parameters(&self.module, inputs)? {
            let layout = self.module.instruction(&name)?.shape.layout_or_default();
            values.insert(name, PackedTensor::pack(array.view(), &layout));
        }
        for inst in &self.module.instructions {
            let Op::Convolution(conv) = &inst.op else { continue };
            let [lhs, rhs] = &*inst.operands else {
                bail!("convolution {} takes two operands", inst.name)
            };
            let depthwise = is_depthwise(conv, &self.module, inst)?;
            let mut output =
                convolution(&values[&lhs.name], &values[&rhs.name], conv, &inst.shape, depthwise);
            let dt = inst.shape.element_type;
            output.data.iter_mut().for_each(|x| *x = dt.round(*x));
            values.insert(inst.name.clone(), output);
        }
        let root = self.module.root()?;
        let output = values
            .get(&root.name)
            .with_context(|| format!("No value computed for {}", root.name))?;
        Ok(output.unpack())
    }
}

fn convolution(
    lhs: &PackedTensor,
    rhs: &PackedTensor,
    conv: &Convolution,
    shape: &Shape,
    depthwise: bool,
) -> PackedTensor {
    let dn = &conv.dim_labels;
    let dims = shape.dims.clone();
    let strides = shape.layout_or_default().strides(&dims);
    let mut data = vec![0f32; shape.element_count()];

    let batch = dims[dn.output_batch];
    let features = dims[dn.output_feature];
    let out_per_group = features / conv.feature_group_count;
    let in_per_group = rhs.dims[dn.kernel_input_feature];
    let (lhs_b, lhs_f) = (lhs.strides[dn.input_batch], lhs.strides[dn.input_feature]);
    let (rhs_i, rhs_o) =
        (rhs.strides[dn.kernel_input_feature], rhs.strides[dn.kernel_output_feature]);
    let (out_b, out_f) = (strides[dn.output_batch], strides[dn.output_feature]);
    let out_spatial: TVec<usize> = dn.output_spatial.iter().map(|&a| dims[a]).collect();
    let kernel_spatial: TVec<usize> = dn.kernel_spatial.iter().map(|&a| rhs.dims[a]).collect();

    // (lhs spatial offset, rhs spatial offset) of the taps hitting real input
    let mut taps: Vec<(usize, usize)> = Vec::with_capacity(kernel_spatial.iter().product());
    for position in indices(&*out_spatial) {
        taps.clear();
        'taps: for tap in indices(&*kernel_spatial) {
            let mut lhs_offset = 0;
            let mut rhs_offset = 0;
            for (ix, wd) in conv.window.dims.iter().enumerate() {
                let p = (position[ix] * wd.stride + tap[ix] * wd.rhs_dilation) as isize
                    - wd.padding_low as isize;
                if p < 0 || p as usize % wd.lhs_dilation != 0 {
                    continue 'taps;
                }
                let x = p as usize / wd.lhs_dilation;
                if x >= lhs.dims[dn.input_spatial[ix]] {
                    continue 'taps;
                }
                lhs_offset += x * lhs.strides[dn.input_spatial[ix]];
                rhs_offset += tap[ix] * rhs.strides[dn.kernel_spatial[ix]];
            }
            taps.push((lhs_offset, rhs_offset));
        }
        let out_offset: usize = dn
            .output_spatial
            .iter()
            .enumerate()
            .map(|(ix, &axis)| position[ix] * strides[axis])
            .sum();
        for b in 0..batch {
            for f in 0..features {
                let acc: f32 = if depthwise {
                    let (lhs_base, rhs_base) = (b * lhs_b + f * lhs_f, f * rhs_o);
                    taps.iter().map(|(l, r)| lhs.data[lhs_base + l] * rhs.data[rhs_base + r]).sum()
                } else {
                    let group = f / out_per_group;
                    let mut acc = 0f32;
                    for (l, r) in &taps {
                        for i in 0..in_per_group {
                            let lhs_ix = b * lhs_b + (group * in_per_group + i) * lhs_f + l;
                            let rhs_ix = i * rhs_i + f * rhs_o + r;
                            acc += lhs.data[lhs_ix] * rhs.data[rhs_ix];
                        }
                    }
                    acc
                };
                data[out_offset + b * out_b + f * out_f] = acc;
            }
        }
    }
    PackedTensor { dims, strides, data }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::interpreter::InterpreterRuntime;
    use crate::shape::PrimitiveType::F32;
    use proptest::prelude::*;

    #[test]
    fn pack_unpack_feature_minor() {
        let array =
            ArrayD::from_shape_fn(IxDyn(&[2, 3, 1, 2]), |c| (c[0] * 100 + c[1] * 10 + c[3]) as f32);
        let packed = PackedTensor::pack(array.view(), &Layout::new([3, 0, 2, 1]));
        // feature is minor-most, then batch
        assert_eq!(&packed.data[..4], &[0f32, 1., 100., 101.]);
        assert_eq!(packed.unpack(), array);
    }

    #[derive(Debug, Clone)]
    struct ConvCase {
        module: HloModule,
    }

    impl ConvCase {
        fn inputs(&self) -> TVec<ArrayD<f32>> {
            self.module
                .parameter_shapes()
                .iter()
                .enumerate()
                .map(|(p, shape)| {
                    let mut n = p;
                    ArrayD::from_shape_fn(&*shape.dims, |_| {
                        n += 1;
                        ((n * 7 + 3) % 11) as f32 - 5.
                    })
                })
                .collect()
        }
    }

    fn param(name: &str, number: usize, shape: Shape) -> Instruction {
        let op = Op::Parameter(number);
        Instruction { name: name.into(), shape, op, operands: tvec!(), is_root: false }
    }

    fn operand(name: &str) -> Operand {
        Operand { shape: None, name: name.into() }
    }

    fn layout() -> BoxedStrategy<Layout> {
        Just(vec![0usize, 1, 2, 3]).prop_shuffle().prop_map(Layout::new).boxed()
    }

    fn conv_case() -> BoxedStrategy<ConvCase> {
        // input, kernel, stride, pad low, pad high, lhs dilation, rhs dilation
        let geometry =
            (1usize..=5, 1usize..=3, 1usize..=3, 0usize..=2, 0usize..=2, 1usize..=3, 1usize..=2);
        (
            1usize..=2,
            1usize..=3,
            1usize..=2,
            1usize..=2,
            [geometry.clone(), geometry],
            [layout(), layout(), layout()],
        )
            .prop_filter_map(
                "window larger than input",
                |(batch, groups, in_per_group, out_per_group, geo, layouts)| {
                    let window = Window {
                        dims: geo
                            .iter()
                            .map(|&(_, k, stride, low, high, lhs_d, rhs_d)| WindowDim {
                                size: k,
                                stride,
                                padding_low: low,
                                padding_high: high,
                                lhs_dilation: lhs_d,
                                rhs_dilation: rhs_d,
                            })
                            .collect(),
                    };
                    let out_hw: TVec<usize> = window
                        .dims
                        .iter()
                        .zip(&geo)
                        .map(|(wd, g)| wd.output_size(g.0).ok())
                        .collect::<Option<_>>()?;
                    if out_hw.contains(&0) {
                        return None;
                    }
                    let [a, k, o] = layouts;
                    let features_in = groups * in_per_group;
                    let features_out = groups * out_per_group;
                    let lhs =
                        Shape::new(F32, [batch, geo[0].0, geo[1].0, features_in]).with_layout(a);
                    let rhs = Shape::new(F32, [geo[0].1, geo[1].1, in_per_group, features_out])
                        .with_layout(k);
                    let out =
                        Shape::new(F32, [batch, out_hw[0], out_hw[1], features_out]).with_layout(o);
                    let conv = Convolution {
                        window,
                        dim_labels: "b01f_01io->b01f".parse().ok()?,
                        feature_group_count: groups,
                    };
                    let root = Instruction {
                        name: "c".into(),
                        shape: out,
                        op: Op::Convolution(conv),
                        operands: tvec!(operand("a"), operand("k")),
                        is_root: true,
                    };
                    let module = HloModule {
                        name: "proptest".into(),
                        entry_name: "main".into(),
                        instructions: vec![param("a", 0, lhs), param("k", 1, rhs), root],
                    };
                    Some(ConvCase { module })
                },
            )
            .boxed()
    }

    proptest! {
        #[test]
        fn cpu_agrees_with_interpreter(case in conv_case()) {
            let reference = InterpreterRuntime.prepare(case.module.clone()).unwrap();
            let expected = reference.run(case.inputs()).unwrap();
            let backend = CpuRuntime.prepare(case.module.clone()).unwrap();
            let found = backend.run(case.inputs()).unwrap();
            prop_assert_eq!(found, expected);
        }

        #[test]
        fn printed_module_reparses(case in conv_case()) {
            let reparsed = parse_module(&case.module.to_string()).unwrap();
            prop_assert_eq!(reparsed, case.module);
        }
    }
}
