use crate::internal::*;

/// Render a spec as a single convolution HLO module.
///
/// The template depends on the regime: outer dimension cases pad a dilated
/// window on both sides, dilated cases stride over an lhs dilated input, and
/// plain cases only declare the window size. The feature group count is
/// always the feature count, making the convolution depthwise.
pub fn synthesize(spec: &DepthwiseConv2DSpec, use_bf16: bool) -> String {
    let dt = if use_bf16 { PrimitiveType::BF16 } else { PrimitiveType::F32 };
    let shape = |dims: [usize; 4], layout: [usize; 4]| {
        Shape::new(dt, dims).with_layout(Layout::new(layout)).to_string()
    };
    let activation = shape(spec.activation_dims, spec.activation_layout);
    let kernel = shape(spec.kernel_dims, spec.kernel_layout);
    let output = shape(spec.output_dims, spec.output_layout);
    let (w, groups) = (spec.window, spec.output_feature);
    match spec.regime {
        Regime::OuterDim => format!(
            r#"
    HloModule TensorFlowDepthwiseConv

    ENTRY main {{
      activation = {activation} parameter(0)
      kernel = {kernel} parameter(1)
      ROOT conv = {output} convolution({activation} activation, {kernel} kernel),
          window={{size={w}x{w}  pad=1_1x{w}_{w} rhs_dilate=1x{w}}}, dim_labels=b01f_01io->b01f,
          feature_group_count={groups}
    }}
    "#
        ),
        Regime::Plain => format!(
            r#"
      HloModule TensorFlowDepthwiseConv

      ENTRY main {{
        activation = {activation} parameter(0)
        kernel = {kernel} parameter(1)
        ROOT conv = {output} convolution({activation} activation, {kernel} kernel),
            window={{size={w}x{w}}}, dim_labels=b01f_01io->b01f,
            feature_group_count={groups}
      }}
      "#
        ),
        Regime::DilatedStrided { stride, pad, lhs_dilate } => format!(
            r#"
    HloModule TensorFlowDepthwiseConv

    ENTRY main {{
      activation = {activation} parameter(0)
      kernel = {kernel} parameter(1)
      ROOT conv = {output} convolution({activation} activation, {kernel} kernel),
          window={{size={w}x{w} stride={stride}x1 pad={pad}_{pad}x0_0 lhs_dilate={lhs_dilate}x1}},
          dim_labels=b01f_01io->b01f, feature_group_count={groups}
    }}
    "#
        ),
    }
}
