use itertools::Itertools;

use crate::internal::*;

/// A stable, identifier safe name for a case.
///
/// Field order is fixed; dims are joined with `x` and layouts with `_`.
/// Non plain cases carry their lhs dilation. The name is used as a test
/// function name, so it must never contain a minus sign.
pub fn identify(spec: &DepthwiseConv2DSpec, use_bf16: bool) -> String {
    let data_type = if use_bf16 { PrimitiveType::BF16 } else { PrimitiveType::F32 };
    let mut id = format!(
        "activation_dims_{}_activation_layout_{}_kernel_dims_{}_kernel_layout_{}\
         _output_dims_{}_output_layout_{}{}",
        spec.activation_dims.iter().join("x"),
        spec.activation_layout.iter().join("_"),
        spec.kernel_dims.iter().join("x"),
        spec.kernel_layout.iter().join("_"),
        spec.output_dims.iter().join("x"),
        spec.output_layout.iter().join("_"),
        data_type,
    );
    if let Some(lhs_dilate) = spec.lhs_dilate() {
        id.push_str(&format!("_lhs_dilation_{lhs_dilate}x1"));
    }
    id.replace('-', "n")
}
