use crate::internal::*;

/// Infer the output dimensions of a convolution from its operands.
///
/// Spatial dims follow the usual arithmetic: the input is dilated by
/// `lhs_dilation`, padded, and the (dilated) window slides with `stride`.
pub fn convolution_dims(lhs: &Shape, rhs: &Shape, conv: &Convolution) -> HloResult<TVec<usize>> {
    let dn = &conv.dim_labels;
    let rank = dn.spatial_rank() + 2;
    ensure!(lhs.rank() == rank, "Convolution input {} does not match labels {}", lhs, dn);
    ensure!(rhs.rank() == rank, "Convolution kernel {} does not match labels {}", rhs, dn);
    ensure!(
        conv.window.rank() == dn.spatial_rank(),
        "Window {} does not match {} spatial dimensions",
        conv.window,
        dn.spatial_rank()
    );
    let groups = conv.feature_group_count;
    ensure!(groups > 0, "feature_group_count must be positive");
    let input_features = lhs.dims[dn.input_feature];
    let kernel_input_features = rhs.dims[dn.kernel_input_feature];
    let output_features = rhs.dims[dn.kernel_output_feature];
    ensure!(
        input_features == kernel_input_features * groups,
        "Input has {} features, kernel expects {} per group with {} groups",
        input_features,
        kernel_input_features,
        groups
    );
    ensure!(
        output_features % groups == 0,
        "Kernel output features ({}) not divisible by feature_group_count ({})",
        output_features,
        groups
    );
    let mut out: TVec<usize> = tvec![0; rank];
    out[dn.output_batch] = lhs.dims[dn.input_batch];
    out[dn.output_feature] = output_features;
    for (ix, wd) in conv.window.dims.iter().enumerate() {
        let kernel = rhs.dims[dn.kernel_spatial[ix]];
        ensure!(
            wd.size == kernel,
            "Window size {} does not match kernel spatial dimension {} ({})",
            wd.size,
            ix,
            kernel
        );
        out[dn.output_spatial[ix]] = wd.output_size(lhs.dims[dn.input_spatial[ix]])?;
    }
    Ok(out)
}
