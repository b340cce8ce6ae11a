use itertools::iproduct;

use crate::internal::*;
use crate::spec::{BATCH_MINOR_LAYOUT, FEATURE_MINOR_LAYOUT};

/// Derive a spec for each tuple, in order.
///
/// Even kernel sizes also get three layout variants of their spec, toggling
/// the activation and output layouts between feature minor and batch minor.
pub fn enumerate(params: &[BaseParams]) -> HloResult<Vec<DepthwiseConv2DSpec>> {
    let mut specs = vec![];
    for p in params {
        let base = p.derive().with_context(|| format!("Deriving {p:?}"))?;
        if p.kernel_size % 2 == 0 {
            let variants = [
                (BATCH_MINOR_LAYOUT, FEATURE_MINOR_LAYOUT),
                (BATCH_MINOR_LAYOUT, BATCH_MINOR_LAYOUT),
                (FEATURE_MINOR_LAYOUT, BATCH_MINOR_LAYOUT),
            ]
            .map(|(activation, output)| base.with_layouts(activation, output));
            specs.push(base);
            specs.extend(variants);
        } else {
            specs.push(base);
        }
    }
    debug!("Enumerated {} specs from {} tuples", specs.len(), params.len());
    Ok(specs)
}

/// One test case: a spec and the precision it is declared with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, new)]
pub struct DepthwiseCase {
    pub spec: DepthwiseConv2DSpec,
    pub use_bf16: bool,
}

impl DepthwiseCase {
    pub fn element_type(&self) -> PrimitiveType {
        if self.use_bf16 { PrimitiveType::BF16 } else { PrimitiveType::F32 }
    }

    pub fn id(&self) -> String {
        identify(&self.spec, self.use_bf16)
    }

    pub fn text(&self) -> String {
        synthesize(&self.spec, self.use_bf16)
    }

    pub fn module(&self) -> HloResult<HloModule> {
        parse_module(&self.text()).with_context(|| format!("Parsing case {}", self.id()))
    }
}

/// Cross product of specs and both precisions, spec major.
pub fn cases(specs: &[DepthwiseConv2DSpec]) -> Vec<DepthwiseCase> {
    iproduct!(specs, [false, true])
        .map(|(spec, use_bf16)| DepthwiseCase::new(spec.clone(), use_bf16))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn even_kernel_gets_four_layouts() {
        let specs = enumerate(&[BaseParams::new(16, 9, 4, 16)]).unwrap();
        assert_eq!(specs.len(), 4);
        assert!(specs.iter().all(|s| s.activation_dims == specs[0].activation_dims
            && s.kernel_dims == specs[0].kernel_dims
            && s.output_dims == specs[0].output_dims));
        let layouts: HashSet<_> =
            specs.iter().map(|s| (s.activation_layout, s.output_layout)).collect();
        assert_eq!(layouts.len(), 4);
        assert_eq!(specs[0].activation_layout, FEATURE_MINOR_LAYOUT);
        assert_eq!(specs[0].output_layout, FEATURE_MINOR_LAYOUT);
        assert_eq!(specs[2].activation_layout, BATCH_MINOR_LAYOUT);
        assert_eq!(specs[2].output_layout, BATCH_MINOR_LAYOUT);
    }

    #[test]
    fn odd_kernel_gets_one_layout() {
        let specs = enumerate(&[BaseParams::new(8, 48, 17, 8)]).unwrap();
        assert_eq!(specs.len(), 1);
    }

    #[test]
    fn whole_space() {
        let specs = enumerate(&BaseParams::all()).unwrap();
        assert_eq!(specs.len(), 32);
        assert_eq!(cases(&specs).len(), 64);
        let curated = enumerate(&BaseParams::curated()).unwrap();
        assert_eq!(curated.len(), 24);
        assert_eq!(&specs[..24], &curated[..]);
    }

    #[test]
    fn filtered_tuples() {
        let params: Vec<BaseParams> =
            BaseParams::all().into_iter().filter(|p| !p.is_outer_dim()).collect();
        assert_eq!(params, BaseParams::curated());
    }

    #[test]
    fn illegal_tuple_fails() {
        assert!(enumerate(&[BaseParams::new(16, 3, 4, 16)]).is_err());
    }
}
