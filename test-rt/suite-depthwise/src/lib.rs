#[macro_use]
extern crate derive_new;
#[macro_use]
extern crate log;

use dwconv_gen::internal::*;
use dwconv_hlo::transform::get_transform;
use infra::{ErrorSpec, Test, TestResult, TestSuite, run_and_compare};
use proptest::prelude::*;

/// Applied in order to the reference copy of every case.
pub const REFERENCE_TRANSFORMS: [&str; 2] = ["bf16-mixed-precision-removal", "despecializer"];

pub fn reference_preprocessor(module: &mut HloModule) -> HloResult<()> {
    for name in REFERENCE_TRANSFORMS {
        let transform = get_transform(name).with_context(|| format!("No transform {name:?}"))?;
        transform.transform(module).with_context(|| format!("Applying {name}"))?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, new)]
pub struct DepthwiseConvProblem {
    pub case: DepthwiseCase,
}

impl DepthwiseConvProblem {
    pub fn verify(&self, runtime: &dyn Runtime, error_spec: ErrorSpec) -> TestResult {
        debug!("Verifying {} on {}", self.case.id(), runtime.name());
        run_and_compare(&self.case.text(), error_spec, runtime, reference_preprocessor)
            .with_context(|| format!("Case {}", self.case.id()))
    }
}

impl Test for DepthwiseConvProblem {
    fn run(&self, _id: &str, runtime: &dyn Runtime, error_spec: ErrorSpec) -> TestResult {
        self.verify(runtime, error_spec)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DepthwiseConvProblemParams {
    pub no_outer_dim: bool,
}

impl Arbitrary for DepthwiseConvProblem {
    type Parameters = DepthwiseConvProblemParams;
    type Strategy = BoxedStrategy<DepthwiseConvProblem>;

    fn arbitrary_with(params: Self::Parameters) -> Self::Strategy {
        let plain = (1usize..=12, 1usize..=8, 1usize..=3)
            .prop_flat_map(|(a, f, b)| (Just(a), 1..=a, Just(f), Just(b)))
            .prop_map(|(a, k, f, b)| BaseParams::new(f, a, k, b))
            .boxed();
        let dilated = (2usize..=6, 1usize..=2)
            .prop_flat_map(|(a, b)| (Just(a), 2..=a, Just(b)))
            .prop_map(|(a, k, b)| BaseParams::new(256, a, k, b))
            .boxed();
        let outer_dim = (1usize..=8, 1usize..=3).prop_map(|(f, b)| BaseParams::new(f, 1, 2, b));
        let base = if params.no_outer_dim {
            prop_oneof![plain, dilated].boxed()
        } else {
            prop_oneof![plain, dilated, outer_dim].boxed()
        };
        (base, prop_oneof![Just([3usize, 0, 2, 1]), Just([0usize, 3, 2, 1])], any::<bool>())
            .prop_filter_map("legal params", |(base, output_layout, use_bf16)| {
                let spec = base.derive().ok()?;
                let spec = spec.with_layouts(spec.activation_layout, output_layout);
                Some(DepthwiseConvProblem::new(DepthwiseCase::new(spec, use_bf16)))
            })
            .boxed()
    }
}

pub fn problems(params: &[BaseParams]) -> HloResult<Vec<DepthwiseConvProblem>> {
    Ok(cases(&enumerate(params)?).into_iter().map(DepthwiseConvProblem::new).collect())
}

/// One test per enumerated case and precision, named after the case.
pub fn suite(params: &[BaseParams]) -> HloResult<TestSuite> {
    let mut suite = TestSuite::default();
    for problem in problems(params)? {
        let id = problem.case.id();
        ensure!(!suite.contains(&id), "Duplicate case id {}", id);
        suite.add(id, problem);
    }
    Ok(suite)
}
