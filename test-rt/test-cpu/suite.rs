use dwconv_gen::prelude::BaseParams;
use suite_depthwise::{DepthwiseConvProblem, DepthwiseConvProblemParams};

pub fn suite() -> &'static infra::TestSuite {
    lazy_static::lazy_static! {
        static ref SUITE: infra::TestSuite = mk_suite();
    };
    &SUITE
}

fn mk_suite() -> infra::TestSuite {
    let mut depthwise = suite_depthwise::suite(&BaseParams::all()).unwrap();
    depthwise.add_arbitrary::<DepthwiseConvProblem>(
        "proptest",
        DepthwiseConvProblemParams::default(),
        32,
    );
    infra::TestSuite::default().with("depthwise", depthwise)
}
