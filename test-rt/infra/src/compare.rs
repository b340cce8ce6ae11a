use dwconv_hlo::interpreter::InterpreterRuntime;
use dwconv_hlo::internal::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::TestResult;

/// Seed of the fake arguments every comparison runs on.
pub const FAKE_ARGUMENTS_SEED: u64 = 0x5eed;

/// Absolute and relative error bounds, per element.
#[derive(Debug, Clone, Copy, PartialEq, new)]
pub struct ErrorSpec {
    pub abs: f32,
    pub rel: f32,
}

impl Default for ErrorSpec {
    fn default() -> ErrorSpec {
        ErrorSpec::new(0.01, 0.01)
    }
}

impl ErrorSpec {
    pub fn accepts(&self, found: f32, expected: f32) -> bool {
        if found.is_nan() || expected.is_nan() {
            return found.is_nan() && expected.is_nan();
        }
        if found.is_infinite() || expected.is_infinite() {
            return found == expected;
        }
        let diff = (found - expected).abs();
        diff <= self.abs || diff <= self.rel * expected.abs()
    }
}

/// Element-wise comparison. On failure, reports how many elements diverge
/// and the worst of them.
pub fn close_enough(found: &ArrayD<f32>, expected: &ArrayD<f32>, spec: ErrorSpec) -> TestResult {
    ensure!(
        found.shape() == expected.shape(),
        "Shape mismatch: found {:?}, expected {:?}",
        found.shape(),
        expected.shape()
    );
    let mut mismatches = 0usize;
    let mut worst: Option<(IxDyn, f32, f32, f32)> = None;
    for ((ix, &f), &e) in found.indexed_iter().zip(expected.iter()) {
        if spec.accepts(f, e) {
            continue;
        }
        mismatches += 1;
        let err = (f - e).abs();
        let err = if err.is_nan() { f32::INFINITY } else { err };
        if worst.as_ref().is_none_or(|w| err > w.3) {
            worst = Some((ix, f, e, err));
        }
    }
    if let Some((ix, f, e, err)) = worst {
        bail!(
            "{} of {} elements out of tolerance (abs: {}, rel: {}). \
             Worst at {:?}: found {}, expected {}, abs error {}, rel error {}",
            mismatches,
            found.len(),
            spec.abs,
            spec.rel,
            ix.slice(),
            f,
            e,
            err,
            err / e.abs()
        );
    }
    Ok(())
}

/// Deterministic inputs for every parameter of the module, uniform in
/// [-1, 1) and representable in the parameter's element type.
pub fn fake_arguments(module: &HloModule, seed: u64) -> TVec<ArrayD<f32>> {
    let mut rng = SmallRng::seed_from_u64(seed);
    module
        .parameter_shapes()
        .iter()
        .map(|shape| {
            let dt = shape.element_type;
            ArrayD::from_shape_fn(&*shape.dims, |_| dt.round(rng.gen_range(-1f32..1f32)))
        })
        .collect()
}

/// Run `text` on `runtime`, and on the interpreter after
/// `reference_preprocessor` rewrote a copy of it, then compare the outputs.
pub fn run_and_compare(
    text: &str,
    error_spec: ErrorSpec,
    runtime: &dyn Runtime,
    reference_preprocessor: impl Fn(&mut HloModule) -> HloResult<()>,
) -> TestResult {
    let module = parse_module(text).context("Parsing program text")?;
    let inputs = fake_arguments(&module, FAKE_ARGUMENTS_SEED);
    let mut reference = module.clone();
    reference_preprocessor(&mut reference).context("Preparing reference module")?;
    trace!("Reference module:\n{reference}");
    let found = runtime
        .prepare(module)
        .and_then(|runnable| runnable.run(inputs.clone()))
        .with_context(|| format!("Running on {}", runtime.name()))?;
    let expected = InterpreterRuntime
        .prepare(reference)
        .and_then(|runnable| runnable.run(inputs))
        .context("Running reference")?;
    close_enough(&found, &expected, error_spec)
}
