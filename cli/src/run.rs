use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use clap::ArgMatches;
use dwconv_gen::internal::*;
use infra::ErrorSpec;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use suite_depthwise::DepthwiseConvProblem;

use crate::CliResult;

#[derive(Debug)]
pub struct RunOptions {
    pub filter: Option<String>,
    pub runtime: Box<dyn Runtime>,
    pub error_spec: ErrorSpec,
    pub skip_outer_dim: bool,
    pub threads: usize,
}

impl RunOptions {
    pub fn from_clap(matches: &ArgMatches) -> CliResult<RunOptions> {
        let threads = matches
            .value_of("threads")
            .map(|t| t.parse::<usize>().with_context(|| format!("Invalid --threads value {t:?}")))
            .transpose()?
            .unwrap_or(0);
        Ok(RunOptions {
            filter: matches.value_of("filter").map(|s| s.to_string()),
            runtime: crate::runtime(matches.value_of("runtime").unwrap_or("cpu"))?,
            error_spec: crate::error_spec(matches)?,
            skip_outer_dim: matches.is_present("skip-outer-dim"),
            threads,
        })
    }
}

#[derive(Debug)]
enum Outcome {
    Passed,
    Failed(anyhow::Error),
    Panicked(String),
}

impl Outcome {
    fn passed(&self) -> bool {
        matches!(self, Outcome::Passed)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Verifies one case. Errors and panics are both turned into an outcome so
/// one bad case does not stop the others.
fn verify(problem: &DepthwiseConvProblem, runtime: &dyn Runtime, spec: ErrorSpec) -> Outcome {
    let start = Instant::now();
    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| problem.verify(runtime, spec))) {
        Ok(Ok(())) => Outcome::Passed,
        Ok(Err(e)) => Outcome::Failed(e),
        Err(payload) => Outcome::Panicked(panic_message(payload)),
    };
    info!(
        "{} on {}: {} in {:?}",
        problem.case.id(),
        runtime.name(),
        if outcome.passed() { "ok" } else { "FAILED" },
        start.elapsed()
    );
    outcome
}

/// Runs every selected case, prints a line per case and a summary, and
/// returns the number of failed cases.
pub fn handle(options: RunOptions) -> CliResult<usize> {
    let problems: Vec<DepthwiseConvProblem> =
        suite_depthwise::problems(&crate::base_params(options.skip_outer_dim))?
            .into_iter()
            .filter(|p| options.filter.as_ref().is_none_or(|f| p.case.id().contains(f.as_str())))
            .collect();
    ensure!(!problems.is_empty(), "No case matches {:?}", options.filter);
    debug!("Running {} cases on {}", problems.len(), options.runtime.name());

    let pool = ThreadPoolBuilder::new()
        .thread_name(|n| format!("dwconv-{n}"))
        .num_threads(options.threads)
        .build()
        .context("Building thread pool")?;
    let runtime = &*options.runtime;
    let outcomes: Vec<Outcome> = pool.install(|| {
        problems.par_iter().map(|p| verify(p, runtime, options.error_spec)).collect()
    });

    let mut failed = 0;
    for (problem, outcome) in problems.iter().zip(&outcomes) {
        match outcome {
            Outcome::Passed => println!("ok       {}", problem.case.id()),
            Outcome::Failed(e) => {
                failed += 1;
                println!("FAILED   {}: {e:#}", problem.case.id());
            }
            Outcome::Panicked(msg) => {
                failed += 1;
                println!("PANICKED {}: {msg}", problem.case.id());
            }
        }
    }
    println!(
        "{} cases on {}: {} passed, {} failed",
        problems.len(),
        runtime.name(),
        problems.len() - failed,
        failed
    );
    Ok(failed)
}
