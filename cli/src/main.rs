#[macro_use]
extern crate log;

use std::process;

use clap::{Arg, ArgMatches, Command, crate_version};
use dwconv_gen::internal::*;
use dwconv_hlo::cpu::CpuRuntime;
use dwconv_hlo::interpreter::InterpreterRuntime;
use infra::ErrorSpec;
use suite_depthwise::DepthwiseConvProblem;

mod dump;
mod run;

pub type CliResult<T> = anyhow::Result<T>;

/// Entrypoint for the command-line interface.
fn main() {
    let skip_outer_dim = Arg::new("skip-outer-dim")
        .long("skip-outer-dim")
        .help("Leave out the outer dimension cases (for backends that do not support them)");

    let list = Command::new("list")
        .about("Lists the identifiers of all generated cases.")
        .arg(skip_outer_dim.clone())
        .arg(Arg::new("regime").long("regime").help("Show the arithmetic regime of each case"));

    let dump = Command::new("dump")
        .about("Prints the program text of a case.")
        .arg(Arg::new("id").required(true).takes_value(true).help("Case identifier"))
        .arg(
            Arg::new("reference")
                .long("reference")
                .help("Print the module the reference runs, after its transforms"),
        );

    let run = Command::new("run")
        .about("Runs cases and compares them against the reference interpreter.")
        .arg(
            Arg::new("filter")
                .long("filter")
                .takes_value(true)
                .help("Only run cases whose identifier contains this string"),
        )
        .arg(
            Arg::new("runtime")
                .long("runtime")
                .takes_value(true)
                .possible_values(["cpu", "interpreter"])
                .default_value("cpu")
                .help("Runtime under test"),
        )
        .arg(
            Arg::new("abs")
                .long("abs")
                .takes_value(true)
                .help("Absolute tolerance [default: 0.01]"),
        )
        .arg(
            Arg::new("rel")
                .long("rel")
                .takes_value(true)
                .help("Relative tolerance [default: 0.01]"),
        )
        .arg(skip_outer_dim)
        .arg(
            Arg::new("threads")
                .long("threads")
                .short('j')
                .takes_value(true)
                .help("Worker threads (defaults to one per core)"),
        );

    let app = Command::new("dwconv")
        .version(crate_version!())
        .about("Depthwise convolution test generator")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbosity")
                .short('v')
                .multiple_occurrences(true)
                .global(true)
                .help("Sets the level of verbosity."),
        )
        .subcommand(list)
        .subcommand(dump)
        .subcommand(run);

    let matches = app.get_matches();

    let level = match matches.occurrences_of("verbosity") {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env = env_logger::Env::default().filter_or("DWCONV_LOG", level);
    env_logger::Builder::from_env(env).format_timestamp_nanos().init();

    if let Err(e) = handle(&matches) {
        error!("{e:?}");
        process::exit(1)
    }
}

fn handle(matches: &ArgMatches) -> CliResult<()> {
    match matches.subcommand() {
        Some(("list", m)) => list(m),
        Some(("dump", m)) => {
            dump::handle(m.value_of("id").unwrap_or_default(), m.is_present("reference"))
        }
        Some(("run", m)) => {
            let failed = run::handle(run::RunOptions::from_clap(m)?)?;
            if failed > 0 {
                process::exit(1)
            }
            Ok(())
        }
        Some((s, _)) => bail!("Unknown subcommand {}.", s),
        None => bail!("No subcommand"),
    }
}

/// The tuples a command works on, minus the outer dimension ones if asked.
pub fn base_params(skip_outer_dim: bool) -> Vec<BaseParams> {
    BaseParams::all().into_iter().filter(|p| !(skip_outer_dim && p.is_outer_dim())).collect()
}

pub fn problems(matches: &ArgMatches) -> CliResult<Vec<DepthwiseConvProblem>> {
    suite_depthwise::problems(&base_params(matches.is_present("skip-outer-dim")))
}

fn list(matches: &ArgMatches) -> CliResult<()> {
    for problem in problems(matches)? {
        if matches.is_present("regime") {
            println!("{}\t{}", problem.case.id(), problem.case.spec.regime);
        } else {
            println!("{}", problem.case.id());
        }
    }
    Ok(())
}

pub fn runtime(name: &str) -> CliResult<Box<dyn Runtime>> {
    match name {
        "cpu" => Ok(Box::new(CpuRuntime)),
        "interpreter" => Ok(Box::new(InterpreterRuntime)),
        _ => bail!("Unknown runtime {name}"),
    }
}

fn parse_tolerance(matches: &ArgMatches, name: &str, default: f32) -> CliResult<f32> {
    matches
        .value_of(name)
        .map(|v| v.parse::<f32>().with_context(|| format!("Invalid --{name} value {v:?}")))
        .transpose()
        .map(|v| v.unwrap_or(default))
}

pub fn error_spec(matches: &ArgMatches) -> CliResult<ErrorSpec> {
    let default = ErrorSpec::default();
    let spec = ErrorSpec::new(
        parse_tolerance(matches, "abs", default.abs)?,
        parse_tolerance(matches, "rel", default.rel)?,
    );
    ensure!(spec.abs >= 0.0 && spec.rel >= 0.0, "Tolerances must be non-negative");
    Ok(spec)
}
