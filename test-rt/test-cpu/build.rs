#[path = "suite.rs"]
mod suite;

fn main() {
    suite::suite().test_runtime("cpu", "suite::suite()", "runtime()", "ErrorSpec::default()");
    suite::suite().test_runtime(
        "interpreter",
        "suite::suite()",
        "runtime()",
        "ErrorSpec::default()",
    );
}
