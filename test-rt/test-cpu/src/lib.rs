#![cfg(test)]

#[path = "../suite.rs"]
mod suite;

mod cpu {
    use super::*;
    use dwconv_hlo::cpu::CpuRuntime;
    use infra::{ErrorSpec, Test};

    fn runtime() -> &'static CpuRuntime {
        lazy_static::lazy_static! {
            static ref RT: CpuRuntime = CpuRuntime;
        };
        &RT
    }

    include!(concat!(env!("OUT_DIR"), "/tests/cpu.rs"));
}

mod interpreter {
    use super::*;
    use dwconv_hlo::interpreter::InterpreterRuntime;
    use infra::{ErrorSpec, Test};

    fn runtime() -> &'static InterpreterRuntime {
        static RT: InterpreterRuntime = InterpreterRuntime;
        &RT
    }

    include!(concat!(env!("OUT_DIR"), "/tests/interpreter.rs"));
}
