#[macro_use]
extern crate derive_new;
#[macro_use]
extern crate log;

use std::collections::HashMap;
use std::fmt::Debug;
use std::io::Write;
use std::marker::PhantomData;

use downcast_rs::Downcast;
use dwconv_hlo::runtime::Runtime;
use dyn_clone::DynClone;
use itertools::Itertools;
use proptest::prelude::{Arbitrary, any_with};
use proptest::test_runner::{Config, TestCaseError, TestRunner};

mod compare;

pub use compare::{
    ErrorSpec, FAKE_ARGUMENTS_SEED, close_enough, fake_arguments, run_and_compare,
};

pub fn setup_test_logger() {
    let _ = env_logger::Builder::from_env("DWCONV_LOG").try_init();
}

pub type TestResult = anyhow::Result<()>;

pub trait Test: 'static + Send + Sync + DynClone + Downcast {
    fn ignore(&self) -> bool {
        false
    }
    fn run(&self, id: &str, runtime: &dyn Runtime, error_spec: ErrorSpec) -> TestResult;
}

dyn_clone::clone_trait_object!(Test);
downcast_rs::impl_downcast!(Test);

/// Runs a batch of arbitrary instances of `A` generated by proptest.
#[derive(Clone, new)]
pub struct ProptestWrapper<A: Arbitrary> {
    pub params: A::Parameters,
    pub cases: u32,
    _case: PhantomData<A>,
}

impl<A> Test for ProptestWrapper<A>
where
    A: Arbitrary + Test + Clone,
    A::Parameters: Clone + Send + Sync + Debug,
{
    fn run(&self, id: &str, runtime: &dyn Runtime, error_spec: ErrorSpec) -> TestResult {
        let config = Config { cases: self.cases, failure_persistence: None, ..Config::default() };
        let mut runner = TestRunner::new(config);
        runner
            .run(&any_with::<A>(self.params.clone()), |case| {
                case.run(id, runtime, error_spec)
                    .map_err(|e| TestCaseError::fail(format!("{e:?}")))
            })
            .map_err(|e| anyhow::format_err!("{e}"))
    }
}

/// A tree of tests. Leaves carry an extra ignore flag set by
/// [`TestSuite::ignore`] and [`TestSuite::ignore_case`].
#[derive(Clone)]
pub enum TestSuite {
    Node(HashMap<String, TestSuite>),
    Leaf(Box<dyn Test>, bool),
}

impl Default for TestSuite {
    fn default() -> Self {
        TestSuite::Node(Default::default())
    }
}

impl<T: Test> From<T> for TestSuite {
    fn from(value: T) -> Self {
        TestSuite::Leaf(Box::new(value), false)
    }
}

impl TestSuite {
    pub fn add(&mut self, id: impl ToString, test: impl Into<TestSuite>) {
        match self {
            TestSuite::Node(children) => {
                children.insert(id.to_string(), test.into());
            }
            TestSuite::Leaf(..) => panic!("Can not add a test to a leaf"),
        }
    }

    pub fn with(mut self, id: impl ToString, test: impl Into<TestSuite>) -> Self {
        self.add(id, test);
        self
    }

    pub fn add_arbitrary<A>(&mut self, id: impl ToString, params: A::Parameters, cases: u32)
    where
        A: Arbitrary + Test + Clone,
        A::Parameters: Clone + Send + Sync + Debug,
    {
        self.add(id, ProptestWrapper::<A>::new(params, cases));
    }

    pub fn contains(&self, id: &str) -> bool {
        matches!(self, TestSuite::Node(children) if children.contains_key(id))
    }

    /// Look up a sub suite by its `::` separated path.
    pub fn get_sub(&self, path: &str) -> Option<&TestSuite> {
        path.split("::").try_fold(self, |suite, id| match suite {
            TestSuite::Node(children) => children.get(id),
            TestSuite::Leaf(..) => None,
        })
    }

    pub fn get_sub_mut(&mut self, path: &str) -> Option<&mut TestSuite> {
        path.split("::").try_fold(self, |suite, id| match suite {
            TestSuite::Node(children) => children.get_mut(id),
            TestSuite::Leaf(..) => None,
        })
    }

    /// Look up a test by its `::` separated path.
    pub fn get(&self, path: &str) -> Option<&dyn Test> {
        match self.get_sub(path)? {
            TestSuite::Leaf(test, _) => Some(&**test),
            TestSuite::Node(_) => None,
        }
    }

    pub fn ignore(&mut self, ign: &dyn Fn(&[String]) -> bool) {
        self.ignore_case(&|path, _| ign(path))
    }

    pub fn ignore_case(&mut self, ign: &dyn Fn(&[String], &dyn Test) -> bool) {
        self.ignore_rec(&mut vec![], ign)
    }

    fn ignore_rec(
        &mut self,
        prefix: &mut Vec<String>,
        ign: &dyn Fn(&[String], &dyn Test) -> bool,
    ) {
        match self {
            TestSuite::Node(children) => {
                for (id, child) in children {
                    prefix.push(id.clone());
                    child.ignore_rec(prefix, ign);
                    prefix.pop();
                }
            }
            TestSuite::Leaf(test, ignored) => *ignored = *ignored || ign(prefix, &**test),
        }
    }

    /// Every leaf with its path and whether it is ignored, sorted by path.
    pub fn iter(&self) -> Vec<(Vec<String>, &dyn Test, bool)> {
        let mut leaves = vec![];
        self.collect_leaves(&mut vec![], &mut leaves);
        leaves
    }

    fn collect_leaves<'s>(
        &'s self,
        prefix: &mut Vec<String>,
        leaves: &mut Vec<(Vec<String>, &'s dyn Test, bool)>,
    ) {
        match self {
            TestSuite::Node(children) => {
                for (id, child) in children.iter().sorted_by_key(|(id, _)| *id) {
                    prefix.push(id.clone());
                    child.collect_leaves(prefix, leaves);
                    prefix.pop();
                }
            }
            TestSuite::Leaf(test, ignored) => {
                leaves.push((prefix.clone(), &**test, *ignored || test.ignore()))
            }
        }
    }

    /// Generate `$OUT_DIR/tests/<name>.rs` with one `#[test]` per leaf. To be
    /// called from a build script; the generated file expects `infra`,
    /// `test_suite` and `runtime` to resolve where it is included.
    pub fn test_runtime(&self, name: &str, test_suite: &str, runtime: &str, error_spec: &str) {
        let out_dir = std::env::var("OUT_DIR").unwrap();
        let out_dir = std::path::PathBuf::from(out_dir);
        let test_dir = out_dir.join("tests");
        std::fs::create_dir_all(&test_dir).unwrap();
        let test_file = test_dir.join(name).with_extension("rs");
        let mut rs = std::fs::File::create(test_file).unwrap();
        self.dump(test_suite, runtime, error_spec, &mut rs).unwrap();
    }

    pub fn dump(
        &self,
        test_suite: &str,
        runtime: &str,
        error_spec: &str,
        rs: &mut impl Write,
    ) -> std::io::Result<()> {
        if let TestSuite::Node(children) = self {
            for (id, child) in children.iter().sorted_by_key(|(id, _)| *id) {
                child.dump_rec(test_suite, runtime, error_spec, &mut vec![id.clone()], rs)?;
            }
        }
        Ok(())
    }

    fn dump_rec(
        &self,
        test_suite: &str,
        runtime: &str,
        error_spec: &str,
        path: &mut Vec<String>,
        rs: &mut impl Write,
    ) -> std::io::Result<()> {
        let id = path.last().cloned().unwrap_or_default();
        match self {
            TestSuite::Node(children) => {
                writeln!(rs, "mod {id} {{")?;
                writeln!(rs, "    use super::*;")?;
                for (id, child) in children.iter().sorted_by_key(|(id, _)| *id) {
                    path.push(id.clone());
                    child.dump_rec(test_suite, runtime, error_spec, path, rs)?;
                    path.pop();
                }
                writeln!(rs, "}}")?;
            }
            TestSuite::Leaf(test, ignored) => {
                let path = path.join("::");
                writeln!(rs, "#[allow(non_snake_case)]")?;
                writeln!(rs, "#[test]")?;
                if *ignored || test.ignore() {
                    writeln!(rs, "#[ignore]")?;
                }
                writeln!(rs, "fn {id}() -> infra::TestResult {{")?;
                writeln!(rs, "    infra::setup_test_logger();")?;
                writeln!(
                    rs,
                    "    {test_suite}.get({path:?}).expect({path:?}).run({path:?}, {runtime}, {error_spec})"
                )?;
                writeln!(rs, "}}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Clone, Debug)]
    struct Fixed(bool);

    impl Test for Fixed {
        fn run(&self, id: &str, _runtime: &dyn Runtime, _error_spec: ErrorSpec) -> TestResult {
            anyhow::ensure!(self.0, "{id} failed");
            Ok(())
        }
    }

    fn suite() -> TestSuite {
        let mut inner = TestSuite::default();
        inner.add("ok", Fixed(true));
        inner.add("ko", Fixed(false));
        TestSuite::default().with("inner", inner).with("top", Fixed(true))
    }

    #[test]
    fn lookup() {
        let suite = suite();
        assert!(suite.get("inner::ok").is_some());
        assert!(suite.get("inner").is_none());
        assert!(suite.get("inner::ok::deeper").is_none());
        assert!(suite.get_sub("inner").unwrap().contains("ko"));
        assert!(suite.get("top").unwrap().downcast_ref::<Fixed>().is_some());
    }

    #[test]
    fn iteration_is_sorted_and_ignores_apply() {
        let mut suite = suite();
        suite.ignore(&|path| path.last().is_some_and(|id| id == "ko"));
        let leaves: Vec<(String, bool)> =
            suite.iter().into_iter().map(|(path, _, ignored)| (path.join("::"), ignored)).collect();
        assert_eq!(
            leaves,
            vec![
                ("inner::ko".to_string(), true),
                ("inner::ok".to_string(), false),
                ("top".to_string(), false)
            ]
        );
    }

    #[test]
    fn ignore_case_sees_the_test() {
        let mut suite = suite();
        suite.ignore_case(&|_, test| test.downcast_ref::<Fixed>().is_some_and(|f| !f.0));
        assert_eq!(suite.iter().iter().filter(|leaf| leaf.2).count(), 1);
    }

    #[test]
    fn generated_code() {
        let mut suite = suite();
        suite.ignore(&|path| path[0] == "top");
        let mut buf = vec![];
        suite.dump("suite()", "runtime()", "ErrorSpec::default()", &mut buf).unwrap();
        let code = String::from_utf8(buf).unwrap();
        assert!(code.starts_with("mod inner {\n    use super::*;\n"));
        assert!(code.contains("fn ko() -> infra::TestResult {"));
        assert!(code.contains(
            r#"suite().get("inner::ok").expect("inner::ok").run("inner::ok", runtime(), ErrorSpec::default())"#
        ));
        assert!(code.contains("#[ignore]\nfn top()"));
    }
}
