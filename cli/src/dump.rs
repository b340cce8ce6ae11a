use dwconv_gen::internal::*;

use crate::CliResult;

pub fn handle(id: &str, reference: bool) -> CliResult<()> {
    let problem = suite_depthwise::problems(&crate::base_params(false))?
        .into_iter()
        .find(|p| p.case.id() == id)
        .with_context(|| format!("No case named {id}"))?;
    if reference {
        let mut module = problem.case.module()?;
        suite_depthwise::reference_preprocessor(&mut module)?;
        print!("{module}");
    } else {
        print!("{}", problem.case.text());
    }
    Ok(())
}
