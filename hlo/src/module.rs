use itertools::Itertools;

use crate::internal::*;
use crate::shape_inference::convolution_dims;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Convolution {
    pub window: Window,
    pub dim_labels: ConvDimensionNumbers,
    pub feature_group_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Op {
    Parameter(usize),
    Convolution(Convolution),
}

/// An operand reference, optionally annotated with the shape it is expected to have.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Operand {
    pub shape: Option<Shape>,
    pub name: String,
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(shape) = &self.shape {
            write!(f, "{shape} ")?;
        }
        write!(f, "{}", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instruction {
    pub name: String,
    pub shape: Shape,
    pub op: Op,
    pub operands: TVec<Operand>,
    pub is_root: bool,
}

impl Instruction {
    /// Every shape this instruction carries: its own and its operand annotations.
    pub fn shapes_mut(&mut self) -> impl Iterator<Item = &mut Shape> {
        let annotations = self.operands.iter_mut().filter_map(|o| o.shape.as_mut());
        std::iter::once(&mut self.shape).chain(annotations)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_root {
            write!(f, "ROOT ")?;
        }
        write!(f, "{} = {} ", self.name, self.shape)?;
        match &self.op {
            Op::Parameter(n) => write!(f, "parameter({n})"),
            Op::Convolution(conv) => write!(
                f,
                "convolution({}), window={{{}}}, dim_labels={}, feature_group_count={}",
                self.operands.iter().join(", "),
                conv.window,
                conv.dim_labels,
                conv.feature_group_count
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HloModule {
    pub name: String,
    pub entry_name: String,
    pub instructions: Vec<Instruction>,
}

impl HloModule {
    pub fn instruction(&self, name: &str) -> HloResult<&Instruction> {
        self.instructions
            .iter()
            .find(|i| i.name == name)
            .with_context(|| format!("No instruction named {name:?} in {}", self.name))
    }

    pub fn root(&self) -> HloResult<&Instruction> {
        self.instructions
            .iter()
            .find(|i| i.is_root)
            .with_context(|| format!("{} has no ROOT", self.name))
    }

    /// Parameter instructions, ordered by parameter number.
    pub fn parameters(&self) -> Vec<&Instruction> {
        self.instructions
            .iter()
            .filter_map(|i| if let Op::Parameter(n) = i.op { Some((n, i)) } else { None })
            .sorted_by_key(|(n, _)| *n)
            .map(|(_, i)| i)
            .collect()
    }

    pub fn parameter_shapes(&self) -> TVec<Shape> {
        self.parameters().into_iter().map(|p| p.shape.clone()).collect()
    }

    /// Check the module is well formed and that every convolution declares
    /// the shape its operands imply.
    pub fn validate(&self) -> HloResult<()> {
        ensure!(!self.instructions.is_empty(), "{} has an empty entry computation", self.name);
        let roots = self.instructions.iter().filter(|i| i.is_root).count();
        ensure!(roots == 1, "{} must have exactly one ROOT, found {}", self.name, roots);
        let params: TVec<usize> = self
            .instructions
            .iter()
            .filter_map(|i| if let Op::Parameter(n) = i.op { Some(n) } else { None })
            .sorted()
            .collect();
        ensure!(
            params.iter().copied().eq(0..params.len()),
            "Parameters must be numbered 0..{} without gaps, found {:?}",
            params.len(),
            params
        );
        let mut defined: HashMap<&str, &Instruction> = HashMap::new();
        for inst in &self.instructions {
            self.validate_instruction(inst, &defined)
                .with_context(|| format!("Invalid instruction {:?}", inst.name))?;
            ensure!(
                defined.insert(&inst.name, inst).is_none(),
                "Instruction name {:?} is defined twice",
                inst.name
            );
        }
        Ok(())
    }

    fn validate_instruction(
        &self,
        inst: &Instruction,
        defined: &HashMap<&str, &Instruction>,
    ) -> HloResult<()> {
        inst.shape.check_layout()?;
        let mut operands: TVec<&Shape> = tvec![];
        for operand in &inst.operands {
            let Some(source) = defined.get(&*operand.name) else {
                bail!("Operand {:?} is not defined before use", operand.name)
            };
            if let Some(annotation) = &operand.shape {
                annotation.check_layout()?;
                ensure!(
                    annotation == &source.shape,
                    "Operand {:?} annotated as {} but defined as {}",
                    operand.name,
                    annotation,
                    source.shape
                );
            }
            operands.push(&source.shape);
        }
        match &inst.op {
            Op::Parameter(_) => {
                ensure!(operands.is_empty(), "parameter takes no operands");
            }
            Op::Convolution(conv) => {
                let [lhs, rhs] = &*operands else {
                    bail!("convolution takes two operands, got {}", operands.len())
                };
                ensure!(
                    lhs.element_type == rhs.element_type
                        && lhs.element_type == inst.shape.element_type,
                    "Mixed element types in convolution: {}, {} -> {}",
                    lhs,
                    rhs,
                    inst.shape
                );
                let inferred = convolution_dims(lhs, rhs, conv)?;
                ensure!(
                    inferred == inst.shape.dims,
                    "Declared shape {} but operands imply [{}]",
                    inst.shape,
                    inferred.iter().join(",")
                );
            }
        }
        Ok(())
    }
}

impl fmt::Display for HloModule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "HloModule {}", self.name)?;
        writeln!(f)?;
        writeln!(f, "ENTRY {} {{", self.entry_name)?;
        for inst in &self.instructions {
            writeln!(f, "  {inst}")?;
        }
        writeln!(f, "}}")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const CONV: &str = "convolution(a, k), window={size=2x2}, dim_labels=b01f_01io->b01f, \
                        feature_group_count=4";

    fn error_of(body: &str) -> String {
        let text = format!("HloModule m\nENTRY main {{\n{body}\n}}");
        format!("{:?}", parse_module(&text).unwrap_err())
    }

    #[test]
    fn well_formed_module() {
        let text = format!(
            "HloModule m\nENTRY main {{\n a = f32[1,3,3,4] parameter(0)\n \
             k = f32[2,2,1,4] parameter(1)\n ROOT c = f32[1,2,2,4] {CONV}\n}}"
        );
        let module = parse_module(&text).unwrap();
        assert_eq!(module.parameters().len(), 2);
        assert_eq!(module.root().unwrap().name, "c");
    }

    #[test]
    fn exactly_one_root() {
        let e = error_of(
            "ROOT a = f32[1,3,3,4] parameter(0)\n ROOT k = f32[2,2,1,4] parameter(1)",
        );
        assert!(e.contains("must have exactly one ROOT, found 2"), "{e}");
        let e = error_of("a = f32[1,3,3,4] parameter(0)");
        assert!(e.contains("must have exactly one ROOT, found 0"), "{e}");
    }

    #[test]
    fn parameters_without_gaps() {
        let e = error_of("a = f32[1,3,3,4] parameter(0)\n ROOT k = f32[2,2,1,4] parameter(2)");
        assert!(e.contains("Parameters must be numbered 0..2 without gaps"), "{e}");
    }

    #[test]
    fn operands_defined_before_use() {
        let e = error_of(&format!(
            "a = f32[1,3,3,4] parameter(0)\n ROOT c = f32[1,2,2,4] {CONV}\n \
             k = f32[2,2,1,4] parameter(1)"
        ));
        assert!(e.contains("Operand \"k\" is not defined before use"), "{e}");
        assert!(e.contains("Invalid instruction \"c\""), "{e}");
    }

    #[test]
    fn unique_instruction_names() {
        let e = error_of("a = f32[1,3,3,4] parameter(0)\n ROOT a = f32[2,2,1,4] parameter(1)");
        assert!(e.contains("Instruction name \"a\" is defined twice"), "{e}");
    }

    #[test]
    fn no_mixed_element_types() {
        let e = error_of(&format!(
            "a = bf16[1,3,3,4] parameter(0)\n k = f32[2,2,1,4] parameter(1)\n \
             ROOT c = f32[1,2,2,4] {CONV}"
        ));
        assert!(e.contains("Mixed element types in convolution"), "{e}");
    }

    #[test]
    fn oversized_window_is_rejected() {
        let conv = CONV.replace("size=2x2", "size=2x2 rhs_dilate=18446744073709551615x1");
        let e = error_of(&format!(
            "a = f32[1,3,3,4] parameter(0)\n k = f32[2,2,1,4] parameter(1)\n \
             ROOT c = f32[1,2,2,4] {conv}"
        ));
        assert!(e.contains("Window extent overflows"), "{e}");
    }
}
