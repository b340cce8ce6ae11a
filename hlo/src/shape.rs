use std::str::FromStr;

use half::{bf16, f16};
use itertools::Itertools;

use crate::internal::*;

/// Floating point element types a program can be declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrimitiveType {
    BF16,
    F16,
    F32,
}

impl PrimitiveType {
    pub fn name(&self) -> &'static str {
        match self {
            PrimitiveType::BF16 => "bf16",
            PrimitiveType::F16 => "f16",
            PrimitiveType::F32 => "f32",
        }
    }

    pub fn is_reduced_precision(&self) -> bool {
        *self != PrimitiveType::F32
    }

    /// Round an f32 value to the nearest value representable in this type.
    pub fn round(&self, x: f32) -> f32 {
        match self {
            PrimitiveType::BF16 => bf16::from_f32(x).to_f32(),
            PrimitiveType::F16 => f16::from_f32(x).to_f32(),
            PrimitiveType::F32 => x,
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for PrimitiveType {
    type Err = HloError;
    fn from_str(s: &str) -> HloResult<PrimitiveType> {
        match s {
            "bf16" => Ok(PrimitiveType::BF16),
            "f16" => Ok(PrimitiveType::F16),
            "f32" => Ok(PrimitiveType::F32),
            _ => bail!("Unsupported element type {:?}", s),
        }
    }
}

/// Physical ordering of a shape's dimensions, minor-most first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Layout {
    pub minor_to_major: TVec<usize>,
}

impl Layout {
    pub fn new(minor_to_major: impl IntoIterator<Item = usize>) -> Layout {
        Layout { minor_to_major: minor_to_major.into_iter().collect() }
    }

    /// Row major layout: last logical dimension is the minor-most.
    pub fn default_for(rank: usize) -> Layout {
        Layout::new((0..rank).rev())
    }

    pub fn rank(&self) -> usize {
        self.minor_to_major.len()
    }

    pub fn is_permutation(&self) -> bool {
        self.minor_to_major.iter().sorted().copied().eq(0..self.rank())
    }

    /// Element stride of each logical dimension once laid out in memory.
    pub fn strides(&self, dims: &[usize]) -> TVec<usize> {
        let mut strides: TVec<usize> = tvec![0; dims.len()];
        let mut stride = 1;
        for &axis in &self.minor_to_major {
            strides[axis] = stride;
            stride *= dims[axis];
        }
        strides
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.minor_to_major.iter().join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    pub element_type: PrimitiveType,
    pub dims: TVec<usize>,
    pub layout: Option<Layout>,
}

impl Shape {
    pub fn new(element_type: PrimitiveType, dims: impl IntoIterator<Item = usize>) -> Shape {
        Shape { element_type, dims: dims.into_iter().collect(), layout: None }
    }

    pub fn with_layout(self, layout: Layout) -> Shape {
        Shape { layout: Some(layout), ..self }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn element_count(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn layout_or_default(&self) -> Layout {
        self.layout.clone().unwrap_or_else(|| Layout::default_for(self.rank()))
    }

    pub fn check_layout(&self) -> HloResult<()> {
        if let Some(layout) = &self.layout {
            ensure!(
                layout.rank() == self.rank() && layout.is_permutation(),
                "Layout {{{}}} is not a permutation of the dimensions of {}",
                layout,
                self
            );
        }
        Ok(())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}[{}]", self.element_type, self.dims.iter().join(","))?;
        if let Some(layout) = &self.layout {
            write!(f, "{{{layout}}}")?;
        }
        Ok(())
    }
}
