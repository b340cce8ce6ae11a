//! A tiny subset of the HLO text format: enough to describe, parse, rewrite
//! and execute single operation convolution modules.
#[macro_use]
extern crate log;

pub mod cpu;
pub mod interpreter;
pub mod module;
pub mod parse;
pub mod runtime;
pub mod shape;
pub mod shape_inference;
pub mod transform;
pub mod window;

/// A Smallvec instantiation with 4 embeddable values.
///
/// Used for dimensions, layouts and operand lists: every shape in this crate
/// has rank 4.
pub type TVec<T> = smallvec::SmallVec<[T; 4]>;

pub type HloError = anyhow::Error;
pub type HloResult<T> = anyhow::Result<T>;
pub type StaticName = std::borrow::Cow<'static, str>;

pub use anyhow;
pub use ndarray;
pub use smallvec::smallvec as tvec;

pub mod prelude {
    pub use crate::module::{Convolution, HloModule, Instruction, Op, Operand};
    pub use crate::parse::parse_module;
    pub use crate::runtime::{Runnable, Runtime};
    pub use crate::shape::{Layout, PrimitiveType, Shape};
    pub use crate::window::{ConvDimensionNumbers, Window, WindowDim};
    pub use crate::{HloError, HloResult, StaticName, TVec, tvec};
}

pub mod internal {
    pub use crate::prelude::*;
    pub use anyhow::{Context, bail, ensure, format_err};
    pub use ndarray::{ArrayD, ArrayViewD, Dimension, IxDyn};
    pub use std::borrow::Cow;
    pub use std::collections::HashMap;
    pub use std::fmt;
    pub use std::sync::Arc;
}
