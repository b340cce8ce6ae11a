//! Generation of depthwise 2D convolution test cases.
//!
//! A handful of curated `(feature, activation size, kernel size, batch)`
//! tuples are turned into full shape and layout specifications, named, and
//! rendered as single convolution HLO modules:
//!
//! ```
//! use dwconv_gen::prelude::*;
//!
//! let spec = BaseParams::new(256, 5, 3, 256).derive().unwrap();
//! assert_eq!(spec.output_dims, [256, 8, 3, 256]);
//! assert_eq!(spec.stride(), Some(4));
//! let text = synthesize(&spec, false);
//! assert!(text.contains("lhs_dilate=8x1"));
//! ```
#[macro_use]
extern crate derive_new;
#[macro_use]
extern crate log;

pub mod enumerate;
pub mod naming;
pub mod spec;
pub mod synth;

pub use dwconv_hlo;

pub mod prelude {
    pub use crate::enumerate::{DepthwiseCase, cases, enumerate};
    pub use crate::naming::identify;
    pub use crate::spec::{BaseParams, DepthwiseConv2DSpec, Regime};
    pub use crate::synth::synthesize;
}

pub mod internal {
    pub use crate::prelude::*;
    pub use dwconv_hlo::internal::*;
}
