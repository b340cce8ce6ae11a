use crate::internal::*;

/// Feature minor, then batch, then width, then height.
pub const FEATURE_MINOR_LAYOUT: [usize; 4] = [3, 0, 2, 1];
/// Batch minor, then feature, then width, then height.
pub const BATCH_MINOR_LAYOUT: [usize; 4] = [0, 3, 2, 1];
pub const KERNEL_LAYOUT: [usize; 4] = [3, 2, 1, 0];

/// Feature count the dilated and strided cases are restricted to.
pub const DILATED_FEATURE: usize = 256;

/// Which convolution arithmetic a spec exercises. Chosen once by
/// [`BaseParams::derive`]; the synthesizer dispatches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Regime {
    /// Valid convolution, no stride, padding nor dilation.
    Plain,
    /// Strided window over an lhs dilated input.
    DilatedStrided { stride: usize, pad: usize, lhs_dilate: usize },
    /// A 1x1 activation under a 2x2 window padded on both sides, with the
    /// second dimension dilated to make the output one element wider.
    OuterDim,
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Regime::Plain => write!(f, "plain"),
            Regime::DilatedStrided { .. } => write!(f, "dilated"),
            Regime::OuterDim => write!(f, "outer-dim"),
        }
    }
}

/// The curated knobs a spec is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, new)]
pub struct BaseParams {
    pub feature: usize,
    pub activation_size: usize,
    pub kernel_size: usize,
    pub batch: usize,
}

impl BaseParams {
    /// Tuples every backend is expected to handle.
    pub fn curated() -> Vec<BaseParams> {
        [
            (128, 6, 3, 64),
            (256, 5, 3, 256),
            (256, 5, 2, 144),
            (144, 5, 3, 64),
            (144, 5, 2, 256),
            (8, 48, 17, 8),
            (128, 20, 6, 64),
            (64, 14, 12, 172),
            (16, 9, 4, 16),
        ]
        .into_iter()
        .map(|(f, a, k, b)| BaseParams::new(f, a, k, b))
        .collect()
    }

    /// Outer dimension tuples. Kept apart so a harness can leave them out
    /// for a backend known to mishandle them.
    pub fn outer_dim() -> Vec<BaseParams> {
        vec![BaseParams::new(128, 1, 2, 144), BaseParams::new(256, 1, 2, 64)]
    }

    /// Every tuple: curated first, then outer dimension ones.
    pub fn all() -> Vec<BaseParams> {
        let mut params = Self::curated();
        params.extend(Self::outer_dim());
        params
    }

    pub fn is_outer_dim(&self) -> bool {
        self.activation_size == 1 && self.kernel_size == 2
    }

    /// Regime selection alone. Only [`BaseParams::derive`] checks the
    /// tuple is legal for it.
    pub(crate) fn regime(&self) -> Regime {
        if self.is_outer_dim() {
            Regime::OuterDim
        } else if self.feature == DILATED_FEATURE {
            Regime::DilatedStrided {
                stride: self.activation_size.saturating_sub(1),
                pad: 0,
                lhs_dilate: self.feature / 32,
            }
        } else {
            Regime::Plain
        }
    }

    /// Compute the full shape specification for these parameters.
    ///
    /// The dilated regime declares an output height equal to the lhs
    /// dilation. That matches the general convolution arithmetic only for
    /// `2 <= kernel_size <= activation_size`, which is checked here.
    pub fn derive(&self) -> HloResult<DepthwiseConv2DSpec> {
        let BaseParams { feature, activation_size: a, kernel_size: k, batch } = *self;
        ensure!(
            feature > 0 && a > 0 && k > 0 && batch > 0,
            "Non positive parameter in {:?}",
            self
        );
        let regime = self.regime();
        let (height, width) = match regime {
            Regime::OuterDim => (a + k - 1, a + k),
            Regime::DilatedStrided { lhs_dilate, .. } => {
                ensure!(
                    (2..=a).contains(&k),
                    "Dilated case needs 2 <= kernel size <= activation size, got {:?}",
                    self
                );
                (lhs_dilate, a - k + 1)
            }
            Regime::Plain => {
                ensure!(k <= a, "Kernel larger than activation in {:?}", self);
                (a - k + 1, a - k + 1)
            }
        };
        Ok(DepthwiseConv2DSpec {
            output_feature: feature,
            window: k,
            regime,
            activation_dims: [batch, a, a, feature],
            activation_layout: FEATURE_MINOR_LAYOUT,
            kernel_dims: [k, k, 1, feature],
            kernel_layout: KERNEL_LAYOUT,
            output_dims: [batch, height, width, feature],
            output_layout: FEATURE_MINOR_LAYOUT,
        })
    }
}

/// Shapes and layouts of one depthwise convolution (`b01f_01io->b01f`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DepthwiseConv2DSpec {
    pub output_feature: usize,
    pub window: usize,
    pub regime: Regime,
    pub activation_dims: [usize; 4],
    pub activation_layout: [usize; 4],
    pub kernel_dims: [usize; 4],
    pub kernel_layout: [usize; 4],
    pub output_dims: [usize; 4],
    pub output_layout: [usize; 4],
}

impl DepthwiseConv2DSpec {
    pub fn stride(&self) -> Option<usize> {
        match self.regime {
            Regime::DilatedStrided { stride, .. } => Some(stride),
            _ => None,
        }
    }

    pub fn pad(&self) -> Option<usize> {
        match self.regime {
            Regime::DilatedStrided { pad, .. } => Some(pad),
            _ => None,
        }
    }

    pub fn lhs_dilate(&self) -> Option<usize> {
        match self.regime {
            Regime::DilatedStrided { lhs_dilate, .. } => Some(lhs_dilate),
            _ => None,
        }
    }

    /// Same shapes, other physical layouts for activation and output.
    pub fn with_layouts(&self, activation: [usize; 4], output: [usize; 4]) -> DepthwiseConv2DSpec {
        DepthwiseConv2DSpec { activation_layout: activation, output_layout: output, ..self.clone() }
    }
}
