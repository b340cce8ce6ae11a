use std::str::FromStr;

use itertools::Itertools;

use crate::internal::*;

/// Window geometry of a convolution along one spatial dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowDim {
    pub size: usize,
    pub stride: usize,
    pub padding_low: usize,
    pub padding_high: usize,
    /// Input (base) dilation: holes inserted between input elements.
    pub lhs_dilation: usize,
    /// Window dilation: holes inserted between kernel taps.
    pub rhs_dilation: usize,
}

impl WindowDim {
    pub fn new(size: usize) -> WindowDim {
        WindowDim {
            size,
            stride: 1,
            padding_low: 0,
            padding_high: 0,
            lhs_dilation: 1,
            rhs_dilation: 1,
        }
    }

    pub fn dilated_input(&self, input: usize) -> HloResult<usize> {
        if input == 0 {
            return Ok(0);
        }
        (input - 1)
            .checked_mul(self.lhs_dilation)
            .and_then(|x| x.checked_add(1))
            .with_context(|| {
                format!("Dilated input overflows for {input} x {}", self.lhs_dilation)
            })
    }

    pub fn window_extent(&self) -> HloResult<usize> {
        self.size
            .checked_sub(1)
            .and_then(|x| x.checked_mul(self.rhs_dilation))
            .and_then(|x| x.checked_add(1))
            .with_context(|| {
                format!("Window extent overflows for {} x {}", self.size, self.rhs_dilation)
            })
    }

    /// Number of window positions along this dimension for an input of the given size.
    pub fn output_size(&self, input: usize) -> HloResult<usize> {
        let padded = self
            .dilated_input(input)?
            .checked_add(self.padding_low)
            .and_then(|x| x.checked_add(self.padding_high))
            .context("Padded input overflows")?;
        let extent = self.window_extent()?;
        Ok(if padded < extent { 0 } else { (padded - extent) / self.stride + 1 })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Window {
    pub dims: TVec<WindowDim>,
}

impl Window {
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    fn render(&self, f: impl Fn(&WindowDim) -> String) -> String {
        self.dims.iter().map(f).join("x")
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "size={}", self.render(|d| d.size.to_string()))?;
        if self.dims.iter().any(|d| d.stride != 1) {
            write!(f, " stride={}", self.render(|d| d.stride.to_string()))?;
        }
        if self.dims.iter().any(|d| d.padding_low != 0 || d.padding_high != 0) {
            write!(f, " pad={}", self.render(|d| format!("{}_{}", d.padding_low, d.padding_high)))?;
        }
        if self.dims.iter().any(|d| d.lhs_dilation != 1) {
            write!(f, " lhs_dilate={}", self.render(|d| d.lhs_dilation.to_string()))?;
        }
        if self.dims.iter().any(|d| d.rhs_dilation != 1) {
            write!(f, " rhs_dilate={}", self.render(|d| d.rhs_dilation.to_string()))?;
        }
        Ok(())
    }
}

fn numbers(s: &str) -> HloResult<TVec<usize>> {
    s.split('x')
        .map(|n| n.parse::<usize>().with_context(|| format!("Invalid window value {n:?} in {s:?}")))
        .collect()
}

impl FromStr for Window {
    type Err = HloError;

    /// Parses the inside of a `window={...}` attribute, e.g.
    /// `size=3x3 stride=4x1 pad=0_0x0_0 lhs_dilate=8x1`.
    fn from_str(s: &str) -> HloResult<Window> {
        let mut fields: HashMap<&str, &str> = HashMap::new();
        for item in s.split_whitespace() {
            let Some((key, value)) = item.split_once('=') else {
                bail!("Malformed window field {:?}", item)
            };
            ensure!(fields.insert(key, value).is_none(), "Duplicate window field {:?}", key);
        }
        let Some(sizes) = fields.remove("size") else { bail!("Window without size: {:?}", s) };
        let mut dims: TVec<WindowDim> = numbers(sizes)?.into_iter().map(WindowDim::new).collect();
        let rank = dims.len();
        for (key, value) in fields {
            let values: TVec<&str> = value.split('x').collect();
            ensure!(
                values.len() == rank,
                "Window field {} has {} dimensions, expected {}",
                key,
                values.len(),
                rank
            );
            for (dim, v) in dims.iter_mut().zip(values) {
                match key {
                    "stride" => dim.stride = numbers(v)?[0],
                    "lhs_dilate" => dim.lhs_dilation = numbers(v)?[0],
                    "rhs_dilate" => dim.rhs_dilation = numbers(v)?[0],
                    "pad" => {
                        let Some((low, high)) = v.split_once('_') else {
                            bail!("Padding must be low_high, got {:?}", v)
                        };
                        dim.padding_low = numbers(low)?[0];
                        dim.padding_high = numbers(high)?[0];
                    }
                    _ => bail!("Unsupported window field {:?}", key),
                }
            }
        }
        for d in &dims {
            ensure!(d.size > 0, "Window size must be positive in {:?}", s);
            ensure!(d.stride > 0, "Window stride must be positive in {:?}", s);
            ensure!(
                d.lhs_dilation > 0 && d.rhs_dilation > 0,
                "Dilations must be positive in {:?}",
                s
            );
            d.window_extent().with_context(|| format!("Invalid window {s:?}"))?;
        }
        Ok(Window { dims })
    }
}

/// Role of every dimension of the three convolution operands, as given by
/// dim labels such as `b01f_01io->b01f`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConvDimensionNumbers {
    pub input_batch: usize,
    pub input_feature: usize,
    pub input_spatial: TVec<usize>,
    pub kernel_input_feature: usize,
    pub kernel_output_feature: usize,
    pub kernel_spatial: TVec<usize>,
    pub output_batch: usize,
    pub output_feature: usize,
    pub output_spatial: TVec<usize>,
}

/// Decodes one operand's labels: two named axes plus spatial digits.
fn decode_labels(labels: &str, named: [char; 2]) -> HloResult<(usize, usize, TVec<usize>)> {
    let spatial_rank = labels.len().saturating_sub(2);
    let mut found: [Option<usize>; 2] = [None, None];
    let mut spatial: TVec<Option<usize>> = tvec![None; spatial_rank];
    for (axis, c) in labels.chars().enumerate() {
        let slot = if let Some(ix) = named.iter().position(|n| *n == c) {
            &mut found[ix]
        } else if let Some(d) = c.to_digit(10).filter(|d| (*d as usize) < spatial_rank) {
            &mut spatial[d as usize]
        } else {
            bail!("Unexpected dimension label {:?} in {:?}", c, labels)
        };
        ensure!(slot.is_none(), "Dimension label {:?} appears twice in {:?}", c, labels);
        *slot = Some(axis);
    }
    let [Some(a), Some(b)] = found else {
        bail!("Dimension labels {:?} must name {:?} and {:?}", labels, named[0], named[1])
    };
    let spatial = spatial
        .into_iter()
        .map(|s| s.with_context(|| format!("Missing spatial dimension in {labels:?}")))
        .collect::<HloResult<_>>()?;
    Ok((a, b, spatial))
}

fn encode_labels(rank: usize, named: [(usize, char); 2], spatial: &[usize]) -> String {
    let mut labels = vec!['?'; rank];
    for (axis, c) in named {
        labels[axis] = c;
    }
    for (ix, axis) in spatial.iter().enumerate() {
        labels[*axis] = char::from_digit(ix as u32, 10).unwrap_or('?');
    }
    labels.into_iter().collect()
}

impl ConvDimensionNumbers {
    pub fn spatial_rank(&self) -> usize {
        self.input_spatial.len()
    }
}

impl FromStr for ConvDimensionNumbers {
    type Err = HloError;
    fn from_str(s: &str) -> HloResult<ConvDimensionNumbers> {
        let Some((operands, output)) = s.split_once("->") else {
            bail!("Dimension labels must read input_kernel->output, got {:?}", s)
        };
        let Some((input, kernel)) = operands.split_once('_') else {
            bail!("Dimension labels must read input_kernel->output, got {:?}", s)
        };
        let (input_batch, input_feature, input_spatial) = decode_labels(input, ['b', 'f'])?;
        let (kernel_input_feature, kernel_output_feature, kernel_spatial) =
            decode_labels(kernel, ['i', 'o'])?;
        let (output_batch, output_feature, output_spatial) = decode_labels(output, ['b', 'f'])?;
        ensure!(
            input_spatial.len() == kernel_spatial.len()
                && input_spatial.len() == output_spatial.len(),
            "Inconsistent spatial ranks in dimension labels {:?}",
            s
        );
        Ok(ConvDimensionNumbers {
            input_batch,
            input_feature,
            input_spatial,
            kernel_input_feature,
            kernel_output_feature,
            kernel_spatial,
            output_batch,
            output_feature,
            output_spatial,
        })
    }
}

impl fmt::Display for ConvDimensionNumbers {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let rank = self.spatial_rank() + 2;
        let input = [(self.input_batch, 'b'), (self.input_feature, 'f')];
        let kernel = [(self.kernel_input_feature, 'i'), (self.kernel_output_feature, 'o')];
        let output = [(self.output_batch, 'b'), (self.output_feature, 'f')];
        write!(
            f,
            "{}_{}->{}",
            encode_labels(rank, input, &self.input_spatial),
            encode_labels(rank, kernel, &self.kernel_spatial),
            encode_labels(rank, output, &self.output_spatial),
        )
    }
}
