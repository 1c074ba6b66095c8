//! Read/write head parameters.
//!
//! A controller emits one flat buffer per head and timestep, laid out as
//!
//! ```text
//! |-- erase (M) --|-- add (M) --|-- key (M) --| beta | gate | shift | gamma |
//! ```
//!
//! All entries are unconstrained reals; each stage maps its slice into the
//! range it needs (sigmoid for erase/add/gate/shift, exp for beta, softplus
//! for gamma).  The gradient buffer mirrors the same layout.

use std::ops::Range;

use ndarray::{s, Array1, ArrayView1};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::config::head_param_len;
use crate::error::{NtmError, Result};

/// The scalar fields at the tail of a head buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeadParam {
    /// Key strength, scaled through `exp`.
    Beta,
    /// Content/location interpolation gate, through `sigmoid`.
    Gate,
    /// Rotation amount, through `2·sigmoid - 1`.
    Shift,
    /// Sharpening exponent, through `softplus + 1`.
    Gamma,
}

impl HeadParam {
    pub const ALL: [HeadParam; 4] = [
        HeadParam::Beta,
        HeadParam::Gate,
        HeadParam::Shift,
        HeadParam::Gamma,
    ];

    fn offset(self) -> usize {
        match self {
            HeadParam::Beta => 0,
            HeadParam::Gate => 1,
            HeadParam::Shift => 2,
            HeadParam::Gamma => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HeadParam::Beta => "beta",
            HeadParam::Gate => "gate",
            HeadParam::Shift => "shift",
            HeadParam::Gamma => "gamma",
        }
    }
}

/// One head's parameters for one timestep.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Head {
    /// Memory row width (M).
    width: usize,

    /// Parameter values, length `3M + 4`.
    pub val: Array1<f64>,

    /// Gradients with the same layout as `val`.
    pub grad: Array1<f64>,
}

impl Head {
    /// A head with all parameters zero.
    pub fn new(width: usize) -> Self {
        let len = head_param_len(width);
        Self {
            width,
            val: Array1::zeros(len),
            grad: Array1::zeros(len),
        }
    }

    /// Wrap a controller-emitted buffer, checking its layout.
    pub fn from_vals(width: usize, val: Array1<f64>) -> Result<Self> {
        let expected = head_param_len(width);
        if val.len() != expected {
            return Err(NtmError::HeadLength {
                width,
                expected,
                actual: val.len(),
            });
        }
        let grad = Array1::zeros(expected);
        Ok(Self { width, val, grad })
    }

    /// A head with standard-normal parameters.
    pub fn random<R: Rng + ?Sized>(width: usize, rng: &mut R) -> Self {
        let len = head_param_len(width);
        let val = Array1::from_shape_fn(len, |_| rng.sample::<f64, _>(StandardNormal));
        Self {
            width,
            val,
            grad: Array1::zeros(len),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn len(&self) -> usize {
        self.val.len()
    }

    pub fn is_empty(&self) -> bool {
        self.val.is_empty()
    }

    pub fn erase_range(&self) -> Range<usize> {
        0..self.width
    }

    pub fn add_range(&self) -> Range<usize> {
        self.width..2 * self.width
    }

    pub fn key_range(&self) -> Range<usize> {
        2 * self.width..3 * self.width
    }

    /// Index of a scalar field in `val` / `grad`.
    pub fn index(&self, param: HeadParam) -> usize {
        3 * self.width + param.offset()
    }

    /// Raw (pre-sigmoid) erase vector.
    pub fn erase(&self) -> ArrayView1<'_, f64> {
        self.val.slice(s![self.erase_range()])
    }

    /// Raw (pre-sigmoid) add vector.
    pub fn add(&self) -> ArrayView1<'_, f64> {
        self.val.slice(s![self.add_range()])
    }

    pub fn key(&self) -> ArrayView1<'_, f64> {
        self.val.slice(s![self.key_range()])
    }

    pub fn get(&self, param: HeadParam) -> f64 {
        self.val[self.index(param)]
    }

    pub fn set(&mut self, param: HeadParam, value: f64) {
        let i = self.index(param);
        self.val[i] = value;
    }

    pub fn grad_of(&self, param: HeadParam) -> f64 {
        self.grad[self.index(param)]
    }

    pub fn beta(&self) -> f64 {
        self.get(HeadParam::Beta)
    }

    pub fn gate(&self) -> f64 {
        self.get(HeadParam::Gate)
    }

    pub fn shift(&self) -> f64 {
        self.get(HeadParam::Shift)
    }

    pub fn gamma(&self) -> f64 {
        self.get(HeadParam::Gamma)
    }

    /// Human-readable name of buffer entry `i`, e.g. `key[1]` or `gamma`.
    pub fn param_name(&self, i: usize) -> String {
        let m = self.width;
        match i {
            i if i < m => format!("erase[{}]", i),
            i if i < 2 * m => format!("add[{}]", i - m),
            i if i < 3 * m => format!("key[{}]", i - 2 * m),
            i => HeadParam::ALL
                .iter()
                .find(|p| self.index(**p) == i)
                .map(|p| p.name().to_string())
                .unwrap_or_else(|| format!("param[{}]", i)),
        }
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_layout_offsets() {
        let mut head = Head::new(2);
        assert_eq!(head.len(), 10);
        head.val.assign(&Array1::from_iter((0..10).map(|v| v as f64)));

        assert_eq!(head.erase().to_vec(), vec![0.0, 1.0]);
        assert_eq!(head.add().to_vec(), vec![2.0, 3.0]);
        assert_eq!(head.key().to_vec(), vec![4.0, 5.0]);
        assert_eq!(head.beta(), 6.0);
        assert_eq!(head.gate(), 7.0);
        assert_eq!(head.shift(), 8.0);
        assert_eq!(head.gamma(), 9.0);
    }

    #[test]
    fn test_from_vals_checks_length() {
        assert!(Head::from_vals(3, Array1::zeros(13)).is_ok());
        let err = Head::from_vals(3, Array1::zeros(12)).unwrap_err();
        assert_eq!(
            err,
            NtmError::HeadLength {
                width: 3,
                expected: 13,
                actual: 12
            }
        );
        assert_eq!(err.to_string(), "head buffer for width 3 needs 13 parameters, got 12");
    }

    #[test]
    fn test_param_names() {
        let head = Head::new(2);
        let names: Vec<String> = (0..head.len()).map(|i| head.param_name(i)).collect();
        assert_eq!(
            names,
            vec![
                "erase[0]", "erase[1]", "add[0]", "add[1]", "key[0]", "key[1]", "beta", "gate",
                "shift", "gamma"
            ]
        );
    }

    #[test]
    fn test_random_is_seeded() {
        let a = Head::random(4, &mut StdRng::seed_from_u64(7));
        let b = Head::random(4, &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
        assert!(a.val.iter().all(|v| v.is_finite()));
    }
}
