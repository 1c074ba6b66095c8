//! Location addressing: a continuous circular rotation of the gated weighting.
//!
//! The raw shift scalar `s` becomes a rotation of `2σ(s) - 1` rows, wrapped
//! into `[0, N)`.  For `z = ⌊shift⌋` and `frac = 1 - (shift - z)`:
//!
//! ```text
//! w_s[i] = w_g[(i + z) mod N] · frac + w_g[(i + z + 1) mod N] · (1 - frac)
//! ```
//!
//! i.e. a circular convolution with a two-tap linear-interpolation kernel.

use ndarray::{Array1, ArrayView1};

use crate::core::unit::{ensure_distribution, sigmoid, UnitVec};

/// Wrap an arbitrary real rotation into `[0, n)`.
pub fn wrap_shift(shift: f64, n: usize) -> f64 {
    let n = n as f64;
    let z = shift.rem_euclid(n);
    // rem_euclid can round a tiny negative input up to exactly n.
    if z >= n {
        0.0
    } else {
        z
    }
}

/// Integer base offset and weight of the first tap for a wrapped shift.
fn taps(z: f64) -> (usize, f64) {
    let base = z.floor();
    (base as usize, 1.0 - (z - base))
}

/// Rotate `w` by `shift` rows, interpolating between neighbouring rows.
///
/// Any real `shift` is accepted; shifts that differ by a multiple of
/// `w.len()` give the same rotation.
pub fn rotate(w: ArrayView1<f64>, shift: f64) -> Array1<f64> {
    let n = w.len();
    let (base, tap) = taps(wrap_shift(shift, n));
    Array1::from_shape_fn(n, |i| {
        let j = (i + base) % n;
        w[j] * tap + w[(j + 1) % n] * (1.0 - tap)
    })
}

#[derive(Clone, Debug)]
pub struct ShiftedWeighting {
    pub top: UnitVec,

    /// `σ(s)`
    shift_sig: f64,

    /// Rotation wrapped into `[0, N)`.
    z: f64,
}

impl ShiftedWeighting {
    pub fn forward(shift_raw: f64, gated: &UnitVec) -> Self {
        let n = gated.len();
        let shift_sig = sigmoid(shift_raw);
        let z = wrap_shift(2.0 * shift_sig - 1.0, n);

        let val = rotate(gated.val.view(), z);
        ensure_distribution("shifted weighting", val.view());

        Self {
            top: UnitVec::from_vals(val),
            shift_sig,
            z,
        }
    }

    /// The effective rotation in rows, in `[0, N)`.
    pub fn rotation(&self) -> f64 {
        self.z
    }

    /// Scatter `top.grad` back through both taps and accumulate `∂L/∂s`.
    pub fn backward(&self, gated: &mut UnitVec, shift_grad: &mut f64) {
        let n = gated.len();
        let (base, tap) = taps(self.z);

        let mut dz = 0.0;
        for (i, &g) in self.top.grad.iter().enumerate() {
            let j = (i + base) % n;
            let k = (j + 1) % n;
            dz += (gated.val[k] - gated.val[j]) * g;
            gated.grad[j] += g * tap;
            gated.grad[k] += g * (1.0 - tap);
        }

        let s = self.shift_sig;
        *shift_grad += dz * 2.0 * s * (1.0 - s);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_wrap_shift_range() {
        assert_eq!(wrap_shift(0.5, 3), 0.5);
        assert!((wrap_shift(-0.25, 3) - 2.75).abs() < 1e-12);
        assert!((wrap_shift(7.5, 3) - 1.5).abs() < 1e-12);
        assert_eq!(wrap_shift(-1e-20, 3), 0.0);
    }

    #[test]
    fn test_integer_rotation() {
        let w = array![0.1, 0.2, 0.3, 0.4];
        let r = rotate(w.view(), 1.0);
        // Output row i reads input row i + 1.
        assert_eq!(r.to_vec(), vec![0.2, 0.3, 0.4, 0.1]);
    }

    #[test]
    fn test_fractional_rotation_interpolates() {
        let w = array![1.0, 0.0, 0.0];
        let r = rotate(w.view(), -0.25);
        // z = 2.75: each row keeps 0.75 of itself and takes 0.25 from the row before.
        assert!((r[0] - 0.75).abs() < 1e-12);
        assert!((r[1] - 0.25).abs() < 1e-12);
        assert_eq!(r[2], 0.0);
        assert!((r.sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_raw_shift_is_identity() {
        let gated = UnitVec::from_vals(array![0.6, 0.3, 0.1]);
        let sw = ShiftedWeighting::forward(0.0, &gated);
        assert_eq!(sw.rotation(), 0.0);
        assert_eq!(sw.top.val, gated.val);
    }

    #[test]
    fn test_backward_matches_finite_difference() {
        let gated_val = array![0.5, 0.2, 0.3];
        let upstream = array![1.5, -0.5, 0.25];
        let raw = 0.8;

        let mut gated = UnitVec::from_vals(gated_val.clone());
        let mut sw = ShiftedWeighting::forward(raw, &gated);
        sw.top.grad.assign(&upstream);
        let mut shift_grad = 0.0;
        sw.backward(&mut gated, &mut shift_grad);

        let loss = |raw: f64, w: &Array1<f64>| {
            ShiftedWeighting::forward(raw, &UnitVec::from_vals(w.clone()))
                .top
                .val
                .dot(&upstream)
        };
        let h = 1e-6;
        let numeric = (loss(raw + h, &gated_val) - loss(raw - h, &gated_val)) / (2.0 * h);
        assert!((numeric - shift_grad).abs() < 1e-8);

        for i in 0..3 {
            let mut wp = gated_val.clone();
            wp[i] += h;
            let mut wm = gated_val.clone();
            wm[i] -= h;
            let numeric = (loss(raw, &wp) - loss(raw, &wm)) / (2.0 * h);
            assert!((numeric - gated.grad[i]).abs() < 1e-8);
        }
    }
}
