//! # Special pixels and vector filters
//!
//! Correction vectors are built from calibration pixels that may hold special values (null,
//! saturated). Every helper here treats special values and `NaN` as *missing*: they never enter
//! an average and are the only values [`spline_fill`] replaces.
//!
//! * [`low_pass`] – boxcar average over an odd window, repeated `iterations` times.
//! * [`spline_fill`] – natural cubic spline through the valid values.
//! * [`Statistics`] – mean, standard deviation and special-pixel counts.
//! * [`ave_cols`] / [`ave_lines`] – per-line and per-sample averages of a pixel block.

use crate::constants::{
    HIGH_INSTR_SAT8, HIGH_REPR_SAT8, LOW_INSTR_SAT8, LOW_REPR_SAT8, NULL8, VALID_MIN8,
};

/// `true` for the special pixel sentinels and `NaN`.
#[inline]
pub fn is_special(v: f64) -> bool {
    v.is_nan() || v < VALID_MIN8
}

#[inline]
pub fn is_valid(v: f64) -> bool {
    !is_special(v)
}

/// Low saturation (instrument or representation).
pub fn is_lis(v: f64) -> bool {
    v == LOW_INSTR_SAT8 || v == LOW_REPR_SAT8
}

/// High saturation (instrument or representation).
pub fn is_his(v: f64) -> bool {
    v == HIGH_INSTR_SAT8 || v == HIGH_REPR_SAT8
}

/// Null, or any `NaN`.
pub fn is_null(v: f64) -> bool {
    v.is_nan() || v == NULL8
}

/// Boxcar low-pass filter.
///
/// Each output value is the mean of the valid values in a window of `width` samples centred
/// on it; the window is truncated at the ends. A position whose window holds no valid value
/// keeps its input. Even widths are widened by one.
pub fn low_pass(values: &[f64], width: usize, iterations: usize) -> Vec<f64> {
    let half = (width | 1) / 2;
    let mut current = values.to_vec();
    for _ in 0..iterations {
        let source = current.clone();
        for (i, out) in current.iter_mut().enumerate() {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(source.len());
            let (sum, count) = source[lo..hi]
                .iter()
                .filter(|v| is_valid(**v))
                .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
            if count > 0 {
                *out = sum / count as f64;
            }
        }
    }
    current
}

/// Replace special values with a natural cubic spline through the valid ones.
///
/// Gaps before the first or after the last valid value take that end value. With a single valid
/// value every gap takes it; with none the input is returned untouched.
///
/// Return
/// ----------
/// * The filled vector and the number of values replaced.
pub fn spline_fill(values: &[f64]) -> (Vec<f64>, usize) {
    let (x, y): (Vec<f64>, Vec<f64>) = values
        .iter()
        .enumerate()
        .filter(|(_, v)| is_valid(**v))
        .map(|(i, v)| (i as f64, *v))
        .unzip();

    let gaps = values.len() - x.len();
    if gaps == 0 || x.is_empty() {
        return (values.to_vec(), 0);
    }

    let spline = NaturalSpline::new(x, y);
    let filled = values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            if is_valid(*v) {
                *v
            } else {
                spline.evaluate(i as f64)
            }
        })
        .collect();
    (filled, gaps)
}

/// Natural cubic spline, constant outside its knots.
struct NaturalSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    coeffs: Vec<[f64; 4]>,
}

impl NaturalSpline {
    fn new(x: Vec<f64>, y: Vec<f64>) -> Self {
        let n = x.len();
        if n < 2 {
            return NaturalSpline {
                x,
                y,
                coeffs: Vec::new(),
            };
        }

        let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
        let mut alpha = vec![0.0; n];
        for i in 1..n - 1 {
            alpha[i] =
                3.0 / h[i] * (y[i + 1] - y[i]) - 3.0 / h[i - 1] * (y[i] - y[i - 1]);
        }

        // tridiagonal solve (Thomas) for the second-derivative terms
        let mut l = vec![1.0; n];
        let mut mu = vec![0.0; n];
        let mut z = vec![0.0; n];
        for i in 1..n - 1 {
            l[i] = 2.0 * (x[i + 1] - x[i - 1]) - h[i - 1] * mu[i - 1];
            mu[i] = h[i] / l[i];
            z[i] = (alpha[i] - h[i - 1] * z[i - 1]) / l[i];
        }

        let mut c = vec![0.0; n];
        let mut coeffs = vec![[0.0; 4]; n - 1];
        for j in (0..n - 1).rev() {
            c[j] = z[j] - mu[j] * c[j + 1];
            let b = (y[j + 1] - y[j]) / h[j] - h[j] * (c[j + 1] + 2.0 * c[j]) / 3.0;
            let d = (c[j + 1] - c[j]) / (3.0 * h[j]);
            coeffs[j] = [y[j], b, c[j], d];
        }

        NaturalSpline { x, y, coeffs }
    }

    fn evaluate(&self, at: f64) -> f64 {
        let n = self.x.len();
        if n == 1 || at <= self.x[0] {
            return self.y[0];
        }
        if at >= self.x[n - 1] {
            return self.y[n - 1];
        }
        let segment = self.x.partition_point(|xi| *xi <= at) - 1;
        let dx = at - self.x[segment];
        let [a, b, c, d] = self.coeffs[segment];
        a + dx * (b + dx * (c + dx * d))
    }
}

/// Summary of a set of pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Statistics {
    /// Mean of the valid pixels, `NaN` when there are none.
    pub average: f64,
    /// Sample standard deviation of the valid pixels, 0 with fewer than two.
    pub std_dev: f64,
    pub valid: usize,
    pub null: usize,
    pub lis: usize,
    pub his: usize,
    pub total: usize,
}

impl Statistics {
    pub fn from_values<'a>(values: impl IntoIterator<Item = &'a f64>) -> Self {
        let mut stats = Statistics::default();
        let (mut sum, mut sum_sq) = (0.0, 0.0);
        for &v in values {
            stats.total += 1;
            if is_valid(v) {
                stats.valid += 1;
                sum += v;
                sum_sq += v * v;
            } else if is_lis(v) {
                stats.lis += 1;
            } else if is_his(v) {
                stats.his += 1;
            } else {
                stats.null += 1;
            }
        }

        let n = stats.valid as f64;
        stats.average = if stats.valid > 0 { sum / n } else { f64::NAN };
        stats.std_dev = if stats.valid > 1 {
            ((sum_sq - sum * sum / n) / (n - 1.0)).max(0.0).sqrt()
        } else {
            0.0
        };
        stats
    }
}

fn mean_of_valid<'a>(values: impl IntoIterator<Item = &'a f64>) -> f64 {
    let (sum, count) = values
        .into_iter()
        .filter(|v| is_valid(**v))
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count > 0 {
        sum / count as f64
    } else {
        NULL8
    }
}

/// Per-line mean of the columns `first..=last` of each row; [`NULL8`] for a line with no valid
/// pixel in range.
pub fn ave_cols(rows: &[Vec<f64>], first: usize, last: usize) -> Vec<f64> {
    rows.iter()
        .map(|row| {
            let hi = (last + 1).min(row.len());
            let lo = first.min(hi);
            mean_of_valid(&row[lo..hi])
        })
        .collect()
}

/// Per-sample mean of the rows `first..=last`; [`NULL8`] for a column with no valid pixel.
pub fn ave_lines(rows: &[Vec<f64>], first: usize, last: usize) -> Vec<f64> {
    let hi = (last + 1).min(rows.len());
    let lo = first.min(hi);
    let block = &rows[lo..hi];
    let samples = block.iter().map(Vec::len).max().unwrap_or(0);
    (0..samples)
        .map(|s| mean_of_valid(block.iter().filter_map(|row| row.get(s))))
        .collect()
}
