//! Correlation and masked-statistics primitives.
//!
//! Cross-correlation is computed through a zero-padded FFT so that the
//! circular result equals the linear one over every lag.

use num_complex::Complex64;
use rustfft::FftPlanner;

/// Full discrete cross-correlation of two finite signals.
///
/// Element `i` holds the correlation at lag `i - (a.len() - 1)`, where the
/// correlation at lag `l` is `sum_n a[n] * b[n + l]`. A signal `b` that is `a`
/// delayed by `k` samples therefore peaks at lag `k`.
#[must_use]
pub fn cross_correlation(a: &[f64], b: &[f64]) -> Vec<f64> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let full_len = a.len() + b.len() - 1;
    let n = full_len.next_power_of_two();

    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);

    let mut spec_a = padded(a, n);
    let mut spec_b = padded(b, n);
    forward.process(&mut spec_a);
    forward.process(&mut spec_b);

    let mut product: Vec<Complex64> = spec_a
        .iter()
        .zip(spec_b.iter())
        .map(|(x, y)| x.conj() * *y)
        .collect();
    inverse.process(&mut product);

    // rustfft leaves the inverse unnormalized
    let scale = 1.0 / n as f64;
    let max_negative = a.len() - 1;
    (0..full_len)
        .map(|i| {
            let circular = if i < max_negative {
                n - (max_negative - i)
            } else {
                i - max_negative
            };
            product[circular].re * scale
        })
        .collect()
}

fn padded(signal: &[f64], n: usize) -> Vec<Complex64> {
    let mut buffer = vec![Complex64::new(0.0, 0.0); n];
    for (slot, &v) in buffer.iter_mut().zip(signal.iter()) {
        *slot = Complex64::new(v, 0.0);
    }
    buffer
}

/// Arithmetic mean; NaN for an empty slice.
#[must_use]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance; NaN for an empty slice.
#[must_use]
pub fn variance(values: &[f64]) -> f64 {
    let m = mean(values);
    if m.is_nan() {
        return f64::NAN;
    }
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// Mean over the non-NaN entries; NaN when none remain.
#[must_use]
pub fn nan_mean(values: &[f64]) -> f64 {
    let (sum, count) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, c), &v| (s + v, c + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Pearson correlation coefficient.
///
/// NaN when fewer than two pairs are given or either series is constant.
#[must_use]
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return f64::NAN;
    }
    let (a, b) = (&a[..n], &b[..n]);
    let mean_a = mean(a);
    let mean_b = mean(b);
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return f64::NAN;
    }
    (cov / (var_a * var_b).sqrt()).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn direct(a: &[f64], b: &[f64]) -> Vec<f64> {
        let na = a.len() as isize;
        let nb = b.len() as isize;
        (-(na - 1)..nb)
            .map(|lag| {
                (0..na)
                    .filter_map(|n| {
                        let m = n + lag;
                        (0..nb).contains(&m).then(|| a[n as usize] * b[m as usize])
                    })
                    .sum()
            })
            .collect()
    }

    #[test]
    fn test_matches_direct_sum() {
        let a = [1.0, 2.0, -1.0, 0.5, 3.0];
        let b = [0.0, 1.0, 0.5, -2.0];
        let fast = cross_correlation(&a, &b);
        let slow = direct(&a, &b);
        assert_eq!(fast.len(), slow.len());
        for (f, s) in fast.iter().zip(slow.iter()) {
            assert_relative_eq!(f, s, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_impulse_lag() {
        let mut a = vec![0.0; 8];
        let mut b = vec![0.0; 8];
        a[2] = 1.0;
        b[5] = 1.0;
        let c = cross_correlation(&a, &b);
        let peak = c
            .iter()
            .enumerate()
            .max_by(|x, y| x.1.total_cmp(y.1))
            .map(|(i, _)| i as isize - 7)
            .unwrap();
        assert_eq!(peak, 3);
    }

    #[test]
    fn test_pearson() {
        assert_relative_eq!(pearson(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]), 1.0);
        assert_relative_eq!(pearson(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]), -1.0);
        assert!(pearson(&[1.0], &[1.0]).is_nan());
        assert!(pearson(&[1.0, 1.0], &[1.0, 2.0]).is_nan());
    }

    #[test]
    fn test_nan_mean() {
        assert_relative_eq!(nan_mean(&[1.0, f64::NAN, 3.0]), 2.0);
        assert!(nan_mean(&[f64::NAN]).is_nan());
        assert!(nan_mean(&[]).is_nan());
    }
}
