//! Small shared numerics for the fitted models. Everything here operates on
//! plain slices; dimensions are tiny (13 features), so dense direct solves
//! are fine.

use crate::error::PredictorError;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

pub fn median(values: &mut Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

pub fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

pub fn logit(p: f64) -> f64 {
    let p = p.clamp(1e-9, 1.0 - 1e-9);
    (p / (1.0 - p)).ln()
}

/// Solve `a * x = b` in place by Gaussian elimination with partial pivoting.
/// `a` is row-major n x n. A vanishing pivot means the system is singular.
pub fn solve(a: &mut [f64], b: &mut [f64], n: usize) -> Result<Vec<f64>, PredictorError> {
    debug_assert_eq!(a.len(), n * n);
    debug_assert_eq!(b.len(), n);

    for col in 0..n {
        let mut pivot_row = col;
        let mut pivot_abs = a[col * n + col].abs();
        for row in (col + 1)..n {
            let candidate = a[row * n + col].abs();
            if candidate > pivot_abs {
                pivot_abs = candidate;
                pivot_row = row;
            }
        }
        if pivot_abs < 1e-12 {
            return Err(PredictorError::training(
                "linear solve",
                format!("singular system at column {col}"),
            ));
        }
        if pivot_row != col {
            for k in 0..n {
                a.swap(col * n + k, pivot_row * n + k);
            }
            b.swap(col, pivot_row);
        }
        for row in (col + 1)..n {
            let factor = a[row * n + col] / a[col * n + col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row * n + k] -= factor * a[col * n + k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut acc = b[row];
        for k in (row + 1)..n {
            acc -= a[row * n + k] * x[k];
        }
        x[row] = acc / a[row * n + row];
    }
    Ok(x)
}

/// Weighted ridge regression: minimizes `sum w_i (y_i - b0 - x_i . beta)^2 +
/// l2 * |beta|^2`. Returns `(intercept, beta)`.
pub fn ridge_fit(
    xs: &[Vec<f64>],
    ys: &[f64],
    sample_weights: &[f64],
    l2: f64,
) -> Result<(f64, Vec<f64>), PredictorError> {
    let rows = xs.len();
    if rows == 0 || rows != ys.len() || rows != sample_weights.len() {
        return Err(PredictorError::training(
            "ridge",
            "empty or mismatched training matrix",
        ));
    }
    let dims = xs[0].len();
    let n = dims + 1; // leading intercept column

    let mut ata = vec![0.0; n * n];
    let mut atb = vec![0.0; n];
    let mut row_buf = vec![0.0; n];

    for ((x, y), w) in xs.iter().zip(ys).zip(sample_weights) {
        row_buf[0] = 1.0;
        row_buf[1..].copy_from_slice(x);
        for i in 0..n {
            for j in 0..n {
                ata[i * n + j] += w * row_buf[i] * row_buf[j];
            }
            atb[i] += w * row_buf[i] * y;
        }
    }
    // Ridge on the slopes only, never the intercept.
    for i in 1..n {
        ata[i * n + i] += l2;
    }

    let solution = solve(&mut ata, &mut atb, n)?;
    Ok((solution[0], solution[1..].to_vec()))
}

/// Weighted logistic regression by Newton-IRLS with L2 damping on the
/// slopes. `offsets` is an optional fixed per-row addition to the linear
/// predictor (used for base-rate anchored models); `fit_intercept` controls
/// whether a free intercept is estimated.
pub struct LogisticFit {
    pub intercept: f64,
    pub beta: Vec<f64>,
    pub iterations: u32,
}

pub fn logistic_fit(
    xs: &[Vec<f64>],
    ys: &[f64],
    sample_weights: &[f64],
    offsets: Option<&[f64]>,
    fit_intercept: bool,
    l2: f64,
    max_iter: u32,
) -> Result<LogisticFit, PredictorError> {
    let rows = xs.len();
    if rows == 0 || rows != ys.len() || rows != sample_weights.len() {
        return Err(PredictorError::training(
            "logistic",
            "empty or mismatched training matrix",
        ));
    }
    if let Some(offsets) = offsets {
        if offsets.len() != rows {
            return Err(PredictorError::training("logistic", "offset length mismatch"));
        }
    }
    let dims = xs[0].len();
    let n = dims + usize::from(fit_intercept);
    const TOL: f64 = 1e-8;

    let mut params = vec![0.0; n];
    let mut row_buf = vec![0.0; n];

    for iteration in 1..=max_iter {
        let mut hessian = vec![0.0; n * n];
        let mut gradient = vec![0.0; n];

        for (idx, (x, y)) in xs.iter().zip(ys).enumerate() {
            let w = sample_weights[idx];
            if w <= 0.0 {
                continue;
            }
            if fit_intercept {
                row_buf[0] = 1.0;
                row_buf[1..].copy_from_slice(x);
            } else {
                row_buf.copy_from_slice(x);
            }
            let mut z = offsets.map_or(0.0, |o| o[idx]);
            for (p, v) in params.iter().zip(&row_buf) {
                z += p * v;
            }
            let p = sigmoid(z).clamp(1e-9, 1.0 - 1e-9);
            let residual = w * (y - p);
            let curvature = w * p * (1.0 - p);
            for i in 0..n {
                gradient[i] += residual * row_buf[i];
                for j in 0..n {
                    hessian[i * n + j] += curvature * row_buf[i] * row_buf[j];
                }
            }
        }

        // Damp the slope curvature; leaves a fitted intercept unpenalized.
        let slope_start = usize::from(fit_intercept);
        for i in slope_start..n {
            hessian[i * n + i] += l2;
            gradient[i] -= l2 * params[i];
        }

        let step = solve(&mut hessian, &mut gradient, n)?;
        let mut step_norm = 0.0;
        for (p, s) in params.iter_mut().zip(&step) {
            *p += s;
            step_norm += s * s;
        }
        if step_norm.sqrt() < TOL {
            let (intercept, beta) = if fit_intercept {
                (params[0], params[1..].to_vec())
            } else {
                (0.0, params)
            };
            return Ok(LogisticFit {
                intercept,
                beta,
                iterations: iteration,
            });
        }
    }

    Err(PredictorError::training(
        "logistic",
        format!("no convergence within {max_iter} Newton iterations"),
    ))
}

/// SplitMix64, used to derive independent sub-seeds from one top-level seed.
pub fn splitmix64(state: u64) -> u64 {
    let mut z = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
