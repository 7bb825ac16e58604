//! # Non-linear least squares
//!
//! A small Levenberg-Marquardt solver for models with a fixed number of parameters `N`, plus the
//! plain linear regression used as a starting guess and as a fallback.
//!
//! ## Algorithm
//!
//! Each iteration evaluates the residual vector `r(x)` and the Jacobian `J(x)`, forms the normal
//! equations `JᵀJ·dx = −Jᵀr` damped by `λ·diag(JᵀJ)`, and tries the step:
//!
//! * if the step lowers `χ² = r·r` it is accepted and `λ` shrinks by 10,
//! * otherwise it is rejected and `λ` grows by 10.
//!
//! After an accepted step the solver stops when every component satisfies
//! `|dx_i| < abs_tolerance + rel_tolerance·|x_i|`. The model can also stop the iteration through
//! [`LeastSquaresModel::check_iteration`].
//!
//! If `λ` grows past `1e10` no further progress is possible. The fit is then reported as
//! converged only when the gradient `‖Jᵀr‖∞` is below `abs_tolerance`.
//!
//! Reaching `max_iterations` is not an error: the result carries
//! [`FitStatus::MaxIterFailure`] and the caller decides what to do with it.
//!
//! ## Uncertainties
//!
//! Parameter uncertainties are `sqrt(diag((JᵀJ)⁻¹))` at the final parameters, available whatever
//! the status. A singular `JᵀJ` yields `NaN` uncertainties.

use std::fmt;

use nalgebra::{Const, DVector, Dyn, OMatrix, SMatrix, SVector};

use crate::constants::{DEFAULT_ABS_ERROR, DEFAULT_MAX_ITERATIONS, DEFAULT_REL_ERROR};

const INITIAL_LAMBDA: f64 = 1e-3;
const LAMBDA_UP: f64 = 10.0;
const LAMBDA_DOWN: f64 = 0.1;
const MAX_LAMBDA: f64 = 1e10;

/// Jacobian with one row per residual and one column per parameter.
pub type Jacobian<const N: usize> = OMatrix<f64, Dyn, Const<N>>;

/// Decision returned by [`LeastSquaresModel::check_iteration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationControl {
    Continue,
    /// Stop and report the current parameters as converged.
    Terminate,
    /// Stop and report [`FitStatus::UserAborted`].
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStatus {
    Converged,
    MaxIterFailure,
    UserAborted,
}

impl fmt::Display for FitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FitStatus::Converged => "Converged",
            FitStatus::MaxIterFailure => "MaxIterFailure",
            FitStatus::UserAborted => "UserAborted",
        };
        f.write_str(s)
    }
}

/// A model fitted by [`NonLinearSolver`].
pub trait LeastSquaresModel<const N: usize> {
    /// Residuals `model(x) − data`, one per sample.
    fn residuals(&self, x: &SVector<f64, N>) -> DVector<f64>;

    /// Partial derivatives of the residuals.
    fn jacobian(&self, x: &SVector<f64, N>) -> Jacobian<N>;

    /// Called after every iteration with the current parameters and χ².
    fn check_iteration(
        &mut self,
        _iteration: usize,
        _x: &SVector<f64, N>,
        _chi_square: f64,
    ) -> IterationControl {
        IterationControl::Continue
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FitResult<const N: usize> {
    pub coefficients: SVector<f64, N>,
    pub uncertainties: SVector<f64, N>,
    pub chi_square: f64,
    pub iterations: usize,
    pub status: FitStatus,
    pub degrees_of_freedom: usize,
}

impl<const N: usize> FitResult<N> {
    pub fn is_converged(&self) -> bool {
        self.status == FitStatus::Converged
    }
}

/// Levenberg-Marquardt driver.
#[derive(Debug, Clone, PartialEq)]
pub struct NonLinearSolver {
    pub max_iterations: usize,
    pub abs_tolerance: f64,
    pub rel_tolerance: f64,
}

impl Default for NonLinearSolver {
    fn default() -> Self {
        NonLinearSolver {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            abs_tolerance: DEFAULT_ABS_ERROR,
            rel_tolerance: DEFAULT_REL_ERROR,
        }
    }
}

impl NonLinearSolver {
    pub fn new(max_iterations: usize, abs_tolerance: f64, rel_tolerance: f64) -> Self {
        NonLinearSolver {
            max_iterations,
            abs_tolerance,
            rel_tolerance,
        }
    }

    /// Fit `model` starting from `guess`.
    ///
    /// Arguments
    /// -----------------
    /// * `model`: residuals, Jacobian and the per-iteration hook.
    /// * `guess`: initial parameters.
    ///
    /// Return
    /// ----------
    /// * The [`FitResult`]; a non-converged fit is a status, not an error.
    pub fn solve<const N: usize, M: LeastSquaresModel<N>>(
        &self,
        model: &mut M,
        guess: SVector<f64, N>,
    ) -> FitResult<N> {
        let mut x = guess;
        let mut residuals = model.residuals(&x);
        let mut chi_square = residuals.norm_squared();
        let mut lambda = INITIAL_LAMBDA;
        let mut status = FitStatus::MaxIterFailure;
        let mut iterations = 0;

        for iter in 1..=self.max_iterations {
            iterations = iter;

            let jac = model.jacobian(&x);
            let jt = jac.transpose();
            let hessian: SMatrix<f64, N, N> = &jt * &jac;
            let gradient: SVector<f64, N> = &jt * &residuals;

            let mut damped = hessian;
            for i in 0..N {
                damped[(i, i)] += lambda * hessian[(i, i)];
            }

            let step = damped.try_inverse().map(|inv| inv * -gradient);
            let accepted = step.and_then(|dx| {
                let trial = x + dx;
                let trial_residuals = model.residuals(&trial);
                let trial_chi = trial_residuals.norm_squared();
                (trial_chi.is_finite() && trial_chi < chi_square)
                    .then_some((dx, trial, trial_residuals, trial_chi))
            });

            match accepted {
                Some((dx, trial, trial_residuals, trial_chi)) => {
                    x = trial;
                    residuals = trial_residuals;
                    chi_square = trial_chi;
                    lambda *= LAMBDA_DOWN;

                    match model.check_iteration(iter, &x, chi_square) {
                        IterationControl::Continue => {}
                        IterationControl::Terminate => {
                            status = FitStatus::Converged;
                            break;
                        }
                        IterationControl::Abort => {
                            status = FitStatus::UserAborted;
                            break;
                        }
                    }

                    if self.step_converged(&dx, &x) {
                        status = FitStatus::Converged;
                        break;
                    }
                }
                None => {
                    lambda *= LAMBDA_UP;
                    if lambda > MAX_LAMBDA {
                        if gradient.amax() < self.abs_tolerance {
                            status = FitStatus::Converged;
                        }
                        break;
                    }
                }
            }
        }

        let uncertainties = uncertainties(&model.jacobian(&x));
        FitResult {
            coefficients: x,
            uncertainties,
            chi_square,
            iterations,
            status,
            degrees_of_freedom: residuals.len().saturating_sub(N),
        }
    }

    fn step_converged<const N: usize>(&self, dx: &SVector<f64, N>, x: &SVector<f64, N>) -> bool {
        dx.iter()
            .zip(x.iter())
            .all(|(d, xi)| d.abs() < self.abs_tolerance + self.rel_tolerance * xi.abs())
    }
}

fn uncertainties<const N: usize>(jac: &Jacobian<N>) -> SVector<f64, N> {
    let hessian: SMatrix<f64, N, N> = jac.transpose() * jac;
    match hessian.try_inverse() {
        Some(cov) => SVector::from_fn(|i, _| cov[(i, i)].abs().sqrt()),
        None => SVector::from_element(f64::NAN),
    }
}

/// Least-squares line `y = a0 + a1·x`.
///
/// With fewer than two distinct abscissae the slope is 0 and `a0` is the mean of `y`.
pub fn linear_fit(x: &[f64], y: &[f64]) -> (f64, f64) {
    let n = x.len().min(y.len());
    if n == 0 {
        return (0.0, 0.0);
    }
    let nf = n as f64;
    let (sx, sy, sxx, sxy) = x.iter().zip(y).fold(
        (0.0, 0.0, 0.0, 0.0),
        |(sx, sy, sxx, sxy), (xi, yi)| (sx + xi, sy + yi, sxx + xi * xi, sxy + xi * yi),
    );
    let denom = nf * sxx - sx * sx;
    if denom.abs() <= f64::EPSILON * nf * sxx.abs().max(1.0) {
        return (sy / nf, 0.0);
    }
    let a1 = (nf * sxy - sx * sy) / denom;
    let a0 = (sy - a1 * sx) / nf;
    (a0, a1)
}

#[cfg(test)]
mod lsq_test {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    /// `a0 + a1·t + a2·exp(a3·t)` against samples.
    struct ExpDrift {
        t: Vec<f64>,
        y: Vec<f64>,
        chi_history: Vec<f64>,
        abort_after: Option<usize>,
    }

    impl LeastSquaresModel<4> for ExpDrift {
        fn residuals(&self, x: &SVector<f64, 4>) -> DVector<f64> {
            DVector::from_iterator(
                self.t.len(),
                self.t
                    .iter()
                    .zip(&self.y)
                    .map(|(t, y)| x[0] + x[1] * t + x[2] * (x[3] * t).exp() - y),
            )
        }

        fn jacobian(&self, x: &SVector<f64, 4>) -> Jacobian<4> {
            Jacobian::<4>::from_fn_generic(Dyn(self.t.len()), Const::<4>, |i, j| {
                let t = self.t[i];
                let e = (x[3] * t).exp();
                match j {
                    0 => 1.0,
                    1 => t,
                    2 => e,
                    _ => x[2] * t * e,
                }
            })
        }

        fn check_iteration(
            &mut self,
            iteration: usize,
            _x: &SVector<f64, 4>,
            chi_square: f64,
        ) -> IterationControl {
            self.chi_history.push(chi_square);
            match self.abort_after {
                Some(n) if iteration >= n => IterationControl::Abort,
                _ => IterationControl::Continue,
            }
        }
    }

    fn synthetic(noise: f64, seed: u64) -> ExpDrift {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, noise).unwrap();
        let t: Vec<f64> = (0..200).map(|i| i as f64).collect();
        let y = t
            .iter()
            .map(|t| 5.0 + 0.1 * t + 2.0 * (-0.01 * t).exp() + normal.sample(&mut rng))
            .collect();
        ExpDrift {
            t,
            y,
            chi_history: Vec::new(),
            abort_after: None,
        }
    }

    #[test]
    fn test_converges_on_synthetic_drift() {
        let mut model = synthetic(0.01, 42);
        let solver = NonLinearSolver::new(50, 1e-6, 1e-6);
        let fit = solver.solve(&mut model, SVector::from([4.0, 0.08, 1.5, -0.025]));

        assert_eq!(fit.status, FitStatus::Converged);
        assert!(fit.iterations <= 50);
        let truth = [5.0, 0.1, 2.0, -0.01];
        for (c, t) in fit.coefficients.iter().zip(truth) {
            assert_relative_eq!(*c, t, max_relative = 0.05);
        }
        assert_eq!(fit.degrees_of_freedom, 196);
        assert!(fit.uncertainties.iter().all(|u| u.is_finite() && *u > 0.0));

        // accepted steps never increase chi-square
        assert!(model.chi_history.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn test_iteration_cap() {
        let mut model = synthetic(0.01, 7);
        let solver = NonLinearSolver::new(1, 1e-10, 1e-10);
        let fit = solver.solve(&mut model, SVector::from([4.0, 0.08, 1.5, -0.025]));
        assert_eq!(fit.status, FitStatus::MaxIterFailure);
        assert_eq!(fit.iterations, 1);
        assert!(!fit.is_converged());
    }

    #[test]
    fn test_user_abort() {
        let mut model = synthetic(0.01, 3);
        model.abort_after = Some(2);
        let fit = NonLinearSolver::default()
            .solve(&mut model, SVector::from([4.0, 0.08, 1.5, -0.025]));
        assert_eq!(fit.status, FitStatus::UserAborted);
    }

    #[test]
    fn test_linear_fit() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [1.0, 3.0, 5.0, 7.0];
        let (a0, a1) = linear_fit(&x, &y);
        assert_relative_eq!(a0, 1.0, epsilon = 1e-12);
        assert_relative_eq!(a1, 2.0, epsilon = 1e-12);

        assert_eq!(linear_fit(&[2.0, 2.0], &[1.0, 3.0]), (2.0, 0.0));
        assert_eq!(linear_fit(&[], &[]), (0.0, 0.0));
    }
}
