//! # Buffer drift fit (`Zb`)
//!
//! Fits the exponential drift model
//!
//! ```text
//! Zb(t) = a0 + a1·t + a2·exp(a3·t)
//! ```
//!
//! to the smoothed buffer series `Zf`, where `t` is the time of each line since the first.
//!
//! ## Starting guess
//!
//! The valid lines are low-pass filtered again (`GuessFilterWidth`, `GuessFilterIterations`);
//! a straight line fitted to the second half gives `a0` and `a1`, the difference between the
//! mean residuals of the first and last tenth gives `a2`, and `a3 = −5 / t_last`.
//!
//! ## Outcomes
//!
//! | situation | output | history |
//! |---|---|---|
//! | `ZeroBufferFitSkipFit` | `Zf` unchanged | `SkipFit[TRUE: Not using LMFit]` |
//! | fewer valid lines than `ZeroBufferFitMinimumLines` | `Zf` unchanged | `NotEnoughLines(...)` |
//! | fit converged | model at every line | `Fit(Solved,...)` |
//! | fit failed, `ZeroBufferFitOnFailUseLinear` | `a0 + a1·t` from a linear fit of `Zf` | `OnFailureUse(LinearFit(Zf))` |
//! | fit failed otherwise | `Zf` unchanged | `OnFailureUse(ZfBuffer)` |
//!
//! The pipeline then subtracts the last value ([`DriftCorrect::normalize`]) so the correction
//! is relative to the end of the image.

use log::{debug, warn};
use nalgebra::{Const, DVector, Dyn, SVector};

use super::conf::Profile;
use super::data::CalibrationData;
use super::filters::{is_valid, low_pass};
use super::history::History;
use super::{CalibrationModule, CorrectionVector, Tag};
use crate::constants::{
    DEFAULT_ABS_ERROR, DEFAULT_MAX_ITERATIONS, DEFAULT_REL_ERROR, DRIFT_PARAMETERS,
};
use crate::lsq::{
    linear_fit, FitResult, IterationControl, Jacobian, LeastSquaresModel, NonLinearSolver,
};
use crate::planetcal_errors::CalibrationError;

type DriftParameters = SVector<f64, DRIFT_PARAMETERS>;

/// Value of the drift model at `t`.
pub fn drift_model(a: &DriftParameters, t: f64) -> f64 {
    a[0] + a[1] * t + a[2] * (a[3] * t).exp()
}

/// Residuals of the drift model against the valid lines.
struct DriftModel<'a> {
    t: &'a [f64],
    y: &'a [f64],
    chi_square: Vec<f64>,
}

impl LeastSquaresModel<DRIFT_PARAMETERS> for DriftModel<'_> {
    fn residuals(&self, x: &DriftParameters) -> DVector<f64> {
        DVector::from_iterator(
            self.t.len(),
            self.t.iter().zip(self.y).map(|(t, y)| drift_model(x, *t) - y),
        )
    }

    fn jacobian(&self, x: &DriftParameters) -> Jacobian<DRIFT_PARAMETERS> {
        Jacobian::<DRIFT_PARAMETERS>::from_fn_generic(Dyn(self.t.len()), Const, |i, j| {
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
        _iteration: usize,
        _x: &DriftParameters,
        chi_square: f64,
    ) -> IterationControl {
        self.chi_square.push(chi_square);
        IterationControl::Continue
    }
}

#[derive(Debug, Clone)]
pub struct DriftCorrect {
    solver: NonLinearSolver,
    min_lines: usize,
    skip_fit: bool,
    use_linear: bool,
    guess_width: usize,
    guess_iterations: usize,
    history: History,
    fit: Option<FitResult<DRIFT_PARAMETERS>>,
    chi_square: Vec<f64>,
}

impl Default for DriftCorrect {
    fn default() -> Self {
        DriftCorrect {
            solver: NonLinearSolver::default(),
            min_lines: 50,
            skip_fit: false,
            use_linear: true,
            guess_width: 17,
            guess_iterations: 1,
            history: History::new(),
            fit: None,
            chi_square: Vec::new(),
        }
    }
}

impl DriftCorrect {
    pub fn new(solver: NonLinearSolver) -> Self {
        DriftCorrect {
            solver,
            ..Default::default()
        }
    }

    pub fn from_profile(profile: &Profile, history: History) -> Result<Self, CalibrationError> {
        Ok(DriftCorrect {
            solver: NonLinearSolver::new(
                profile.get_usize_or("MaximumIterations", DEFAULT_MAX_ITERATIONS)?,
                profile.get_f64_or("AbsoluteError", DEFAULT_ABS_ERROR)?,
                profile.get_f64_or("RelativeError", DEFAULT_REL_ERROR)?,
            ),
            min_lines: profile.get_usize_or("ZeroBufferFitMinimumLines", 50)?,
            skip_fit: profile.get_bool_or("ZeroBufferFitSkipFit", false)?,
            use_linear: profile.get_bool_or("ZeroBufferFitOnFailUseLinear", true)?,
            guess_width: profile.get_usize_or("GuessFilterWidth", 17)?,
            guess_iterations: profile.get_usize_or("GuessFilterIterations", 1)?,
            history,
            fit: None,
            chi_square: Vec::new(),
        })
    }

    pub fn with_min_lines(mut self, lines: usize) -> Self {
        self.min_lines = lines;
        self
    }

    pub fn with_skip_fit(mut self, skip: bool) -> Self {
        self.skip_fit = skip;
        self
    }

    /// Fall back to a linear fit (`true`) or to the input series (`false`) when the fit fails.
    pub fn with_linear_fallback(mut self, use_linear: bool) -> Self {
        self.use_linear = use_linear;
        self
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Result of the last non-linear fit, if one was attempted.
    pub fn fit(&self) -> Option<&FitResult<DRIFT_PARAMETERS>> {
        self.fit.as_ref()
    }

    /// χ² after every accepted solver step of the last fit.
    pub fn chi_square_history(&self) -> &[f64] {
        &self.chi_square
    }

    /// Starting parameters for the fit of `y` sampled at `t`.
    pub fn guess(&self, t: &[f64], y: &[f64]) -> DriftParameters {
        let n = t.len();
        let smooth = low_pass(y, self.guess_width, self.guess_iterations);
        let half = n / 2;
        let (a0, a1) = linear_fit(&t[half..], &smooth[half..]);

        let residuals: Vec<f64> = t
            .iter()
            .zip(&smooth)
            .map(|(ti, yi)| yi - (a0 + a1 * ti))
            .collect();
        let k = (n / 10).max(1).min(n);
        let head = residuals[..k].iter().sum::<f64>() / k as f64;
        let tail = residuals[n - k..].iter().sum::<f64>() / k as f64;

        let t_last = t.last().copied().unwrap_or(0.0);
        let a3 = if t_last > 0.0 { -5.0 / t_last } else { -1.0 };
        SVector::from([a0, a1, head - tail, a3])
    }

    /// Fit the drift of `zf`.
    ///
    /// Arguments
    /// -----------------
    /// * `zf`: smoothed buffer series, one value per line.
    /// * `times`: line times, same length as `zf`.
    /// * `good_lines`: number of leading lines usable for the fit.
    ///
    /// Return
    /// ----------
    /// * One value per line, following the outcome table of the module documentation.
    pub fn solve(&mut self, zf: &[f64], times: &[f64], good_lines: usize) -> Vec<f64> {
        self.fit = None;
        self.chi_square.clear();
        self.history.add(format!(
            "ZeroBufferFit(AbsErr[{}],RelErr[{}],MaxIter[{}])",
            self.solver.abs_tolerance, self.solver.rel_tolerance, self.solver.max_iterations
        ));

        if self.skip_fit {
            self.history.add("SkipFit[TRUE: Not using LMFit]");
            return zf.to_vec();
        }

        let (t, y): (Vec<f64>, Vec<f64>) = times
            .iter()
            .zip(zf)
            .take(good_lines)
            .filter(|(_, v)| is_valid(**v))
            .map(|(t, v)| (*t, *v))
            .unzip();

        if t.len() < self.min_lines.max(DRIFT_PARAMETERS + 1) {
            self.history.add(format!(
                "NotEnoughLines(GoodLines[{}],MinimumLines[{}])",
                t.len(),
                self.min_lines
            ));
            return zf.to_vec();
        }

        let guess = self.guess(&t, &y);
        self.history.add(format!(
            "Guess({:.6e},{:.6e},{:.6e},{:.6e})",
            guess[0], guess[1], guess[2], guess[3]
        ));

        let mut model = DriftModel {
            t: &t,
            y: &y,
            chi_square: Vec::new(),
        };
        let fit = self.solver.solve(&mut model, guess);
        self.chi_square = model.chi_square;

        let output = if fit.is_converged() {
            self.history.add(format!(
                "Fit(Solved,#Iters[{}],ChiSq[{:.6e}],DoF[{}])",
                fit.iterations, fit.chi_square, fit.degrees_of_freedom
            ));
            let a = fit.coefficients;
            self.history.add(format!(
                "Coefficients({:.6e},{:.6e},{:.6e},{:.6e})",
                a[0], a[1], a[2], a[3]
            ));
            times.iter().map(|ti| drift_model(&a, *ti)).collect()
        } else {
            self.history.add(format!(
                "Failed::Reason({},#Iters[{}])",
                fit.status, fit.iterations
            ));
            if self.use_linear {
                let (a0, a1) = linear_fit(&t, &y);
                warn!("drift fit {}; using linear fit {a0} + {a1}·t", fit.status);
                self.history.add("OnFailureUse(LinearFit(Zf))");
                times.iter().map(|ti| a0 + a1 * ti).collect()
            } else {
                warn!("drift fit {}; using the buffer series", fit.status);
                self.history.add("OnFailureUse(ZfBuffer)");
                zf.to_vec()
            }
        };
        self.fit = Some(fit);
        output
    }

    /// Subtract the last valid value so the series ends at zero.
    pub fn normalize(&mut self, values: &[f64]) -> Vec<f64> {
        let reference = values
            .iter()
            .rev()
            .find(|v| is_valid(**v))
            .copied()
            .unwrap_or(0.0);
        self.history.add(format!("Normalize[{reference}]"));
        values
            .iter()
            .map(|v| if is_valid(*v) { v - reference } else { *v })
            .collect()
    }

    /// Fit, normalise and wrap the result as the `Zb` vector.
    pub fn compute(
        profile: &Profile,
        data: &CalibrationData,
        zf: &CorrectionVector,
        history: History,
    ) -> Result<CorrectionVector, CalibrationError> {
        let mut module = DriftCorrect::from_profile(profile, history)?;
        let times = data.line_times();
        let good_lines = data.last_good_line.unwrap_or(data.lines).min(data.lines);
        let fitted = module.solve(zf.values(), &times, good_lines);
        let normalized = module.normalize(&fitted);
        debug!("ZeroBufferFit = {}", module.history);
        CorrectionVector::new(Tag::Zb, normalized, module.history, data)
    }
}
