use std::fmt;

use itertools::Itertools;
use ndarray::{s, Array1, Array2, ArrayBase, ArrayView2, Axis, Data, Ix1, Ix2};
use serde::{Deserialize, Serialize};

use crate::loss::{log_sum_exp, sigmoid, CrossEntropyObjective, LogisticObjective, Loss};
use crate::optimize::{lbfgs, newton_cg, LbfgsOptions, MinimizeResult, NewtonCgOptions, Problem};
use crate::{Error, Fit, Predict, Result};

/// Minimizer used to fit [`LogisticRegression`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Solver {
    Lbfgs,
    NewtonCg,
}

impl Solver {
    /// Tolerance used when none is given on the command line.
    #[must_use]
    pub fn default_tol(self) -> f64 {
        match self {
            Self::Lbfgs => 1e-10,
            Self::NewtonCg => 1e-3,
        }
    }
}

impl fmt::Display for Solver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lbfgs => f.write_str("lbfgs"),
            Self::NewtonCg => f.write_str("newton-cg"),
        }
    }
}

/// Formulation chosen from the number of classes: two classes use a single
/// logistic model, more use a multinomial (softmax) model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Multiclass {
    Ovr,
    Multinomial,
}

impl fmt::Display for Multiclass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ovr => f.write_str("ovr"),
            Self::Multinomial => f.write_str("multinomial"),
        }
    }
}

/// L2-regularized logistic regression.
///
/// Labels may be any class ids; they are mapped to contiguous indices
/// internally and [`LogisticFit::classes`] maps predictions back.
///
/// # Examples
///
/// ```
/// use ndarray::array;
/// use petal_bench::{Fit, LogisticRegression, Predict};
/// use petal_bench::logistic::argmax;
///
/// let x = array![[-2.], [-1.], [1.], [2.]];
/// let y = array![0usize, 0, 1, 1];
/// let mut model = LogisticRegression::default();
/// let fit = model.fit(&x, Some(&y)).unwrap();
/// assert!(fit.coef[[0, 0]] > 0.);
///
/// let prob = model.predict(&x).unwrap();
/// assert_eq!(argmax(prob.view()), y);
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogisticRegression {
    /// Inverse of the regularization strength.
    pub c: f64,
    pub fit_intercept: bool,
    pub tol: f64,
    pub max_iter: usize,
    pub solver: Solver,
    #[serde(skip)]
    fitted: Option<LogisticFit>,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self {
            c: 1.,
            fit_intercept: true,
            tol: 1e-4,
            max_iter: 100,
            solver: Solver::Lbfgs,
            fitted: None,
        }
    }
}

/// A fitted model.
#[derive(Debug, Clone)]
pub struct LogisticFit {
    /// One row per output: a single row for [`Multiclass::Ovr`], one per
    /// class for [`Multiclass::Multinomial`].
    pub coef: Array2<f64>,
    pub intercept: Array1<f64>,
    pub multiclass: Multiclass,
    pub n_classes: usize,
    /// Class id of each probability column, in ascending order.
    pub classes: Array1<usize>,
    pub iterations: usize,
    pub converged: bool,
    /// Penalized loss at the solution, summed over samples.
    pub loss: f64,
}

impl LogisticRegression {
    #[must_use]
    pub fn new(c: f64, fit_intercept: bool, tol: f64, max_iter: usize, solver: Solver) -> Self {
        Self {
            c,
            fit_intercept,
            tol,
            max_iter,
            solver,
            fitted: None,
        }
    }

    #[must_use]
    pub fn fitted(&self) -> Option<&LogisticFit> {
        self.fitted.as_ref()
    }

    fn minimize<P: Problem>(&self, problem: &mut P, n_params: usize) -> Result<MinimizeResult> {
        let x0 = Array1::zeros(n_params);
        match self.solver {
            Solver::Lbfgs => {
                let options = LbfgsOptions {
                    max_iter: self.max_iter,
                    gtol: self.tol,
                    ..LbfgsOptions::default()
                };
                lbfgs(problem, x0.view(), &options)
            }
            Solver::NewtonCg => {
                let options = NewtonCgOptions {
                    max_iter: self.max_iter,
                    xtol: self.tol,
                    ..NewtonCgOptions::default()
                };
                newton_cg(problem, x0.view(), &options)
            }
        }
    }
}

impl<S, T> Fit<ArrayBase<S, Ix2>, ArrayBase<T, Ix1>, Result<LogisticFit>> for LogisticRegression
where
    S: Data<Elem = f64>,
    T: Data<Elem = usize>,
{
    fn fit(
        &mut self,
        input: &ArrayBase<S, Ix2>,
        labels: Option<&ArrayBase<T, Ix1>>,
    ) -> Result<LogisticFit> {
        let y = labels.ok_or(Error::MissingLabels)?;
        if y.len() != input.nrows() {
            return Err(Error::InvalidInput {
                context: format!("{} samples but {} labels", input.nrows(), y.len()),
            });
        }
        let classes: Array1<usize> = y.iter().copied().sorted_unstable().dedup().collect();
        let n_classes = classes.len();
        if n_classes < 2 {
            return Err(Error::InvalidInput {
                context: format!("at least two classes are required, found {}", n_classes),
            });
        }
        let y: Array1<usize> = y
            .iter()
            .map(|label| classes.iter().position(|c| c == label).unwrap_or_default())
            .collect();

        let x = input.view();
        let y = y.view();
        let dim = x.ncols() + 1;
        let penalty_l2 = 0.5 / self.c / x.nrows() as f64;
        let compute_hess = self.solver == Solver::NewtonCg;

        let (multiclass, outputs, result) = if n_classes == 2 {
            let objective = LogisticObjective {
                fit_intercept: self.fit_intercept,
                penalty_l2,
            };
            let beta = Array1::zeros(dim);
            let mut loss = Loss::new(objective, x, y, beta.view(), compute_hess);
            let result = self.minimize(&mut loss, dim)?;
            log::debug!("logistic loss evaluated {} times", loss.evaluations());
            (Multiclass::Ovr, 1, result)
        } else {
            let objective = CrossEntropyObjective {
                n_classes,
                fit_intercept: self.fit_intercept,
                penalty_l2,
            };
            let beta = Array1::zeros(n_classes * dim);
            let mut loss = Loss::new(objective, x, y, beta.view(), compute_hess);
            let result = self.minimize(&mut loss, n_classes * dim)?;
            log::debug!("cross-entropy loss evaluated {} times", loss.evaluations());
            (Multiclass::Multinomial, n_classes, result)
        };

        let beta = result.x.into_shape_with_order((outputs, dim))?;
        let fit = LogisticFit {
            coef: beta.slice(s![.., 1..]).to_owned(),
            intercept: beta.column(0).to_owned(),
            multiclass,
            n_classes,
            classes,
            iterations: result.iterations,
            converged: result.converged,
            loss: result.fun,
        };
        self.fitted = Some(fit.clone());
        Ok(fit)
    }
}

impl<S> Predict<ArrayBase<S, Ix2>, Result<Array2<f64>>> for LogisticRegression
where
    S: Data<Elem = f64>,
{
    /// Class probabilities, one row per sample.
    fn predict(&mut self, input: &ArrayBase<S, Ix2>) -> Result<Array2<f64>> {
        let fit = self.fitted.as_ref().ok_or(Error::NotFitted)?;
        Ok(fit.predict_proba(input.view()))
    }
}

impl LogisticFit {
    #[must_use]
    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Array2<f64> {
        predict_proba(x, &self.coef, &self.intercept, self.multiclass)
    }

    /// Class id of the most probable column of every row of `prob`.
    #[must_use]
    pub fn decode(&self, prob: ArrayView2<f64>) -> Array1<usize> {
        argmax(prob).mapv(|i| self.classes[i])
    }

    /// Most probable class id for every row of `x`.
    #[must_use]
    pub fn predict_classes(&self, x: ArrayView2<f64>) -> Array1<usize> {
        self.decode(self.predict_proba(x).view())
    }
}

/// Class probabilities for `x` given coefficient rows and intercepts.
///
/// [`Multiclass::Ovr`] applies the logistic link to each score column; a
/// single column `p` becomes `[1 - p, p]`, several are normalized per row.
/// [`Multiclass::Multinomial`] applies softmax; a single score column `s`
/// is expanded to `[-s, s]` first.
#[must_use]
pub fn predict_proba(
    x: ArrayView2<f64>,
    coef: &Array2<f64>,
    intercept: &Array1<f64>,
    multiclass: Multiclass,
) -> Array2<f64> {
    let mut scores = x.dot(&coef.t()) + intercept;
    match multiclass {
        Multiclass::Ovr => {
            scores.mapv_inplace(sigmoid);
            if scores.ncols() == 1 {
                let p = scores.column(0);
                ndarray::stack![Axis(1), p.mapv(|p| 1. - p), p]
            } else {
                let sums = scores.sum_axis(Axis(1)).insert_axis(Axis(1));
                scores / sums
            }
        }
        Multiclass::Multinomial => {
            if scores.ncols() == 1 {
                let s = scores.column(0).to_owned();
                scores = ndarray::stack![Axis(1), s.mapv(|v| -v), s];
            }
            softmax(scores.view())
        }
    }
}

/// Row-wise softmax.
#[must_use]
pub fn softmax(scores: ArrayView2<f64>) -> Array2<f64> {
    let mut prob = scores.to_owned();
    for mut row in prob.rows_mut() {
        let lse = log_sum_exp(row.view());
        row.mapv_inplace(|v| (v - lse).exp());
    }
    prob
}

/// Index of the largest entry of every row; ties go to the lowest index.
#[must_use]
pub fn argmax(prob: ArrayView2<f64>) -> Array1<usize> {
    prob.rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |(best, max), (i, &v)| {
                    if v > max {
                        (i, v)
                    } else {
                        (best, max)
                    }
                })
                .0
        })
        .collect()
}
