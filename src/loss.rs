use ndarray::{concatenate, s, Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut1, Axis};

use crate::optimize::Problem;
use crate::{Error, Result};

/// Output of one objective evaluation.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Mean loss over samples, penalty included.
    pub value: f64,
    pub gradient: Array1<f64>,
    pub hessian: Option<Array2<f64>>,
}

/// Computes a regularized mean loss and its derivatives at `beta`.
///
/// The parameter vector holds one block of `n_features + 1` values per
/// output; slot 0 of every block is the intercept.
pub trait Objective {
    fn compute(
        &mut self,
        x: ArrayView2<f64>,
        y: ArrayView1<usize>,
        beta: ArrayView1<f64>,
        hessian: bool,
    ) -> Result<Evaluation>;
}

/// Binary logistic loss with labels in `{0, 1}`.
#[derive(Debug, Clone)]
pub struct LogisticObjective {
    pub fit_intercept: bool,
    /// L2 strength, already divided by the number of samples.
    pub penalty_l2: f64,
}

impl Objective for LogisticObjective {
    fn compute(
        &mut self,
        x: ArrayView2<f64>,
        y: ArrayView1<usize>,
        beta: ArrayView1<f64>,
        hessian: bool,
    ) -> Result<Evaluation> {
        check_block(x, beta, 1)?;
        if let Some(&bad) = y.iter().find(|&&v| v > 1) {
            return Err(Error::InvalidInput {
                context: format!("logistic loss expects labels 0 or 1, found {}", bad),
            });
        }
        let n = x.nrows() as f64;
        let design = design_matrix(x, self.fit_intercept);
        let w = beta.slice(s![1..]);

        let z = design.dot(&beta);
        let yf = y.mapv(|v| v as f64);
        let value = z
            .iter()
            .zip(&yf)
            .map(|(&z, &y)| softplus(z) - y * z)
            .sum::<f64>()
            / n
            + self.penalty_l2 * w.dot(&w);

        let residual = (z.mapv(sigmoid) - &yf) / n;
        let mut gradient = design.t().dot(&residual);
        add_penalty_gradient(gradient.view_mut(), beta, self.penalty_l2);

        let hessian = if hessian {
            let weights = z.mapv(|z| {
                let p = sigmoid(z);
                p * (1. - p)
            }) / n;
            let mut h = weighted_gram(&design, weights.view());
            add_penalty_hessian(&mut h, 0, beta.len(), self.penalty_l2);
            Some(h)
        } else {
            None
        };

        Ok(Evaluation {
            value,
            gradient,
            hessian,
        })
    }
}

/// Multinomial cross-entropy loss with labels in `0..n_classes`.
#[derive(Debug, Clone)]
pub struct CrossEntropyObjective {
    pub n_classes: usize,
    pub fit_intercept: bool,
    pub penalty_l2: f64,
}

impl Objective for CrossEntropyObjective {
    fn compute(
        &mut self,
        x: ArrayView2<f64>,
        y: ArrayView1<usize>,
        beta: ArrayView1<f64>,
        hessian: bool,
    ) -> Result<Evaluation> {
        let k = self.n_classes;
        check_block(x, beta, k)?;
        if let Some(&bad) = y.iter().find(|&&v| v >= k) {
            return Err(Error::InvalidInput {
                context: format!("label {} out of range for {} classes", bad, k),
            });
        }
        let n = x.nrows() as f64;
        let dim = x.ncols() + 1;
        let design = design_matrix(x, self.fit_intercept);
        let blocks = beta.into_shape_with_order((k, dim))?;

        let scores = design.dot(&blocks.t());
        let mut prob = Array2::<f64>::zeros(scores.raw_dim());
        let mut value = 0.;
        for ((i, row), mut p) in scores
            .rows()
            .into_iter()
            .enumerate()
            .zip(prob.rows_mut())
        {
            let lse = log_sum_exp(row);
            value += lse - row[y[i]];
            p.assign(&row.mapv(|z| (z - lse).exp()));
        }
        value /= n;
        for b in blocks.rows() {
            let w = b.slice(s![1..]);
            value += self.penalty_l2 * w.dot(&w);
        }

        let mut residual = prob.clone();
        for (i, &label) in y.iter().enumerate() {
            residual[[i, label]] -= 1.;
        }
        residual /= n;
        let grad_blocks = residual.t().dot(&design);
        let mut gradient = Array1::from_iter(grad_blocks.iter().copied());
        for (c, b) in blocks.rows().into_iter().enumerate() {
            add_penalty_gradient(
                gradient.slice_mut(s![c * dim..(c + 1) * dim]),
                b,
                self.penalty_l2,
            );
        }

        let hessian = if hessian {
            let mut h = Array2::zeros((k * dim, k * dim));
            for c in 0..k {
                for l in c..k {
                    let weights = if c == l {
                        prob.column(c).mapv(|p| p * (1. - p) / n)
                    } else {
                        (&prob.column(c) * &prob.column(l)).mapv(|p| -p / n)
                    };
                    let block = weighted_gram(&design, weights.view());
                    h.slice_mut(s![c * dim..(c + 1) * dim, l * dim..(l + 1) * dim])
                        .assign(&block);
                    if c != l {
                        h.slice_mut(s![l * dim..(l + 1) * dim, c * dim..(c + 1) * dim])
                            .assign(&block.t());
                    }
                }
                add_penalty_hessian(&mut h, c * dim, dim, self.penalty_l2);
            }
            Some(h)
        } else {
            None
        };

        Ok(Evaluation {
            value,
            gradient,
            hessian,
        })
    }
}

/// Adapts an [`Objective`] to the minimizers.
///
/// The objective reports means; the loss scales value, gradient and Hessian
/// by the number of samples. The last evaluation is cached together with the
/// parameter vector it was computed at, so asking for the value and then the
/// gradient at the same point costs a single objective call.
pub struct Loss<'a, O> {
    objective: O,
    x: ArrayView2<'a, f64>,
    y: ArrayView1<'a, usize>,
    n: f64,
    compute_hess: bool,
    last_beta: Array1<f64>,
    cached: Option<Cached>,
    evaluations: usize,
}

struct Cached {
    func: f64,
    grad: Array1<f64>,
    hess: Option<Array2<f64>>,
}

impl<'a, O: Objective> Loss<'a, O> {
    pub fn new(
        objective: O,
        x: ArrayView2<'a, f64>,
        y: ArrayView1<'a, usize>,
        beta: ArrayView1<f64>,
        compute_hess: bool,
    ) -> Self {
        Self {
            objective,
            x,
            y,
            n: x.nrows() as f64,
            compute_hess,
            last_beta: beta.to_owned(),
            cached: None,
            evaluations: 0,
        }
    }

    /// Evaluates the objective at `beta` unless the cached result is
    /// already for `beta`.
    pub fn compute(&mut self, beta: ArrayView1<f64>) -> Result<()> {
        if self.cached.is_some() && beta == self.last_beta {
            return Ok(());
        }

        self.cached = None;
        let result = self
            .objective
            .compute(self.x, self.y, beta, self.compute_hess)?;
        self.evaluations += 1;
        if !result.value.is_finite() {
            return Err(Error::Numerical {
                message: format!("loss evaluated to {}", result.value),
            });
        }
        if !result.gradient.iter().all(|g| g.is_finite()) {
            return Err(Error::Numerical {
                message: "loss gradient is not finite".to_string(),
            });
        }
        self.last_beta = beta.to_owned();
        let hess = if self.compute_hess {
            let h = result.hessian.ok_or_else(|| Error::Numerical {
                message: "objective did not return a Hessian".to_string(),
            })?;
            Some(h * self.n)
        } else {
            None
        };
        self.cached = Some(Cached {
            func: result.value * self.n,
            grad: result.gradient * self.n,
            hess,
        });
        Ok(())
    }

    /// Number of times the underlying objective has been invoked.
    #[must_use]
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    fn cached(&self) -> &Cached {
        self.cached.as_ref().expect("compute fills the cache")
    }
}

impl<'a, O: Objective> Problem for Loss<'a, O> {
    fn value(&mut self, beta: ArrayView1<f64>) -> Result<f64> {
        self.compute(beta)?;
        Ok(self.cached().func)
    }

    fn gradient(&mut self, beta: ArrayView1<f64>) -> Result<Array1<f64>> {
        self.compute(beta)?;
        Ok(self.cached().grad.clone())
    }

    fn hessian(&mut self, beta: ArrayView1<f64>) -> Result<Array2<f64>> {
        if !self.compute_hess {
            return Err(Error::HessianNotConfigured);
        }
        self.compute(beta)?;
        self.cached()
            .hess
            .clone()
            .ok_or(Error::HessianNotConfigured)
    }
}

fn check_block(x: ArrayView2<f64>, beta: ArrayView1<f64>, blocks: usize) -> Result<()> {
    if x.nrows() == 0 {
        return Err(Error::InvalidInput {
            context: "loss requires at least one sample".to_string(),
        });
    }
    if beta.len() != blocks * (x.ncols() + 1) {
        return Err(Error::InvalidInput {
            context: format!(
                "expected {} parameters for {} features, got {}",
                blocks * (x.ncols() + 1),
                x.ncols(),
                beta.len()
            ),
        });
    }
    Ok(())
}

/// Prepends the intercept column: ones when fitting the intercept, zeros
/// otherwise so that slot 0 never moves.
fn design_matrix(x: ArrayView2<f64>, fit_intercept: bool) -> Array2<f64> {
    let fill = if fit_intercept { 1. } else { 0. };
    let column = Array2::from_elem((x.nrows(), 1), fill);
    concatenate![Axis(1), column, x]
}

/// `designᵀ · diag(weights) · design`
fn weighted_gram(design: &Array2<f64>, weights: ArrayView1<f64>) -> Array2<f64> {
    let scaled = design * &weights.insert_axis(Axis(1));
    design.t().dot(&scaled)
}

/// Adds the L2 penalty term to one parameter block, skipping the intercept.
fn add_penalty_gradient(mut gradient: ArrayViewMut1<f64>, block: ArrayView1<f64>, l2: f64) {
    for (g, &b) in gradient.iter_mut().zip(block).skip(1) {
        *g += 2. * l2 * b;
    }
}

fn add_penalty_hessian(h: &mut Array2<f64>, offset: usize, dim: usize, l2: f64) {
    for j in offset + 1..offset + dim {
        h[[j, j]] += 2. * l2;
    }
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0. {
        1. / (1. + (-z).exp())
    } else {
        let e = z.exp();
        e / (1. + e)
    }
}

fn softplus(z: f64) -> f64 {
    z.max(0.) + (-z.abs()).exp().ln_1p()
}

pub(crate) fn log_sum_exp(row: ArrayView1<f64>) -> f64 {
    let max = row.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
    if !max.is_finite() {
        return max;
    }
    max + row.mapv(|v| (v - max).exp()).sum().ln()
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1};

    /// Returns a fixed evaluation and counts how often it is asked to.
    struct Counting {
        calls: usize,
    }

    impl Objective for Counting {
        fn compute(
            &mut self,
            _x: ArrayView2<f64>,
            _y: ArrayView1<usize>,
            beta: ArrayView1<f64>,
            hessian: bool,
        ) -> Result<Evaluation> {
            self.calls += 1;
            Ok(Evaluation {
                value: beta.sum(),
                gradient: Array1::ones(beta.len()),
                hessian: hessian.then(|| Array2::eye(beta.len())),
            })
        }
    }

    fn dataset() -> (Array2<f64>, Array1<usize>) {
        let x = array![
            [0.5, 1.0],
            [1.5, -0.5],
            [-1.0, 0.3],
            [2.0, 2.0],
            [-0.7, -1.2],
            [0.1, 0.4],
        ];
        let y = array![0, 1, 0, 1, 0, 1];
        (x, y)
    }

    fn numeric_gradient<O: Objective>(
        objective: &mut O,
        x: ArrayView2<f64>,
        y: ArrayView1<usize>,
        beta: &Array1<f64>,
    ) -> Array1<f64> {
        let h = 1e-6;
        Array1::from_iter((0..beta.len()).map(|j| {
            let mut plus = beta.clone();
            plus[j] += h;
            let mut minus = beta.clone();
            minus[j] -= h;
            let fp = objective.compute(x, y, plus.view(), false).unwrap().value;
            let fm = objective.compute(x, y, minus.view(), false).unwrap().value;
            (fp - fm) / (2. * h)
        }))
    }

    #[test]
    fn cache_hit_skips_objective() {
        let (x, y) = dataset();
        let beta = array![0.1, 0.2, 0.3];
        let mut loss = Loss::new(Counting { calls: 0 }, x.view(), y.view(), beta.view(), false);

        let v1 = loss.value(beta.view()).unwrap();
        let v2 = loss.value(beta.view()).unwrap();
        let g = loss.gradient(beta.view()).unwrap();
        assert_eq!(loss.evaluations(), 1);
        assert_eq!(loss.objective.calls, 1);
        assert_abs_diff_eq!(v1, v2);
        assert_abs_diff_eq!(v1, 0.6 * 6., epsilon = 1e-12);
        assert_eq!(g, Array1::from_elem(3, 6.));
    }

    #[test]
    fn new_beta_invalidates_cache() {
        let (x, y) = dataset();
        let beta = Array1::zeros(3);
        let mut loss = Loss::new(Counting { calls: 0 }, x.view(), y.view(), beta.view(), false);

        loss.value(beta.view()).unwrap();
        let moved = array![1., 0., 0.];
        assert_abs_diff_eq!(loss.value(moved.view()).unwrap(), 6.);
        loss.gradient(moved.view()).unwrap();
        loss.value(beta.view()).unwrap();
        assert_eq!(loss.evaluations(), 3);
    }

    #[test]
    fn hessian_requires_configuration() {
        let (x, y) = dataset();
        let beta = Array1::zeros(3);
        let mut loss = Loss::new(Counting { calls: 0 }, x.view(), y.view(), beta.view(), false);
        assert!(matches!(
            loss.hessian(beta.view()),
            Err(Error::HessianNotConfigured)
        ));
        assert_eq!(loss.evaluations(), 0);

        let mut loss = Loss::new(Counting { calls: 0 }, x.view(), y.view(), beta.view(), true);
        let h = loss.hessian(beta.view()).unwrap();
        assert_eq!(h, Array2::<f64>::eye(3) * 6.);
        loss.value(beta.view()).unwrap();
        assert_eq!(loss.evaluations(), 1);
    }

    #[test]
    fn logistic_at_zero() {
        let (x, y) = dataset();
        let mut objective = LogisticObjective {
            fit_intercept: true,
            penalty_l2: 0.,
        };
        let beta = Array1::zeros(3);
        let eval = objective
            .compute(x.view(), y.view(), beta.view(), true)
            .unwrap();
        assert_abs_diff_eq!(eval.value, 2f64.ln(), epsilon = 1e-12);
        // balanced labels: the intercept gradient vanishes at zero
        assert_abs_diff_eq!(eval.gradient[0], 0., epsilon = 1e-12);
        let h = eval.hessian.unwrap();
        assert_abs_diff_eq!(h[[0, 0]], 0.25, epsilon = 1e-12);
    }

    #[test]
    fn logistic_gradient_matches_finite_differences() {
        let (x, y) = dataset();
        let mut objective = LogisticObjective {
            fit_intercept: true,
            penalty_l2: 0.3,
        };
        let beta = array![0.2, -0.4, 0.7];
        let eval = objective
            .compute(x.view(), y.view(), beta.view(), false)
            .unwrap();
        let numeric = numeric_gradient(&mut objective, x.view(), y.view(), &beta);
        for (a, b) in eval.gradient.iter().zip(&numeric) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn logistic_without_intercept_ignores_slot_zero() {
        let (x, y) = dataset();
        let mut objective = LogisticObjective {
            fit_intercept: false,
            penalty_l2: 0.1,
        };
        let a = objective
            .compute(x.view(), y.view(), array![0., 0.5, 0.5].view(), true)
            .unwrap();
        let b = objective
            .compute(x.view(), y.view(), array![3., 0.5, 0.5].view(), true)
            .unwrap();
        assert_abs_diff_eq!(a.value, b.value, epsilon = 1e-12);
        assert_eq!(a.gradient[0], 0.);
        assert_eq!(a.hessian.unwrap().row(0).sum(), 0.);
    }

    #[test]
    fn logistic_rejects_multiclass_labels() {
        let x = array![[0.], [1.]];
        let y = array![0, 2];
        let mut objective = LogisticObjective {
            fit_intercept: true,
            penalty_l2: 0.,
        };
        assert!(objective
            .compute(x.view(), y.view(), array![0., 0.].view(), false)
            .is_err());
    }

    #[test]
    fn cross_entropy_gradient_and_hessian() {
        let (x, _) = dataset();
        let y = array![0, 1, 2, 1, 0, 2];
        let mut objective = CrossEntropyObjective {
            n_classes: 3,
            fit_intercept: true,
            penalty_l2: 0.05,
        };
        let beta = array![0.1, 0.2, -0.3, -0.2, 0.4, 0.1, 0.05, -0.1, 0.3];
        let eval = objective
            .compute(x.view(), y.view(), beta.view(), true)
            .unwrap();
        let numeric = numeric_gradient(&mut objective, x.view(), y.view(), &beta);
        for (a, b) in eval.gradient.iter().zip(&numeric) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-6);
        }

        let h = eval.hessian.unwrap();
        assert_eq!(h.dim(), (9, 9));
        for i in 0..9 {
            for j in 0..9 {
                assert_abs_diff_eq!(h[[i, j]], h[[j, i]], epsilon = 1e-12);
            }
        }
        // Hessian column j is the derivative of the gradient along beta_j.
        let step = 1e-6;
        let mut shifted = beta.clone();
        shifted[4] += step;
        let moved = objective
            .compute(x.view(), y.view(), shifted.view(), false)
            .unwrap();
        for i in 0..9 {
            let fd = (moved.gradient[i] - eval.gradient[i]) / step;
            assert_abs_diff_eq!(h[[i, 4]], fd, epsilon = 1e-4);
        }
    }

    #[test]
    fn cross_entropy_at_zero_is_log_k() {
        let (x, _) = dataset();
        let y = array![0, 1, 2, 3, 0, 1];
        let mut objective = CrossEntropyObjective {
            n_classes: 4,
            fit_intercept: true,
            penalty_l2: 1.,
        };
        let beta = Array1::zeros(12);
        let eval = objective
            .compute(x.view(), y.view(), beta.view(), false)
            .unwrap();
        assert_abs_diff_eq!(eval.value, 4f64.ln(), epsilon = 1e-12);
        assert!(eval.hessian.is_none());
    }

    #[test]
    fn loss_scales_by_sample_count() {
        let (x, y) = dataset();
        let beta = array![0.3, -0.1, 0.2];
        let mut objective = LogisticObjective {
            fit_intercept: true,
            penalty_l2: 0.01,
        };
        let mean = objective
            .compute(x.view(), y.view(), beta.view(), true)
            .unwrap();
        let mut loss = Loss::new(objective, x.view(), y.view(), beta.view(), true);
        assert_abs_diff_eq!(loss.value(beta.view()).unwrap(), mean.value * 6., epsilon = 1e-12);
        let h = loss.hessian(beta.view()).unwrap();
        assert_abs_diff_eq!(h[[1, 2]], mean.hessian.unwrap()[[1, 2]] * 6., epsilon = 1e-12);
    }

    #[test]
    fn non_finite_value_is_an_error() {
        struct Exploding;
        impl Objective for Exploding {
            fn compute(
                &mut self,
                _x: ArrayView2<f64>,
                _y: ArrayView1<usize>,
                beta: ArrayView1<f64>,
                _hessian: bool,
            ) -> Result<Evaluation> {
                Ok(Evaluation {
                    value: f64::NAN,
                    gradient: Array1::zeros(beta.len()),
                    hessian: None,
                })
            }
        }

        let (x, y) = dataset();
        let beta = Array1::zeros(3);
        let mut loss = Loss::new(Exploding, x.view(), y.view(), beta.view(), false);
        assert!(matches!(
            loss.value(beta.view()),
            Err(Error::Numerical { .. })
        ));
    }

    #[test]
    fn non_finite_gradient_is_an_error() {
        struct Overflowing;
        impl Objective for Overflowing {
            fn compute(
                &mut self,
                _x: ArrayView2<f64>,
                _y: ArrayView1<usize>,
                beta: ArrayView1<f64>,
                _hessian: bool,
            ) -> Result<Evaluation> {
                let mut gradient = Array1::zeros(beta.len());
                gradient[1] = f64::INFINITY;
                Ok(Evaluation {
                    value: 1.,
                    gradient,
                    hessian: None,
                })
            }
        }

        let (x, y) = dataset();
        let beta = Array1::zeros(3);
        let mut loss = Loss::new(Overflowing, x.view(), y.view(), beta.view(), false);
        assert!(matches!(
            loss.gradient(beta.view()),
            Err(Error::Numerical { .. })
        ));
        assert!(loss.value(beta.view()).is_err());
        assert_eq!(loss.evaluations(), 2);
    }
}
