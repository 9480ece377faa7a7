use std::collections::VecDeque;

use log::{debug, info, warn};
use ndarray::{Array1, ArrayView1};

use super::{
    backtracking_line_search, check_gradient, check_start, MinimizeResult, Problem,
};
use crate::{Error, Result};

// Pairs with a smaller curvature yᵀs would break positive definiteness.
const CURVATURE_THRESHOLD: f64 = 1e-10;

/// Options for [`lbfgs`].
#[derive(Debug, Clone)]
pub struct LbfgsOptions {
    pub max_iter: usize,
    /// Stop once the largest gradient component is at most this.
    pub gtol: f64,
    /// Stop once `(f_k - f_{k+1}) / max(|f_k|, |f_{k+1}|, 1)` is at most this.
    pub ftol: f64,
    /// Number of correction pairs to store.
    pub m: usize,
}

impl Default for LbfgsOptions {
    fn default() -> Self {
        Self {
            max_iter: 15000,
            gtol: 1e-5,
            ftol: 2.220_446_049_250_313e-9,
            m: 10,
        }
    }
}

/// Minimizes `problem` starting from `x0`.
///
/// Running out of iterations or failing a line search is not an error; the
/// returned result then has `converged == false`.
pub fn lbfgs<P>(
    problem: &mut P,
    x0: ArrayView1<f64>,
    options: &LbfgsOptions,
) -> Result<MinimizeResult>
where
    P: Problem + ?Sized,
{
    check_start(x0, "lbfgs")?;
    if options.m == 0 {
        return Err(Error::InvalidInput {
            context: "lbfgs: history size m must be > 0".to_string(),
        });
    }

    let mut x = x0.to_owned();
    let mut fx = problem.value(x.view())?;
    let mut grad = problem.gradient(x.view())?;
    check_gradient(&grad, "lbfgs")?;
    let mut nfev = 1;
    let mut history: VecDeque<(Array1<f64>, Array1<f64>, f64)> =
        VecDeque::with_capacity(options.m);

    for iter in 0..options.max_iter {
        if max_abs(&grad) <= options.gtol {
            info!("lbfgs converged (gradient) after {} iterations", iter);
            return Ok(MinimizeResult {
                x,
                fun: fx,
                iterations: iter,
                nfev,
                converged: true,
            });
        }

        let mut p = two_loop_recursion(&grad, &history);
        let mut slope = grad.dot(&p);
        if slope >= 0. {
            // The history no longer yields a descent direction.
            history.clear();
            p = -&grad;
            slope = -grad.dot(&grad);
        }
        let step = if history.is_empty() {
            (1. / grad.dot(&grad).sqrt()).min(1.)
        } else {
            1.
        };

        let (accepted, evals) = backtracking_line_search(problem, &x, &p, fx, slope, step)?;
        nfev += evals;
        let Some((x_new, fx_new)) = accepted else {
            warn!("lbfgs: line search failed at iteration {}", iter);
            return Ok(MinimizeResult {
                x,
                fun: fx,
                iterations: iter,
                nfev,
                converged: false,
            });
        };

        let grad_new = problem.gradient(x_new.view())?;
        check_gradient(&grad_new, "lbfgs")?;
        let s = &x_new - &x;
        let y = &grad_new - &grad;
        let ys = y.dot(&s);
        if ys > CURVATURE_THRESHOLD {
            if history.len() == options.m {
                history.pop_front();
            }
            history.push_back((s, y, 1. / ys));
        }

        let reduction = (fx - fx_new) / fx.abs().max(fx_new.abs()).max(1.);
        debug!("lbfgs iteration {}: f = {:e}", iter + 1, fx_new);
        x = x_new;
        fx = fx_new;
        grad = grad_new;

        if reduction <= options.ftol {
            info!("lbfgs converged (function) after {} iterations", iter + 1);
            return Ok(MinimizeResult {
                x,
                fun: fx,
                iterations: iter + 1,
                nfev,
                converged: true,
            });
        }
    }

    let converged = max_abs(&grad) <= options.gtol;
    if !converged {
        warn!(
            "lbfgs did not converge within {} iterations",
            options.max_iter
        );
    }
    Ok(MinimizeResult {
        x,
        fun: fx,
        iterations: options.max_iter,
        nfev,
        converged,
    })
}

/// Applies the implicit inverse Hessian approximation to `grad` and returns
/// the search direction `-H·grad`.
fn two_loop_recursion(
    grad: &Array1<f64>,
    history: &VecDeque<(Array1<f64>, Array1<f64>, f64)>,
) -> Array1<f64> {
    let mut q = grad.clone();
    let mut alphas = Vec::with_capacity(history.len());
    for (s, y, rho) in history.iter().rev() {
        let alpha = rho * s.dot(&q);
        q.scaled_add(-alpha, y);
        alphas.push(alpha);
    }
    if let Some((s, y, _)) = history.back() {
        q *= s.dot(y) / y.dot(y);
    }
    for ((s, y, rho), alpha) in history.iter().zip(alphas.iter().rev()) {
        let beta = rho * y.dot(&q);
        q.scaled_add(alpha - beta, s);
    }
    -q
}

fn max_abs(v: &Array1<f64>) -> f64 {
    v.fold(0., |m, &x| m.max(x.abs()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::optimize::test::{quadratic, Rosenbrock};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn quadratic_minimum() {
        let mut problem = quadratic();
        let options = LbfgsOptions {
            gtol: 1e-8,
            ftol: 0.,
            ..LbfgsOptions::default()
        };
        let result = lbfgs(&mut problem, Array1::<f64>::zeros(3).view(), &options).unwrap();
        assert!(result.converged);
        for (x, c) in result.x.iter().zip(&problem.center) {
            assert_abs_diff_eq!(x, c, epsilon = 1e-6);
        }
    }

    #[test]
    fn rosenbrock() {
        let options = LbfgsOptions {
            max_iter: 2000,
            gtol: 1e-5,
            ftol: 0.,
            ..LbfgsOptions::default()
        };
        let result = lbfgs(&mut Rosenbrock, array![-1.2, 1.].view(), &options).unwrap();
        assert!(result.converged);
        assert_abs_diff_eq!(result.x[0], 1., epsilon = 1e-3);
        assert_abs_diff_eq!(result.x[1], 1., epsilon = 1e-3);
    }

    #[test]
    fn starts_at_minimum() {
        let mut problem = quadratic();
        let x0 = problem.center.clone();
        let result = lbfgs(&mut problem, x0.view(), &LbfgsOptions::default()).unwrap();
        assert!(result.converged);
        assert_eq!(result.iterations, 0);
        assert_eq!(result.x, x0);
    }

    #[test]
    fn iteration_limit() {
        let options = LbfgsOptions {
            max_iter: 2,
            ftol: 0.,
            gtol: 1e-12,
            ..LbfgsOptions::default()
        };
        let result = lbfgs(&mut Rosenbrock, array![-1.2, 1.].view(), &options).unwrap();
        assert!(!result.converged);
        assert_eq!(result.iterations, 2);
    }

    #[test]
    fn invalid_start() {
        let mut problem = quadratic();
        let empty = Array1::<f64>::zeros(0);
        assert!(lbfgs(&mut problem, empty.view(), &LbfgsOptions::default()).is_err());

        let options = LbfgsOptions {
            m: 0,
            ..LbfgsOptions::default()
        };
        assert!(lbfgs(&mut problem, Array1::<f64>::zeros(3).view(), &options).is_err());
    }
}
