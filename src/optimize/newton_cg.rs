use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayView1};

use super::{
    backtracking_line_search, check_gradient, check_start, MinimizeResult, Problem,
};
use crate::Result;

/// Options for [`newton_cg`].
#[derive(Debug, Clone)]
pub struct NewtonCgOptions {
    pub max_iter: usize,
    /// Stop once the mean absolute update is at most this.
    pub xtol: f64,
    /// Inner CG iteration cap; `None` means `20 * len(x)`.
    pub max_cg_iter: Option<usize>,
}

impl Default for NewtonCgOptions {
    fn default() -> Self {
        Self {
            max_iter: 100,
            xtol: 1e-5,
            max_cg_iter: None,
        }
    }
}

/// Truncated Newton: each step solves `H·p = -∇f` approximately with
/// conjugate gradients, then backtracks along `p`.
pub fn newton_cg<P>(
    problem: &mut P,
    x0: ArrayView1<f64>,
    options: &NewtonCgOptions,
) -> Result<MinimizeResult>
where
    P: Problem + ?Sized,
{
    check_start(x0, "newton_cg")?;
    let n = x0.len();
    let xtol = options.xtol * n as f64;
    let max_cg_iter = options.max_cg_iter.unwrap_or(20 * n);

    let mut x = x0.to_owned();
    let mut fx = problem.value(x.view())?;
    let mut grad = problem.gradient(x.view())?;
    check_gradient(&grad, "newton_cg")?;
    let mut nfev = 1;

    for iter in 0..options.max_iter {
        let maggrad = grad.mapv(f64::abs).sum();
        if maggrad == 0. {
            info!("newton_cg: zero gradient after {} iterations", iter);
            return Ok(MinimizeResult {
                x,
                fun: fx,
                iterations: iter,
                nfev,
                converged: true,
            });
        }

        let hess = problem.hessian(x.view())?;
        let tol = 0.5_f64.min(maggrad.sqrt()) * maggrad;
        let p = truncated_cg(&hess, &grad, tol, max_cg_iter);
        let slope = grad.dot(&p);

        let (accepted, evals) = backtracking_line_search(problem, &x, &p, fx, slope, 1.)?;
        nfev += evals;
        let Some((x_new, fx_new)) = accepted else {
            warn!("newton_cg: line search failed at iteration {}", iter);
            return Ok(MinimizeResult {
                x,
                fun: fx,
                iterations: iter,
                nfev,
                converged: false,
            });
        };

        let update = (&x_new - &x).mapv(f64::abs).sum();
        grad = problem.gradient(x_new.view())?;
        check_gradient(&grad, "newton_cg")?;
        debug!("newton_cg iteration {}: f = {:e}", iter + 1, fx_new);
        x = x_new;
        fx = fx_new;

        if update <= xtol {
            info!("newton_cg converged after {} iterations", iter + 1);
            return Ok(MinimizeResult {
                x,
                fun: fx,
                iterations: iter + 1,
                nfev,
                converged: true,
            });
        }
    }

    warn!(
        "newton_cg did not converge within {} iterations",
        options.max_iter
    );
    Ok(MinimizeResult {
        x,
        fun: fx,
        iterations: options.max_iter,
        nfev,
        converged: false,
    })
}

/// Conjugate gradients on `hess·p = -grad`, truncated once the residual's
/// 1-norm drops to `tol` or curvature turns non-positive.
fn truncated_cg(hess: &Array2<f64>, grad: &Array1<f64>, tol: f64, max_iter: usize) -> Array1<f64> {
    let mut p = Array1::zeros(grad.len());
    let mut residual = grad.clone();
    let mut direction = -grad;
    let mut rr = residual.dot(&residual);

    for i in 0..max_iter {
        if residual.mapv(f64::abs).sum() <= tol {
            break;
        }
        let hd = hess.dot(&direction);
        let curvature = direction.dot(&hd);
        if curvature <= 0. {
            if i == 0 {
                // Fall back to steepest descent.
                return -grad;
            }
            break;
        }
        let alpha = rr / curvature;
        p.scaled_add(alpha, &direction);
        residual.scaled_add(alpha, &hd);
        let rr_next = residual.dot(&residual);
        direction = &direction * (rr_next / rr) - &residual;
        rr = rr_next;
    }
    p
}
