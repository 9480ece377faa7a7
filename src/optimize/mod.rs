//! Unconstrained minimization of smooth objectives.
//!
//! - [`lbfgs`]: limited-memory BFGS, gradient only.
//! - [`newton_cg`]: truncated Newton, needs the Hessian.
//!
//! Both drive a [`Problem`], which hands out the value, gradient and
//! Hessian at a point. Implementations are free to cache: the minimizers
//! always ask for the value before the gradient at a new point.

mod lbfgs;
mod newton_cg;

use ndarray::{Array1, Array2, ArrayView1};

use crate::{Error, Result};

pub use lbfgs::{lbfgs, LbfgsOptions};
pub use newton_cg::{newton_cg, NewtonCgOptions};

/// A twice-differentiable function of a parameter vector.
pub trait Problem {
    fn value(&mut self, x: ArrayView1<f64>) -> Result<f64>;

    fn gradient(&mut self, x: ArrayView1<f64>) -> Result<Array1<f64>>;

    fn hessian(&mut self, _x: ArrayView1<f64>) -> Result<Array2<f64>> {
        Err(Error::HessianNotConfigured)
    }
}

/// Result of a minimization run.
#[derive(Debug, Clone)]
pub struct MinimizeResult {
    /// Solution vector.
    pub x: Array1<f64>,
    /// Function value at `x`.
    pub fun: f64,
    pub iterations: usize,
    /// Number of function evaluations requested.
    pub nfev: usize,
    pub converged: bool,
}

// Armijo constant and step shrink factor of the backtracking line search.
const ARMIJO_C: f64 = 1e-4;
const SHRINK: f64 = 0.5;
const MAX_LINE_SEARCH: usize = 50;

/// Backtracking line search with the Armijo sufficient-decrease condition.
///
/// Returns the accepted point, its value and the number of evaluations, or
/// `None` when no step along `p` decreases the function enough.
fn backtracking_line_search<P>(
    problem: &mut P,
    x: &Array1<f64>,
    p: &Array1<f64>,
    fx: f64,
    slope: f64,
    mut alpha: f64,
) -> Result<(Option<(Array1<f64>, f64)>, usize)>
where
    P: Problem + ?Sized,
{
    for tries in 0..MAX_LINE_SEARCH {
        let mut x_new = x.clone();
        x_new.scaled_add(alpha, p);
        let fx_new = problem.value(x_new.view())?;
        if fx_new <= fx + ARMIJO_C * alpha * slope {
            return Ok((Some((x_new, fx_new)), tries + 1));
        }
        alpha *= SHRINK;
    }
    Ok((None, MAX_LINE_SEARCH))
}

fn check_start(x0: ArrayView1<f64>, context: &str) -> Result<()> {
    if x0.is_empty() {
        return Err(Error::InvalidInput {
            context: format!("{}: empty initial guess", context),
        });
    }
    Ok(())
}

fn check_gradient(grad: &Array1<f64>, context: &str) -> Result<()> {
    if grad.iter().all(|g| g.is_finite()) {
        Ok(())
    } else {
        Err(Error::Numerical {
            message: format!("{}: non-finite gradient", context),
        })
    }
}
