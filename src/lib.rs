pub mod bench;
pub mod data;
mod dbscan;
mod error;
pub mod logistic;
pub mod loss;
pub mod metrics;
pub mod optimize;

pub use dbscan::Dbscan;
pub use error::{Error, Result};
pub use logistic::{LogisticFit, LogisticRegression, Multiclass, Solver};

/// Trains a model on `input`. `params` carries whatever extra information
/// the model needs beyond the samples, e.g. target labels.
pub trait Fit<I, L, O>
where
    I: ?Sized,
{
    fn fit(&mut self, input: &I, params: Option<&L>) -> O;
}

pub trait Predict<I, O>
where
    I: ?Sized,
{
    fn predict(&mut self, input: &I) -> O;
}
