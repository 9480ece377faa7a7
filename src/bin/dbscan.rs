use std::ops::{AddAssign, DivAssign};

use anyhow::{Context, Result};
use clap::Parser;
use ndarray::Array2;
use num_traits::{float::FloatCore, FromPrimitive};
use petal_bench::bench::{
    measure_function_time, print_output, BenchArgs, FpType, Params, ResultRow,
};
use petal_bench::data::load_data;
use petal_bench::metrics::{cluster_labels, n_clusters};
use petal_bench::{Dbscan, Fit};
use petal_neighbors::distance::{Euclidean, Metric};
use serde::Serialize;

/// DBSCAN clustering benchmark
#[derive(Debug, Parser)]
struct Cli {
    #[command(flatten)]
    bench: BenchArgs,

    /// Radius of neighborhood of a point
    #[arg(short, long, visible_alias = "epsilon", default_value_t = 10.)]
    eps: f64,

    /// Minimum number of samples in a neighborhood for a point to be a core
    /// point
    #[arg(short, long, default_value_t = 5)]
    min_samples: usize,
}

#[derive(Serialize)]
struct DbscanParams {
    eps: f64,
    min_samples: usize,
    n_clusters: usize,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let params = Params::new(&cli.bench)?;
    let data = load_data(&cli.bench, false).context("failed to load data")?;
    let x = data.x_train;

    let (time, labels) = match params.dtype {
        FpType::Float32 => {
            let eps = cli.eps as f32;
            cluster(&x.mapv(|v| v as f32), eps, cli.min_samples, &params)
        }
        FpType::Float64 => cluster(&x, cli.eps, cli.min_samples, &params),
    };
    let n_clusters = n_clusters(&labels);
    log::info!(
        "{} clusters, {} outliers",
        n_clusters,
        labels.iter().filter(|&&l| l < 0).count()
    );

    let rows = [ResultRow {
        function: "DBSCAN".to_string(),
        stage: "training",
        rows: x.nrows(),
        columns: x.ncols(),
        extra: vec![("n_clusters", n_clusters.to_string())],
        metric: None,
        time,
    }];
    let algorithm_parameters = DbscanParams {
        eps: cli.eps,
        min_samples: cli.min_samples,
        n_clusters,
    };
    print_output(&params, "dbscan", &rows, &algorithm_parameters)?;
    Ok(())
}

/// Times DBSCAN on `x` and returns the per-point labels of the last run.
fn cluster<A>(x: &Array2<A>, eps: A, min_samples: usize, params: &Params) -> (f64, Vec<isize>)
where
    A: AddAssign + DivAssign + FloatCore + FromPrimitive + Sync + Send,
    Euclidean: Metric<A>,
{
    let mut model = Dbscan::new(eps, min_samples, Euclidean::default());
    let (time, (clusters, _outliers)) = measure_function_time(|| model.fit(x, None), params);
    (time, cluster_labels(x.nrows(), &clusters))
}
