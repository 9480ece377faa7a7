use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use petal_bench::bench::{print_output, try_measure_function_time, BenchArgs, Params, ResultRow};
use petal_bench::data::load_data;
use petal_bench::metrics::accuracy_score;
use petal_bench::{Error, Fit, LogisticRegression, Multiclass, Predict, Solver};
use serde::Serialize;

/// Logistic regression benchmark
#[derive(Debug, Parser)]
struct Cli {
    #[command(flatten)]
    bench: BenchArgs,

    /// Don't fit intercept
    #[arg(long = "no-fit-intercept", action = ArgAction::SetFalse)]
    fit_intercept: bool,

    #[arg(long, value_enum, default_value_t = Solver::Lbfgs)]
    solver: Solver,

    /// Maximum iterations for the iterative solver
    #[arg(long, default_value_t = 100)]
    maxiter: usize,

    /// Regularization parameter
    #[arg(short = 'C', default_value_t = 1.)]
    c: f64,

    /// Tolerance for solver; 1e-3 for newton-cg and 1e-10 for lbfgs when
    /// omitted
    #[arg(long)]
    tol: Option<f64>,
}

#[derive(Serialize)]
struct LogRegParams {
    #[serde(rename = "C")]
    c: f64,
    fit_intercept: bool,
    tol: f64,
    maxiter: usize,
    solver: Solver,
    multiclass: Multiclass,
    n_classes: usize,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let params = Params::new(&cli.bench)?;
    let data = load_data(&cli.bench, true).context("failed to load data")?;
    let y_train = data.y_train.as_ref().ok_or(Error::MissingLabels)?;
    let y_test = data.y_test.as_ref().ok_or(Error::MissingLabels)?;

    let tol = cli.tol.unwrap_or_else(|| cli.solver.default_tol());
    let mut model =
        LogisticRegression::new(cli.c, cli.fit_intercept, tol, cli.maxiter, cli.solver);

    let (fit_time, fit) =
        try_measure_function_time(|| model.fit(&data.x_train, Some(y_train)), &params)?;
    let y_pred = fit.predict_classes(data.x_train.view());
    let train_acc = 100. * accuracy_score(&y_pred.to_vec(), &y_train.to_vec())?;

    let (predict_time, prob) =
        try_measure_function_time(|| model.predict(&data.x_test), &params)?;
    let y_pred = fit.decode(prob.view());
    let test_acc = 100. * accuracy_score(&y_pred.to_vec(), &y_test.to_vec())?;

    let extra = |acc: f64| {
        vec![
            ("solver", cli.solver.to_string()),
            ("C", cli.c.to_string()),
            ("multiclass", fit.multiclass.to_string()),
            ("n_classes", fit.n_classes.to_string()),
            ("accuracy", format!("{:.6}", acc)),
        ]
    };
    let rows = [
        ResultRow {
            function: "LogReg.fit".to_string(),
            stage: "training",
            rows: data.x_train.nrows(),
            columns: data.x_train.ncols(),
            extra: extra(train_acc),
            metric: Some(("accuracy[%]", train_acc)),
            time: fit_time,
        },
        ResultRow {
            function: "LogReg.predict".to_string(),
            stage: "prediction",
            rows: data.x_test.nrows(),
            columns: data.x_test.ncols(),
            extra: extra(test_acc),
            metric: Some(("accuracy[%]", test_acc)),
            time: predict_time,
        },
    ];
    let algorithm_parameters = LogRegParams {
        c: cli.c,
        fit_intercept: cli.fit_intercept,
        tol,
        maxiter: cli.maxiter,
        solver: cli.solver,
        multiclass: fit.multiclass,
        n_classes: fit.n_classes,
    };
    print_output(&params, "logistic_regression", &rows, &algorithm_parameters)?;

    if params.verbose {
        let coef: Vec<Vec<f64>> = fit.coef.rows().into_iter().map(|r| r.to_vec()).collect();
        println!();
        println!("@ Number of iterations: {}", fit.iterations);
        println!("@ fit coefficients:");
        println!("@ {:?}", coef);
        println!("@ fit intercept:");
        println!("@ {:?}", fit.intercept.to_vec());
    }
    Ok(())
}
