use criterion::{black_box, Criterion};
use petal_bench::data::{make_blobs, CenterConfig, DEFAULT_CENTER_BOX};
use petal_bench::{Fit, LogisticRegression, Solver};

pub(crate) fn binary(c: &mut Criterion) {
    let n = black_box(10_000);
    let dim = black_box(10);

    let (x, y) = make_blobs(n, dim, Some(CenterConfig::Random(2, DEFAULT_CENTER_BOX)), Some(4.), 1)
        .unwrap();
    for solver in [Solver::Lbfgs, Solver::NewtonCg] {
        c.bench_function(&format!("logistic_binary_{}", solver), |b| {
            b.iter(|| {
                let mut model = LogisticRegression::new(1., true, solver.default_tol(), 100, solver);
                model.fit(&x, Some(&y)).unwrap();
            })
        });
    }
}

pub(crate) fn multinomial(c: &mut Criterion) {
    let n = black_box(10_000);
    let dim = black_box(10);

    let (x, y) = make_blobs(n, dim, Some(CenterConfig::Random(5, DEFAULT_CENTER_BOX)), Some(4.), 1)
        .unwrap();
    for solver in [Solver::Lbfgs, Solver::NewtonCg] {
        c.bench_function(&format!("logistic_multinomial_{}", solver), |b| {
            b.iter(|| {
                let mut model = LogisticRegression::new(1., true, solver.default_tol(), 100, solver);
                model.fit(&x, Some(&y)).unwrap();
            })
        });
    }
}
