mod dbscan;
mod logistic;

use crate::dbscan::{
    build as dbscan_build, fixed_clusters as dbscan_fixed_clusters,
    uniform_clusters as dbscan_uniform_clusters,
};
use crate::logistic::{binary as logistic_binary, multinomial as logistic_multinomial};
use criterion::{criterion_group, criterion_main, Criterion};

criterion_group! {
name = benches;
config = Criterion::default()
    .sample_size(20)
    .measurement_time(std::time::Duration::new(30, 0));
targets = dbscan_build, dbscan_uniform_clusters, dbscan_fixed_clusters,
    logistic_binary, logistic_multinomial}

criterion_main!(benches);
