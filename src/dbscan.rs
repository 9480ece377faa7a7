use std::collections::{HashMap, HashSet};
use std::ops::{AddAssign, DivAssign};

use ndarray::{ArrayBase, Data, Ix2};
use num_traits::{float::FloatCore, FromPrimitive};
use petal_neighbors::distance::{Euclidean, Metric};
use petal_neighbors::BallTree;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::Fit;

/// DBSCAN (density-based spatial clustering of applications with noise)
/// clustering algorithm.
///
/// # Examples
///
/// ```
/// use ndarray::array;
/// use petal_neighbors::distance::Euclidean;
/// use petal_bench::{Dbscan, Fit};
///
/// let points = array![[1., 2.], [2., 2.], [2., 2.3], [8., 7.], [8., 8.], [25., 80.]];
/// let (clusters, outliers) = Dbscan::new(3.0, 2, Euclidean::default()).fit(&points, None);
/// assert_eq!(clusters.len(), 2);   // two clusters found
/// assert_eq!(clusters[&0], [0, 1, 2]); // the first three points in Cluster 0
/// assert_eq!(clusters[&1], [3, 4]);    // [8., 7.] and [8., 8.] in Cluster 1
/// assert_eq!(outliers, [5]);           // [25., 80.] doesn't belong to any cluster
/// ```
#[derive(Debug, Deserialize, Serialize)]
pub struct Dbscan<A, M> {
    /// The radius of a neighborhood.
    pub eps: A,

    /// The minimum number of points required to form a dense region.
    pub min_samples: usize,
    pub metric: M,
}

impl<A> Default for Dbscan<A, Euclidean>
where
    A: FloatCore,
{
    fn default() -> Self {
        Self {
            eps: A::one() / (A::one() + A::one()),
            min_samples: 5,
            metric: Euclidean::default(),
        }
    }
}

impl<A, M> Dbscan<A, M> {
    #[must_use]
    pub fn new(eps: A, min_samples: usize, metric: M) -> Self {
        Self {
            eps,
            min_samples,
            metric,
        }
    }
}

impl<S, A, M> Fit<ArrayBase<S, Ix2>, (), (HashMap<usize, Vec<usize>>, Vec<usize>)>
    for Dbscan<A, M>
where
    A: AddAssign + DivAssign + FloatCore + FromPrimitive + Sync + Send,
    S: Data<Elem = A>,
    M: Metric<A> + Clone + Sync + Send,
{
    fn fit(
        &mut self,
        input: &ArrayBase<S, Ix2>,
        _: Option<&()>,
    ) -> (HashMap<usize, Vec<usize>>, Vec<usize>) {
        // BallTree does not accept an empty input.
        if input.is_empty() {
            return (HashMap::new(), Vec::new());
        }

        let neighborhoods = build_neighborhoods(input, self.eps, self.metric.clone());
        let mut visited = vec![false; input.nrows()];
        let mut clusters = HashMap::new();
        for (idx, neighbors) in neighborhoods.iter().enumerate() {
            if visited[idx] || neighbors.len() < self.min_samples {
                continue;
            }

            let mut cluster = Vec::new();
            expand_cluster(
                &mut cluster,
                &mut visited,
                idx,
                self.min_samples,
                &neighborhoods,
            );
            cluster.sort_unstable();
            clusters.insert(clusters.len(), cluster);
        }

        let in_cluster: HashSet<usize> = clusters.values().flatten().copied().collect();
        let outliers = (0..input.nrows())
            .filter(|x| !in_cluster.contains(x))
            .collect();

        (clusters, outliers)
    }
}

fn build_neighborhoods<S, A, M>(input: &ArrayBase<S, Ix2>, eps: A, metric: M) -> Vec<Vec<usize>>
where
    A: AddAssign + DivAssign + FloatCore + FromPrimitive + Sync + Send,
    S: Data<Elem = A>,
    M: Metric<A> + Sync + Send,
{
    let input = input.as_standard_layout();
    let db = BallTree::new(input.view(), metric).expect("non-empty array");
    let rows: Vec<_> = input.rows().into_iter().collect();
    rows.into_par_iter()
        .map(|p| db.query_radius(&p, eps).into_iter().collect::<Vec<usize>>())
        .collect()
}

fn expand_cluster(
    cluster: &mut Vec<usize>,
    visited: &mut [bool],
    idx: usize,
    min_samples: usize,
    neighborhoods: &[Vec<usize>],
) {
    let mut to_visit = vec![idx];
    while let Some(cur) = to_visit.pop() {
        if visited[cur] {
            continue;
        }
        visited[cur] = true;
        cluster.push(cur);
        if neighborhoods[cur].len() >= min_samples {
            to_visit.extend(neighborhoods[cur].iter().filter(|&n| !visited[*n]));
        }
    }
}
