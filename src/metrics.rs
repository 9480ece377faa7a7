use std::collections::HashMap;

use itertools::Itertools;

use crate::{Error, Result};

/// Label assigned to points that belong to no cluster.
pub const NOISE: isize = -1;

/// Flattens a cluster map into one label per point; unassigned points get
/// [`NOISE`].
#[must_use]
pub fn cluster_labels(n_samples: usize, clusters: &HashMap<usize, Vec<usize>>) -> Vec<isize> {
    let mut labels = vec![NOISE; n_samples];
    for (&cid, members) in clusters {
        let cid = isize::try_from(cid).expect("cluster id fits in isize");
        for &idx in members {
            labels[idx] = cid;
        }
    }
    labels
}

/// Number of distinct labels, not counting [`NOISE`].
#[must_use]
pub fn n_clusters(labels: &[isize]) -> usize {
    labels.iter().filter(|&&l| l != NOISE).unique().count()
}

/// Fraction of predictions equal to the ground truth; 0 for empty input.
pub fn accuracy_score<T: PartialEq>(pred: &[T], truth: &[T]) -> Result<f64> {
    if pred.len() != truth.len() {
        return Err(Error::InvalidInput {
            context: format!("{} predictions but {} labels", pred.len(), truth.len()),
        });
    }
    if pred.is_empty() {
        return Ok(0.);
    }
    let correct = pred.iter().zip(truth).filter(|(p, t)| p == t).count();
    Ok(correct as f64 / pred.len() as f64)
}

#[cfg(test)]
mod test {
    use super::*;
    use maplit::hashmap;

    #[test]
    fn n_clusters_excludes_noise() {
        assert_eq!(n_clusters(&[0, 0, 1, -1, 2, -1]), 3);
        assert_eq!(n_clusters(&[0, 0, 1, 2]), 3);
        assert_eq!(n_clusters(&[-1, -1]), 0);
        assert_eq!(n_clusters(&[]), 0);
    }

    #[test]
    fn n_clusters_distinct_minus_noise() {
        let cases: [&[isize]; 4] = [&[3, 1, 1, -1], &[5, 5, 5], &[-1], &[0, 1, 2, 3, -1, 4]];
        for labels in cases {
            let distinct = labels.iter().unique().count();
            let expected = if labels.contains(&NOISE) {
                distinct - 1
            } else {
                distinct
            };
            assert_eq!(n_clusters(labels), expected);
        }
    }

    #[test]
    fn labels_from_clusters() {
        let clusters = hashmap! {0 => vec![0, 2], 1 => vec![3]};
        assert_eq!(cluster_labels(5, &clusters), [0, -1, 0, 1, -1]);
    }

    #[test]
    fn accuracy() {
        assert_eq!(accuracy_score(&[0, 1, 1, 0], &[0, 1, 0, 0]).unwrap(), 0.75);
        assert_eq!(accuracy_score::<usize>(&[], &[]).unwrap(), 0.);
    }

    #[test]
    fn accuracy_length_mismatch() {
        assert!(matches!(
            accuracy_score(&[0, 1], &[0]),
            Err(Error::InvalidInput { .. })
        ));
    }
}
