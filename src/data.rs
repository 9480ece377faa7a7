use std::fs::File;
use std::io::Read;
use std::path::Path;

use itertools::Itertools;
use log::debug;
use ndarray::{concatenate, s, Array1, Array2, ArrayView, ArrayView1, Axis};
use ndarray_rand::rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use ndarray_rand::rand_distr::{Distribution, Normal, Uniform};

use crate::bench::{BenchArgs, FpType};
use crate::{Error, Result};

const DEFAULT_CLUSTER_STD: f64 = 1.0;
const DEFAULT_N_CENTERS: usize = 3;
pub const DEFAULT_CENTER_BOX: (f64, f64) = (-10., 10.);

/// Features and encoded labels of one benchmark run.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub x_train: Array2<f64>,
    pub x_test: Array2<f64>,
    pub y_train: Option<Array1<usize>>,
    pub y_test: Option<Array1<usize>>,
}

impl Dataset {
    /// Number of distinct classes in the training labels.
    #[must_use]
    pub fn n_classes(&self) -> usize {
        self.y_train
            .as_ref()
            .map_or(0, |y| y.iter().unique().count())
    }
}

/// Where blob centers come from.
pub enum CenterConfig {
    Fixed(Array2<f64>),
    /// Number of centers and the box their coordinates are drawn from.
    Random(usize, (f64, f64)),
}

impl Default for CenterConfig {
    fn default() -> Self {
        Self::Random(DEFAULT_N_CENTERS, DEFAULT_CENTER_BOX)
    }
}

/// Isotropic Gaussian blobs.
///
/// Samples are spread over the centers as evenly as possible (the first
/// centers get one more when `n_samples` does not divide) and returned in
/// random order, together with the index of the blob each came from.
pub fn make_blobs(
    n_samples: usize,
    n_features: usize,
    center_config: Option<CenterConfig>,
    cluster_std: Option<f64>,
    seed: u64,
) -> Result<(Array2<f64>, Array1<usize>)> {
    let cluster_std = cluster_std.unwrap_or(DEFAULT_CLUSTER_STD);
    let mut rng = StdRng::seed_from_u64(seed);

    let centers = match center_config.unwrap_or_default() {
        CenterConfig::Fixed(centers) => {
            if centers.ncols() != n_features {
                return Err(Error::InvalidInput {
                    context: format!(
                        "centers have {} features, expected {}",
                        centers.ncols(),
                        n_features
                    ),
                });
            }
            centers
        }
        CenterConfig::Random(n_centers, center_box) => {
            uniform_centers(n_centers, n_features, center_box, &mut rng)?
        }
    };
    if centers.nrows() == 0 {
        return Err(Error::InvalidInput {
            context: "at least one center is required".to_string(),
        });
    }

    let n_centers = centers.nrows();
    let mut data = Vec::with_capacity(n_centers);
    let mut labels = Vec::with_capacity(n_samples);
    for (label, center) in centers.rows().into_iter().enumerate() {
        let size = n_samples / n_centers + usize::from(label < n_samples % n_centers);
        data.push((size, make_a_blob(center, size, cluster_std, &mut rng)?));
        labels.extend(std::iter::repeat(label).take(size));
    }
    let blobs = data
        .iter()
        .map(|(size, blob)| {
            ArrayView::from_shape((n_features, *size), blob.as_slice())
                .map(|blob| blob.reversed_axes())
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let x = concatenate(Axis(0), &blobs)?;

    let mut order: Vec<usize> = (0..x.nrows()).collect();
    order.shuffle(&mut rng);
    let labels = Array1::from(labels);
    Ok((x.select(Axis(0), &order), labels.select(Axis(0), &order)))
}

/// Draws `n_samples` points around `center`, column-major
/// (`n_features * n_samples`).
fn make_a_blob<R: Rng>(
    center: ArrayView1<f64>,
    n_samples: usize,
    std_dev: f64,
    rng: &mut R,
) -> Result<Vec<f64>> {
    let mut data = Vec::with_capacity(center.len() * n_samples);
    for &c in center {
        let norm = Normal::new(c, std_dev).map_err(|e| Error::InvalidInput {
            context: format!("cluster std {}: {}", std_dev, e),
        })?;
        data.extend(norm.sample_iter(&mut *rng).take(n_samples));
    }
    Ok(data)
}

/// `n_centers` points drawn uniformly from `center_box` in every dimension.
fn uniform_centers<R: Rng>(
    n_centers: usize,
    n_features: usize,
    center_box: (f64, f64),
    rng: &mut R,
) -> Result<Array2<f64>> {
    let (low, high) = center_box;
    if !(low < high) {
        return Err(Error::InvalidInput {
            context: format!("empty center box [{}, {})", low, high),
        });
    }
    let between = Uniform::new(low, high);
    let data = between
        .sample_iter(rng)
        .take(n_centers * n_features)
        .collect();
    Ok(Array2::from_shape_vec((n_centers, n_features), data)?)
}

/// Reads a headerless, comma-separated matrix of `f64`.
pub fn read_matrix<R: Read>(reader: R) -> Result<Array2<f64>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(reader);
    let mut nfeatures = 0;
    let mut data = Vec::new();
    for (line, record) in rdr.deserialize().enumerate() {
        let row: Vec<f64> = record?;
        if line == 0 {
            nfeatures = row.len();
        } else if row.len() != nfeatures {
            return Err(Error::InvalidInput {
                context: format!(
                    "row {} has {} values, expected {}",
                    line + 1,
                    row.len(),
                    nfeatures
                ),
            });
        }
        data.extend(row);
    }
    let nevents = if nfeatures == 0 { 0 } else { data.len() / nfeatures };
    Ok(Array2::from_shape_vec((nevents, nfeatures), data)?)
}

pub fn read_matrix_file<P: AsRef<Path>>(path: P) -> Result<Array2<f64>> {
    let file = File::open(path.as_ref())?;
    let x = read_matrix(file)?;
    debug!("read {:?} from {}", x.dim(), path.as_ref().display());
    Ok(x)
}

/// Reads a label file: one value per row.
pub fn read_labels_file<P: AsRef<Path>>(path: P) -> Result<Array1<f64>> {
    let y = read_matrix_file(path)?;
    if y.ncols() > 1 {
        return Err(Error::InvalidInput {
            context: format!("labels must be a single column, found {}", y.ncols()),
        });
    }
    Ok(y.iter().copied().collect())
}

/// Maps raw label values to class indices `0..n_classes`.
///
/// Values are rounded to integers first; classes are numbered in ascending
/// order over the union of both vectors.
pub fn encode_labels(
    train: ArrayView1<f64>,
    test: Option<ArrayView1<f64>>,
) -> Result<(Array1<usize>, Option<Array1<usize>>)> {
    let to_class = |v: &f64| {
        if v.is_finite() {
            Ok(v.round() as i64)
        } else {
            Err(Error::InvalidInput {
                context: format!("label {} is not a finite number", v),
            })
        }
    };
    let train = train.iter().map(to_class).collect::<Result<Vec<_>>>()?;
    let test = test
        .map(|y| y.iter().map(to_class).collect::<Result<Vec<_>>>())
        .transpose()?;

    let classes: Vec<i64> = train
        .iter()
        .chain(test.iter().flatten())
        .copied()
        .sorted_unstable()
        .dedup()
        .collect();
    let encode = |raw: Vec<i64>| -> Array1<usize> {
        raw.iter()
            .map(|v| classes.binary_search(v).unwrap_or_default())
            .collect()
    };
    Ok((encode(train), test.map(encode)))
}

/// Splits rows into `(train, test)`, the last `ceil(test_size * n)` rows
/// going to the test part.
pub fn train_test_split(
    x: &Array2<f64>,
    y: &Array1<usize>,
    test_size: f64,
) -> Result<Dataset> {
    if !(0. ..1.).contains(&test_size) {
        return Err(Error::InvalidInput {
            context: format!("test size {} is outside [0, 1)", test_size),
        });
    }
    let n_test = (test_size * x.nrows() as f64).ceil() as usize;
    let n_train = x.nrows() - n_test;
    Ok(Dataset {
        x_train: x.slice(s![..n_train, ..]).to_owned(),
        x_test: x.slice(s![n_train.., ..]).to_owned(),
        y_train: Some(y.slice(s![..n_train]).to_owned()),
        y_test: Some(y.slice(s![n_train..]).to_owned()),
    })
}

/// Rounds every value to the nearest `f32`.
pub fn round_to_f32(x: &mut Array2<f64>) {
    x.mapv_inplace(|v| f64::from(v as f32));
}

/// Loads files named in `args`, or generates blobs when no training file is
/// given. With `labeled == false` labels are neither read nor generated and
/// generated data is not split.
pub fn load_data(args: &BenchArgs, labeled: bool) -> Result<Dataset> {
    let mut data = match &args.file_x_train {
        Some(path) => load_files(args, path, labeled)?,
        None => {
            let (x, y) = make_blobs(
                args.samples,
                args.features,
                Some(CenterConfig::Random(args.centers, DEFAULT_CENTER_BOX)),
                Some(args.cluster_std),
                args.seed,
            )?;
            if labeled {
                train_test_split(&x, &y, args.test_size)?
            } else {
                Dataset {
                    x_test: Array2::zeros((0, x.ncols())),
                    x_train: x,
                    y_train: None,
                    y_test: None,
                }
            }
        }
    };

    if args.dtype == FpType::Float32 {
        round_to_f32(&mut data.x_train);
        round_to_f32(&mut data.x_test);
    }
    debug!(
        "train {:?}, test {:?}, {} classes",
        data.x_train.dim(),
        data.x_test.dim(),
        data.n_classes()
    );
    Ok(data)
}

fn load_files(args: &BenchArgs, x_train_path: &Path, labeled: bool) -> Result<Dataset> {
    let x_train = read_matrix_file(x_train_path)?;
    let x_test = match &args.file_x_test {
        Some(path) => read_matrix_file(path)?,
        None => x_train.clone(),
    };
    if x_test.ncols() != x_train.ncols() {
        return Err(Error::InvalidInput {
            context: format!(
                "train data has {} features, test data {}",
                x_train.ncols(),
                x_test.ncols()
            ),
        });
    }
    if !labeled {
        return Ok(Dataset {
            x_train,
            x_test,
            y_train: None,
            y_test: None,
        });
    }

    let y_train_raw = match &args.file_y_train {
        Some(path) => read_labels_file(path)?,
        None => return Err(Error::MissingLabels),
    };
    let y_test_raw = match (&args.file_y_test, &args.file_x_test) {
        (Some(path), _) => read_labels_file(path)?,
        (None, None) => y_train_raw.clone(),
        (None, Some(_)) => return Err(Error::MissingLabels),
    };
    for (x, y) in [(&x_train, &y_train_raw), (&x_test, &y_test_raw)] {
        if x.nrows() != y.len() {
            return Err(Error::InvalidInput {
                context: format!("{} samples but {} labels", x.nrows(), y.len()),
            });
        }
    }
    let (y_train, y_test) = encode_labels(y_train_raw.view(), Some(y_test_raw.view()))?;
    Ok(Dataset {
        x_train,
        x_test,
        y_train: Some(y_train),
        y_test,
    })
}
