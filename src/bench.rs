use std::convert::Infallible;
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use clap::{Args, ValueEnum};
use log::{debug, info};
use serde::Serialize;
use serde_json::json;

use crate::{Error, Result};

/// Floating-point precision the benchmark runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FpType {
    Float32,
    Float64,
}

impl fmt::Display for FpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float32 => f.write_str("float32"),
            Self::Float64 => f.write_str("float64"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Csv,
    Json,
}

/// Flags shared by every benchmark binary.
#[derive(Debug, Clone, Args)]
pub struct BenchArgs {
    /// Batch id printed in the `batch` column
    #[arg(short, long)]
    pub batch: Option<String>,

    /// Machine name printed in the `arch` column
    #[arg(short = 'x', long, default_value_t = host_name())]
    pub arch: String,

    /// Library name printed in the `prefix` column
    #[arg(short, long, default_value = "petal")]
    pub prefix: String,

    /// Worker threads; -1 uses every core
    #[arg(
        short = 'n',
        long = "num-threads",
        default_value_t = -1,
        allow_negative_numbers = true
    )]
    pub threads: i64,

    #[arg(short, long, value_enum, default_value_t = FpType::Float64)]
    pub dtype: FpType,

    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
    pub output_format: OutputFormat,

    /// Maximum number of repetitions of each timed call
    #[arg(long, default_value_t = 100)]
    pub box_filter_measurements: usize,

    /// Stop repeating a timed call once this many seconds have been spent
    #[arg(long, default_value_t = 10.)]
    pub time_limit: f64,

    /// Seed for generated data
    #[arg(long, default_value_t = 12345)]
    pub seed: u64,

    #[arg(long = "file-X-train")]
    pub file_x_train: Option<PathBuf>,

    #[arg(long = "file-X-test")]
    pub file_x_test: Option<PathBuf>,

    #[arg(long = "file-y-train")]
    pub file_y_train: Option<PathBuf>,

    #[arg(long = "file-y-test")]
    pub file_y_test: Option<PathBuf>,

    /// Generated samples when no training file is given
    #[arg(long, default_value_t = 10_000)]
    pub samples: usize,

    #[arg(long, default_value_t = 10)]
    pub features: usize,

    #[arg(long, default_value_t = 3)]
    pub centers: usize,

    #[arg(long, default_value_t = 1.)]
    pub cluster_std: f64,

    /// Fraction of generated samples held out for prediction
    #[arg(long, default_value_t = 0.25)]
    pub test_size: f64,

    #[arg(short, long)]
    pub verbose: bool,
}

fn host_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "?".to_string())
}

/// Run-wide settings resolved from [`BenchArgs`].
#[derive(Debug, Clone, Serialize)]
pub struct Params {
    pub batch: Option<String>,
    pub arch: String,
    pub prefix: String,
    pub threads: usize,
    pub dtype: FpType,
    #[serde(skip)]
    pub output_format: OutputFormat,
    #[serde(skip)]
    pub box_filter_measurements: usize,
    #[serde(skip)]
    pub time_limit: f64,
    #[serde(skip)]
    pub verbose: bool,
}

impl Params {
    /// Resolves `args`, sizing the global thread pool as a side effect.
    pub fn new(args: &BenchArgs) -> Result<Self> {
        let threads = configure_threads(args.threads)?;
        Ok(Self {
            batch: args.batch.clone(),
            arch: args.arch.clone(),
            prefix: args.prefix.clone(),
            threads,
            dtype: args.dtype,
            output_format: args.output_format,
            box_filter_measurements: args.box_filter_measurements,
            time_limit: args.time_limit,
            verbose: args.verbose,
        })
    }
}

/// Sizes the rayon global pool; a non-positive count keeps rayon's default.
/// Returns the number of threads in use.
pub fn configure_threads(threads: i64) -> Result<usize> {
    if let Ok(n) = usize::try_from(threads) {
        if n > 0 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build_global()
                .map_err(|e| Error::InvalidInput {
                    context: format!("thread pool: {}", e),
                })?;
        }
    }
    let n = rayon::current_num_threads();
    debug!("using {} threads", n);
    Ok(n)
}

/// Times `f`, repeating it up to `box_filter_measurements` times or until
/// `time_limit` seconds have been spent, and returns the box-filtered time
/// with the result of the last call.
pub fn measure_function_time<T, F>(mut f: F, params: &Params) -> (f64, T)
where
    F: FnMut() -> T,
{
    match try_measure_function_time(|| Ok::<_, Infallible>(f()), params) {
        Ok(measured) => measured,
        Err(never) => match never {},
    }
}

/// Like [`measure_function_time`], stopping at the first error.
pub fn try_measure_function_time<T, E, F>(
    mut f: F,
    params: &Params,
) -> std::result::Result<(f64, T), E>
where
    F: FnMut() -> std::result::Result<T, E>,
{
    let (elapsed, mut result) = time_once(&mut f)?;
    let mut times = vec![elapsed];
    let mut total = elapsed;
    while times.len() < params.box_filter_measurements && total <= params.time_limit {
        let (elapsed, next) = time_once(&mut f)?;
        times.push(elapsed);
        total += elapsed;
        result = next;
    }
    let time = box_filter(&mut times);
    info!("{} measurements, {:.6} s", times.len(), time);
    Ok((time, result))
}

fn time_once<T, E, F>(f: &mut F) -> std::result::Result<(f64, T), E>
where
    F: FnMut() -> std::result::Result<T, E>,
{
    let start = Instant::now();
    let result = f()?;
    Ok((start.elapsed().as_secs_f64(), result))
}

/// Mean of the middle half (25% to 75%) of the sorted `times`; a single
/// measurement is returned as is.
pub fn box_filter(times: &mut [f64]) -> f64 {
    times.sort_by(f64::total_cmp);
    match times.len() {
        0 => 0.,
        1 => times[0],
        n => {
            let middle = &times[n / 4..n * 3 / 4];
            middle.iter().sum::<f64>() / middle.len() as f64
        }
    }
}

/// One stage of a benchmark run.
#[derive(Debug, Clone)]
pub struct ResultRow {
    /// Timed function, e.g. `LogReg.fit`.
    pub function: String,
    /// `training` or `prediction`.
    pub stage: &'static str,
    /// Shape of the data the stage ran on.
    pub rows: usize,
    pub columns: usize,
    /// Algorithm-specific CSV columns, printed between `size` and `time`.
    pub extra: Vec<(&'static str, String)>,
    /// Quality metric name and value for the JSON output.
    pub metric: Option<(&'static str, f64)>,
    pub time: f64,
}

const COMMON_COLUMNS: [&str; 7] = [
    "batch", "arch", "prefix", "function", "threads", "dtype", "size",
];

/// Renders `rows` in the configured output format.
pub fn format_output<P: Serialize>(
    params: &Params,
    algorithm: &str,
    rows: &[ResultRow],
    algorithm_parameters: &P,
) -> Result<String> {
    match params.output_format {
        OutputFormat::Csv => format_csv(params, rows),
        OutputFormat::Json => format_json(params, algorithm, rows, algorithm_parameters),
    }
}

pub fn print_output<P: Serialize>(
    params: &Params,
    algorithm: &str,
    rows: &[ResultRow],
    algorithm_parameters: &P,
) -> Result<()> {
    let output = format_output(params, algorithm, rows, algorithm_parameters)?;
    print!("{}", output);
    Ok(())
}

fn format_csv(params: &Params, rows: &[ResultRow]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    if let Some(first) = rows.first() {
        let header = COMMON_COLUMNS
            .iter()
            .copied()
            .chain(first.extra.iter().map(|(name, _)| *name))
            .chain(std::iter::once("time"));
        wtr.write_record(header)?;
    }
    for row in rows {
        let mut record = vec![
            params.batch.clone().unwrap_or_default(),
            params.arch.clone(),
            params.prefix.clone(),
            row.function.clone(),
            params.threads.to_string(),
            params.dtype.to_string(),
            format!("{}x{}", row.rows, row.columns),
        ];
        record.extend(row.extra.iter().map(|(_, value)| value.clone()));
        record.push(format!("{:.6}", row.time));
        wtr.write_record(&record)?;
    }
    let bytes = wtr.into_inner().map_err(|e| Error::Io(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| Error::InvalidInput {
        context: e.to_string(),
    })
}

fn format_json<P: Serialize>(
    params: &Params,
    algorithm: &str,
    rows: &[ResultRow],
    algorithm_parameters: &P,
) -> Result<String> {
    let algorithm_parameters = serde_json::to_value(algorithm_parameters)?;
    let results: Vec<_> = rows
        .iter()
        .map(|row| {
            let mut result = json!({
                "library": params.prefix,
                "algorithm": algorithm,
                "stage": row.stage,
                "input_data": {
                    "data_type": params.dtype,
                    "rows": row.rows,
                    "columns": row.columns,
                },
                "time[s]": row.time,
                "algorithm_parameters": algorithm_parameters,
            });
            if let Some((name, value)) = row.metric {
                result["accuracy_type"] = json!(name);
                result["accuracy"] = json!(value);
            }
            result
        })
        .collect();
    let mut output = serde_json::to_string_pretty(&results)?;
    output.push('\n');
    Ok(output)
}
