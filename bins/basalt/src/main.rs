use std::collections::HashMap;
use std::hint::black_box;

use anyhow::Context;
use basalt_config::{ProfilerConfig, ReportFormat};
use basalt_profiler::{Profiler, callsite};
use tracing_subscriber::EnvFilter;

const MATRIX_DIM: usize = 64;
const L1_WALK_BYTES: usize = 8 * 1024;
const STRIDED_WALK_BYTES: usize = 64 * 1024 * 1024;
// One element per 4 KiB page plus a line, so consecutive loads share neither.
const STRIDE_ELEMS: usize = (4096 + 64) / std::mem::size_of::<u64>();

fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => ProfilerConfig::load(&path).with_context(|| format!("loading {path}"))?,
        None => ProfilerConfig::default(),
    };

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let profiler = Profiler::init(&config);
    tracing::info!(mode = %profiler.classifier_mode(), "running workloads");

    let checksum = multiply(&profiler, MATRIX_DIM);
    tracing::info!(checksum, "matrix multiply done");

    let hot = walk_l1_resident(&profiler, 16);
    let cold = walk_strided(&profiler);
    tracing::info!(hot, cold, "buffer walks done");

    let prices = HashMap::from([("btc", 64_000u64), ("eth", 3_100)]);
    for key in ["btc", "", "doge", "eth", "", "sol"] {
        if let Some(px) = lookup(&profiler, &prices, key) {
            tracing::debug!(key, px, "lookup hit");
        }
    }

    profiler.end();

    let report = profiler.report();
    match config.report_format {
        ReportFormat::Text => print!("{report}"),
        ReportFormat::Json => println!("{}", report.to_json()?),
    }
    Ok(())
}

fn multiply(profiler: &Profiler, n: usize) -> u64 {
    let scope = profiler.enter_site(&callsite!());

    let a: Vec<u64> = (0..n * n).map(|i| (i % 7) as u64).collect();
    let b: Vec<u64> = (0..n * n).map(|i| (i % 5) as u64).collect();
    let mut c = vec![0u64; n * n];

    for row in 0..n {
        for col in 0..n {
            c[row * n + col] = dot(profiler, &a[row * n..(row + 1) * n], &b, col, n);
        }
    }

    scope.success();
    c.iter().fold(0u64, |acc, &v| acc.wrapping_add(v))
}

fn dot(profiler: &Profiler, row: &[u64], b: &[u64], col: usize, n: usize) -> u64 {
    let _scope = profiler.enter_site(&callsite!());
    let mut acc = 0u64;
    for (k, &x) in row.iter().enumerate() {
        acc = acc.wrapping_add(x * b[k * n + col]);
    }
    acc
}

fn walk_l1_resident(profiler: &Profiler, passes: usize) -> u64 {
    let scope = profiler.enter_site(&callsite!());
    let slot = scope.slot();

    let buf = vec![1u64; L1_WALK_BYTES / std::mem::size_of::<u64>()];
    let mut sum = 0u64;
    for _ in 0..passes {
        for v in &buf {
            let _access = profiler.cache_scope(slot);
            sum = sum.wrapping_add(black_box(*v));
        }
    }

    scope.success();
    sum
}

fn walk_strided(profiler: &Profiler) -> u64 {
    let scope = profiler.enter_site(&callsite!());
    let slot = scope.slot();

    let mut buf = Vec::new();
    if buf.try_reserve_exact(STRIDED_WALK_BYTES / std::mem::size_of::<u64>()).is_err() {
        tracing::warn!(bytes = STRIDED_WALK_BYTES, "strided walk buffer unavailable");
        scope.failure();
        return 0;
    }
    buf.resize(STRIDED_WALK_BYTES / std::mem::size_of::<u64>(), 1u64);

    let mut sum = 0u64;
    for i in (0..buf.len()).step_by(STRIDE_ELEMS) {
        let _access = profiler.cache_scope(slot);
        sum = sum.wrapping_add(black_box(buf[i]));
    }

    scope.success();
    sum
}

fn lookup(profiler: &Profiler, prices: &HashMap<&str, u64>, key: &str) -> Option<u64> {
    let scope = profiler.enter_site(&callsite!());
    if key.is_empty() {
        scope.early_return();
        return None;
    }
    match prices.get(key) {
        Some(&px) => {
            scope.success();
            Some(px)
        }
        None => {
            scope.failure();
            None
        }
    }
}
