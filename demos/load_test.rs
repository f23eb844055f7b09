//! ```bash
//! RUSTFLAGS="-C target-cpu=native" cargo run --example load_test --release
//! ```

use argkmin::{argkmin, argkmin_naive, ArgKminParams, Strategy};
use mimalloc::MiMalloc;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::time::Instant;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Row width for the run.
const DIM: usize = 128;
/// Query rows.
const N_QUERIES: usize = 2_048;
/// Reference rows.
const N_REFS: usize = 16_384;
/// Neighbors per query.
const K: usize = 10;
/// Deterministic seed for reproducibility.
const SEED: u64 = 42;

fn random_matrix(rng: &mut StdRng, rows: usize, dim: usize) -> Vec<f32> {
    (0..rows * dim).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect()
}

fn divider() {
    println!("{}", "─".repeat(60));
}

fn pairs_per_sec(n: usize, m: usize, elapsed: std::time::Duration) -> f64 {
    (n as f64 * m as f64) / elapsed.as_secs_f64()
}

/// One full pass at a single float width: blocked kernel under both
/// strategies, the naive baseline, and verification of the blocked results
/// against it. Returns the mismatch count and the baseline throughput.
fn run_width<T>(x: &[T], y: &[T], tolerance: T) -> anyhow::Result<(usize, f64)>
where
    T: argkmin::Scalar + std::fmt::Display,
{
    let mut results = Vec::new();
    for (name, strategy) in [("chunk_on_X", Strategy::ChunkOnX), ("chunk_on_Y", Strategy::ChunkOnY)] {
        let params = ArgKminParams { strategy, return_distance: true, ..Default::default() };
        let t0 = Instant::now();
        let result = argkmin(x, y, DIM, K, &params)?;
        let elapsed = t0.elapsed();
        println!(
            "  {name:<11} {elapsed:>10.2?}   {:>12.0} pairs/sec",
            pairs_per_sec(N_QUERIES, N_REFS, elapsed)
        );
        results.push((name, result));
    }

    let t0 = Instant::now();
    let naive = argkmin_naive(x, y, DIM, K);
    let naive_elapsed = t0.elapsed();
    let naive_rate = pairs_per_sec(N_QUERIES, N_REFS, naive_elapsed);
    println!("  {:<11} {naive_elapsed:>10.2?}   {naive_rate:>12.0} pairs/sec", "naive");

    // Index-exact agreement is the common case, but rounding may swap
    // candidates whose distances agree to within float noise. A row only
    // counts as wrong if its distance profile drifts beyond the tolerance.
    let distance = |i: usize, j: i64| -> T {
        let xi = &x[i * DIM..(i + 1) * DIM];
        let yj = &y[j as usize * DIM..(j as usize + 1) * DIM];
        xi.iter()
            .zip(yj)
            .fold(T::zero(), |acc, (&a, &b)| acc + (a - b) * (a - b))
            .sqrt()
    };

    let mut mismatches = 0usize;
    for (name, result) in &results {
        let mut exact = 0usize;
        let mut wrong = 0usize;
        for (i, (got, want)) in result.indices().chunks(K).zip(naive.chunks(K)).enumerate() {
            if got == want {
                exact += 1;
                continue;
            }
            let drift = got
                .iter()
                .zip(want)
                .map(|(&g, &w)| (distance(i, g) - distance(i, w)).abs())
                .fold(T::zero(), T::max);
            if drift > tolerance {
                wrong += 1;
            }
        }
        if wrong > 0 {
            eprintln!("  ✗ {name}: {wrong}/{N_QUERIES} rows drift beyond {tolerance}");
        } else {
            println!("  ✓ {name}: {exact}/{N_QUERIES} rows index-exact, rest within {tolerance}");
        }
        mismatches += wrong;

        let distances = result.distances().expect("distances were requested");
        let unsorted = distances
            .chunks(K)
            .filter(|row| row.windows(2).any(|w| w[0] > w[1] + tolerance))
            .count();
        if unsorted > 0 {
            eprintln!("  ✗ {name}: {unsorted} rows with non-monotonic distances");
            mismatches += unsorted;
        }
    }
    Ok((mismatches, naive_rate))
}

fn main() -> anyhow::Result<()> {
    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║        argkmin Load Test & Correctness Verifier          ║");
    println!("╚══════════════════════════════════════════════════════════╝");
    println!();

    // ── Phase 1: Data Generation ─────────────────────────────────────────────
    divider();
    println!("Phase 1 — Generating random matrices");
    println!("  Queries:    {N_QUERIES} x {DIM}");
    println!("  References: {N_REFS} x {DIM}");
    println!("  k:          {K}");
    println!("  Threads:    {}", rayon::current_num_threads());

    let t0 = Instant::now();
    let mut rng = StdRng::seed_from_u64(SEED);
    let x32 = random_matrix(&mut rng, N_QUERIES, DIM);
    let y32 = random_matrix(&mut rng, N_REFS, DIM);
    // The f64 pass widens the same data, so both widths rank the same
    // underlying point set.
    let x64: Vec<f64> = x32.iter().map(|&v| f64::from(v)).collect();
    let y64: Vec<f64> = y32.iter().map(|&v| f64::from(v)).collect();
    println!("  Generated in {:?}", t0.elapsed());

    // ── Phase 2: f32 pass ────────────────────────────────────────────────────
    divider();
    println!("Phase 2 — f32: blocked kernel, naive baseline, verification");
    let (mismatches_f32, naive_rate_f32) = run_width(&x32, &y32, 1e-3f32)?;

    // ── Phase 3: f64 pass ────────────────────────────────────────────────────
    divider();
    println!("Phase 3 — f64: blocked kernel, naive baseline, verification");
    let (mismatches_f64, naive_rate_f64) = run_width(&x64, &y64, 1e-9f64)?;

    // ── Phase 4: Summary ─────────────────────────────────────────────────────
    divider();
    let mismatches = mismatches_f32 + mismatches_f64;
    if mismatches == 0 {
        println!("✅ Correctness: PASSED (both widths)");
    } else {
        println!("❌ Correctness: FAILED ({mismatches} mismatching rows)");
    }

    println!();
    println!("Performance Summary");
    println!("──────────────────────────────────────────────────");
    println!("  f32 naive baseline: {naive_rate_f32:>12.0} pairs/sec");
    println!("  f64 naive baseline: {naive_rate_f64:>12.0} pairs/sec");
    println!("  ({} query rows x {} reference rows, dim = {})", N_QUERIES, N_REFS, DIM);
    println!("──────────────────────────────────────────────────");

    if mismatches != 0 {
        anyhow::bail!("{mismatches} mismatching rows");
    }
    Ok(())
}
