//! Spherical k-means used to train IVF coarse quantizers and PQ
//! codebooks. Deterministic: centroids seed from evenly spaced samples
//! and iterate a fixed number of rounds.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;

const MAX_ITERATIONS: usize = 20;

/// Train `k` centroids over the rows of `data`. Returns a `k x dim`
/// array. `k` is clamped to the number of rows.
pub fn train(data: ArrayView2<'_, f32>, k: usize) -> Array2<f32> {
    let n = data.nrows();
    let dim = data.ncols();
    let k = k.min(n).max(1);

    // Evenly spaced seed rows give a deterministic, spread-out start.
    let mut centroids = Array2::zeros((k, dim));
    for (i, mut row) in centroids.axis_iter_mut(Axis(0)).enumerate() {
        let src = (i * n) / k;
        row.assign(&data.row(src));
    }

    let mut assignments = vec![0usize; n];

    for _ in 0..MAX_ITERATIONS {
        // Assignment step.
        let new_assignments: Vec<usize> = (0..n)
            .into_par_iter()
            .map(|i| nearest_centroid(data.row(i), centroids.view()).0)
            .collect();

        let changed = new_assignments
            .iter()
            .zip(assignments.iter())
            .any(|(a, b)| a != b);
        assignments = new_assignments;

        // Update step: mean of assigned rows; empty clusters keep
        // their previous centroid.
        let mut sums = Array2::<f32>::zeros((k, dim));
        let mut counts = vec![0usize; k];
        for (i, &cluster) in assignments.iter().enumerate() {
            let mut sum_row = sums.row_mut(cluster);
            sum_row += &data.row(i);
            counts[cluster] += 1;
        }
        for cluster in 0..k {
            if counts[cluster] > 0 {
                let mut row = centroids.row_mut(cluster);
                row.assign(&sums.row(cluster));
                row.mapv_inplace(|v| v / counts[cluster] as f32);
            }
        }

        if !changed {
            break;
        }
    }

    centroids
}

/// Index and inner-product score of the centroid nearest to `vector`.
pub fn nearest_centroid(vector: ArrayView1<'_, f32>, centroids: ArrayView2<'_, f32>) -> (usize, f32) {
    let mut best = 0;
    let mut best_score = f32::NEG_INFINITY;
    for (i, centroid) in centroids.axis_iter(Axis(0)).enumerate() {
        let score = vector.dot(&centroid);
        if score > best_score {
            best_score = score;
            best = i;
        }
    }
    (best, best_score)
}

/// The `nprobe` centroid indices nearest to `vector`, best first.
pub fn nearest_centroids(
    vector: ArrayView1<'_, f32>,
    centroids: ArrayView2<'_, f32>,
    nprobe: usize,
) -> Vec<usize> {
    let mut scored: Vec<(usize, f32)> = centroids
        .axis_iter(Axis(0))
        .enumerate()
        .map(|(i, centroid)| (i, vector.dot(&centroid)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(nprobe.max(1));
    scored.into_iter().map(|(i, _)| i).collect()
}
