//! Exact inner-product index: every vector scanned on every search.
//! The right choice up to ~50k vectors.

use rayon::prelude::*;

/// Flat index over normalized vectors, stored row-major.
#[derive(Debug, Clone, Default)]
pub struct FlatIndex {
    dim: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            data: Vec::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn ntotal(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    /// Append a vector; returns its position.
    pub fn add(&mut self, vector: &[f32]) -> usize {
        debug_assert_eq!(vector.len(), self.dim);
        let position = self.ntotal();
        self.data.extend_from_slice(vector);
        position
    }

    /// Top-k positions by inner product, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .data
            .par_chunks_exact(self.dim)
            .enumerate()
            .map(|(position, row)| {
                let score: f32 = row.iter().zip(query.iter()).map(|(a, b)| a * b).sum();
                (position, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    pub fn reconstruct(&self, position: usize) -> Option<Vec<f32>> {
        let start = position.checked_mul(self.dim)?;
        self.data.get(start..start + self.dim).map(|s| s.to_vec())
    }

    /// All (position, vector) pairs, for rebuilds.
    pub fn entries(&self) -> impl Iterator<Item = (usize, &[f32])> + '_ {
        self.data.chunks_exact(self.dim).enumerate()
    }

    pub(crate) fn raw_data(&self) -> &[f32] {
        &self.data
    }

    pub(crate) fn from_raw(dim: usize, data: Vec<f32>) -> Self {
        Self { dim, data }
    }
}
