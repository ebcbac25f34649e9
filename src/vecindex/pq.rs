//! IVF-PQ: the IVF partitioning of `ivf.rs` with product-quantized
//! vectors in the posting lists. Each vector is split into `M`
//! subvectors and each subvector replaced by the index of its nearest
//! codebook centroid, so a 512-dim f32 vector compresses to `M` bytes.
//! Searches score codes against per-query lookup tables (asymmetric
//! distance computation).

use ndarray::{Array2, ArrayView1, ArrayView2};

use super::kmeans;

/// Sub-quantizer count for 512-dim embeddings.
pub const DEFAULT_SUBQUANTIZERS: usize = 64;
/// Centroids per sub-quantizer (8 bits per code).
pub const CODEBOOK_SIZE: usize = 256;

#[derive(Debug, Clone)]
pub struct IvfPqIndex {
    dim: usize,
    nprobe: usize,
    m: usize,
    dsub: usize,
    centroids: Array2<f32>,
    /// One `CODEBOOK_SIZE x dsub` codebook per sub-quantizer.
    codebooks: Vec<Array2<f32>>,
    /// One posting list per cell: (global position, M-byte code).
    lists: Vec<Vec<(usize, Vec<u8>)>>,
    ntotal: usize,
}

impl IvfPqIndex {
    /// Train the coarse quantizer and the per-subspace codebooks over
    /// `training`. `dim` must be divisible by `m`.
    pub fn train(training: ArrayView2<'_, f32>, nlist: usize, nprobe: usize, m: usize) -> Self {
        let dim = training.ncols();
        assert!(dim % m == 0, "dimension {dim} not divisible by {m} sub-quantizers");
        let dsub = dim / m;

        let centroids = kmeans::train(training, nlist);
        let nlist = centroids.nrows();

        let codebooks: Vec<Array2<f32>> = (0..m)
            .map(|sub| {
                let slice = training.slice(ndarray::s![.., sub * dsub..(sub + 1) * dsub]);
                kmeans::train(slice, CODEBOOK_SIZE)
            })
            .collect();

        Self {
            dim,
            nprobe: nprobe.max(1),
            m,
            dsub,
            centroids,
            codebooks,
            lists: vec![Vec::new(); nlist],
            ntotal: 0,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn nlist(&self) -> usize {
        self.lists.len()
    }

    pub fn nprobe(&self) -> usize {
        self.nprobe
    }

    pub fn subquantizers(&self) -> usize {
        self.m
    }

    pub fn ntotal(&self) -> usize {
        self.ntotal
    }

    pub fn add(&mut self, vector: &[f32]) -> usize {
        debug_assert_eq!(vector.len(), self.dim);
        let view = ArrayView1::from(vector);
        let (cell, _) = kmeans::nearest_centroid(view, self.centroids.view());
        let code = self.encode(vector);
        let position = self.ntotal;
        self.lists[cell].push((position, code));
        self.ntotal += 1;
        position
    }

    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let view = ArrayView1::from(query);
        let cells = kmeans::nearest_centroids(view, self.centroids.view(), self.nprobe);

        // ADC tables: table[sub][code] = <query_sub, codeword>.
        let tables: Vec<Vec<f32>> = (0..self.m)
            .map(|sub| {
                let q_sub = &query[sub * self.dsub..(sub + 1) * self.dsub];
                self.codebooks[sub]
                    .rows()
                    .into_iter()
                    .map(|codeword| {
                        codeword
                            .iter()
                            .zip(q_sub.iter())
                            .map(|(a, b)| a * b)
                            .sum()
                    })
                    .collect()
            })
            .collect();

        let mut scored = Vec::new();
        for cell in cells {
            for (position, code) in &self.lists[cell] {
                let score: f32 = code
                    .iter()
                    .enumerate()
                    .map(|(sub, &c)| tables[sub][c as usize])
                    .sum();
                scored.push((*position, score));
            }
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    fn encode(&self, vector: &[f32]) -> Vec<u8> {
        (0..self.m)
            .map(|sub| {
                let v_sub = &vector[sub * self.dsub..(sub + 1) * self.dsub];
                let (code, _) =
                    kmeans::nearest_centroid(ArrayView1::from(v_sub), self.codebooks[sub].view());
                code as u8
            })
            .collect()
    }

    /// Decode a position's code back to an approximate vector.
    pub fn entries(&self) -> impl Iterator<Item = (usize, Vec<f32>)> + '_ {
        self.lists.iter().flat_map(move |list| {
            list.iter().map(move |(position, code)| {
                let mut vector = Vec::with_capacity(self.dim);
                for (sub, &c) in code.iter().enumerate() {
                    vector.extend(self.codebooks[sub].row(c as usize).iter().copied());
                }
                (*position, vector)
            })
        })
    }

    pub(crate) fn centroids(&self) -> &Array2<f32> {
        &self.centroids
    }

    pub(crate) fn codebooks(&self) -> &[Array2<f32>] {
        &self.codebooks
    }

    pub(crate) fn lists(&self) -> &[Vec<(usize, Vec<u8>)>] {
        &self.lists
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        dim: usize,
        nprobe: usize,
        m: usize,
        centroids: Array2<f32>,
        codebooks: Vec<Array2<f32>>,
        lists: Vec<Vec<(usize, Vec<u8>)>>,
    ) -> Self {
        let ntotal = lists.iter().map(|l| l.len()).sum();
        Self {
            dim,
            nprobe,
            m,
            dsub: dim / m,
            centroids,
            codebooks,
            lists,
            ntotal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn normalized(raw: Vec<f32>) -> Vec<f32> {
        let norm: f32 = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
        raw.into_iter().map(|v| v / norm).collect()
    }

    fn training_data(n: usize, dim: usize) -> Array2<f32> {
        // (i % dim, i / dim) uniquely determines i, so rows are distinct.
        let mut flat = Vec::with_capacity(n * dim);
        for i in 0..n {
            let mut row = vec![0.1; dim];
            row[i % dim] = 1.0;
            row[(i / dim) % dim] += 0.5;
            flat.extend(normalized(row));
        }
        Array2::from_shape_vec((n, dim), flat).unwrap()
    }

    #[test]
    fn test_self_query_ranks_first() {
        let data = training_data(64, 16);
        let mut index = IvfPqIndex::train(data.view(), 4, 4, 4);
        for row in data.rows() {
            index.add(row.as_slice().unwrap());
        }

        // Query with an inserted vector; its own code must win.
        let query = data.row(10).to_vec();
        let results = index.search(&query, 1);
        assert_eq!(results[0].0, 10);
    }

    #[test]
    fn test_codes_are_m_bytes() {
        let data = training_data(32, 16);
        let index = IvfPqIndex::train(data.view(), 2, 1, 4);
        let code = index.encode(data.row(0).as_slice().unwrap());
        assert_eq!(code.len(), 4);
    }
}
