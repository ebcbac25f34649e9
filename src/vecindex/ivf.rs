//! IVF-Flat: vectors partitioned into `nlist` Voronoi cells by a
//! trained coarse quantizer; searches probe only the `nprobe` cells
//! nearest the query.

use ndarray::{Array2, ArrayView1, ArrayView2};

use super::kmeans;

#[derive(Debug, Clone)]
pub struct IvfFlatIndex {
    dim: usize,
    nprobe: usize,
    centroids: Array2<f32>,
    /// One posting list per cell: (global position, vector).
    lists: Vec<Vec<(usize, Vec<f32>)>>,
    ntotal: usize,
}

impl IvfFlatIndex {
    /// Train a coarse quantizer over `training` and build an empty
    /// index around it.
    pub fn train(training: ArrayView2<'_, f32>, nlist: usize, nprobe: usize) -> Self {
        let centroids = kmeans::train(training, nlist);
        let nlist = centroids.nrows();
        Self {
            dim: centroids.ncols(),
            nprobe: nprobe.max(1),
            centroids,
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

    pub fn ntotal(&self) -> usize {
        self.ntotal
    }

    pub fn add(&mut self, vector: &[f32]) -> usize {
        debug_assert_eq!(vector.len(), self.dim);
        let view = ArrayView1::from(vector);
        let (cell, _) = kmeans::nearest_centroid(view, self.centroids.view());
        let position = self.ntotal;
        self.lists[cell].push((position, vector.to_vec()));
        self.ntotal += 1;
        position
    }

    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let view = ArrayView1::from(query);
        let cells = kmeans::nearest_centroids(view, self.centroids.view(), self.nprobe);

        let mut scored = Vec::new();
        for cell in cells {
            for (position, vector) in &self.lists[cell] {
                let score: f32 = vector.iter().zip(query.iter()).map(|(a, b)| a * b).sum();
                scored.push((*position, score));
            }
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    pub fn entries(&self) -> impl Iterator<Item = (usize, &[f32])> + '_ {
        self.lists
            .iter()
            .flat_map(|list| list.iter().map(|(pos, v)| (*pos, v.as_slice())))
    }

    pub(crate) fn centroids(&self) -> &Array2<f32> {
        &self.centroids
    }

    pub(crate) fn lists(&self) -> &[Vec<(usize, Vec<f32>)>] {
        &self.lists
    }

    pub(crate) fn from_parts(
        nprobe: usize,
        centroids: Array2<f32>,
        lists: Vec<Vec<(usize, Vec<f32>)>>,
    ) -> Self {
        let ntotal = lists.iter().map(|l| l.len()).sum();
        Self {
            dim: centroids.ncols(),
            nprobe,
            centroids,
            lists,
            ntotal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn training_data() -> Array2<f32> {
        // Two tight clusters on orthogonal axes.
        let mut rows = Vec::new();
        for i in 0..20 {
            let eps = i as f32 * 0.001;
            rows.push([1.0 - eps, eps]);
            rows.push([eps, 1.0 - eps]);
        }
        Array2::from_shape_vec(
            (rows.len(), 2),
            rows.into_iter().flatten().collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_probed_search_finds_exact_match() {
        let data = training_data();
        let mut index = IvfFlatIndex::train(data.view(), 2, 2);
        for row in data.rows() {
            index.add(row.as_slice().unwrap());
        }

        let query = [1.0, 0.0];
        let results = index.search(&query, 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, 0);
    }

    #[test]
    fn test_positions_are_global_and_sequential() {
        let data = training_data();
        let mut index = IvfFlatIndex::train(data.view(), 2, 1);
        let positions: Vec<usize> = (0..4)
            .map(|i| index.add(data.row(i).as_slice().unwrap()))
            .collect();
        assert_eq!(positions, vec![0, 1, 2, 3]);
        assert_eq!(index.ntotal(), 4);
    }
}
