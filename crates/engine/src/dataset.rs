//! Input batches and search outputs

/// Borrowed batch of vectors passed into the engine.
///
/// `vectors` is row-major with `dim` values per row. For inserts, `ids` holds one
/// id per row and `extra_infos` (when the index stores them) one fixed-size record
/// per row. Queries carry a single row and no ids.
#[derive(Debug, Clone, Copy)]
pub struct Dataset<'a> {
    dim: usize,
    vectors: &'a [f32],
    ids: &'a [i64],
    extra_infos: Option<&'a [u8]>,
}

impl<'a> Dataset<'a> {
    pub fn new(vectors: &'a [f32], dim: usize) -> Self {
        Self {
            dim,
            vectors,
            ids: &[],
            extra_infos: None,
        }
    }

    /// Single-row query dataset
    pub fn query(vector: &'a [f32]) -> Self {
        Self::new(vector, vector.len())
    }

    pub fn with_ids(mut self, ids: &'a [i64]) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_extra_infos(mut self, extra_infos: &'a [u8]) -> Self {
        self.extra_infos = Some(extra_infos);
        self
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of rows
    pub fn num_elements(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.vectors.len() / self.dim
        }
    }

    pub fn vectors(&self) -> &'a [f32] {
        self.vectors
    }

    pub fn ids(&self) -> &'a [i64] {
        self.ids
    }

    pub fn extra_infos(&self) -> Option<&'a [u8]> {
        self.extra_infos
    }

    pub fn row(&self, i: usize) -> &'a [f32] {
        &self.vectors[i * self.dim..(i + 1) * self.dim]
    }
}

/// Owned result of a search: ids and distances in ascending distance order.
///
/// `extra_infos` holds one record per result when the index stores extra info.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOutput {
    pub ids: Vec<i64>,
    pub distances: Vec<f32>,
    pub extra_infos: Option<Vec<u8>>,
}

impl SearchOutput {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Release ownership of the buffers to the caller
    pub fn into_parts(self) -> (Vec<i64>, Vec<f32>, Option<Vec<u8>>) {
        (self.ids, self.distances, self.extra_infos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_rows() {
        let vectors = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let ids = [7, 8, 9];
        let ds = Dataset::new(&vectors, 2).with_ids(&ids);
        assert_eq!(ds.num_elements(), 3);
        assert_eq!(ds.row(1), &[3.0, 4.0]);
        assert_eq!(ds.ids(), &[7, 8, 9]);
        assert!(ds.extra_infos().is_none());
    }

    #[test]
    fn test_query_dataset() {
        let q = [0.5; 8];
        let ds = Dataset::query(&q);
        assert_eq!(ds.dim(), 8);
        assert_eq!(ds.num_elements(), 1);
        assert!(ds.ids().is_empty());
    }

    #[test]
    fn test_output_into_parts() {
        let out = SearchOutput {
            ids: vec![1, 2],
            distances: vec![0.1, 0.2],
            extra_infos: None,
        };
        assert_eq!(out.len(), 2);
        let (ids, dists, extra) = out.into_parts();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(dists, vec![0.1, 0.2]);
        assert!(extra.is_none());
    }
}
