use crate::codec;
use crate::error::{Result, VectorStoreError};
use crate::metadata::{SearchHit, VectorMetadata};
use ndarray::{s, Array2, ArrayView1, Axis};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// On-disk locations of the two halves of a persisted index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPaths {
    pub base: PathBuf,
    pub vectors: PathBuf,
    pub metadata: PathBuf,
}

impl IndexPaths {
    pub fn for_base(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref().to_path_buf();
        Self {
            vectors: with_suffix(&base, ".vec"),
            metadata: with_suffix(&base, ".meta.json"),
            base,
        }
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = base.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Append-only inner-product index over unit-normalized vectors.
///
/// Rows of the matrix and entries of the metadata list are parallel; a
/// record's identity is its insertion position. There is deliberately no
/// update or delete: dropping content means building a fresh index.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    vectors: Array2<f32>,
    metadata: Vec<VectorMetadata>,
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorIndex {
    /// Empty index whose dimension is fixed by the first `add`
    pub fn new() -> Self {
        Self {
            vectors: Array2::zeros((0, 0)),
            metadata: Vec::new(),
        }
    }

    pub fn with_dimension(dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(VectorStoreError::InvalidDimension);
        }
        Ok(Self {
            vectors: Array2::zeros((0, dim)),
            metadata: Vec::new(),
        })
    }

    pub fn dimension(&self) -> Option<usize> {
        let dim = self.vectors.ncols();
        (dim > 0).then_some(dim)
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    pub fn metadata(&self) -> &[VectorMetadata] {
        &self.metadata
    }

    pub fn metadata_at(&self, position: usize) -> Option<&VectorMetadata> {
        self.metadata.get(position)
    }

    /// Append vectors and their metadata, preserving order.
    ///
    /// Either the whole batch is appended or nothing is.
    pub fn add(&mut self, vectors: &[Vec<f32>], metadata: Vec<VectorMetadata>) -> Result<()> {
        if vectors.len() != metadata.len() {
            return Err(VectorStoreError::LengthMismatch {
                vectors: vectors.len(),
                metadata: metadata.len(),
            });
        }
        let Some(first) = vectors.first() else {
            return Ok(());
        };

        let dim = self.dimension().unwrap_or(first.len());
        if dim == 0 {
            return Err(VectorStoreError::InvalidDimension);
        }

        let mut flat = Vec::with_capacity(vectors.len() * dim);
        for vector in vectors {
            if vector.len() != dim {
                return Err(VectorStoreError::DimensionMismatch {
                    expected: dim,
                    actual: vector.len(),
                });
            }
            if !vector.iter().all(|v| v.is_finite()) {
                return Err(VectorStoreError::NonFiniteVector);
            }
            flat.extend_from_slice(vector);
        }

        let batch = Array2::from_shape_vec((vectors.len(), dim), flat)?;
        if self.dimension().is_none() {
            self.vectors = Array2::zeros((0, dim));
        }
        self.vectors.append(Axis(0), batch.view())?;
        self.metadata.extend(metadata);
        Ok(())
    }

    /// Drop every record past `len`, restoring the index to an earlier size
    pub fn truncate(&mut self, len: usize) {
        if len >= self.len() {
            return;
        }
        self.vectors = self.vectors.slice(s![..len, ..]).to_owned();
        self.metadata.truncate(len);
    }

    /// Top-`k` records by descending inner product with `query`
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let dim = self.vectors.ncols();
        if query.len() != dim {
            return Err(VectorStoreError::DimensionMismatch {
                expected: dim,
                actual: query.len(),
            });
        }

        let scores = self.vectors.dot(&ArrayView1::from(query));
        let mut ranked: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(k);

        Ok(ranked
            .into_iter()
            .map(|(position, score)| SearchHit {
                position,
                score,
                metadata: self.metadata[position].clone(),
            })
            .collect())
    }

    /// Persist both halves next to `base`.
    ///
    /// Both halves are staged in temporary files before either is renamed into
    /// place, and the metadata half is renamed last. A failed write leaves the
    /// previously saved index untouched.
    pub async fn save(&self, base: impl AsRef<Path>) -> Result<()> {
        let paths = IndexPaths::for_base(base);
        if let Some(parent) = paths.vectors.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let metadata = serde_json::to_vec(&self.metadata)?;
        let staged_vectors = with_suffix(&paths.vectors, ".tmp");
        let staged_metadata = with_suffix(&paths.metadata, ".tmp");
        let staged = async {
            tokio::fs::write(&staged_vectors, codec::encode(&self.vectors)).await?;
            tokio::fs::write(&staged_metadata, metadata).await
        }
        .await;
        if let Err(err) = staged {
            discard(&staged_vectors).await;
            discard(&staged_metadata).await;
            return Err(err.into());
        }

        tokio::fs::rename(&staged_vectors, &paths.vectors).await?;
        tokio::fs::rename(&staged_metadata, &paths.metadata).await?;

        log::debug!(
            "Saved vector index {} ({} vectors)",
            paths.base.display(),
            self.len()
        );
        Ok(())
    }

    /// Load a persisted index; a missing index is an error
    pub async fn load(base: impl AsRef<Path>) -> Result<Self> {
        let base = base.as_ref();
        Self::load_if_exists(base)
            .await?
            .ok_or_else(|| VectorStoreError::NotFound(base.to_path_buf()))
    }

    /// `Ok(None)` when neither half exists; a lone half is `CorruptIndex`
    pub async fn load_if_exists(base: impl AsRef<Path>) -> Result<Option<Self>> {
        let paths = IndexPaths::for_base(base);
        let has_vectors = tokio::fs::try_exists(&paths.vectors).await?;
        let has_metadata = tokio::fs::try_exists(&paths.metadata).await?;

        match (has_vectors, has_metadata) {
            (false, false) => Ok(None),
            (true, false) => Err(corrupt(&paths, "metadata file is missing")),
            (false, true) => Err(corrupt(&paths, "vector file is missing")),
            (true, true) => {
                let bytes = tokio::fs::read(&paths.vectors).await?;
                let vectors = codec::decode(&bytes).map_err(|e| corrupt(&paths, e))?;

                let raw = tokio::fs::read(&paths.metadata).await?;
                let metadata: Vec<VectorMetadata> =
                    serde_json::from_slice(&raw).map_err(|e| corrupt(&paths, e))?;

                if vectors.nrows() != metadata.len() {
                    return Err(corrupt(
                        &paths,
                        format!(
                            "{} vectors but {} metadata entries",
                            vectors.nrows(),
                            metadata.len()
                        ),
                    ));
                }

                log::debug!(
                    "Loaded vector index {} ({} vectors)",
                    paths.base.display(),
                    metadata.len()
                );
                Ok(Some(Self { vectors, metadata }))
            }
        }
    }
}

fn corrupt(paths: &IndexPaths, reason: impl ToString) -> VectorStoreError {
    VectorStoreError::CorruptIndex {
        base: paths.base.clone(),
        reason: reason.to_string(),
    }
}

async fn discard(staged: &Path) {
    if let Err(err) = tokio::fs::remove_file(staged).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            log::debug!("Could not remove {}: {}", staged.display(), err);
        }
    }
}

/// Scale `vector` to unit length in place; zero vectors are left untouched
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use docindex_chunker::SectionKind;
    use pretty_assertions::assert_eq;

    fn meta(name: &str, chunk_index: usize) -> VectorMetadata {
        VectorMetadata {
            text: format!("text of {name}"),
            filename: name.to_string(),
            filepath: format!("/docs/{name}"),
            chunk_index,
            section: SectionKind::Body,
            indexed_at: Utc::now(),
        }
    }

    fn unit(values: &[f32]) -> Vec<f32> {
        let mut v = values.to_vec();
        l2_normalize(&mut v);
        v
    }

    #[test]
    fn empty_index_returns_nothing_for_any_k() {
        let index = VectorIndex::new();
        for k in [0, 1, 5, 100] {
            assert!(index.search(&[1.0, 0.0], k).unwrap().is_empty());
        }
        assert_eq!(index.dimension(), None);
    }

    #[test]
    fn identical_vector_is_top_hit() {
        let mut index = VectorIndex::new();
        let target = unit(&[0.2, 0.9, 0.1]);
        index
            .add(
                &[unit(&[1.0, 0.0, 0.0]), target.clone(), unit(&[0.0, 0.0, 1.0])],
                vec![meta("a.txt", 0), meta("b.txt", 0), meta("c.txt", 0)],
            )
            .unwrap();

        let hits = index.search(&target, 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].position, 1);
        assert_eq!(hits[0].metadata.filename, "b.txt");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn results_are_sorted_and_capped() {
        let mut index = VectorIndex::new();
        index
            .add(
                &[unit(&[1.0, 0.0]), unit(&[0.6, 0.8]), unit(&[0.0, 1.0])],
                vec![meta("x", 0), meta("y", 0), meta("z", 0)],
            )
            .unwrap();

        let hits = index.search(&unit(&[1.0, 0.1]), 10).unwrap();
        let order: Vec<usize> = hits.iter().map(|h| h.position).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

        assert_eq!(index.search(&unit(&[1.0, 0.1]), 2).unwrap().len(), 2);
    }

    #[test]
    fn dimension_is_fixed_by_first_add() {
        let mut index = VectorIndex::new();
        index.add(&[vec![1.0, 0.0, 0.0]], vec![meta("a", 0)]).unwrap();
        assert_eq!(index.dimension(), Some(3));

        let err = index.add(&[vec![1.0, 0.0]], vec![meta("b", 0)]).unwrap_err();
        assert!(matches!(
            err,
            VectorStoreError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert_eq!(index.len(), 1);

        assert!(index.search(&[1.0, 0.0], 1).is_err());
    }

    #[test]
    fn mismatched_lengths_are_rejected_atomically() {
        let mut index = VectorIndex::new();
        let err = index
            .add(&[vec![1.0, 0.0], vec![0.0, 1.0]], vec![meta("a", 0)])
            .unwrap_err();
        assert!(matches!(
            err,
            VectorStoreError::LengthMismatch {
                vectors: 2,
                metadata: 1
            }
        ));

        // second row has the wrong width: nothing from the batch lands
        index.add(&[vec![1.0, 0.0]], vec![meta("a", 0)]).unwrap();
        assert!(index
            .add(
                &[vec![0.0, 1.0], vec![1.0, 0.0, 0.0]],
                vec![meta("b", 0), meta("c", 0)]
            )
            .is_err());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn appends_preserve_insertion_order() {
        let mut index = VectorIndex::with_dimension(2).unwrap();
        index.add(&[unit(&[1.0, 0.0])], vec![meta("first", 0)]).unwrap();
        index
            .add(
                &[unit(&[0.0, 1.0]), unit(&[1.0, 1.0])],
                vec![meta("second", 0), meta("second", 1)],
            )
            .unwrap();

        let names: Vec<(&str, usize)> = index
            .metadata()
            .iter()
            .map(|m| (m.filename.as_str(), m.chunk_index))
            .collect();
        assert_eq!(names, vec![("first", 0), ("second", 0), ("second", 1)]);
        assert_eq!(index.metadata_at(2).unwrap().chunk_index, 1);
    }

    #[test]
    fn truncate_restores_an_earlier_length() {
        let mut index = VectorIndex::new();
        index.add(&[unit(&[1.0, 0.0])], vec![meta("kept", 0)]).unwrap();
        index
            .add(
                &[unit(&[0.0, 1.0]), unit(&[1.0, 1.0])],
                vec![meta("dropped", 0), meta("dropped", 1)],
            )
            .unwrap();

        index.truncate(5);
        assert_eq!(index.len(), 3);

        index.truncate(1);
        assert_eq!(index.len(), 1);
        assert_eq!(index.dimension(), Some(2));
        let hits = index.search(&unit(&[0.0, 1.0]), 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.filename, "kept");

        index.truncate(0);
        assert!(index.is_empty());
        index.add(&[unit(&[1.0, 0.0])], vec![meta("again", 0)]).unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn rejects_non_finite_and_zero_dimension() {
        let mut index = VectorIndex::new();
        assert!(matches!(
            index.add(&[vec![f32::NAN, 1.0]], vec![meta("a", 0)]),
            Err(VectorStoreError::NonFiniteVector)
        ));
        assert!(matches!(
            index.add(&[vec![]], vec![meta("a", 0)]),
            Err(VectorStoreError::InvalidDimension)
        ));
        assert!(VectorIndex::with_dimension(0).is_err());
        assert!(index.is_empty());
    }

    #[test]
    fn index_paths_share_base_name() {
        let paths = IndexPaths::for_base("/data/index");
        assert_eq!(paths.vectors, PathBuf::from("/data/index.vec"));
        assert_eq!(paths.metadata, PathBuf::from("/data/index.meta.json"));
    }
}
