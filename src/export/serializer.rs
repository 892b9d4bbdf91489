//! Model file format
//!
//! A model file is a bincode-encoded [`SerializedModel`] envelope: magic
//! bytes, format version, metadata, and the bincode payload of the forest
//! guarded by a SHA-256 checksum.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{MlopsError, Result};
use crate::training::RandomForest;

/// Descriptive metadata stored next to the model payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMetadata {
    /// Model type
    pub model_type: String,
    /// Number of trees
    pub n_estimators: usize,
    /// Training timestamp (RFC 3339)
    pub trained_at: String,
    /// Feature names in column order
    pub feature_names: Vec<String>,
    /// Class labels in probability column order
    pub classes: Vec<usize>,
    /// Holdout metrics
    pub metrics: BTreeMap<String, f64>,
}

impl ModelMetadata {
    /// Metadata for a fitted forest
    pub fn for_forest(model: &RandomForest, feature_names: &[String]) -> Self {
        Self {
            model_type: "RandomForestClassifier".to_string(),
            n_estimators: model.n_estimators,
            trained_at: chrono::Utc::now().to_rfc3339(),
            feature_names: feature_names.to_vec(),
            classes: model.classes().to_vec(),
            metrics: BTreeMap::new(),
        }
    }

    /// Add metric
    pub fn with_metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }
}

/// On-disk envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedModel {
    /// Magic bytes for format detection
    pub magic: [u8; 4],
    /// Format version
    pub format_version: u32,
    /// Model metadata
    pub metadata: ModelMetadata,
    /// bincode-encoded model
    pub model_data: Vec<u8>,
    /// Hex SHA-256 of `model_data`
    pub checksum: String,
}

impl SerializedModel {
    const MAGIC: [u8; 4] = *b"IRSM";
    const VERSION: u32 = 1;

    pub fn new(metadata: ModelMetadata, model_data: Vec<u8>) -> Self {
        let checksum = Self::compute_checksum(&model_data);
        Self {
            magic: Self::MAGIC,
            format_version: Self::VERSION,
            metadata,
            model_data,
            checksum,
        }
    }

    fn compute_checksum(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    /// Verify checksum
    pub fn verify_checksum(&self) -> bool {
        Self::compute_checksum(&self.model_data) == self.checksum
    }
}

/// A model read back from disk
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub model: RandomForest,
    pub metadata: ModelMetadata,
}

/// Write a model file, replacing any existing one.
///
/// The envelope is written to a sibling temporary file and renamed into
/// place, so readers never observe a partially written model.
pub fn save_model(model: &RandomForest, metadata: &ModelMetadata, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let envelope = SerializedModel::new(metadata.clone(), bincode::serialize(model)?);

    let tmp_path = temp_path_for(path);
    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, &envelope)?;
        writer.flush()?;
    }
    fs::rename(&tmp_path, path)?;

    Ok(())
}

/// Read and verify a model file
pub fn load_model(path: impl AsRef<Path>) -> Result<LoadedModel> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(MlopsError::ModelNotFound(path.to_path_buf()));
    }

    // Decoding from a slice bounds every length prefix by the file size
    let bytes = fs::read(path)?;
    let envelope: SerializedModel = bincode::deserialize(&bytes)?;

    if envelope.magic != SerializedModel::MAGIC {
        return Err(MlopsError::SerializationError(format!(
            "{} is not a model file",
            path.display()
        )));
    }
    if envelope.format_version != SerializedModel::VERSION {
        return Err(MlopsError::SerializationError(format!(
            "unsupported model format version {}",
            envelope.format_version
        )));
    }
    if !envelope.verify_checksum() {
        return Err(MlopsError::ChecksumMismatch(path.to_path_buf()));
    }

    let model: RandomForest = bincode::deserialize(&envelope.model_data)?;
    Ok(LoadedModel {
        model,
        metadata: envelope.metadata,
    })
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".tmp-{}", std::process::id()));
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn fitted_forest() -> RandomForest {
        let x = array![[0.0, 0.0], [0.1, 0.1], [1.0, 1.0], [1.1, 1.1]];
        let y = array![0, 0, 1, 1];
        let mut rf = RandomForest::new(5).with_random_state(3);
        rf.fit(&x, &y).unwrap();
        rf
    }

    fn feature_names() -> Vec<String> {
        vec!["a".to_string(), "b".to_string()]
    }

    #[test]
    fn test_save_and_load_preserves_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        let rf = fitted_forest();
        let metadata = ModelMetadata::for_forest(&rf, &feature_names()).with_metric("f1_weighted", 1.0);

        save_model(&rf, &metadata, &path).unwrap();
        let loaded = load_model(&path).unwrap();

        let x = array![[0.05, 0.05], [1.05, 1.05]];
        assert_eq!(loaded.model.predict_proba(&x).unwrap(), rf.predict_proba(&x).unwrap());
        assert_eq!(loaded.metadata, metadata);
        assert_eq!(loaded.metadata.classes, vec![0, 1]);
    }

    #[test]
    fn test_overwrite_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        let rf = fitted_forest();
        let metadata = ModelMetadata::for_forest(&rf, &feature_names());

        save_model(&rf, &metadata, &path).unwrap();
        save_model(&rf, &metadata, &path).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_missing_file() {
        let err = load_model("/nonexistent/model.bin").unwrap_err();
        assert!(matches!(err, MlopsError::ModelNotFound(_)));
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        let rf = fitted_forest();
        let metadata = ModelMetadata::for_forest(&rf, &feature_names());

        let mut envelope = SerializedModel::new(metadata, bincode::serialize(&rf).unwrap());
        envelope.checksum = "0".repeat(64);
        fs::write(&path, bincode::serialize(&envelope).unwrap()).unwrap();

        assert!(matches!(load_model(&path), Err(MlopsError::ChecksumMismatch(_))));
    }

    #[test]
    fn test_checksum_is_lowercase_hex_sha256() {
        assert_eq!(
            SerializedModel::compute_checksum(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_garbage_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        fs::write(&path, b"definitely not a model").unwrap();
        assert!(load_model(&path).is_err());
    }
}
