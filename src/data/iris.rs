//! The iris dataset
//!
//! 150 samples, 4 numeric features, 3 classes. Shipped as CSV with the
//! scikit-learn column names and renamed to canonical snake_case names on
//! load.

use ndarray::{Array1, Array2};
use polars::prelude::*;
use std::io::Cursor;

use crate::error::{MlopsError, Result};

const IRIS_CSV: &str = include_str!("iris.csv");

/// Column names as shipped with the raw dataset
pub const RAW_FEATURE_COLUMNS: [&str; 4] = [
    "sepal length (cm)",
    "sepal width (cm)",
    "petal length (cm)",
    "petal width (cm)",
];

/// Canonical feature names used for training and serving
pub const FEATURE_NAMES: [&str; 4] = ["sepal_length", "sepal_width", "petal_length", "petal_width"];

/// Load the raw iris frame with its original column names
pub fn load_frame() -> Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .into_reader_with_file_handle(Cursor::new(IRIS_CSV.as_bytes()))
        .finish()?;
    Ok(df)
}

/// Rename the raw feature columns to their canonical names
pub fn rename_features(df: &mut DataFrame) -> Result<()> {
    for (raw, canonical) in RAW_FEATURE_COLUMNS.iter().zip(FEATURE_NAMES.iter()) {
        df.rename(raw, (*canonical).into())?;
    }
    Ok(())
}

/// Load the iris dataset as features and labels
pub fn load_iris() -> Result<Dataset> {
    let mut df = load_frame()?;
    rename_features(&mut df)?;
    Dataset::from_frame(&df)
}

/// Labeled tabular data, features separated from the label column
#[derive(Debug, Clone)]
pub struct Dataset {
    pub features: Array2<f64>,
    pub labels: Array1<usize>,
    pub feature_names: Vec<String>,
    pub target_name: String,
}

impl Dataset {
    /// Build a dataset from a frame whose last column holds integer labels
    pub fn from_frame(df: &DataFrame) -> Result<Self> {
        let column_names: Vec<String> = df
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();

        let (target_name, feature_names) = column_names
            .split_last()
            .ok_or_else(|| MlopsError::DataError("frame has no columns".to_string()))?;

        if feature_names.is_empty() {
            return Err(MlopsError::DataError("frame has no feature columns".to_string()));
        }

        let features = columns_to_array2(df, feature_names)?;
        let labels = label_column(df, target_name)?;

        Ok(Self {
            features,
            labels,
            feature_names: feature_names.to_vec(),
            target_name: target_name.clone(),
        })
    }

    pub fn n_samples(&self) -> usize {
        self.features.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }

    /// Sorted distinct labels
    pub fn classes(&self) -> Vec<usize> {
        let mut classes: Vec<usize> = self.labels.to_vec();
        classes.sort_unstable();
        classes.dedup();
        classes
    }
}

fn columns_to_array2(df: &DataFrame, col_names: &[String]) -> Result<Array2<f64>> {
    let col_data: Vec<Vec<f64>> = col_names
        .iter()
        .map(|name| {
            let column = df.column(name)?.cast(&DataType::Float64)?;
            column
                .f64()?
                .into_iter()
                .map(|v| {
                    v.ok_or_else(|| MlopsError::DataError(format!("missing value in column {}", name)))
                })
                .collect::<Result<Vec<f64>>>()
        })
        .collect::<Result<_>>()?;

    Ok(Array2::from_shape_fn((df.height(), col_names.len()), |(i, j)| col_data[j][i]))
}

fn label_column(df: &DataFrame, name: &str) -> Result<Array1<usize>> {
    let column = df.column(name)?.cast(&DataType::Int64)?;
    column
        .i64()?
        .into_iter()
        .map(|v| match v {
            Some(label) if label >= 0 => Ok(label as usize),
            Some(label) => Err(MlopsError::DataError(format!("negative label {} in {}", label, name))),
            None => Err(MlopsError::DataError(format!("missing label in {}", name))),
        })
        .collect()
}
