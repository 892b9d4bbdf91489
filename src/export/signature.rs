//! Model signatures and input examples
//!
//! Shapes follow the MLflow `MLmodel` conventions: inputs as a column-based
//! schema, outputs as a tensor spec, input examples in pandas "split" orient.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{MlopsError, Result};

/// One named input column
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnSpec {
    #[serde(rename = "type")]
    pub dtype: String,
    pub name: String,
    pub required: bool,
}

/// Output tensor description
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TensorSpec {
    pub dtype: String,
    /// `-1` marks the batch dimension
    pub shape: Vec<i64>,
}

/// Input/output schema of a logged model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSignature {
    pub inputs: Vec<ColumnSpec>,
    pub outputs: TensorSpec,
}

impl ModelSignature {
    /// Infer a signature from training inputs and the model's predictions on them
    pub fn infer(feature_names: &[String], x: &Array2<f64>, predictions: &Array1<usize>) -> Result<Self> {
        if feature_names.len() != x.ncols() {
            return Err(MlopsError::ShapeError {
                expected: format!("{} feature names", x.ncols()),
                actual: format!("{} feature names", feature_names.len()),
            });
        }
        if predictions.len() != x.nrows() {
            return Err(MlopsError::ShapeError {
                expected: format!("{} predictions", x.nrows()),
                actual: format!("{} predictions", predictions.len()),
            });
        }

        Ok(Self {
            inputs: feature_names
                .iter()
                .map(|name| ColumnSpec {
                    dtype: "double".to_string(),
                    name: name.clone(),
                    required: true,
                })
                .collect(),
            outputs: TensorSpec {
                dtype: "int64".to_string(),
                shape: vec![-1],
            },
        })
    }

    /// Inputs encoded the way the `signature.inputs` field of `MLmodel` expects
    pub fn inputs_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.inputs)?)
    }

    /// Outputs encoded the way the `signature.outputs` field of `MLmodel` expects
    pub fn outputs_json(&self) -> Result<String> {
        let outputs = json!([{
            "type": "tensor",
            "tensor-spec": { "dtype": self.outputs.dtype, "shape": self.outputs.shape },
        }]);
        Ok(serde_json::to_string(&outputs)?)
    }
}

/// A small sample of valid model input
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputExample {
    pub columns: Vec<String>,
    pub data: Vec<Vec<f64>>,
}

impl InputExample {
    /// Take the first `n_rows` rows of `x`
    pub fn head(feature_names: &[String], x: &Array2<f64>, n_rows: usize) -> Self {
        Self {
            columns: feature_names.to_vec(),
            data: x.rows().into_iter().take(n_rows).map(|row| row.to_vec()).collect(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn names() -> Vec<String> {
        vec!["sepal_length".to_string(), "sepal_width".to_string()]
    }

    #[test]
    fn test_infer_signature() {
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        let preds = array![0, 1];
        let sig = ModelSignature::infer(&names(), &x, &preds).unwrap();

        assert_eq!(sig.inputs.len(), 2);
        assert_eq!(sig.inputs[0].name, "sepal_length");
        assert_eq!(sig.inputs[0].dtype, "double");
        assert_eq!(sig.outputs.dtype, "int64");

        let inputs: serde_json::Value = serde_json::from_str(&sig.inputs_json().unwrap()).unwrap();
        assert_eq!(inputs[1]["type"], "double");
        assert_eq!(inputs[1]["name"], "sepal_width");

        let outputs: serde_json::Value = serde_json::from_str(&sig.outputs_json().unwrap()).unwrap();
        assert_eq!(outputs[0]["tensor-spec"]["shape"][0], -1);
    }

    #[test]
    fn test_infer_rejects_name_mismatch() {
        let x = array![[1.0, 2.0, 3.0]];
        let preds = array![0];
        assert!(ModelSignature::infer(&names(), &x, &preds).is_err());
    }

    #[test]
    fn test_input_example_head() {
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        let example = InputExample::head(&names(), &x, 1);
        assert_eq!(example.data, vec![vec![1.0, 2.0]]);

        let parsed: serde_json::Value = serde_json::from_str(&example.to_json().unwrap()).unwrap();
        assert_eq!(parsed["columns"][0], "sepal_length");
        assert_eq!(parsed["data"][0][1], 2.0);
    }
}
