//! Dataset loading and partitioning

pub mod iris;
pub mod split;

pub use iris::{load_iris, Dataset, FEATURE_NAMES};
pub use split::{train_test_split, TrainTestSplit};
