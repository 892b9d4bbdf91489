//! Model training module
//!
//! Provides:
//! - Decision trees and Random Forests
//! - Classification metrics
//! - The candidate training loop

pub mod decision_tree;
pub mod metrics;
pub mod random_forest;
pub mod trainer;

pub use decision_tree::{Criterion, DecisionTree, TreeNode};
pub use metrics::{ClassScores, ClassificationReport};
pub use random_forest::{MaxFeatures, RandomForest};
pub use trainer::{build_forest, candidate_run_name, run_training, BestModelRecord, CandidateResult};
