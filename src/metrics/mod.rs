pub mod tree_metrics;
pub mod write_performance;
