pub mod evaluator;
pub mod settlement;
