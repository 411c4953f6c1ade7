pub mod aggregate;
pub mod evaluator;
pub mod orchestrator;
pub mod pipeline;

pub use evaluator::CommandEvaluatorFactory;
pub use orchestrator::Orchestrator;
pub use pipeline::{EvaluationPipeline, ExperimentEvaluation, ModelEvaluation};
