use ndarray::{Array, Ix4};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("session mutex poisoned: {0}")]
    SessionPoisoned(String),
    #[error("model returned an empty probability vector")]
    EmptyOutput,
    #[error("model output length {output} does not match label count {labels}")]
    LabelCountMismatch { output: usize, labels: usize },
    #[error("predicted index {index} is outside the {labels} configured labels")]
    LabelOutOfRange { index: usize, labels: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
}

pub trait Classifier: Send + Sync + 'static {
    fn classify(&self, input: &Array<f32, Ix4>) -> Result<Prediction, ClassifierError>;
}

/// Index and value of the largest entry. Ties resolve to the lowest index.
pub fn argmax(probabilities: &[f32]) -> Option<(usize, f32)> {
    probabilities
        .iter()
        .copied()
        .enumerate()
        .reduce(|accum, entry| if entry.1 > accum.1 { entry } else { accum })
}
