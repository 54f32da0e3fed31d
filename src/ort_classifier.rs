use crate::{
    classifier::{argmax, Classifier, ClassifierError, Prediction},
    config::ModelConfig,
    labels::ClassLabels,
    preprocess::{INPUT_HEIGHT, INPUT_WIDTH},
};
use ndarray::{Array, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

/// ONNX-backed classifier. Sessions are created once at startup and shared
/// read-only across requests; dispatch is round-robin over the pool.
pub struct OrtClassifier {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    labels: ClassLabels,
}

impl OrtClassifier {
    pub fn new(
        model_config: &ModelConfig,
        labels: ClassLabels,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        ort::init().commit()?;

        let num_instances = model_config.num_instances;
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_model_path())?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!("Created {} ONNX sessions", num_instances);

        let classifier = Self {
            counter: Arc::new(AtomicUsize::new(0)),
            sessions: Arc::new(sessions),
            labels,
        };
        classifier.check_output_dimension()?;

        Ok(classifier)
    }

    // One forward pass over a zero tensor so that a label/output mismatch
    // fails startup instead of the first request.
    fn check_output_dimension(&self) -> Result<(), ClassifierError> {
        let input = Array::zeros((1, INPUT_HEIGHT as usize, INPUT_WIDTH as usize, 3));
        let probabilities = self.run_inference(&input)?;

        if probabilities.len() != self.labels.len() {
            return Err(ClassifierError::LabelCountMismatch {
                output: probabilities.len(),
                labels: self.labels.len(),
            });
        }

        Ok(())
    }

    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<Vec<f32>, ClassifierError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let session_arc = &self.sessions[index];
        let mut session = session_arc
            .lock()
            .map_err(|e| ClassifierError::SessionPoisoned(e.to_string()))?;

        tracing::debug!("Handling request with session {}", index);
        let output_name = session.outputs[0].name.clone();

        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.to_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| ClassifierError::Inference(format!("failed to build tensor: {}", e)))?;

        let input_tensor = ort::inputs![tensor_ref];

        let outputs = session
            .run(input_tensor)
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        let (_, data) = outputs[output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::Inference(format!("failed to extract tensor: {}", e)))?;

        Ok(data.to_vec())
    }
}

impl Classifier for OrtClassifier {
    fn classify(&self, input: &Array<f32, Ix4>) -> Result<Prediction, ClassifierError> {
        let probabilities = self.run_inference(input)?;

        let (index, confidence) = argmax(&probabilities).ok_or(ClassifierError::EmptyOutput)?;
        let label = self
            .labels
            .get(index)
            .ok_or(ClassifierError::LabelOutOfRange {
                index,
                labels: self.labels.len(),
            })?
            .to_string();

        Ok(Prediction { label, confidence })
    }
}
