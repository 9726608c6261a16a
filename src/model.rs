use std::fs::File;
use std::io::Read;
use std::sync::{Arc, Mutex};

use image::imageops::FilterType;
use serde::Serialize;
use tensorflow::{
    Graph, ImportGraphDefOptions, Operation, Session, SessionOptions, SessionRunArgs, Tensor,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::Config;

pub const NUTRIENT_LABELS: [&str; 4] = [
    "Healthy",
    "Kalium_Deficiency",
    "Nitrogen_Deficiency",
    "Phosphorus_Deficiency",
];

pub const PLANT_LABELS: [&str; 6] = ["Bayam", "Kangkung", "Selada", "Timun", "Tomat", "bokChoy"];

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("cannot decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("failed to read model {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("tensorflow: {0}")]
    Tensorflow(String),
    #[error("operation '{0}' not found in graph")]
    MissingOperation(String),
    #[error("model produced {outputs} scores for {labels} labels")]
    LabelMismatch { outputs: usize, labels: usize },
    #[error("model produced no scores")]
    EmptyOutput,
    #[error("model session lock poisoned")]
    Poisoned,
}

impl From<tensorflow::Status> for ModelError {
    fn from(status: tensorflow::Status) -> Self {
        ModelError::Tensorflow(status.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Nutrient,
    Plant,
}

impl TaskKind {
    pub fn name(self) -> &'static str {
        match self {
            TaskKind::Nutrient => "nutrient",
            TaskKind::Plant => "plant",
        }
    }

    pub fn labels(self) -> &'static [&'static str] {
        match self {
            TaskKind::Nutrient => &NUTRIENT_LABELS,
            TaskKind::Plant => &PLANT_LABELS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
}

/// A decoded image laid out as `[1, size, size, 3]`, values in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct ImageTensor {
    pub size: u32,
    pub data: Vec<f32>,
}

impl ImageTensor {
    pub fn shape(&self) -> [u64; 4] {
        [1, self.size as u64, self.size as u64, 3]
    }
}

/// Decodes, stretches to `size`x`size` and scales to `[0, 1]`.
/// Aspect ratio is not preserved and nothing is padded.
pub fn preprocess_image(image_data: &[u8], size: u32) -> Result<ImageTensor, ModelError> {
    let img = image::load_from_memory(image_data)?;
    let rgb = img
        .resize_exact(size, size, FilterType::Nearest)
        .into_rgb8();

    let data = rgb
        .pixels()
        .flat_map(|pixel| pixel.0)
        .map(|channel| channel as f32 / 255.0)
        .collect();

    Ok(ImageTensor { size, data })
}

/// Argmax over `probabilities`. Ties resolve to the lowest index.
pub fn top_prediction(probabilities: &[f32], labels: &[String]) -> Result<Prediction, ModelError> {
    if probabilities.is_empty() {
        return Err(ModelError::EmptyOutput);
    }
    if probabilities.len() != labels.len() {
        return Err(ModelError::LabelMismatch {
            outputs: probabilities.len(),
            labels: labels.len(),
        });
    }

    let (index, confidence) = probabilities.iter().copied().enumerate().fold(
        (0, probabilities[0]),
        |best, (i, p)| if p > best.1 { (i, p) } else { best },
    );

    Ok(Prediction {
        label: labels[index].clone(),
        confidence,
    })
}

pub trait Classifier: Send + Sync {
    /// One forward pass; returns the output probability vector.
    fn predict_probabilities(&self, input: &ImageTensor) -> Result<Vec<f32>, ModelError>;
}

struct LoadedGraph {
    session: Session,
    graph: Graph,
}

fn find_operation(graph: &Graph, name: &str) -> Result<Operation, ModelError> {
    graph
        .operation_by_name(name)
        .map_err(|e| ModelError::Tensorflow(e.to_string()))?
        .ok_or_else(|| ModelError::MissingOperation(name.to_string()))
}

/// A frozen TensorFlow graph. Runs are serialized behind a lock.
pub struct TensorflowClassifier {
    inner: Mutex<LoadedGraph>,
    input_op: String,
    output_op: String,
}

impl TensorflowClassifier {
    pub fn load(model_path: &str, input_op: &str, output_op: &str) -> Result<Self, ModelError> {
        let io_error = |source| ModelError::Io {
            path: model_path.to_string(),
            source,
        };
        let mut model_bytes = Vec::new();
        File::open(model_path)
            .map_err(io_error)?
            .read_to_end(&mut model_bytes)
            .map_err(io_error)?;

        let mut graph = Graph::new();
        graph.import_graph_def(&model_bytes, &ImportGraphDefOptions::new())?;
        let session = Session::new(&SessionOptions::new(), &graph)?;

        // Fail at startup rather than on the first request.
        find_operation(&graph, input_op)?;
        find_operation(&graph, output_op)?;

        Ok(TensorflowClassifier {
            inner: Mutex::new(LoadedGraph { session, graph }),
            input_op: input_op.to_string(),
            output_op: output_op.to_string(),
        })
    }
}

impl Classifier for TensorflowClassifier {
    fn predict_probabilities(&self, input: &ImageTensor) -> Result<Vec<f32>, ModelError> {
        let mut tensor = Tensor::new(&input.shape());
        tensor.copy_from_slice(&input.data);

        let loaded = self.inner.lock().map_err(|_| ModelError::Poisoned)?;
        let input_operation = find_operation(&loaded.graph, &self.input_op)?;
        let output_operation = find_operation(&loaded.graph, &self.output_op)?;

        let mut args = SessionRunArgs::new();
        args.add_feed(&input_operation, 0, &tensor);
        let output_token = args.request_fetch(&output_operation, 0);
        loaded.session.run(&mut args)?;

        let output: Tensor<f32> = args.fetch(output_token)?;
        Ok(output.to_vec())
    }
}

/// One prediction domain: a classifier plus the labels of its output layer.
pub struct ClassifierTask {
    pub kind: TaskKind,
    pub labels: Vec<String>,
    pub image_size: u32,
    classifier: Box<dyn Classifier>,
}

impl ClassifierTask {
    pub fn new(kind: TaskKind, classifier: Box<dyn Classifier>, image_size: u32) -> Self {
        ClassifierTask {
            kind,
            labels: kind.labels().iter().map(|l| l.to_string()).collect(),
            image_size,
            classifier,
        }
    }

    pub fn predict(&self, image_data: &[u8]) -> Result<Prediction, ModelError> {
        let input = preprocess_image(image_data, self.image_size)?;
        let probabilities = self.classifier.predict_probabilities(&input)?;
        debug!(task = self.kind.name(), ?probabilities, "forward pass");
        top_prediction(&probabilities, &self.labels)
    }
}

/// Both classifiers, loaded once at startup and read-only afterwards.
#[derive(Clone)]
pub struct ModelRegistry {
    nutrient: Arc<ClassifierTask>,
    plant: Arc<ClassifierTask>,
}

impl ModelRegistry {
    pub fn new(nutrient: ClassifierTask, plant: ClassifierTask) -> Self {
        ModelRegistry {
            nutrient: Arc::new(nutrient),
            plant: Arc::new(plant),
        }
    }

    pub fn load(config: &Config) -> Result<Self, ModelError> {
        let load = |kind: TaskKind, path: &str| -> Result<ClassifierTask, ModelError> {
            let classifier = TensorflowClassifier::load(path, &config.input_op, &config.output_op)?;
            info!(task = kind.name(), %path, "model loaded");
            Ok(ClassifierTask::new(
                kind,
                Box::new(classifier),
                config.image_size,
            ))
        };

        Ok(ModelRegistry::new(
            load(TaskKind::Nutrient, &config.nutrient_model_path)?,
            load(TaskKind::Plant, &config.plant_model_path)?,
        ))
    }

    pub fn get(&self, kind: TaskKind) -> Arc<ClassifierTask> {
        match kind {
            TaskKind::Nutrient => Arc::clone(&self.nutrient),
            TaskKind::Plant => Arc::clone(&self.plant),
        }
    }
}
