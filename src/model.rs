use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::{conv2d, linear, Conv2d, Conv2dConfig, Dropout, Linear, VarBuilder, VarMap};
use serde::Serialize;
use thiserror::Error;

/// Side length of the square image the network expects.
pub const IMAGE_SIZE: usize = 224;

const FLATTENED_FEATURES: usize = 26 * 26 * 128;
const HIDDEN_UNITS: usize = 512;
const DROPOUT_RATE: f32 = 0.5;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),
    #[error("model produced no output")]
    EmptyOutput,
    #[error("failed to fetch model from {url}: {reason}")]
    Download { url: String, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where the weights of a running classifier came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    Loaded { path: PathBuf },
    Untrained,
}

impl ModelSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSource::Loaded { .. } => "loaded",
            ModelSource::Untrained => "untrained",
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            ModelSource::Loaded { path } => Some(path),
            ModelSource::Untrained => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Label {
    Dog,
    Cat,
}

#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub filename: String,
    pub label: Label,
    pub probability: f32,
    pub confidence: f32,
}

impl Prediction {
    /// `probability` is the sigmoid output, i.e. the likelihood of "Dog".
    pub fn from_probability(filename: impl Into<String>, probability: f32) -> Self {
        let label = if probability > 0.5 {
            Label::Dog
        } else {
            Label::Cat
        };
        let confidence = match label {
            Label::Dog => probability,
            Label::Cat => 1.0 - probability,
        };

        Prediction {
            filename: filename.into(),
            label,
            probability,
            confidence,
        }
    }
}

/// Maps a `(1, 3, 224, 224)` batch to the probability of the image showing a dog.
pub trait ImageClassifier: Send + Sync + 'static {
    fn predict(&self, batch: &Tensor) -> Result<f32, ModelError>;
}

/// Three conv/pool blocks followed by a small dense head.
struct CatDogNet {
    conv1: Conv2d,
    conv2: Conv2d,
    conv3: Conv2d,
    dropout: Dropout,
    fc1: Linear,
    fc2: Linear,
}

impl CatDogNet {
    fn new(vb: VarBuilder) -> candle_core::Result<Self> {
        let cfg = Conv2dConfig::default();
        let conv1 = conv2d(3, 32, 3, cfg, vb.pp("conv1"))?;
        let conv2 = conv2d(32, 64, 3, cfg, vb.pp("conv2"))?;
        let conv3 = conv2d(64, 128, 3, cfg, vb.pp("conv3"))?;
        let fc1 = linear(FLATTENED_FEATURES, HIDDEN_UNITS, vb.pp("fc1"))?;
        let fc2 = linear(HIDDEN_UNITS, 1, vb.pp("fc2"))?;

        Ok(Self {
            conv1,
            conv2,
            conv3,
            dropout: Dropout::new(DROPOUT_RATE),
            fc1,
            fc2,
        })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let logits = xs
            .apply(&self.conv1)?
            .relu()?
            .max_pool2d(2)?
            .apply(&self.conv2)?
            .relu()?
            .max_pool2d(2)?
            .apply(&self.conv3)?
            .relu()?
            .max_pool2d(2)?
            .flatten_from(1)?
            .apply_t(&self.dropout, false)?
            .apply(&self.fc1)?
            .relu()?
            .apply(&self.fc2)?;

        candle_nn::ops::sigmoid(&logits)
    }
}

pub struct Classifier {
    net: CatDogNet,
    device: Device,
    // only set for freshly initialised weights, so they can be written out
    varmap: Option<VarMap>,
}

impl Classifier {
    /// Loads safetensors weights from `path`, or falls back to an untrained
    /// network when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<(Self, ModelSource), ModelError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(
                "Model file {} not found, starting with an untrained model",
                path.display()
            );
            return Ok((Self::untrained()?, ModelSource::Untrained));
        }

        let device = Device::Cpu;
        let tensors = candle_core::safetensors::load(path, &device)?;
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);
        let net = CatDogNet::new(vb)?;
        tracing::info!("Model loaded from {}", path.display());

        Ok((
            Self {
                net,
                device,
                varmap: None,
            },
            ModelSource::Loaded {
                path: path.to_path_buf(),
            },
        ))
    }

    pub fn untrained() -> Result<Self, ModelError> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let net = CatDogNet::new(vb)?;

        Ok(Self {
            net,
            device,
            varmap: Some(varmap),
        })
    }

    /// Writes freshly initialised weights to `path`. Loaded weights are already on disk.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        match &self.varmap {
            Some(varmap) => Ok(varmap.save(path)?),
            None => Ok(()),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

impl ImageClassifier for Classifier {
    fn predict(&self, batch: &Tensor) -> Result<f32, ModelError> {
        let output = self.net.forward(batch)?;
        let scores = output.flatten_all()?.to_vec1::<f32>()?;

        scores.first().copied().ok_or(ModelError::EmptyOutput)
    }
}
