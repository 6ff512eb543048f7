use crate::error::{Result, VectorStoreError};
use crate::lexical::{LexicalEmbedder, LEXICAL_MODEL_ID};
use crate::provider::EmbeddingProvider;
use crate::similarity::normalize;
use async_trait::async_trait;
use ndarray::{Array2, ArrayD, Axis, Dimension, Ix2, Ix3};
use once_cell::sync::OnceCell;
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProvider, ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, Input, Session, SessionInputs};
use ort::tensor::TensorElementType;
use ort::value::{DynTensor, Tensor};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokenizers::{Encoding, PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tokio::task::spawn_blocking;

const DEFAULT_MODEL: &str = "bge-small";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EmbeddingMode {
    /// ONNX Runtime sentence-embedding model.
    Fast,
    /// Deterministic lexical embedder; no model files needed.
    Stub,
}

impl EmbeddingMode {
    pub fn from_env() -> Result<Self> {
        let raw = env::var("PROMPT_EMBEDDING_MODE").unwrap_or_else(|_| "fast".to_string());
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "stub" => Ok(Self::Stub),
            other => Err(VectorStoreError::Other(format!(
                "Unsupported PROMPT_EMBEDDING_MODE '{other}' (expected 'fast' or 'stub')"
            ))),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Stub => "stub",
        }
    }
}

#[derive(Clone, Debug)]
struct ModelSpec {
    id: String,
    onnx_rel_path: PathBuf,
    tokenizer_rel_path: PathBuf,
    dimension: usize,
    max_length: usize,
    max_batch: usize,
}

#[derive(Debug, Deserialize)]
struct ModelsManifest {
    schema_version: u32,
    models: Vec<ManifestModel>,
}

#[derive(Debug, Deserialize)]
struct ManifestModel {
    id: String,
    dimension: usize,
    max_length: usize,
    max_batch: usize,
    #[serde(default)]
    onnx: Option<String>,
    #[serde(default)]
    tokenizer: Option<String>,
}

fn normalize_model_id(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "bge-small-en-v1.5" => "bge-small".to_string(),
        "bge-base-en-v1.5" => "bge-base".to_string(),
        other => other.to_string(),
    }
}

fn manifest_rel_path(model_id: &str, rel: &str) -> Result<PathBuf> {
    let path = Path::new(rel);
    let mut has_component = false;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::ParentDir => {
                return Err(VectorStoreError::unavailable(format!(
                    "Model manifest entry for '{model_id}' has unsafe asset path '{rel}'"
                )));
            }
            Component::CurDir => {}
            Component::Normal(_) => has_component = true,
        }
    }
    if !has_component {
        return Err(VectorStoreError::unavailable(format!(
            "Model manifest entry for '{model_id}' has an empty asset path"
        )));
    }
    Ok(path.to_path_buf())
}

fn load_spec(model_dir: &Path, model_id: &str) -> Result<ModelSpec> {
    let manifest_path = model_dir.join("manifest.json");
    if !manifest_path.exists() {
        // Without a manifest only the default model layout is known.
        if model_id == DEFAULT_MODEL {
            return Ok(ModelSpec {
                id: model_id.to_string(),
                onnx_rel_path: PathBuf::from("model.onnx"),
                tokenizer_rel_path: PathBuf::from("tokenizer.json"),
                dimension: 384,
                max_length: 512,
                max_batch: 32,
            });
        }
        return Err(VectorStoreError::unavailable(format!(
            "Unknown embedding model '{model_id}' and no manifest at {}",
            manifest_path.display()
        )));
    }

    let raw = std::fs::read_to_string(&manifest_path)?;
    let manifest: ModelsManifest = serde_json::from_str(&raw)?;
    if manifest.schema_version != 1 {
        return Err(VectorStoreError::unavailable(format!(
            "Unsupported model manifest schema_version {} (expected 1)",
            manifest.schema_version
        )));
    }
    let model = manifest
        .models
        .iter()
        .find(|m| m.id.eq_ignore_ascii_case(model_id))
        .ok_or_else(|| {
            let known: Vec<&str> = manifest.models.iter().map(|m| m.id.as_str()).collect();
            VectorStoreError::unavailable(format!(
                "Unknown embedding model '{model_id}'. Available: {}",
                known.join(", ")
            ))
        })?;

    Ok(ModelSpec {
        id: model.id.clone(),
        onnx_rel_path: manifest_rel_path(&model.id, model.onnx.as_deref().unwrap_or("model.onnx"))?,
        tokenizer_rel_path: manifest_rel_path(
            &model.id,
            model.tokenizer.as_deref().unwrap_or("tokenizer.json"),
        )?,
        dimension: model.dimension,
        max_length: model.max_length,
        max_batch: model.max_batch.max(1),
    })
}

/// Directory holding `manifest.json` and one sub-directory per model.
#[must_use]
pub fn model_dir() -> PathBuf {
    if let Ok(path) = env::var("PROMPT_MODEL_DIR") {
        return PathBuf::from(path);
    }
    if let Ok(mut dir) = env::current_dir() {
        loop {
            let candidate = dir.join("models");
            if candidate.join("manifest.json").exists() {
                return candidate;
            }
            if !dir.pop() {
                break;
            }
        }
    }
    let base = env::var("XDG_CACHE_HOME").map_or_else(
        |_| {
            env::var("HOME")
                .map_or_else(|_| PathBuf::from("."), PathBuf::from)
                .join(".cache")
        },
        PathBuf::from,
    );
    base.join("prompt-check").join("models")
}

struct OrtBackend {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    max_batch: usize,
    dimension: usize,
}

static SESSIONS: OnceCell<Mutex<HashMap<String, Arc<OrtBackend>>>> = OnceCell::new();

impl OrtBackend {
    /// Load once per process and model id; concurrent callers wait on the same lock.
    fn shared(spec: &ModelSpec, model_dir: &Path) -> Result<Arc<Self>> {
        let sessions = SESSIONS.get_or_init(|| Mutex::new(HashMap::new()));
        let mut guard = sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(backend) = guard.get(&spec.id) {
            return Ok(backend.clone());
        }
        let backend = Arc::new(Self::load(spec, model_dir)?);
        guard.insert(spec.id.clone(), backend.clone());
        Ok(backend)
    }

    fn load(spec: &ModelSpec, model_dir: &Path) -> Result<Self> {
        if !tokenizers::utils::parallelism::is_parallelism_configured() {
            tokenizers::utils::parallelism::set_parallelism(false);
        }

        let root = model_dir.join(&spec.id);
        let model_path = root.join(&spec.onnx_rel_path);
        let tokenizer_path = root.join(&spec.tokenizer_rel_path);
        if !model_path.exists() || !tokenizer_path.exists() {
            return Err(VectorStoreError::unavailable(format!(
                "Model files for '{}' are missing (expected {} and {}). Set PROMPT_MODEL_DIR or run with PROMPT_EMBEDDING_MODE=stub.",
                spec.id,
                model_path.display(),
                tokenizer_path.display()
            )));
        }

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| VectorStoreError::unavailable(format!("Tokenizer load failed: {e}")))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..PaddingParams::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: spec.max_length,
                ..TruncationParams::default()
            }))
            .map_err(|e| VectorStoreError::unavailable(format!("Tokenizer truncation: {e}")))?;

        let session = Session::builder()
            .and_then(|b| b.with_intra_threads(session_threads()))
            .and_then(|b| b.with_intra_op_spinning(false))
            .and_then(|b| b.with_execution_providers(execution_providers()))
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.commit_from_file(&model_path))
            .map_err(|e| {
                VectorStoreError::unavailable(format!(
                    "Failed to load ONNX model {}: {e}",
                    model_path.display()
                ))
            })?;

        log::info!(
            "Loaded embedding model '{}' (dim {}, max_length {}, batch {})",
            spec.id,
            spec.dimension,
            spec.max_length,
            spec.max_batch
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            max_batch: spec.max_batch,
            dimension: spec.dimension,
        })
    }

    fn embed_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.max_batch) {
            let encodings = self
                .tokenizer
                .encode_batch(batch.to_vec(), true)
                .map_err(|e| VectorStoreError::unavailable(format!("Tokenization failed: {e}")))?;
            if encodings.is_empty() {
                continue;
            }
            let (ids, mask, types) = encoding_matrices(&encodings);
            let shape = ids.raw_dim().into_dyn();

            let mut available: HashMap<&str, DynTensor> = HashMap::new();
            available.insert("input_ids", to_tensor(ids)?);
            available.insert("attention_mask", to_tensor(mask.clone())?);
            available.insert("token_type_ids", to_tensor(types)?);

            let hidden = {
                let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
                let mut feed: HashMap<String, DynTensor> = HashMap::new();
                for input in &session.inputs {
                    let value = match available.get(input.name.as_str()) {
                        Some(tensor) => tensor.clone(),
                        None => zero_input(&shape, input)?,
                    };
                    feed.insert(input.name.clone(), value);
                }
                let outputs = session.run(SessionInputs::from(feed)).map_err(|e| {
                    VectorStoreError::unavailable(format!("ONNX forward pass failed: {e}"))
                })?;
                if outputs.len() == 0 {
                    return Err(VectorStoreError::unavailable("ONNX model returned no outputs"));
                }
                let array = outputs[0]
                    .try_extract_array::<f32>()
                    .map_err(|e| {
                        VectorStoreError::unavailable(format!("Unreadable ONNX output: {e}"))
                    })?
                    .to_owned();
                drop(outputs);
                array
            };
            out.extend(pool_rows(hidden, &mask, self.dimension)?);
        }
        Ok(out)
    }
}

fn session_threads() -> usize {
    let cpus = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
    (cpus / 4).clamp(1, 4)
}

fn cuda_requested() -> bool {
    let disabled = env::var("ORT_DISABLE_CUDA")
        .is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
    let requested = env::var("PROMPT_USE_CUDA").is_ok_and(|v| v == "1")
        || env::var("PROMPT_CUDA_DEVICE").is_ok();
    !disabled && requested
}

fn execution_providers() -> Vec<ExecutionProviderDispatch> {
    let cpu = CPUExecutionProvider::default().build();
    if !cuda_requested() {
        return vec![cpu];
    }
    let mut cuda = CUDAExecutionProvider::default();
    if let Some(device) = env::var("PROMPT_CUDA_DEVICE")
        .ok()
        .and_then(|raw| raw.parse::<i32>().ok())
    {
        cuda = cuda.with_device_id(device);
    }
    match cuda.is_available() {
        Ok(true) => vec![cuda.build(), cpu],
        Ok(false) => {
            log::warn!("CUDA execution provider unavailable, using CPU embeddings");
            vec![cpu]
        }
        Err(err) => {
            log::warn!("CUDA execution provider check failed ({err}), using CPU embeddings");
            vec![cpu]
        }
    }
}

fn encoding_matrices(encodings: &[Encoding]) -> (Array2<i64>, Array2<i64>, Array2<i64>) {
    let rows = encodings.len();
    let cols = encodings.iter().map(Encoding::len).max().unwrap_or(0);
    let pick = |values: fn(&Encoding) -> &[u32]| {
        Array2::from_shape_fn((rows, cols), |(r, c)| {
            values(&encodings[r]).get(c).map_or(0, |v| i64::from(*v))
        })
    };
    (
        pick(Encoding::get_ids),
        pick(Encoding::get_attention_mask),
        pick(Encoding::get_type_ids),
    )
}

fn to_tensor(array: Array2<i64>) -> Result<DynTensor> {
    Tensor::from_array(array.into_dyn())
        .map(|t| t.upcast())
        .map_err(|e| VectorStoreError::unavailable(format!("Tensor build failed: {e}")))
}

fn zero_input(shape: &ndarray::IxDyn, input: &Input) -> Result<DynTensor> {
    let unsupported = || {
        VectorStoreError::unavailable(format!(
            "Model input '{}' has an unsupported type {:?}",
            input.name, input.input_type
        ))
    };
    let ort::value::ValueType::Tensor { ty, .. } = &input.input_type else {
        return Err(unsupported());
    };
    let built = match ty {
        TensorElementType::Int64 => {
            Tensor::from_array(ArrayD::<i64>::zeros(shape.clone())).map(|t| t.upcast())
        }
        TensorElementType::Float32 => {
            Tensor::from_array(ArrayD::<f32>::zeros(shape.clone())).map(|t| t.upcast())
        }
        TensorElementType::Bool => {
            Tensor::from_array(ArrayD::from_elem(shape.clone(), false)).map(|t| t.upcast())
        }
        _ => return Err(unsupported()),
    };
    built.map_err(|e| VectorStoreError::unavailable(format!("Tensor build failed: {e}")))
}

/// Turn model output into one unit vector per input: pooled output passes through,
/// token-level output is mean-pooled over the attention mask.
fn pool_rows(output: ArrayD<f32>, mask: &Array2<i64>, dimension: usize) -> Result<Vec<Vec<f32>>> {
    let shape_err =
        |e: ndarray::ShapeError| VectorStoreError::unavailable(format!("Bad output shape: {e}"));
    let rows: Vec<Vec<f32>> = match output.ndim() {
        2 => output
            .into_dimensionality::<Ix2>()
            .map_err(shape_err)?
            .outer_iter()
            .map(|row| row.to_vec())
            .collect(),
        3 => {
            let hidden = output.into_dimensionality::<Ix3>().map_err(shape_err)?;
            hidden
                .outer_iter()
                .enumerate()
                .map(|(idx, tokens)| {
                    let mut sum = vec![0.0f32; tokens.len_of(Axis(1))];
                    let mut count = 0.0f32;
                    for (pos, token) in tokens.outer_iter().enumerate() {
                        if mask.get((idx, pos)).copied().unwrap_or(0) == 0 {
                            continue;
                        }
                        count += 1.0;
                        for (acc, value) in sum.iter_mut().zip(token.iter()) {
                            *acc += value;
                        }
                    }
                    if count > 0.0 {
                        sum.iter_mut().for_each(|v| *v /= count);
                    }
                    sum
                })
                .collect()
        }
        _ => {
            return Err(VectorStoreError::unavailable(format!(
                "Unexpected model output dims {:?}",
                output.shape()
            )))
        }
    };

    rows.into_iter()
        .map(|mut row| {
            if row.len() != dimension {
                return Err(VectorStoreError::InvalidDimension {
                    expected: dimension,
                    actual: row.len(),
                });
            }
            normalize(&mut row);
            Ok(row)
        })
        .collect()
}

/// Embedding model selected from the process environment.
pub struct EmbeddingModel {
    backend: EmbeddingBackend,
    model_id: String,
    dimension: usize,
}

enum EmbeddingBackend {
    Ort(Arc<OrtBackend>),
    Lexical(LexicalEmbedder),
}

impl EmbeddingModel {
    pub fn from_env() -> Result<Self> {
        let mode = EmbeddingMode::from_env()?;
        let model = env::var("PROMPT_EMBEDDING_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into());
        Self::new(mode, &model)
    }

    pub fn new(mode: EmbeddingMode, model: &str) -> Result<Self> {
        match mode {
            EmbeddingMode::Stub => Ok(Self::stub()),
            EmbeddingMode::Fast => {
                let dir = model_dir();
                let spec = load_spec(&dir, &normalize_model_id(model))?;
                let backend = OrtBackend::shared(&spec, &dir)?;
                Ok(Self {
                    dimension: backend.dimension,
                    model_id: spec.id,
                    backend: EmbeddingBackend::Ort(backend),
                })
            }
        }
    }

    #[must_use]
    pub fn stub() -> Self {
        let lexical = LexicalEmbedder::new();
        Self {
            dimension: lexical.dimension(),
            model_id: LEXICAL_MODEL_ID.to_string(),
            backend: EmbeddingBackend::Lexical(lexical),
        }
    }

    #[must_use]
    pub const fn mode(&self) -> EmbeddingMode {
        match self.backend {
            EmbeddingBackend::Ort(_) => EmbeddingMode::Fast,
            EmbeddingBackend::Lexical(_) => EmbeddingMode::Stub,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        match &self.backend {
            EmbeddingBackend::Lexical(lexical) => lexical.embed_batch(texts).await,
            EmbeddingBackend::Ort(backend) => {
                let backend = backend.clone();
                let owned = texts.to_vec();
                spawn_blocking(move || backend.embed_blocking(&owned))
                    .await
                    .map_err(|e| {
                        VectorStoreError::unavailable(format!("Embedding task failed: {e}"))
                    })?
            }
        }
    }
}
