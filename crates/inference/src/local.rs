//! Local GGUF inference via Candle.
//!
//! Supported model families (all via the quantized Llama architecture):
//! - **Mistral 7B Instruct** — the default chat model
//! - **TinyLlama** (1.1B, ~670 MB) — for edge hardware
//! - **SmolLM** (135M–360M) — smallest practical models, good for tests
//!
//! The model is loaded lazily behind a mutex and can be forced to load
//! early with [`LocalRuntime::warm_up`]. All entry points block the
//! calling thread; the scheduler runs them on blocking workers.

use burrow_core::error::RuntimeError;
use burrow_core::job::{Completion, GenerateParams};
use burrow_core::prompt::USER_TAG;
use burrow_core::runtime::ModelRuntime;
use candle_core::quantized::gguf_file;
use candle_core::{Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::quantized_llama as qlm;
use hf_hub::api::sync::Api;
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;
use tokenizers::Tokenizer;
use tracing::{debug, info};

// ── Well-known model aliases ───────────────────────────────────────────

/// Model presets — friendly aliases that resolve to HuggingFace repos + filenames.
struct ModelPreset {
    repo: &'static str,
    gguf_file: &'static str,
    tokenizer_repo: &'static str,
}

fn resolve_preset(alias: &str) -> Option<ModelPreset> {
    let alias_lower = alias.to_lowercase();
    match alias_lower.as_str() {
        "mistral-7b-instruct" | "mistral" | "mistral-7b" => Some(ModelPreset {
            repo: "TheBloke/Mistral-7B-Instruct-v0.2-GGUF",
            gguf_file: "mistral-7b-instruct-v0.2.Q4_K_M.gguf",
            tokenizer_repo: "mistralai/Mistral-7B-Instruct-v0.2",
        }),
        "tinyllama" | "tiny-llama" | "tinyllama-1.1b" => Some(ModelPreset {
            repo: "TheBloke/TinyLlama-1.1B-Chat-v1.0-GGUF",
            gguf_file: "tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf",
            tokenizer_repo: "TinyLlama/TinyLlama-1.1B-Chat-v1.0",
        }),
        "smollm" | "smollm:135m" | "smollm-135m" => Some(ModelPreset {
            repo: "TheBloke/SmolLM-135M-Instruct-GGUF",
            gguf_file: "smollm-135m-instruct.Q4_K_M.gguf",
            tokenizer_repo: "HuggingFaceTB/SmolLM-135M-Instruct",
        }),
        "smollm:360m" | "smollm-360m" => Some(ModelPreset {
            repo: "TheBloke/SmolLM-360M-Instruct-GGUF",
            gguf_file: "smollm-360m-instruct.Q4_K_M.gguf",
            tokenizer_repo: "HuggingFaceTB/SmolLM-360M-Instruct",
        }),
        _ => None,
    }
}

/// Whether a model spec could be loaded: a known preset alias, or a GGUF
/// file that exists on disk. Used by diagnostics before any download.
pub fn is_supported_model(model_name: &str) -> bool {
    resolve_preset(model_name).is_some()
        || (model_name.ends_with(".gguf") && Path::new(model_name).exists())
}

// ── Local runtime ──────────────────────────────────────────────────────

/// A runtime that runs GGUF-quantized language models locally via Candle.
///
/// The model sits behind a Mutex because Candle's CPU inference holds a
/// mutable KV cache; concurrent generations serialize here, which is what
/// a single loaded model can actually deliver anyway.
pub struct LocalRuntime {
    inner: Mutex<Option<LocalModelState>>,
    model_name: String,
}

/// The loaded model state (tokenizer + weights + config).
struct LocalModelState {
    model: qlm::ModelWeights,
    tokenizer: Tokenizer,
    device: Device,
    eos_token_id: u32,
}

impl LocalRuntime {
    /// Create a new local runtime.
    ///
    /// `model_name` can be:
    /// - A preset alias: `"mistral-7b-instruct"`, `"tinyllama"`, `"smollm:135m"`
    /// - A path to a local GGUF file: `"/path/to/model.gguf"`
    ///
    /// The model is loaded lazily on first generation, or eagerly via
    /// [`warm_up`](ModelRuntime::warm_up).
    pub fn new(model_name: &str) -> Self {
        Self {
            inner: Mutex::new(None),
            model_name: model_name.to_string(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<LocalModelState>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Load the model if it is not loaded yet. Blocks for the duration of
    /// the download (first run) and weight load.
    fn ensure_loaded(&self) -> Result<(), RuntimeError> {
        let mut guard = self.lock();
        if guard.is_none() {
            info!(model = %self.model_name, "Loading local model");
            *guard = Some(LocalModelState::load(&self.model_name)?);
        }
        Ok(())
    }
}

impl LocalModelState {
    /// Load a model by alias or GGUF file path.
    fn load(model_name: &str) -> Result<Self, RuntimeError> {
        let device = Device::Cpu;

        if Path::new(model_name).exists() && model_name.ends_with(".gguf") {
            return Self::load_from_path(Path::new(model_name), &device);
        }

        let preset = resolve_preset(model_name).ok_or_else(|| {
            RuntimeError::ModelNotFound(format!(
                "Unknown model '{model_name}'. Available presets: mistral-7b-instruct, \
                 tinyllama, smollm:135m, smollm:360m. Or provide a path to a .gguf file."
            ))
        })?;

        info!(
            model = model_name,
            repo = preset.repo,
            file = preset.gguf_file,
            "Downloading/loading local model"
        );

        // Download via HuggingFace Hub (cached automatically)
        let api = Api::new().map_err(|e| {
            RuntimeError::Network(format!("Failed to initialize HuggingFace Hub API: {e}"))
        })?;

        let repo = api.model(preset.repo.to_string());
        let model_path = repo.get(preset.gguf_file).map_err(|e| {
            RuntimeError::Network(format!(
                "Failed to download model '{}' from '{}': {e}",
                preset.gguf_file, preset.repo
            ))
        })?;

        let tokenizer_repo = api.model(preset.tokenizer_repo.to_string());
        let tokenizer_path = tokenizer_repo.get("tokenizer.json").map_err(|e| {
            RuntimeError::Network(format!(
                "Failed to download tokenizer from '{}': {e}",
                preset.tokenizer_repo
            ))
        })?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| RuntimeError::LoadFailed(format!("Failed to load tokenizer: {e}")))?;

        Self::load_weights(&model_path, tokenizer, &device)
    }

    /// Load from an explicit GGUF file path, expecting tokenizer.json
    /// next to it.
    fn load_from_path(path: &Path, device: &Device) -> Result<Self, RuntimeError> {
        info!(path = %path.display(), "Loading local GGUF model");

        let tokenizer_path = path.with_file_name("tokenizer.json");
        if !tokenizer_path.exists() {
            return Err(RuntimeError::LoadFailed(format!(
                "No tokenizer.json found next to {}",
                path.display()
            )));
        }
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| RuntimeError::LoadFailed(format!("Failed to load tokenizer: {e}")))?;

        Self::load_weights(path, tokenizer, device)
    }

    fn load_weights(
        path: &Path,
        tokenizer: Tokenizer,
        device: &Device,
    ) -> Result<Self, RuntimeError> {
        let mut file = std::fs::File::open(path)
            .map_err(|e| RuntimeError::LoadFailed(format!("Failed to open model file: {e}")))?;

        let gguf = gguf_file::Content::read(&mut file)
            .map_err(|e| RuntimeError::LoadFailed(format!("Failed to parse GGUF file: {e}")))?;

        let model = qlm::ModelWeights::from_gguf(gguf, &mut file, device)
            .map_err(|e| RuntimeError::LoadFailed(format!("Failed to load model weights: {e}")))?;

        let eos_token_id = tokenizer
            .token_to_id("</s>")
            .or_else(|| tokenizer.token_to_id("<|endoftext|>"))
            .or_else(|| tokenizer.token_to_id("<|im_end|>"))
            .unwrap_or(2); // fallback to common EOS id

        info!(eos_token_id, "Local model loaded successfully");

        Ok(Self {
            model,
            tokenizer,
            device: device.clone(),
            eos_token_id,
        })
    }

    /// Run inference: tokenize → generate tokens → decode.
    fn generate(&mut self, prompt: &str, params: &GenerateParams) -> Result<String, RuntimeError> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| RuntimeError::GenerationFailed(format!("Tokenization failed: {e}")))?;

        let prompt_tokens = encoding.get_ids();

        debug!(
            prompt_tokens = prompt_tokens.len(),
            max_tokens = params.max_tokens,
            temperature = params.temperature,
            "Starting local generation"
        );

        let mut input_ids = Tensor::new(prompt_tokens, &self.device).map_err(map_candle_err)?;
        input_ids = input_ids.unsqueeze(0).map_err(map_candle_err)?;

        let mut logits_processor = if params.temperature <= 0.0 {
            LogitsProcessor::new(42, None, None)
        } else {
            LogitsProcessor::new(42, Some(params.temperature), None)
        };

        let mut generated_tokens: Vec<u32> = Vec::new();
        let mut next_token_tensor = input_ids;

        for _ in 0..params.max_tokens {
            let logits = self
                .model
                .forward(&next_token_tensor, generated_tokens.len())
                .map_err(map_candle_err)?;

            // Get logits for the last position
            let logits = logits.squeeze(0).map_err(map_candle_err)?;
            let logits = logits
                .get(logits.dim(0).map_err(map_candle_err)? - 1)
                .map_err(map_candle_err)?;

            let next_token = logits_processor.sample(&logits).map_err(map_candle_err)?;

            if next_token == self.eos_token_id {
                break;
            }

            generated_tokens.push(next_token);

            // Prepare input for next iteration (just the new token)
            next_token_tensor = Tensor::new(&[next_token][..], &self.device)
                .map_err(map_candle_err)?
                .unsqueeze(0)
                .map_err(map_candle_err)?;
        }

        let output = self
            .tokenizer
            .decode(&generated_tokens, true)
            .map_err(|e| RuntimeError::GenerationFailed(format!("Detokenization failed: {e}")))?;

        debug!(
            completion_tokens = generated_tokens.len(),
            output_len = output.len(),
            "Generation complete"
        );

        Ok(output)
    }
}

/// Map Candle errors to RuntimeError.
fn map_candle_err(e: candle_core::Error) -> RuntimeError {
    RuntimeError::GenerationFailed(format!("Candle inference error: {e}"))
}

/// Clean raw model output: cut at the first hallucinated user turn and
/// strip trailing special tokens.
///
/// Tag-prompted models sometimes keep going after their own turn and
/// invent the user's next message; everything from the first `### user:`
/// on is discarded.
fn trim_output(raw: &str) -> String {
    let cut = raw.split(USER_TAG).next().unwrap_or(raw);
    cut.trim()
        .trim_end_matches("</s>")
        .trim_end_matches("<|endoftext|>")
        .trim_end_matches("<|im_end|>")
        .trim()
        .to_string()
}

impl ModelRuntime for LocalRuntime {
    fn name(&self) -> &str {
        "local-gguf"
    }

    fn model(&self) -> &str {
        &self.model_name
    }

    fn generate(
        &self,
        prompt: &str,
        params: &GenerateParams,
    ) -> Result<Completion, RuntimeError> {
        self.ensure_loaded()?;

        let started = Instant::now();
        let raw = {
            let mut guard = self.lock();
            let state = guard
                .as_mut()
                .ok_or_else(|| RuntimeError::LoadFailed("model state missing".into()))?;
            state.generate(prompt, params)?
        };

        let text = trim_output(&raw);
        let tokens_generated = {
            let guard = self.lock();
            match guard.as_ref() {
                Some(state) => state
                    .tokenizer
                    .encode(text.as_str(), false)
                    .map(|enc| enc.get_ids().len())
                    .unwrap_or(text.len() / 4),
                None => text.len() / 4,
            }
        };

        Ok(Completion {
            text,
            tokens_generated,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn warm_up(&self) -> Result<(), RuntimeError> {
        self.ensure_loaded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_preset_aliases() {
        assert!(resolve_preset("mistral-7b-instruct").is_some());
        assert!(resolve_preset("Mistral").is_some());
        assert!(resolve_preset("tinyllama").is_some());
        assert!(resolve_preset("smollm:135m").is_some());
        assert!(resolve_preset("nonexistent").is_none());
    }

    #[test]
    fn default_preset_is_mistral() {
        let preset = resolve_preset("mistral-7b-instruct").unwrap();
        assert!(preset.repo.contains("Mistral-7B-Instruct"));
        assert!(preset.gguf_file.ends_with(".gguf"));
    }

    #[test]
    fn trim_cuts_hallucinated_user_turn() {
        let raw = "Sure, here you go!\n### user: bob\nand another question";
        assert_eq!(trim_output(raw), "Sure, here you go!");
    }

    #[test]
    fn trim_strips_special_tokens() {
        assert_eq!(trim_output("hello there</s>"), "hello there");
        assert_eq!(trim_output("  hi <|im_end|>"), "hi");
    }

    #[test]
    fn trim_leaves_clean_output_alone() {
        assert_eq!(trim_output("A plain answer."), "A plain answer.");
    }

    #[test]
    fn supported_model_check() {
        assert!(is_supported_model("tinyllama"));
        assert!(!is_supported_model("no-such-model"));
        assert!(!is_supported_model("/nonexistent/model.gguf"));
    }

    #[test]
    fn unknown_model_fails_to_load() {
        let runtime = LocalRuntime::new("no-such-model");
        let err = runtime.warm_up().unwrap_err();
        assert!(matches!(err, RuntimeError::ModelNotFound(_)));
    }
}
