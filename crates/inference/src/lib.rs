//! Local model runtime for Burrow.
//!
//! Runs GGUF-quantized language models on the host via
//! [Candle](https://github.com/huggingface/candle). No inference server,
//! no API keys: the model file is downloaded once and runs in-process.

pub mod local;

pub use local::{is_supported_model, LocalRuntime};
