//! ModelRuntime trait — the abstraction over the local inference backend.
//!
//! Deliberately synchronous: a local GGUF generation blocks a thread for
//! its whole duration and cannot be interrupted mid-call. The scheduler
//! owns the `spawn_blocking` hop and the deadline; implementations just
//! compute.

use crate::error::RuntimeError;
use crate::job::{Completion, GenerateParams};

/// The model boundary.
///
/// `generate` is called from a blocking worker thread, one call per
/// scheduler worker slot. Implementations must be safe to call from
/// multiple threads at once (serialize internally if the backend is
/// single-session).
pub trait ModelRuntime: Send + Sync {
    /// Backend name (e.g., "local-gguf").
    fn name(&self) -> &str;

    /// Model identifier currently loaded (or configured to load).
    fn model(&self) -> &str;

    /// Run one generation to completion. Blocks the calling thread.
    fn generate(
        &self,
        prompt: &str,
        params: &GenerateParams,
    ) -> std::result::Result<Completion, RuntimeError>;

    /// Force the model to load now, surfacing load errors eagerly instead
    /// of on the first user message. Blocks the calling thread.
    fn warm_up(&self) -> std::result::Result<(), RuntimeError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoRuntime;

    impl ModelRuntime for EchoRuntime {
        fn name(&self) -> &str {
            "echo"
        }

        fn model(&self) -> &str {
            "echo-0"
        }

        fn generate(
            &self,
            prompt: &str,
            _params: &GenerateParams,
        ) -> std::result::Result<Completion, RuntimeError> {
            Ok(Completion {
                text: prompt.to_string(),
                tokens_generated: prompt.len() / 4,
                duration_ms: 0,
            })
        }
    }

    #[test]
    fn echo_runtime_round_trip() {
        let runtime = EchoRuntime;
        let params = GenerateParams {
            temperature: 0.0,
            max_tokens: 16,
        };
        let out = runtime.generate("hello", &params).unwrap();
        assert_eq!(out.text, "hello");
        assert!(runtime.warm_up().is_ok());
    }
}
