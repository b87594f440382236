//! Uniform interface over local text-inference backends.
//!
//! Two wire protocols are supported, each owning its own request
//! translation: Ollama's native chat API ([`ollama`]) and OpenAI-style
//! `/chat/completions` servers such as vLLM, SGLang or LM Studio
//! ([`openai`]). Both normalise timeouts, context clamping and error
//! classification into [`BackendError`].

pub mod adapter;
pub mod error;
mod http;
pub mod ollama;
pub mod openai;

pub use adapter::{build_backend, probe_capability, Generation, GenerationRequest, InferenceBackend};
pub use error::BackendError;
