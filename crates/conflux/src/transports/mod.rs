//! Concrete transport adapters

pub mod mock;
pub mod ollama;
pub mod openai_compat;

pub use mock::{MockOutcome, MockTransport};
pub use ollama::{OllamaConfig, OllamaTransport};
pub use openai_compat::{OpenAiCompatConfig, OpenAiCompatTransport};
