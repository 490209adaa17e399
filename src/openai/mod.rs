//! OpenAI-compatible HTTP client shared by the text, image and speech backends.

mod client;

pub use client::{ChatMessage, OpenAiClient, OpenAiError, OPENAI_API_BASE_URL};
