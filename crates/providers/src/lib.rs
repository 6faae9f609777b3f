//! LLM provider implementations for ironloop.
//!
//! One thin HTTP adapter ([`OpenAiCompatProvider`]) covers the vast
//! majority of hosted and local backends, since most expose an
//! OpenAI-compatible `/chat/completions` endpoint. [`RetryProvider`]
//! wraps any provider with rate-limit-aware exponential backoff that
//! unwinds promptly on cancellation.

pub mod openai_compat;
pub mod retry;

pub use openai_compat::OpenAiCompatProvider;
pub use retry::{RetryPolicy, RetryProvider};
