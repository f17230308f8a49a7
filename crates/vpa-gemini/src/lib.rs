//! Client for Google's Gemini API.
//!
//! Covers the calls the analysis pipeline makes:
//! - Raw upload to the Files API and polling until the file is `ACTIVE`
//! - `generateContent` with an optional file part and model fallback
//! - Recovering a JSON object from model text output

pub mod client;
pub mod config;
pub mod error;
pub mod json;
pub mod types;

pub use client::GeminiClient;
pub use config::GeminiConfig;
pub use error::{GeminiError, GeminiResult};
pub use json::{extract_json_object, parse_model_json};
pub use types::{FileInfo, FileState, UploadedFile};
