//! Video storage client.
//!
//! Directly uploaded videos go to a public Supabase Storage bucket through its
//! S3-compatible endpoint; the analysis pipeline then fetches them by public URL.

pub mod client;
pub mod error;

pub use client::{StorageConfig, VideoStorage};
pub use error::{StorageError, StorageResult};
