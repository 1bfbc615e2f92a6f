//! Mail Labeler: assigns a category and a priority to email records.

pub mod config;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod loader;
pub mod pipeline;
pub mod trace;

pub use error::{Error, Result};
