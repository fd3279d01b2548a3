pub mod client;
pub mod coerce;

pub use client::{CompletionBackend, CompletionError, HttpCompletionClient, StaticCompletionBackend};
