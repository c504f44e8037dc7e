//! # Incident RCA Core
//!
//! Pure logic for reusing root-cause analyses and remediations across
//! similar incidents: data models, store abstraction, flat similarity
//! index, cache engine, and the stage pipeline.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or network
//! clients. Embedding models, text generators and durable stores are
//! supplied by the caller through the [`embedding::Embedder`],
//! [`generator::Generator`] and [`store`] traits.

pub mod cache;
pub mod embedding;
pub mod error;
pub mod generator;
pub mod index;
pub mod models;
pub mod pipeline;
pub mod store;

#[cfg(test)]
mod testing;
