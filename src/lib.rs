//! # kb-rag
//!
//! Citation-grounded question answering over a small markdown knowledge base.
//!
//! Documents are split into heading-aware chunks, embedded and stored in a
//! vector index. A question is answered by retrieving the nearest chunks,
//! refusing outright when even the best match is too far away, letting a
//! model rerank the candidates, and generating an answer that cites its
//! context blocks as `[1]`, `[2]`, ...
//!
//! ## Architecture
//!
//! ```text
//!  kb/*.md ─▶ chunk ─▶ embed ─▶ ┌─────────────┐
//!                               │ VectorIndex │
//!  question ─▶ embed ─────────▶ │ (SQLite)    │
//!                               └──────┬──────┘
//!                                      ▼
//!                 gate ─▶ rerank ─▶ generate ─▶ PipelineResult
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Chunks, candidates and pipeline results |
//! | [`chunk`] | Markdown-aware chunking with overlap |
//! | [`embedding`] | Embedding provider trait and vector math |
//! | [`generation`] | Text-generation provider trait |
//! | [`store`] | Vector index trait, in-memory and SQLite backends |
//! | [`ingest`] | Full rebuild of the collection from `kb.dir` |
//! | [`retriever`] | Query embedding and nearest-neighbour lookup |
//! | [`gate`] | Distance-based confidence gate |
//! | [`rerank`] | LLM reranking with a total index parser |
//! | [`generator`] | Grounded answer generation |
//! | [`citations`] | Post-hoc citation checks |
//! | [`pipeline`] | End-to-end orchestration |
//! | [`error`] | Errors surfaced to callers |
//! | [`server`] | JSON HTTP API |
//! | [`stats`] | Collection statistics |
//! | [`db`] / [`migrate`] | SQLite connection and schema |

pub mod chunk;
pub mod citations;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod gate;
pub mod generation;
pub mod generator;
pub mod ingest;
pub mod migrate;
pub mod models;
mod openai;
pub mod pipeline;
pub mod rerank;
pub mod retriever;
pub mod server;
pub mod stats;
pub mod store;
