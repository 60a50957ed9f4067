//! # askbase Core
//!
//! Shared logic for askbase: data models, the content fragmenter,
//! retrieval ranking, context assembly, answer synthesis, usage gating,
//! and call telemetry.
//!
//! This crate contains no sqlx, reqwest, or other backend dependencies.
//! Storage and model providers are abstracted behind the [`store`] and
//! [`provider`] traits; the application crate supplies SQLite and
//! OpenAI-compatible implementations, while the in-memory and mock
//! implementations here back the test suites.
//!
//! ## Query flow
//!
//! ```text
//! Received ─▶ Admitted ─▶ Retrieved ─▶ Assembled ─▶ Synthesized ─▶ Committed
//!    │                                                      │
//!    └─▶ Rejected (quota)          any stage ─▶ Failed ◀────┘
//! ```
//!
//! [`pipeline::QueryPipeline`] drives this state machine and is the only
//! entry point front-ends call.

pub mod assemble;
pub mod cost;
pub mod error;
pub mod fragment;
pub mod index;
pub mod models;
pub mod pipeline;
pub mod provider;
pub mod retrieve;
pub mod store;
pub mod synthesize;
pub mod telemetry;
pub mod vector;
