//! # askbase
//!
//! Application layer for askbase: TOML configuration, the SQLite-backed
//! storage and usage-ledger implementations, and the OpenAI-compatible
//! model providers. The query pipeline itself lives in `askbase-core`;
//! this crate wires concrete backends into it and exposes the `askbase`
//! CLI.

pub mod config;
pub mod db;
pub mod migrate;
pub mod openai;
pub mod sqlite_ledger;
pub mod sqlite_store;
