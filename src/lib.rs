//! Semantic log compression: turns a stream of plain-text operational logs
//! into a typed, columnar container that is both smaller than
//! general-purpose compression and directly queryable without a full
//! decompress pass (§1 Overview).
//!
//! Pipeline: [`lexer`] tokenizes each line, [`semantic`] assigns a semantic
//! type to each token, [`template`] clusters lines into templates with
//! typed variable slots, [`column`] encodes each slot's values with a
//! codec chosen for its semantic type, and [`container`] frames the result
//! into a single binary artifact. [`query`] reads that artifact back
//! without materializing every line. [`engine`] wires all of this into the
//! handful of entry points the CLI calls.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

pub mod column;
pub mod config;
pub mod container;
pub mod engine;
pub mod error;
pub mod lexer;
pub mod query;
pub mod semantic;
pub mod stats;
pub mod template;
pub mod token;
pub mod value;

pub use error::{LogPressError, Result};
