//! Localization toolchain for Ren'Py visual novels.
//!
//! Extracts translatable strings from `.rpy` source, compiled
//! `.rpyc`/`.rpymc` scripts, `.rpa` archives, and JSON/YAML data files;
//! routes them through pluggable translation engines with caching and
//! adaptive concurrency; and emits Ren'Py-compatible `tl/` output plus a
//! runtime hook that forces the translated language at load time.

pub mod cli;
pub mod commands;
pub mod config;
pub mod diagnostics;
pub mod encoding;
pub mod extractors;
pub mod guard;
pub mod hook;
pub mod parser;
pub mod pipeline;
pub mod rpa;
pub mod rpyc;
pub mod tl;
pub mod translate;
pub mod utils;
