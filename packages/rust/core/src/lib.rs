//! Notebook execution, HTML conversion, and pipeline orchestration for nbbuild.
//!
//! This crate takes a change set (see `nbbuild-changes`) and drives each
//! notebook through the external toolchain, producing a [`report::RunReport`].

pub mod converter;
pub mod executor;
pub mod pipeline;
pub mod report;
pub mod toolchain;

#[cfg(test)]
mod testing;
