//! Filesystem-facing helpers.

pub mod config;
