//! Utility functions

mod sanitize;

pub use sanitize::safe_filename;
