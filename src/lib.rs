pub mod batch;
pub mod config;
pub mod error;
pub mod ir;
pub mod logging;
pub mod rules;

pub use error::{Result, RewriteError};
