//! Photoindex 工具模块
//!
//! Error taxonomy and path sanitizers shared by every service.

pub mod error;
pub mod sanitize;

pub use error::*;
pub use sanitize::*;
