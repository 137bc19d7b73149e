//! Common utilities and types shared across healthmon components.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
pub use logging::{LogFormat, LogHandle};
