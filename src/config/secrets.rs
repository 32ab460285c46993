//! Secret handling.
//!
//! API keys are kept wrapped so they never end up in `Debug` output or logs.

pub use secrecy::{ExposeSecret, SecretString};
