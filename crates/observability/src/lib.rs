//! # comaudio-observability
//!
//! Structured Logging via tracing-subscriber (Text oder JSON),
//! gemeinsam genutzt von Server und Client-Binary.

pub mod logging;

pub use logging::{log_format_gueltig, log_level_gueltig, logging_initialisieren, LogFormat};
