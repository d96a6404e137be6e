//! Trinkgeld Observability – Structured Logging
//!
//! Schlankes Crate fuer das Logging-Setup; alle anderen Crates loggen
//! nur ueber `tracing` und bleiben frei von Subscriber-Details.

pub mod logging;

pub use logging::{log_format_gueltig, log_level_gueltig, logging_initialisieren};
