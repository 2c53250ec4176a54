//! Structured Logging Setup via tracing-subscriber
//!
//! Werte aus der Konfiguration koennen per Umgebungsvariable ueberschrieben werden:
//! - `CA_LOG_LEVEL`: Filter-Direktive (z.B. `debug` oder `comaudio_dispatch=trace`)
//! - `CA_LOG_FORMAT`: `text` oder `json`
//!
//! Peer-Adresse und Rolle werden als strukturierte Felder geloggt und
//! erscheinen im JSON-Format als eigene Schluessel.

use std::str::FromStr;
use tracing_subscriber::{fmt, EnvFilter};

/// Umgebungsvariable fuer den Log-Filter
pub const ENV_LOG_LEVEL: &str = "CA_LOG_LEVEL";

/// Umgebungsvariable fuer das Ausgabeformat
pub const ENV_LOG_FORMAT: &str = "CA_LOG_FORMAT";

/// Ausgabeformat der Log-Zeilen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Menschenlesbar, eine Zeile pro Ereignis
    #[default]
    Text,
    /// Eine JSON-Zeile pro Ereignis
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            anderes => Err(format!("Unbekanntes Log-Format: '{anderes}'")),
        }
    }
}

/// Bestimmt Filter und Format aus Konfiguration und optionalen Overrides
///
/// Ungueltige Werte fallen auf `info` bzw. `text` zurueck.
pub fn einstellungen_aufloesen(
    level: &str,
    format: &str,
    level_override: Option<&str>,
    format_override: Option<&str>,
) -> (String, LogFormat) {
    let level = level_override
        .filter(|l| EnvFilter::try_new(l).is_ok())
        .or(Some(level).filter(|l| EnvFilter::try_new(l).is_ok()))
        .unwrap_or("info")
        .to_string();

    let format = format_override
        .and_then(|f| f.parse().ok())
        .or_else(|| format.parse().ok())
        .unwrap_or_default();

    (level, format)
}

/// Initialisiert das Logging-System.
///
/// Mehrfacher Aufruf (z.B. aus Tests) ist unschaedlich, der erste gewinnt.
pub fn logging_initialisieren(level: &str, format: &str) {
    let level_env = std::env::var(ENV_LOG_LEVEL).ok();
    let format_env = std::env::var(ENV_LOG_FORMAT).ok();
    let (filter, format) =
        einstellungen_aufloesen(level, format, level_env.as_deref(), format_env.as_deref());
    let filter = EnvFilter::new(filter);

    let ergebnis = match format {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(true)
            .try_init(),
        LogFormat::Text => fmt().with_env_filter(filter).with_target(true).try_init(),
    };

    if ergebnis.is_err() {
        tracing::debug!("Logging war bereits initialisiert");
    }
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    format.parse::<LogFormat>().is_ok()
}
