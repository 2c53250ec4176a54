//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.

use comaudio_dispatch::{ConnectorConfig, RouterConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Eingehender Handshake
    pub handshake: HandshakeEinstellungen,
    /// Ausgehende Verbindungen
    pub verbinden: VerbindenEinstellungen,
    /// Dateiuebertragung
    pub dateien: DateiEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse des Rendezvous-Ports
    pub bind_adresse: String,
    /// Rendezvous-Port
    pub port: u16,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            port: 7000,
        }
    }
}

/// Einstellungen fuer den eingehenden Handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeEinstellungen {
    /// Wartezeit auf das Start-Paket in ms
    pub timeout_ms: u64,
    /// Maximale Anzahl gleichzeitig laufender Handshakes
    pub max_gleichzeitig: usize,
}

impl Default for HandshakeEinstellungen {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_gleichzeitig: 64,
        }
    }
}

/// Einstellungen fuer ausgehende Verbindungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerbindenEinstellungen {
    /// Wartezeit auf die Bestaetigung (alle Rollen ausser Voice) in ms
    pub ack_timeout_ms: u64,
    /// Wartezeit auf die Bestaetigung bei Voice in ms
    pub ack_timeout_voice_ms: u64,
}

impl Default for VerbindenEinstellungen {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 5_000,
            ack_timeout_voice_ms: 30_000,
        }
    }
}

/// Einstellungen fuer die Dateiuebertragung
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DateiEinstellungen {
    /// Datei, die bei FileTx-Verbindungen gesendet wird (leer = ablehnen)
    pub freigabe: Option<PathBuf>,
    /// Blockgroesse beim Senden in Bytes
    pub chunk_groesse: usize,
}

impl Default for DateiEinstellungen {
    fn default() -> Self {
        Self {
            freigabe: None,
            chunk_groesse: 64 * 1024,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Gibt die vollstaendige Bind-Adresse des Rendezvous-Ports zurueck
    pub fn bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.port)
    }

    /// Router-Konfiguration aus dem `[handshake]`-Abschnitt
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            handshake_timeout: Duration::from_millis(self.handshake.timeout_ms),
        }
    }

    /// Connector-Konfiguration aus dem `[verbinden]`-Abschnitt
    pub fn connector_config(&self) -> ConnectorConfig {
        ConnectorConfig {
            ack_timeout_standard: Duration::from_millis(self.verbinden.ack_timeout_ms),
            ack_timeout_voice: Duration::from_millis(self.verbinden.ack_timeout_voice_ms),
        }
    }

    /// Wie `connector_config`, ein gesetzter Wert gilt fuer alle Rollen
    pub fn connector_config_ueberschrieben(&self, ack_timeout_ms: Option<u64>) -> ConnectorConfig {
        match ack_timeout_ms {
            Some(ms) => ConnectorConfig {
                ack_timeout_standard: Duration::from_millis(ms),
                ack_timeout_voice: Duration::from_millis(ms),
            },
            None => self.connector_config(),
        }
    }
}
