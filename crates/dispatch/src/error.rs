//! Fehlertypen fuer Verbindungsaufbau und Dispatch

use comaudio_protocol::{PacketError, StreamRolle};
use thiserror::Error;

/// Klassifizierung eines Verbindungsfehlers beim ausgehenden Aufbau
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportArt {
    /// Host konnte nicht aufgeloest werden
    HostNichtGefunden,
    /// Gegenseite hat die Verbindung abgelehnt
    VerbindungAbgelehnt,
    /// Gegenseite hat die Verbindung geschlossen
    Getrennt,
    /// Alle anderen Socket-Fehler
    Sonstige,
}

impl TransportArt {
    /// Ordnet einen IO-Fehler einer Fehlerart zu
    pub fn aus_io(fehler: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match fehler.kind() {
            ErrorKind::ConnectionRefused => Self::VerbindungAbgelehnt,
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => Self::Getrennt,
            _ => Self::Sonstige,
        }
    }
}

/// Fehlertyp fuer den Dispatch-Layer
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Verbindungsfehler (Host, Ablehnung, Socket)
    #[error("Transportfehler ({art:?}): {nachricht}")]
    Transport { art: TransportArt, nachricht: String },

    /// Protokollfehler (unbekannte Rolle, fehlerhaftes Paket)
    #[error("Protokollfehler: {0}")]
    Protokoll(String),

    /// Datei konnte nicht geoeffnet/gelesen werden
    #[error("Dateifehler: {0}")]
    Datei(String),

    /// Handshake-Bytes bzw. Bestaetigung nicht rechtzeitig erhalten
    ///
    /// `rolle` ist `None` solange die Rolle noch nicht bekannt ist (eingehend).
    #[error("Timeout nach {ms} ms")]
    Timeout {
        rolle: Option<StreamRolle>,
        ms: u64,
    },

    /// Es laeuft bereits ein ausgehender Verbindungsversuch
    #[error("Es laeuft bereits ein Verbindungsversuch")]
    VersuchAusstehend,

    /// Verbindung aufgebaut, aber niemand hat die Rolle abonniert
    #[error("Kein Konsument fuer Rolle {rolle} registriert")]
    KeinAbonnent { rolle: StreamRolle },

    /// Vorgang wurde ueber das Abbruch-Token beendet
    #[error("Vorgang abgebrochen")]
    Abgebrochen,

    /// IO-Fehler auf einer bereits aufgebauten Verbindung
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatchError {
    /// Erstellt einen Transportfehler aus einem IO-Fehler
    pub fn transport(fehler: &std::io::Error) -> Self {
        Self::Transport {
            art: TransportArt::aus_io(fehler),
            nachricht: fehler.to_string(),
        }
    }

    /// Text fuer die Anzeige beim Benutzer
    pub fn benutzer_meldung(&self) -> String {
        match self {
            Self::Transport {
                art: TransportArt::HostNichtGefunden,
                ..
            } => "Der Host wurde nicht gefunden. Bitte Hostname und Port pruefen.".into(),
            Self::Transport {
                art: TransportArt::VerbindungAbgelehnt,
                ..
            } => "Die Verbindung wurde von der Gegenseite abgelehnt.".into(),
            Self::Transport { nachricht, .. } => {
                format!("Folgender Fehler ist aufgetreten: {nachricht}.")
            }
            other => other.to_string(),
        }
    }
}

impl From<PacketError> for DispatchError {
    fn from(e: PacketError) -> Self {
        Self::Protokoll(e.to_string())
    }
}

/// Result-Typ fuer den Dispatch-Layer
pub type DispatchResult<T> = Result<T, DispatchError>;
