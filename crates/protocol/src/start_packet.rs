//! Start-Paket (TCP-Handshake)
//!
//! Jede Verbindung beginnt mit genau einem Start-Paket. Der Initiator sendet
//! es, die Gegenseite schickt dieselben Bytes unveraendert als Bestaetigung
//! zurueck.
//!
//! ## Paketformat (10 Bytes, kein serde)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       1   Rolle (0 = SongStream, 1 = VoiceStream, 2 = FileList,
//!              3 = FileTx, 4 = StreamFileList)
//!  1       9   Reserviert (beim Senden 0, beim Echo unveraendert)
//! ```
//!
//! Beide Seiten muessen exakt dieselbe Groesse verwenden, sonst verschieben
//! sich alle folgenden Lesevorgaenge auf dem Stream.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Groesse des Start-Pakets in Bytes (Ankuendigung und Bestaetigung)
pub const START_PAKET_GROESSE: usize = 10;

/// Bestaetigungs-Timeout fuer Voice-Verbindungen
const ACK_TIMEOUT_VOICE: Duration = Duration::from_millis(30_000);

/// Bestaetigungs-Timeout fuer alle anderen Rollen
const ACK_TIMEOUT_STANDARD: Duration = Duration::from_millis(5_000);

// ---------------------------------------------------------------------------
// Fehler
// ---------------------------------------------------------------------------

/// Fehler beim Kodieren/Dekodieren eines Start-Pakets
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    /// Rollen-Byte gehoert zu keiner bekannten Rolle
    #[error("Ungueltige Rolle: {0:#04x}")]
    InvalidRole(u8),

    /// Puffer hat nicht die Groesse eines Start-Pakets
    #[error("Fehlerhaftes Paket: {erhalten} Bytes (erwartet {erwartet})")]
    MalformedPacket { erhalten: usize, erwartet: usize },

    /// Unbekannter Rollenname (CLI/Konfiguration)
    #[error("Unbekannter Rollenname: '{0}'")]
    UnbekannterName(String),
}

// ---------------------------------------------------------------------------
// StreamRolle
// ---------------------------------------------------------------------------

/// Art des Streams, fuer den eine Verbindung aufgebaut wird
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum StreamRolle {
    /// Song-Streaming
    SongStream = 0,
    /// Sprache (VoIP), TCP-Steuerkanal plus UDP-Endpunkt
    VoiceStream = 1,
    /// Dateiliste
    FileList = 2,
    /// Dateiuebertragung
    FileTx = 3,
    /// Dateiliste fuer Streaming
    StreamFileList = 4,
}

impl StreamRolle {
    /// Alle Rollen in Diskriminanten-Reihenfolge
    pub const ALLE: [StreamRolle; 5] = [
        StreamRolle::SongStream,
        StreamRolle::VoiceStream,
        StreamRolle::FileList,
        StreamRolle::FileTx,
        StreamRolle::StreamFileList,
    ];

    /// Konvertiert ein Byte in eine `StreamRolle`.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::SongStream),
            1 => Some(Self::VoiceStream),
            2 => Some(Self::FileList),
            3 => Some(Self::FileTx),
            4 => Some(Self::StreamFileList),
            _ => None,
        }
    }

    /// Diskriminante auf dem Draht
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Name wie in CLI und Logs verwendet
    pub fn bezeichnung(self) -> &'static str {
        match self {
            StreamRolle::SongStream => "song_stream",
            StreamRolle::VoiceStream => "voice_stream",
            StreamRolle::FileList => "file_list",
            StreamRolle::FileTx => "file_tx",
            StreamRolle::StreamFileList => "stream_file_list",
        }
    }

    /// Benoetigt die Rolle zusaetzlich einen UDP-Endpunkt?
    pub fn ist_voice(self) -> bool {
        matches!(self, StreamRolle::VoiceStream)
    }

    /// Standard-Wartezeit auf die Bestaetigung der Gegenseite
    pub fn standard_ack_timeout(self) -> Duration {
        if self.ist_voice() {
            ACK_TIMEOUT_VOICE
        } else {
            ACK_TIMEOUT_STANDARD
        }
    }
}

impl fmt::Display for StreamRolle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.bezeichnung())
    }
}

impl FromStr for StreamRolle {
    type Err = PacketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase().replace('-', "_");
        StreamRolle::ALLE
            .into_iter()
            .find(|r| r.bezeichnung() == name)
            .ok_or_else(|| PacketError::UnbekannterName(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// StartPacket
// ---------------------------------------------------------------------------

/// Handshake-Nachricht fester Groesse
///
/// Haelt die rohen Bytes, damit ein Echo die reservierten Bytes exakt so
/// zuruecksendet, wie sie empfangen wurden.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartPacket {
    bytes: [u8; START_PAKET_GROESSE],
}

impl StartPacket {
    /// Erstellt ein frisches Paket fuer `rolle` (Rest mit 0 gefuellt)
    pub fn neu(rolle: StreamRolle) -> Self {
        let mut bytes = [0u8; START_PAKET_GROESSE];
        bytes[0] = rolle.as_u8();
        Self { bytes }
    }

    /// Uebernimmt einen empfangenen Puffer
    ///
    /// # Fehler
    /// `MalformedPacket` wenn der Puffer nicht exakt `START_PAKET_GROESSE` Bytes hat
    pub fn from_bytes(buf: &[u8]) -> Result<Self, PacketError> {
        let bytes: [u8; START_PAKET_GROESSE] =
            buf.try_into().map_err(|_| PacketError::MalformedPacket {
                erhalten: buf.len(),
                erwartet: START_PAKET_GROESSE,
            })?;
        Ok(Self { bytes })
    }

    /// Baut ein Paket aus einem evtl. unvollstaendigen Lesevorgang
    ///
    /// Fehlende Bytes bleiben 0. Ein kurzer Read wird nicht wiederholt,
    /// dekodiert wird gegen den aufgefuellten Rest.
    ///
    /// # Fehler
    /// `MalformedPacket` wenn mehr als `START_PAKET_GROESSE` Bytes uebergeben werden
    pub fn aus_teilpuffer(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() > START_PAKET_GROESSE {
            return Err(PacketError::MalformedPacket {
                erhalten: buf.len(),
                erwartet: START_PAKET_GROESSE,
            });
        }
        let mut bytes = [0u8; START_PAKET_GROESSE];
        bytes[..buf.len()].copy_from_slice(buf);
        Ok(Self { bytes })
    }

    /// Dekodiert die Rolle
    ///
    /// # Fehler
    /// `InvalidRole` wenn Byte 0 keiner Rolle entspricht
    pub fn rolle(&self) -> Result<StreamRolle, PacketError> {
        StreamRolle::from_u8(self.bytes[0]).ok_or(PacketError::InvalidRole(self.bytes[0]))
    }

    /// Exakte Bytes fuer Versand und Echo
    pub fn as_bytes(&self) -> &[u8; START_PAKET_GROESSE] {
        &self.bytes
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
