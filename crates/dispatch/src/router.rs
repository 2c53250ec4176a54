//! Handshake-Router – Eingehende Haelfte des Handshakes
//!
//! Liest genau ein Start-Paket von einer frisch akzeptierten Verbindung,
//! schickt dieselben Bytes als Bestaetigung zurueck und meldet die
//! Verbindung ueber den `EreignisBus` an den Konsumenten ihrer Rolle.
//!
//! ## Ablauf
//! ```text
//! akzeptiert --read (Timeout)--> Paket --Rolle ok--> Echo --> Ereignis
//!                                   |
//!                                   +--Rolle unbekannt--> verworfen (kein Echo)
//! ```
//!
//! Ein kurzer Read wird nicht wiederholt: fehlende Bytes bleiben 0 und es
//! wird gegen den aufgefuellten Puffer dekodiert.

use comaudio_protocol::{StartPacket, StreamRolle, START_PAKET_GROESSE};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{DispatchError, DispatchResult, TransportArt};
use crate::event::{EreignisBus, Richtung, VerbindungsEreignis};

/// Standard-Wartezeit auf das erste Start-Paket
pub const STANDARD_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Konfiguration des Handshake-Routers
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximale Wartezeit auf das Start-Paket der Gegenseite
    pub handshake_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: STANDARD_HANDSHAKE_TIMEOUT,
        }
    }
}

/// Zaehlerstand des Routers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStatistik {
    /// Erfolgreich klassifizierte Verbindungen
    pub geroutet: u64,
    /// Verworfene Verbindungen (Protokoll-, Transportfehler, Timeout)
    pub abgelehnt: u64,
}

/// Fuehrt den eingehenden Handshake durch
///
/// Haelt keinen Zustand zwischen zwei Aufrufen ausser Zaehlern; jede
/// Verbindung kann unabhaengig in einem eigenen Task geroutet werden.
pub struct HandshakeRouter {
    bus: EreignisBus,
    config: RouterConfig,
    geroutet: AtomicU64,
    abgelehnt: AtomicU64,
}

impl HandshakeRouter {
    /// Erstellt einen neuen Router
    pub fn neu(bus: EreignisBus, config: RouterConfig) -> Self {
        Self {
            bus,
            config,
            geroutet: AtomicU64::new(0),
            abgelehnt: AtomicU64::new(0),
        }
    }

    /// Klassifiziert eine frisch akzeptierte Verbindung
    ///
    /// Bei Erfolg wurde das Start-Paket zurueckgeschickt und die Verbindung
    /// an den Bus uebergeben. Bei einem Fehler wird kein Ereignis erzeugt
    /// und die Verbindung beim Verlassen der Funktion geschlossen.
    pub async fn annehmen(&self, mut stream: TcpStream, peer: SocketAddr) -> DispatchResult<StreamRolle> {
        match self.handshake(&mut stream, peer).await {
            Ok(rolle) => {
                self.geroutet.fetch_add(1, Ordering::Relaxed);
                tracing::info!(peer = %peer, rolle = %rolle, "Eingehende Verbindung klassifiziert");
                self.bus
                    .melden(VerbindungsEreignis::neu(Richtung::Eingehend, rolle, stream, peer));
                Ok(rolle)
            }
            Err(e) => {
                self.abgelehnt.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(peer = %peer, fehler = %e, "Handshake fehlgeschlagen – Verbindung verworfen");
                Err(e)
            }
        }
    }

    /// Aktueller Zaehlerstand
    pub fn statistik(&self) -> RouterStatistik {
        RouterStatistik {
            geroutet: self.geroutet.load(Ordering::Relaxed),
            abgelehnt: self.abgelehnt.load(Ordering::Relaxed),
        }
    }

    /// Liest, dekodiert und bestaetigt das Start-Paket
    async fn handshake(&self, stream: &mut TcpStream, peer: SocketAddr) -> DispatchResult<StreamRolle> {
        let timeout = self.config.handshake_timeout;
        let mut buf = [0u8; START_PAKET_GROESSE];

        let gelesen = match tokio::time::timeout(timeout, stream.read(&mut buf)).await {
            Ok(Ok(0)) => {
                return Err(DispatchError::Transport {
                    art: TransportArt::Getrennt,
                    nachricht: "Verbindung vor dem Start-Paket geschlossen".into(),
                });
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(DispatchError::transport(&e)),
            Err(_) => {
                return Err(DispatchError::Timeout {
                    rolle: None,
                    ms: timeout.as_millis() as u64,
                });
            }
        };

        if gelesen < START_PAKET_GROESSE {
            tracing::debug!(
                peer = %peer,
                bytes = gelesen,
                erwartet = START_PAKET_GROESSE,
                "Kurzer Read – Rest des Start-Pakets mit 0 aufgefuellt"
            );
        }

        let paket = StartPacket::aus_teilpuffer(&buf[..gelesen])?;
        let rolle = paket.rolle()?;

        stream
            .write_all(paket.as_bytes())
            .await
            .map_err(|e| DispatchError::transport(&e))?;

        Ok(rolle)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
