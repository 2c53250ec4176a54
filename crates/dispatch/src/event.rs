//! Ereignis-Bus – Meldet fertig klassifizierte Verbindungen an ihre Konsumenten
//!
//! Nach erfolgreichem Handshake gehoert die Verbindung nicht mehr diesem
//! Layer. Sie wird als `VerbindungsEreignis` an genau einen Abonnenten der
//! jeweiligen Rolle uebergeben.
//!
//! ## Zuordnung
//! ```text
//! Rolle            eingehend                    ausgehend
//! SongStream       Verbindung bereit (Song)     mit Gegenseite verbunden (Song)
//! VoiceStream      TCP + neuer UDP-Endpunkt     TCP + neuer UDP-Endpunkt
//! FileList         Verbindung bereit (Liste)    mit Gegenseite verbunden (Liste)
//! FileTx           Verbindung bereit (Datei)    mit Gegenseite verbunden (Datei)
//! StreamFileList   Verbindung bereit (S-Liste)  mit Gegenseite verbunden (S-Liste)
//! ```

use comaudio_protocol::StreamRolle;
use dashmap::DashMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// UdpEndpunkt
// ---------------------------------------------------------------------------

/// Noch nicht gebundener UDP-Endpunkt fuer eine Voice-Sitzung
///
/// Dieser Layer bindet keinen Socket. Der Voice-Konsument entscheidet
/// ueber die lokale Adresse und ruft `binden` selbst auf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpEndpunkt {
    /// Gegenseite der zugehoerigen TCP-Verbindung
    peer: SocketAddr,
}

impl UdpEndpunkt {
    /// Erstellt einen Endpunkt fuer die Voice-Sitzung mit `peer`
    pub fn neu(peer: SocketAddr) -> Self {
        Self { peer }
    }

    /// Adresse der Gegenseite
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Bindet den UDP-Socket an `lokal`
    pub async fn binden(&self, lokal: SocketAddr) -> std::io::Result<UdpSocket> {
        let socket = UdpSocket::bind(lokal).await?;
        tracing::debug!(
            lokal = %socket.local_addr()?,
            peer = %self.peer,
            "UDP-Endpunkt gebunden"
        );
        Ok(socket)
    }
}

// ---------------------------------------------------------------------------
// RollenVerbindung
// ---------------------------------------------------------------------------

/// Klassifizierte Verbindung, getaggt nach Rolle
#[derive(Debug)]
pub enum RollenVerbindung {
    SongStream(TcpStream),
    Voice { udp: UdpEndpunkt, tcp: TcpStream },
    FileList(TcpStream),
    FileTx(TcpStream),
    StreamFileList(TcpStream),
}

impl RollenVerbindung {
    /// Verpackt `tcp` fuer `rolle`; Voice bekommt einen neuen UDP-Endpunkt
    pub fn neu(rolle: StreamRolle, tcp: TcpStream, peer: SocketAddr) -> Self {
        match rolle {
            StreamRolle::SongStream => Self::SongStream(tcp),
            StreamRolle::VoiceStream => Self::Voice {
                udp: UdpEndpunkt::neu(peer),
                tcp,
            },
            StreamRolle::FileList => Self::FileList(tcp),
            StreamRolle::FileTx => Self::FileTx(tcp),
            StreamRolle::StreamFileList => Self::StreamFileList(tcp),
        }
    }

    /// Rolle der Verbindung
    pub fn rolle(&self) -> StreamRolle {
        match self {
            Self::SongStream(_) => StreamRolle::SongStream,
            Self::Voice { .. } => StreamRolle::VoiceStream,
            Self::FileList(_) => StreamRolle::FileList,
            Self::FileTx(_) => StreamRolle::FileTx,
            Self::StreamFileList(_) => StreamRolle::StreamFileList,
        }
    }

    /// Gibt den TCP-Stream heraus (UDP-Endpunkt wird verworfen)
    pub fn into_tcp(self) -> TcpStream {
        match self {
            Self::SongStream(tcp)
            | Self::FileList(tcp)
            | Self::FileTx(tcp)
            | Self::StreamFileList(tcp)
            | Self::Voice { tcp, .. } => tcp,
        }
    }
}

// ---------------------------------------------------------------------------
// VerbindungsEreignis
// ---------------------------------------------------------------------------

/// Wer hat die Verbindung aufgebaut?
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Richtung {
    /// Gegenseite hat sich mit uns verbunden
    Eingehend,
    /// Wir haben uns mit der Gegenseite verbunden
    Ausgehend,
}

impl fmt::Display for Richtung {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Richtung::Eingehend => f.write_str("eingehend"),
            Richtung::Ausgehend => f.write_str("ausgehend"),
        }
    }
}

/// "Verbindung bereit" (eingehend) bzw. "mit Gegenseite verbunden" (ausgehend)
#[derive(Debug)]
pub struct VerbindungsEreignis {
    pub richtung: Richtung,
    pub peer: SocketAddr,
    pub verbindung: RollenVerbindung,
}

impl VerbindungsEreignis {
    pub fn neu(richtung: Richtung, rolle: StreamRolle, tcp: TcpStream, peer: SocketAddr) -> Self {
        Self {
            richtung,
            peer,
            verbindung: RollenVerbindung::neu(rolle, tcp, peer),
        }
    }

    pub fn rolle(&self) -> StreamRolle {
        self.verbindung.rolle()
    }
}

/// "Uebertragung beendet" – genau einmal pro vollstaendig gesendeter Datei
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UebertragungBeendet {
    pub pfad: PathBuf,
    pub bytes: u64,
}

// ---------------------------------------------------------------------------
// EreignisBus
// ---------------------------------------------------------------------------

/// Verteilt Verbindungs-Ereignisse an die Abonnenten der jeweiligen Rolle
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone, Default)]
pub struct EreignisBus {
    inner: Arc<EreignisBusInner>,
}

#[derive(Default)]
struct EreignisBusInner {
    /// Abonnenten, indiziert nach Rolle
    abonnenten: DashMap<StreamRolle, Vec<mpsc::UnboundedSender<VerbindungsEreignis>>>,
}

impl EreignisBus {
    /// Erstellt einen leeren Bus
    pub fn neu() -> Self {
        Self::default()
    }

    /// Abonniert alle kuenftigen Verbindungen einer Rolle
    pub fn abonnieren(&self, rolle: StreamRolle) -> mpsc::UnboundedReceiver<VerbindungsEreignis> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.abonnenten.entry(rolle).or_default().push(tx);
        tracing::debug!(rolle = %rolle, "Abonnent registriert");
        rx
    }

    /// Anzahl offener Abonnements einer Rolle
    pub fn abonnenten_anzahl(&self, rolle: StreamRolle) -> usize {
        self.inner
            .abonnenten
            .get(&rolle)
            .map(|liste| liste.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Uebergibt das Ereignis an den ersten lebenden Abonnenten seiner Rolle
    ///
    /// Gibt `false` zurueck wenn niemand die Rolle abonniert hat; die
    /// Verbindung wird dann mit dem Ereignis geschlossen.
    pub fn melden(&self, ereignis: VerbindungsEreignis) -> bool {
        let rolle = ereignis.rolle();
        let richtung = ereignis.richtung;
        let peer = ereignis.peer;
        let mut ereignis = ereignis;

        if let Some(mut abonnenten) = self.inner.abonnenten.get_mut(&rolle) {
            abonnenten.retain(|tx| !tx.is_closed());
            for tx in abonnenten.iter() {
                match tx.send(ereignis) {
                    Ok(()) => {
                        tracing::debug!(
                            rolle = %rolle,
                            richtung = %richtung,
                            peer = %peer,
                            "Verbindung uebergeben"
                        );
                        return true;
                    }
                    Err(mpsc::error::SendError(zurueck)) => ereignis = zurueck,
                }
            }
        }

        tracing::warn!(
            rolle = %rolle,
            richtung = %richtung,
            peer = %peer,
            "Kein Abonnent fuer Rolle – Verbindung wird geschlossen"
        );
        false
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
