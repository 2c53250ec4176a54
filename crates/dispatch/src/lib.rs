//! comaudio-dispatch – Verbindungsaufbau und Rollen-Dispatch
//!
//! Nimmt Verbindungen auf dem Rendezvous-Port an, bestimmt per Handshake
//! die Stream-Rolle und uebergibt die Verbindung an den passenden
//! Konsumenten. Die Gegenrichtung baut Verbindungen selbst auf.
//!
//! ## Architektur
//!
//! ```text
//! ConnectionListener (accept)
//!     |  ein Task pro Verbindung
//!     v
//! HandshakeRouter ---- Start-Paket lesen, Echo ----+
//!                                                  v
//! OutboundConnector -- Start-Paket senden, Ack --> EreignisBus
//!                                                  |  pro Rolle abonniert
//!                                                  v
//!                          FileStreamer (FileTx) / externe Konsumenten
//! ```

pub mod connector;
pub mod error;
pub mod event;
pub mod listener;
pub mod router;
pub mod streamer;

// Bequeme Re-Exporte
pub use connector::{ConnectorConfig, OutboundConnector};
pub use error::{DispatchError, DispatchResult, TransportArt};
pub use event::{EreignisBus, Richtung, RollenVerbindung, UdpEndpunkt, UebertragungBeendet, VerbindungsEreignis};
pub use listener::ConnectionListener;
pub use router::{HandshakeRouter, RouterConfig};
pub use streamer::{FileStreamer, StreamJob};
