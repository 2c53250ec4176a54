//! comaudio-protocol – Handshake-Protokoll
//!
//! Dieses Crate definiert das Start-Paket fester Groesse, mit dem jede
//! TCP-Verbindung ihre Stream-Rolle ankuendigt, sowie die geschlossene
//! Menge der Rollen. Reine Datenlogik, kein I/O.

pub mod start_packet;

pub use start_packet::{PacketError, StartPacket, StreamRolle, START_PAKET_GROESSE};
