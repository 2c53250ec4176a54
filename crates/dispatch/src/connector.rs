//! Outbound-Connector – Ausgehende Haelfte des Handshakes
//!
//! Baut eine TCP-Verbindung zur Gegenseite auf, kuendigt die gewuenschte
//! Rolle per Start-Paket an und wartet (rollenabhaengig begrenzt) auf die
//! Bestaetigung.
//!
//! ## State Machine
//! ```text
//! Idle --verbinden()--> Connecting --+--> Erfolg   --> Idle
//!                                    +--> Fehler   --> Idle
//!                                    +--> Timeout  --> Idle
//! ```
//!
//! Pro Instanz ist hoechstens ein Versuch ausstehend. Eine zweite Anfrage
//! waehrend `Connecting` schlaegt sofort fehl und setzt die Markierung
//! zurueck, auch die des laufenden Versuchs.

use comaudio_protocol::{StartPacket, StreamRolle, START_PAKET_GROESSE};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use uuid::Uuid;

use crate::error::{DispatchError, DispatchResult, TransportArt};
use crate::event::{EreignisBus, Richtung, VerbindungsEreignis};

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Wartezeiten auf die Bestaetigung der Gegenseite
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Alle Rollen ausser Voice
    pub ack_timeout_standard: Duration,
    /// Voice
    pub ack_timeout_voice: Duration,
}

impl ConnectorConfig {
    /// Wartezeit fuer `rolle`
    pub fn ack_timeout(&self, rolle: StreamRolle) -> Duration {
        if rolle.ist_voice() {
            self.ack_timeout_voice
        } else {
            self.ack_timeout_standard
        }
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            ack_timeout_standard: StreamRolle::FileList.standard_ack_timeout(),
            ack_timeout_voice: StreamRolle::VoiceStream.standard_ack_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Zustand
// ---------------------------------------------------------------------------

/// Der eine ausstehende Verbindungsversuch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AusstehenderVersuch {
    pub id: Uuid,
    pub ziel: String,
    pub rolle: StreamRolle,
}

/// Eintrag im Verzeichnis aktiver ausgehender Verbindungen
#[derive(Debug, Clone)]
pub struct AktiveVerbindung {
    pub id: Uuid,
    pub peer: SocketAddr,
    pub rolle: StreamRolle,
    pub seit: Instant,
}

/// Setzt die Ausstehend-Markierung beim Verlassen eines Versuchs zurueck
///
/// Greift auch wenn der Future des Versuchs vorzeitig gedroppt wird. Eine
/// Markierung, die inzwischen einem neueren Versuch gehoert, bleibt stehen.
struct AusstehendGuard<'a> {
    slot: &'a Mutex<Option<AusstehenderVersuch>>,
    id: Uuid,
}

impl Drop for AusstehendGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|v| v.id == self.id) {
            *slot = None;
        }
    }
}

// ---------------------------------------------------------------------------
// OutboundConnector
// ---------------------------------------------------------------------------

/// Initiiert ausgehende Verbindungen inkl. Handshake
pub struct OutboundConnector {
    bus: EreignisBus,
    config: ConnectorConfig,
    ausstehend: Mutex<Option<AusstehenderVersuch>>,
    aktive: DashMap<Uuid, AktiveVerbindung>,
}

impl OutboundConnector {
    /// Erstellt einen Connector im Zustand `Idle`
    pub fn neu(bus: EreignisBus, config: ConnectorConfig) -> Self {
        Self {
            bus,
            config,
            ausstehend: Mutex::new(None),
            aktive: DashMap::new(),
        }
    }

    /// Laufender Versuch, `None` im Zustand `Idle`
    pub fn ausstehend(&self) -> Option<AusstehenderVersuch> {
        self.ausstehend.lock().clone()
    }

    /// Alle registrierten ausgehenden Verbindungen
    pub fn aktive_verbindungen(&self) -> Vec<AktiveVerbindung> {
        self.aktive.iter().map(|e| e.value().clone()).collect()
    }

    /// Entfernt eine Verbindung aus dem Verzeichnis (z.B. nach Sitzungsende)
    pub fn verbindung_entfernen(&self, id: &Uuid) -> Option<AktiveVerbindung> {
        self.aktive.remove(id).map(|(_, v)| v)
    }

    /// Baut eine Verbindung zu `host:port` fuer `rolle` auf
    ///
    /// Bei Erfolg wurde das Ereignis "mit Gegenseite verbunden" auf dem Bus
    /// gemeldet; zurueckgegeben wird die ID im Verbindungsverzeichnis. Der
    /// Eintrag bleibt bestehen, bis der Aufrufer ihn nach Ende der Sitzung
    /// mit `verbindung_entfernen` austraegt.
    ///
    /// # Fehler
    /// - `VersuchAusstehend` wenn bereits ein Versuch laeuft (Markierung wird geloescht)
    /// - `Transport` bei Aufloesungs-, Verbindungs- oder Sendefehlern
    /// - `Timeout` wenn die Bestaetigung ausbleibt
    /// - `KeinAbonnent` wenn niemand die Rolle abonniert hat (Verbindung geschlossen)
    pub async fn verbinden(&self, host: &str, port: u16, rolle: StreamRolle) -> DispatchResult<Uuid> {
        let versuch = {
            let mut ausstehend = self.ausstehend.lock();
            if let Some(laufend) = ausstehend.take() {
                tracing::warn!(
                    laufend_ziel = %laufend.ziel,
                    laufend_rolle = %laufend.rolle,
                    rolle = %rolle,
                    "Verbindungsversuch abgelehnt – bereits einer ausstehend, Zustand zurueckgesetzt"
                );
                return Err(DispatchError::VersuchAusstehend);
            }
            let versuch = AusstehenderVersuch {
                id: Uuid::new_v4(),
                ziel: format!("{host}:{port}"),
                rolle,
            };
            *ausstehend = Some(versuch.clone());
            versuch
        };
        let _guard = AusstehendGuard {
            slot: &self.ausstehend,
            id: versuch.id,
        };

        tracing::info!(ziel = %versuch.ziel, rolle = %rolle, "Verbinde mit Gegenseite");

        match self.versuch_durchfuehren(host, port, &versuch).await {
            Ok(()) => Ok(versuch.id),
            Err(e) => {
                self.aktive.remove(&versuch.id);
                tracing::warn!(
                    ziel = %versuch.ziel,
                    rolle = %rolle,
                    fehler = %e,
                    meldung = %e.benutzer_meldung(),
                    "Ausgehender Verbindungsversuch gescheitert"
                );
                Err(e)
            }
        }
    }

    async fn versuch_durchfuehren(
        &self,
        host: &str,
        port: u16,
        versuch: &AusstehenderVersuch,
    ) -> DispatchResult<()> {
        let rolle = versuch.rolle;
        let mut stream = Self::tcp_verbinden(host, port).await?;
        let peer = stream.peer_addr().map_err(|e| DispatchError::transport(&e))?;

        self.aktive.insert(
            versuch.id,
            AktiveVerbindung {
                id: versuch.id,
                peer,
                rolle,
                seit: Instant::now(),
            },
        );

        let paket = StartPacket::neu(rolle);
        stream
            .write_all(paket.as_bytes())
            .await
            .map_err(|e| DispatchError::transport(&e))?;

        let timeout = self.config.ack_timeout(rolle);
        let mut ack = [0u8; START_PAKET_GROESSE];
        // Das Echo kann in mehreren Segmenten ankommen; alles danach gehoert dem Konsumenten
        match tokio::time::timeout(timeout, stream.read_exact(&mut ack)).await {
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(DispatchError::Transport {
                    art: TransportArt::Getrennt,
                    nachricht: "Gegenseite hat vor der Bestaetigung geschlossen".into(),
                });
            }
            // Inhalt der Bestaetigung wird nicht gegen das gesendete Paket geprueft
            Ok(Ok(n)) => tracing::trace!(peer = %peer, bytes = n, "Bestaetigung empfangen"),
            Ok(Err(e)) => return Err(DispatchError::transport(&e)),
            Err(_) => {
                return Err(DispatchError::Timeout {
                    rolle: Some(rolle),
                    ms: timeout.as_millis() as u64,
                });
            }
        }

        tracing::info!(peer = %peer, rolle = %rolle, "Mit Gegenseite verbunden");
        if !self
            .bus
            .melden(VerbindungsEreignis::neu(Richtung::Ausgehend, rolle, stream, peer))
        {
            return Err(DispatchError::KeinAbonnent { rolle });
        }
        Ok(())
    }

    /// Loest `host` auf und verbindet mit der ersten erreichbaren Adresse
    async fn tcp_verbinden(host: &str, port: u16) -> DispatchResult<TcpStream> {
        let adressen: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| DispatchError::Transport {
                art: TransportArt::HostNichtGefunden,
                nachricht: e.to_string(),
            })?
            .collect();

        let mut letzter_fehler = None;
        for adresse in adressen {
            match TcpStream::connect(adresse).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    tracing::debug!(adresse = %adresse, fehler = %e, "Verbindung fehlgeschlagen");
                    letzter_fehler = Some(e);
                }
            }
        }

        Err(match letzter_fehler {
            Some(e) => DispatchError::transport(&e),
            None => DispatchError::Transport {
                art: TransportArt::HostNichtGefunden,
                nachricht: format!("Keine Adresse fuer '{host}'"),
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RollenVerbindung;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn connector(ack: Duration) -> (OutboundConnector, EreignisBus) {
        let bus = EreignisBus::neu();
        let connector = OutboundConnector::neu(
            bus.clone(),
            ConnectorConfig {
                ack_timeout_standard: ack,
                ack_timeout_voice: ack,
            },
        );
        (connector, bus)
    }

    /// Akzeptiert eine Verbindung, liest das Start-Paket und bestaetigt optional
    ///
    /// Liefert das empfangene Paket, sobald der Connector die Verbindung schliesst.
    async fn gegenstelle(bestaetigen: bool) -> (SocketAddr, JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut paket = vec![0u8; START_PAKET_GROESSE];
            stream.read_exact(&mut paket).await.unwrap();
            if bestaetigen {
                stream.write_all(&paket).await.unwrap();
            }
            let mut rest = Vec::new();
            let _ = stream.read_to_end(&mut rest).await;
            paket
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn erfolgreicher_aufbau_meldet_ereignis() {
        let (connector, bus) = connector(Duration::from_secs(2));
        let mut rx = bus.abonnieren(StreamRolle::FileList);
        let (addr, gegenstelle) = gegenstelle(true).await;

        let id = connector
            .verbinden("127.0.0.1", addr.port(), StreamRolle::FileList)
            .await
            .unwrap();

        let ereignis = rx.try_recv().expect("Ereignis erwartet");
        assert_eq!(ereignis.rolle(), StreamRolle::FileList);
        assert_eq!(ereignis.richtung, Richtung::Ausgehend);
        assert_eq!(ereignis.peer, addr);
        assert!(connector.ausstehend().is_none());

        let aktive = connector.aktive_verbindungen();
        assert_eq!(aktive.len(), 1);
        assert_eq!(aktive[0].id, id);
        assert!(connector.verbindung_entfernen(&id).is_some());
        assert!(connector.aktive_verbindungen().is_empty());

        drop(ereignis);
        let paket = gegenstelle.await.unwrap();
        assert_eq!(paket, StartPacket::neu(StreamRolle::FileList).as_bytes().to_vec());
    }

    #[tokio::test]
    async fn voice_liefert_udp_endpunkt() {
        let (connector, bus) = connector(Duration::from_secs(2));
        let mut rx = bus.abonnieren(StreamRolle::VoiceStream);
        let (addr, _gegenstelle) = gegenstelle(true).await;

        connector
            .verbinden("127.0.0.1", addr.port(), StreamRolle::VoiceStream)
            .await
            .unwrap();

        let ereignis = rx.try_recv().expect("Ereignis erwartet");
        match ereignis.verbindung {
            RollenVerbindung::Voice { udp, .. } => assert_eq!(udp.peer(), addr),
            andere => panic!("Voice erwartet, erhalten: {:?}", andere.rolle()),
        }
    }

    #[tokio::test]
    async fn ausbleibende_bestaetigung_laeuft_in_timeout() {
        let (connector, bus) = connector(Duration::from_millis(100));
        let mut rx = bus.abonnieren(StreamRolle::SongStream);
        let (addr, gegenstelle) = gegenstelle(false).await;

        let ergebnis = connector
            .verbinden("127.0.0.1", addr.port(), StreamRolle::SongStream)
            .await;
        assert!(matches!(
            ergebnis,
            Err(DispatchError::Timeout {
                rolle: Some(StreamRolle::SongStream),
                ms: 100
            })
        ));
        assert!(rx.try_recv().is_err());
        assert!(connector.ausstehend().is_none());
        assert!(connector.aktive_verbindungen().is_empty());

        // Gegenseite sieht das Schliessen: Socket wurde nicht zurueckgehalten
        let paket = tokio::time::timeout(Duration::from_secs(2), gegenstelle)
            .await
            .expect("Gegenstelle muss EOF sehen")
            .unwrap();
        assert_eq!(paket[0], StreamRolle::SongStream.as_u8());
    }

    #[tokio::test]
    async fn abgelehnte_verbindung_wird_klassifiziert() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (connector, _bus) = connector(Duration::from_millis(100));
        let ergebnis = connector.verbinden("127.0.0.1", port, StreamRolle::FileTx).await;
        match ergebnis {
            Err(e @ DispatchError::Transport { art: TransportArt::VerbindungAbgelehnt, .. }) => {
                assert!(e.benutzer_meldung().contains("abgelehnt"));
            }
            andere => panic!("VerbindungAbgelehnt erwartet, erhalten: {andere:?}"),
        }
        assert!(connector.ausstehend().is_none());
    }

    #[tokio::test]
    async fn unbekannter_host_wird_klassifiziert() {
        let (connector, _bus) = connector(Duration::from_millis(100));
        let ergebnis = connector
            .verbinden("gibt-es-nicht.invalid", 7000, StreamRolle::FileList)
            .await;
        assert!(matches!(
            ergebnis,
            Err(DispatchError::Transport {
                art: TransportArt::HostNichtGefunden,
                ..
            })
        ));
        assert!(connector.ausstehend().is_none());
    }

    #[tokio::test]
    async fn zweiter_versuch_wird_abgelehnt_und_setzt_zurueck() {
        let (connector, _bus) = connector(Duration::from_millis(500));
        let connector = Arc::new(connector);
        let (addr, _gegenstelle) = gegenstelle(false).await;

        let erster = {
            let connector = Arc::clone(&connector);
            tokio::spawn(async move {
                connector
                    .verbinden("127.0.0.1", addr.port(), StreamRolle::FileTx)
                    .await
            })
        };

        // Warten bis der erste Versuch ausstehend ist
        for _ in 0..200 {
            if connector.ausstehend().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let laufend = connector.ausstehend().expect("erster Versuch muss ausstehen");
        assert_eq!(laufend.rolle, StreamRolle::FileTx);

        let zweiter = connector
            .verbinden("127.0.0.1", addr.port(), StreamRolle::SongStream)
            .await;
        assert!(matches!(zweiter, Err(DispatchError::VersuchAusstehend)));

        // Die Ablehnung loescht auch die Markierung des ersten Versuchs
        assert!(connector.ausstehend().is_none());

        let ergebnis = erster.await.unwrap();
        assert!(matches!(ergebnis, Err(DispatchError::Timeout { .. })));
        assert!(connector.ausstehend().is_none());
    }

    #[tokio::test]
    async fn bestaetigung_in_teilen_wird_vollstaendig_gelesen() {
        let (connector, bus) = connector(Duration::from_secs(2));
        let mut rx = bus.abonnieren(StreamRolle::FileTx);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let gegenstelle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut paket = [0u8; START_PAKET_GROESSE];
            stream.read_exact(&mut paket).await.unwrap();
            stream.write_all(&paket[..4]).await.unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            stream.write_all(&paket[4..]).await.unwrap();
            stream.write_all(b"DATA").await.unwrap();
        });

        connector
            .verbinden("127.0.0.1", addr.port(), StreamRolle::FileTx)
            .await
            .unwrap();
        gegenstelle.await.unwrap();

        let mut tcp = rx.try_recv().unwrap().verbindung.into_tcp();
        let mut nutzdaten = Vec::new();
        tcp.read_to_end(&mut nutzdaten).await.unwrap();
        assert_eq!(nutzdaten, b"DATA");
    }

    #[tokio::test]
    async fn schliessen_vor_vollstaendiger_bestaetigung_ist_getrennt() {
        let (connector, bus) = connector(Duration::from_secs(2));
        let mut rx = bus.abonnieren(StreamRolle::FileList);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut paket = [0u8; START_PAKET_GROESSE];
            stream.read_exact(&mut paket).await.unwrap();
            stream.write_all(&paket[..3]).await.unwrap();
        });

        let ergebnis = connector
            .verbinden("127.0.0.1", addr.port(), StreamRolle::FileList)
            .await;
        assert!(matches!(
            ergebnis,
            Err(DispatchError::Transport {
                art: TransportArt::Getrennt,
                ..
            })
        ));
        assert!(rx.try_recv().is_err());
        assert!(connector.aktive_verbindungen().is_empty());
    }

    #[tokio::test]
    async fn ohne_abonnent_wird_verbindung_verworfen() {
        let (connector, _bus) = connector(Duration::from_secs(2));
        let (addr, gegenstelle) = gegenstelle(true).await;

        let ergebnis = connector
            .verbinden("127.0.0.1", addr.port(), StreamRolle::SongStream)
            .await;
        assert!(matches!(
            ergebnis,
            Err(DispatchError::KeinAbonnent {
                rolle: StreamRolle::SongStream
            })
        ));
        assert!(connector.aktive_verbindungen().is_empty());
        assert!(connector.ausstehend().is_none());

        // Socket wurde geschlossen
        tokio::time::timeout(Duration::from_secs(2), gegenstelle)
            .await
            .expect("Gegenstelle muss EOF sehen")
            .unwrap();
    }

    #[tokio::test]
    async fn beendeter_versuch_loescht_markierung_eines_neueren_nicht() {
        let bus = EreignisBus::neu();
        let connector = Arc::new(OutboundConnector::neu(
            bus,
            ConnectorConfig {
                ack_timeout_standard: Duration::from_millis(200),
                ack_timeout_voice: Duration::from_secs(5),
            },
        ));
        let (addr_a, _gegenstelle_a) = gegenstelle(false).await;
        let (addr_c, _gegenstelle_c) = gegenstelle(false).await;

        let versuch_a = {
            let connector = Arc::clone(&connector);
            tokio::spawn(async move {
                connector
                    .verbinden("127.0.0.1", addr_a.port(), StreamRolle::FileTx)
                    .await
            })
        };
        for _ in 0..200 {
            if connector.ausstehend().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(connector.ausstehend().is_some());

        // Abgelehnte Anfrage setzt die Markierung zurueck
        let abgelehnt = connector
            .verbinden("127.0.0.1", addr_a.port(), StreamRolle::SongStream)
            .await;
        assert!(matches!(abgelehnt, Err(DispatchError::VersuchAusstehend)));
        assert!(connector.ausstehend().is_none());

        let versuch_c = {
            let connector = Arc::clone(&connector);
            tokio::spawn(async move {
                connector
                    .verbinden("127.0.0.1", addr_c.port(), StreamRolle::VoiceStream)
                    .await
            })
        };
        for _ in 0..200 {
            if connector.ausstehend().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let ergebnis_a = versuch_a.await.unwrap();
        assert!(matches!(ergebnis_a, Err(DispatchError::Timeout { .. })));

        // Markierung von C bleibt stehen, ein weiterer Versuch wird abgewiesen
        let laufend = connector.ausstehend().expect("Versuch C muss ausstehen");
        assert_eq!(laufend.rolle, StreamRolle::VoiceStream);

        versuch_c.abort();
    }
}
