//! comaudio-server – Bibliotheks-Root
//!
//! Setzt Listener, Handshake-Router und Ereignis-Bus zusammen. Der Server
//! bedient selbst nur Dateiuebertragungen (FileTx); alle anderen Rollen
//! werden an Konsumenten uebergeben, die sich vor dem Start ueber
//! `Server::bus()` registrieren.

pub mod config;

use anyhow::Result;
use comaudio_dispatch::{
    ConnectionListener, EreignisBus, FileStreamer, HandshakeRouter, StreamJob, UebertragungBeendet,
    VerbindungsEreignis,
};
use comaudio_protocol::StreamRolle;
use config::ServerConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Haelt den Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
    bus: EreignisBus,
}

/// Server mit gebundenem Rendezvous-Port
pub struct GebundenerServer {
    config: ServerConfig,
    bus: EreignisBus,
    listener: ConnectionListener,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self {
            config,
            bus: EreignisBus::neu(),
        }
    }

    /// Bus, ueber den externe Konsumenten ihre Rollen abonnieren
    pub fn bus(&self) -> &EreignisBus {
        &self.bus
    }

    /// Bindet den Rendezvous-Port
    pub async fn binden(self) -> Result<GebundenerServer> {
        let bind_addr: SocketAddr = self.config.bind_adresse().parse().map_err(|e| {
            anyhow::anyhow!("Ungueltige Bind-Adresse '{}': {e}", self.config.bind_adresse())
        })?;
        let router = Arc::new(HandshakeRouter::neu(self.bus.clone(), self.config.router_config()));
        let listener = ConnectionListener::binden_mit_limit(
            bind_addr,
            router,
            self.config.handshake.max_gleichzeitig,
        )
        .await?;

        Ok(GebundenerServer {
            config: self.config,
            bus: self.bus,
            listener,
        })
    }

    /// Bindet, startet und laeuft bis Ctrl-C
    pub async fn starten(self) -> Result<()> {
        let server = self.binden().await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown-Signal empfangen, Server wird beendet");
                let _ = shutdown_tx.send(true);
            }
        });

        server.laufen(shutdown_rx).await
    }
}

impl GebundenerServer {
    /// Tatsaechlich gebundene Adresse
    pub fn lokale_adresse(&self) -> std::io::Result<SocketAddr> {
        self.listener.lokale_adresse()
    }

    /// Startet Listener und FileTx-Konsument, laeuft bis `shutdown_rx` `true` meldet
    pub async fn laufen(self, shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        tracing::info!(
            adresse = %self.lokale_adresse()?,
            freigabe = ?self.config.dateien.freigabe,
            "Server startet"
        );

        let abbruch = CancellationToken::new();
        let mut konsumenten = Vec::new();

        // Rollen ohne externen Konsumenten werden protokolliert und geschlossen
        for rolle in StreamRolle::ALLE {
            if rolle != StreamRolle::FileTx && self.bus.abonnenten_anzahl(rolle) == 0 {
                konsumenten.push(tokio::spawn(ohne_konsument(self.bus.abonnieren(rolle))));
            }
        }

        let datei_anfragen = self.bus.abonnieren(StreamRolle::FileTx);
        let streamer = FileStreamer::neu(self.config.dateien.chunk_groesse);
        konsumenten.push(tokio::spawn(dateien_bedienen(
            datei_anfragen,
            streamer,
            self.config.dateien.freigabe.clone(),
            abbruch.clone(),
        )));

        let ergebnis = self.listener.starten(shutdown_rx).await;

        abbruch.cancel();
        for konsument in konsumenten {
            konsument.abort();
        }
        tracing::info!("Server gestoppt");
        Ok(ergebnis?)
    }
}

/// Nimmt Verbindungen einer Rolle ab, fuer die sich niemand registriert hat
async fn ohne_konsument(mut ereignisse: mpsc::UnboundedReceiver<VerbindungsEreignis>) {
    while let Some(ereignis) = ereignisse.recv().await {
        tracing::info!(
            peer = %ereignis.peer,
            rolle = %ereignis.rolle(),
            "Kein Konsument fuer Rolle registriert, Verbindung geschlossen"
        );
    }
}

/// Uebergibt jede FileTx-Verbindung mit der freigegebenen Datei an den Streamer
async fn dateien_bedienen(
    mut anfragen: mpsc::UnboundedReceiver<VerbindungsEreignis>,
    streamer: FileStreamer,
    freigabe: Option<PathBuf>,
    abbruch: CancellationToken,
) {
    let (fertig_tx, mut fertig_rx) = mpsc::unbounded_channel::<UebertragungBeendet>();

    loop {
        tokio::select! {
            Some(ereignis) = anfragen.recv() => {
                let peer = ereignis.peer;
                let Some(pfad) = freigabe.clone() else {
                    tracing::warn!(peer = %peer, "Keine Datei freigegeben – FileTx-Verbindung geschlossen");
                    continue;
                };

                let job = StreamJob::neu(ereignis.verbindung.into_tcp(), pfad);
                let streamer = streamer.clone();
                let abbruch = abbruch.child_token();
                let fertig_tx = fertig_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = streamer.senden(job, &abbruch, &fertig_tx).await {
                        tracing::warn!(peer = %peer, fehler = %e, "Dateiuebertragung fehlgeschlagen");
                    }
                });
            }
            Some(beendet) = fertig_rx.recv() => {
                tracing::info!(
                    pfad = %beendet.pfad.display(),
                    bytes = beendet.bytes,
                    "Uebertragung abgeschlossen"
                );
            }
            else => break,
        }
    }
}
