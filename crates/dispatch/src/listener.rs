//! TCP-Listener – Bindet den Rendezvous-Port und akzeptiert Verbindungen
//!
//! Jede akzeptierte Verbindung wird in einem eigenen tokio-Task an den
//! `HandshakeRouter` uebergeben. Eine langsame Gegenseite blockiert damit
//! nur ihren eigenen Handshake, nicht die Annahme weiterer Verbindungen.
//! Die Anzahl gleichzeitig laufender Handshakes ist per Semaphore begrenzt.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

use crate::router::HandshakeRouter;

/// Standard-Limit gleichzeitiger Handshakes
pub const STANDARD_MAX_HANDSHAKES: usize = 64;

/// Nimmt Verbindungen an und reicht sie an den Router weiter
pub struct ConnectionListener {
    listener: TcpListener,
    router: Arc<HandshakeRouter>,
    handshake_plaetze: Arc<Semaphore>,
}

impl ConnectionListener {
    /// Bindet den Listener an `bind_addr`
    pub async fn binden(bind_addr: SocketAddr, router: Arc<HandshakeRouter>) -> std::io::Result<Self> {
        Self::binden_mit_limit(bind_addr, router, STANDARD_MAX_HANDSHAKES).await
    }

    /// Wie `binden`, mit eigenem Limit gleichzeitiger Handshakes
    pub async fn binden_mit_limit(
        bind_addr: SocketAddr,
        router: Arc<HandshakeRouter>,
        max_handshakes: usize,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        Ok(Self {
            listener,
            router,
            handshake_plaetze: Arc::new(Semaphore::new(max_handshakes.max(1))),
        })
    }

    /// Tatsaechlich gebundene Adresse (Port 0 wird vom OS vergeben)
    pub fn lokale_adresse(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept-Loop, laeuft bis `shutdown_rx` ein `true`-Signal empfaengt
    pub async fn starten(self, mut shutdown_rx: tokio::sync::watch::Receiver<bool>) -> std::io::Result<()> {
        let lokale_addr = self.listener.local_addr()?;
        tracing::info!(adresse = %lokale_addr, "Verbindungs-Listener gestartet");

        loop {
            tokio::select! {
                // Neue eingehende Verbindung
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            tracing::debug!(peer = %peer_addr, "Verbindung akzeptiert");

                            let router = Arc::clone(&self.router);
                            let plaetze = Arc::clone(&self.handshake_plaetze);
                            tokio::spawn(async move {
                                let _platz = match plaetze.acquire_owned().await {
                                    Ok(platz) => platz,
                                    Err(_) => return,
                                };
                                // Fehler loggt der Router bereits als Warnung
                                if let Ok(rolle) = router.annehmen(stream, peer_addr).await {
                                    tracing::trace!(peer = %peer_addr, rolle = %rolle, "Handshake-Task beendet");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!(fehler = %e, "TCP-Accept-Fehler");
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        }
                    }
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Listener: Shutdown-Signal empfangen");
                        break;
                    }
                }
            }
        }

        tracing::info!("Verbindungs-Listener gestoppt");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
