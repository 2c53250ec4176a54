//! comaudio-verbinden – Baut eine ausgehende Verbindung fuer eine Rolle auf
//!
//! Fuehrt den Handshake als anfragende Seite durch. Wartezeiten und Logging
//! kommen aus der Konfigurationsdatei (`COMAUDIO_CONFIG`, sonst `config.toml`),
//! Kommandozeilen-Optionen haben Vorrang. Bei `file_tx` mit
//! `--ziel` wird der empfangene Byte-Strom bis zum Schliessen durch die
//! Gegenseite in die Zieldatei geschrieben.

use anyhow::{Context, Result};
use clap::Parser;
use comaudio_dispatch::{EreignisBus, OutboundConnector, RollenVerbindung};
use comaudio_observability::logging_initialisieren;
use comaudio_protocol::StreamRolle;
use comaudio_server::config::ServerConfig;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "comaudio-verbinden", version, about = "Stellt eine ComAudio-Verbindung fuer eine Stream-Rolle her")]
struct Cli {
    /// Host der Gegenseite
    host: String,

    /// Rendezvous-Port der Gegenseite
    port: u16,

    /// Rolle: song_stream, voice_stream, file_list, file_tx, stream_file_list
    rolle: StreamRolle,

    /// Zieldatei fuer empfangene Daten (nur file_tx)
    #[arg(long)]
    ziel: Option<PathBuf>,

    /// Wartezeit auf die Bestaetigung in ms fuer alle Rollen (Standard: `[verbinden]`)
    #[arg(long)]
    ack_timeout_ms: Option<u64>,

    /// Log-Level (Standard: `[logging]`)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_pfad = std::env::var("COMAUDIO_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = ServerConfig::laden(&config_pfad)?;

    let log_level = cli.log_level.as_deref().unwrap_or(config.logging.level.as_str());
    logging_initialisieren(log_level, &config.logging.format);

    let bus = EreignisBus::neu();
    let mut verbunden = bus.abonnieren(cli.rolle);
    let connector =
        OutboundConnector::neu(bus, config.connector_config_ueberschrieben(cli.ack_timeout_ms));

    let id = match connector.verbinden(&cli.host, cli.port, cli.rolle).await {
        Ok(id) => id,
        Err(e) => anyhow::bail!(e.benutzer_meldung()),
    };

    let ereignis = verbunden
        .try_recv()
        .context("Verbindung hergestellt, aber kein Ereignis erhalten")?;
    println!("Verbunden mit {} ({})", ereignis.peer, ereignis.rolle());

    match (ereignis.verbindung, cli.ziel) {
        (RollenVerbindung::FileTx(mut tcp), Some(ziel)) => {
            let mut datei = tokio::fs::File::create(&ziel)
                .await
                .with_context(|| format!("Zieldatei '{}' nicht anlegbar", ziel.display()))?;
            let bytes = tokio::io::copy(&mut tcp, &mut datei).await?;
            println!("{bytes} Bytes nach {} geschrieben", ziel.display());
        }
        (RollenVerbindung::Voice { udp, .. }, _) => {
            println!("UDP-Endpunkt fuer {} bereit (ungebunden)", udp.peer());
        }
        (_, Some(_)) if cli.rolle != StreamRolle::FileTx => {
            tracing::warn!(rolle = %cli.rolle, "--ziel wird nur bei file_tx verwendet");
        }
        _ => {}
    }

    connector.verbindung_entfernen(&id);
    Ok(())
}
