//! Datei-Streamer – Sendet eine Datei ueber eine bereits klassifizierte Verbindung
//!
//! Die Datei wird in Bloecken fester Groesse gelesen und unveraendert auf die
//! Verbindung geschrieben. Es gibt kein Framing und keinen Groessen-Praefix;
//! der Empfaenger erkennt das Ende am Schliessen der Verbindung.
//! Nach dem letzten Byte folgt genau eine `UebertragungBeendet`-Meldung.

use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{DispatchError, DispatchResult};
use crate::event::UebertragungBeendet;

/// Standard-Blockgroesse (64 KiB)
pub const STANDARD_CHUNK_GROESSE: usize = 64 * 1024;

/// Eine zu sendende Datei samt Zielverbindung
#[derive(Debug)]
pub struct StreamJob<W> {
    pub verbindung: W,
    pub pfad: PathBuf,
}

impl<W> StreamJob<W> {
    pub fn neu(verbindung: W, pfad: impl Into<PathBuf>) -> Self {
        Self {
            verbindung,
            pfad: pfad.into(),
        }
    }
}

/// Sendet Dateien blockweise
#[derive(Debug, Clone)]
pub struct FileStreamer {
    chunk_groesse: usize,
}

impl Default for FileStreamer {
    fn default() -> Self {
        Self::neu(STANDARD_CHUNK_GROESSE)
    }
}

impl FileStreamer {
    /// Erstellt einen Streamer mit der gegebenen Blockgroesse (mindestens 1 Byte)
    pub fn neu(chunk_groesse: usize) -> Self {
        Self {
            chunk_groesse: chunk_groesse.max(1),
        }
    }

    /// Sendet die Datei des Jobs und meldet danach das Ende auf `fertig`
    ///
    /// Gibt die Anzahl gesendeter Bytes zurueck. Nach dem letzten Block wird
    /// die Schreibseite der Verbindung geschlossen.
    ///
    /// # Fehler
    /// - `Datei` wenn die Datei nicht geoeffnet oder gelesen werden kann
    ///   (es wurde dann nichts gesendet bzw. nicht alles)
    /// - `Io` bei Schreibfehlern auf der Verbindung
    /// - `Abgebrochen` wenn `abbruch` ausgeloest wurde
    ///
    /// In keinem Fehlerfall wird `UebertragungBeendet` gemeldet.
    pub async fn senden<W>(
        &self,
        job: StreamJob<W>,
        abbruch: &CancellationToken,
        fertig: &mpsc::UnboundedSender<UebertragungBeendet>,
    ) -> DispatchResult<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let StreamJob {
            mut verbindung,
            pfad,
        } = job;

        let mut datei = File::open(&pfad).await.map_err(|e| {
            tracing::debug!(pfad = %pfad.display(), fehler = %e, "Datei nicht lesbar");
            DispatchError::Datei(format!("'{}' nicht lesbar: {e}", pfad.display()))
        })?;

        tracing::debug!(pfad = %pfad.display(), chunk = self.chunk_groesse, "Dateiuebertragung gestartet");

        let mut puffer = vec![0u8; self.chunk_groesse];
        let mut gesendet: u64 = 0;

        loop {
            let gelesen = tokio::select! {
                biased;
                _ = abbruch.cancelled() => return Err(DispatchError::Abgebrochen),
                r = datei.read(&mut puffer) => r.map_err(|e| {
                    DispatchError::Datei(format!("Lesefehler in '{}': {e}", pfad.display()))
                })?,
            };
            if gelesen == 0 {
                break;
            }

            tokio::select! {
                biased;
                _ = abbruch.cancelled() => return Err(DispatchError::Abgebrochen),
                r = verbindung.write_all(&puffer[..gelesen]) => r?,
            }
            gesendet += gelesen as u64;
            tracing::trace!(bytes = gelesen, gesamt = gesendet, "Block gesendet");
        }

        verbindung.flush().await?;
        verbindung.shutdown().await?;
        drop(datei);

        tracing::info!(pfad = %pfad.display(), bytes = gesendet, "Dateiuebertragung beendet");
        if fertig
            .send(UebertragungBeendet {
                pfad,
                bytes: gesendet,
            })
            .is_err()
        {
            tracing::debug!("Niemand wartet auf das Uebertragungsende");
        }

        Ok(gesendet)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Binaerdaten mit vielen eingestreuten Zeilenumbruechen
    fn binaer_inhalt(laenge: usize) -> Vec<u8> {
        (0..laenge)
            .map(|i| if i % 97 == 0 { b'\n' } else { (i * 31 % 251) as u8 })
            .collect()
    }

    fn temp_datei(inhalt: &[u8]) -> tempfile::NamedTempFile {
        let mut datei = tempfile::NamedTempFile::new().expect("Temp-Datei konnte nicht erstellt werden");
        datei.write_all(inhalt).unwrap();
        datei.flush().unwrap();
        datei
    }

    #[tokio::test]
    async fn binaerdatei_wird_bytegenau_gesendet() {
        let inhalt = binaer_inhalt(200_003);
        let datei = temp_datei(&inhalt);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ziel: Vec<u8> = Vec::new();

        let streamer = FileStreamer::neu(4096);
        let bytes = streamer
            .senden(StreamJob::neu(&mut ziel, datei.path()), &CancellationToken::new(), &tx)
            .await
            .unwrap();

        assert_eq!(bytes, inhalt.len() as u64);
        assert_eq!(ziel, inhalt);

        let meldung = rx.try_recv().expect("Ende-Meldung erwartet");
        assert_eq!(meldung.bytes, inhalt.len() as u64);
        assert_eq!(meldung.pfad, datei.path());
        assert!(rx.try_recv().is_err(), "genau eine Ende-Meldung");
    }

    #[tokio::test]
    async fn fuenf_mib_ueber_duplex() {
        let inhalt = binaer_inhalt(5 * 1024 * 1024);
        let datei = temp_datei(&inhalt);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (schreiber, mut leser) = tokio::io::duplex(64 * 1024);

        let empfang = tokio::spawn(async move {
            let mut empfangen = Vec::new();
            leser.read_to_end(&mut empfangen).await.unwrap();
            empfangen
        });

        let bytes = FileStreamer::default()
            .senden(StreamJob::neu(schreiber, datei.path()), &CancellationToken::new(), &tx)
            .await
            .unwrap();

        let empfangen = empfang.await.unwrap();
        assert_eq!(bytes, 5 * 1024 * 1024);
        assert_eq!(empfangen.len(), inhalt.len());
        assert!(empfangen == inhalt);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn leere_datei_meldet_null_bytes() {
        let datei = temp_datei(&[]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ziel: Vec<u8> = Vec::new();

        let bytes = FileStreamer::default()
            .senden(StreamJob::neu(&mut ziel, datei.path()), &CancellationToken::new(), &tx)
            .await
            .unwrap();
        assert_eq!(bytes, 0);
        assert!(ziel.is_empty());
        assert_eq!(rx.try_recv().unwrap().bytes, 0);
    }

    #[tokio::test]
    async fn fehlende_datei_sendet_nichts() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ziel: Vec<u8> = Vec::new();

        let ergebnis = FileStreamer::default()
            .senden(
                StreamJob::neu(&mut ziel, dir.path().join("gibt-es-nicht.ogg")),
                &CancellationToken::new(),
                &tx,
            )
            .await;

        assert!(matches!(ergebnis, Err(DispatchError::Datei(_))));
        assert!(ziel.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn schreibfehler_wird_gemeldet() {
        let datei = temp_datei(&binaer_inhalt(10_000));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (schreiber, leser) = tokio::io::duplex(16);
        drop(leser);

        let ergebnis = FileStreamer::neu(1024)
            .senden(StreamJob::neu(schreiber, datei.path()), &CancellationToken::new(), &tx)
            .await;
        assert!(matches!(ergebnis, Err(DispatchError::Io(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn abbruch_beendet_uebertragung() {
        let datei = temp_datei(&binaer_inhalt(10_000));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut ziel: Vec<u8> = Vec::new();
        let abbruch = CancellationToken::new();
        abbruch.cancel();

        let ergebnis = FileStreamer::default()
            .senden(StreamJob::neu(&mut ziel, datei.path()), &abbruch, &tx)
            .await;
        assert!(matches!(ergebnis, Err(DispatchError::Abgebrochen)));
        assert!(ziel.is_empty());
        assert!(rx.try_recv().is_err());
    }
}
