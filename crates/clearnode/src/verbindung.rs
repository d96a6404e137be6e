//! Transport – die eine persistente Verbindung zum ClearNode
//!
//! Genau eine `Verbindung` traegt eine logische Session. Jeder neue
//! Verbindungsaufbau erhoeht die Generation; alle nachgelagerten
//! Zustaende der alten Generation sind damit ungueltig. Der
//! Verbindungsaufbau hat ein hartes Zeitlimit von 10 Sekunden, danach
//! wird abgebrochen und ein Zeitlimit-Fehler gemeldet.
//!
//! `schliessen` ist idempotent und immer gefahrlos aufrufbar, auch bevor
//! je eine Verbindung bestand.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use trinkgeld_core::{Result, TrinkgeldError};
use trinkgeld_protocol::wire::{FrameCodec, RpcFrame};
use trinkgeld_protocol::RpcEnvelope;

/// Hartes Zeitlimit fuer den Verbindungsaufbau
pub const VERBINDUNGS_TIMEOUT: Duration = Duration::from_secs(10);

/// Zustand des Transports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportZustand {
    /// Keine Verbindung (Ausgangszustand und nach `schliessen`)
    Getrennt,
    /// Verbindungsaufbau laeuft
    Verbindet,
    /// Verbindung steht, Senden/Empfangen moeglich
    Verbunden,
    /// Verbindungsaufbau oder Verbindung fehlgeschlagen
    Fehler,
}

/// Die eine persistente Frame-Verbindung einer Session
///
/// Generisch ueber den Stream-Typ damit Tests einen In-Memory-Stream
/// (`tokio::io::duplex`) unterschieben koennen; produktiv ist `S` ein
/// `TcpStream`.
pub struct Verbindung<S> {
    framed: Option<Framed<S, FrameCodec>>,
    zustand: TransportZustand,
    generation: u64,
}

impl<S> Default for Verbindung<S> {
    fn default() -> Self {
        Self::neu()
    }
}

impl<S> Verbindung<S> {
    /// Erstellt eine getrennte Verbindung
    pub fn neu() -> Self {
        Self {
            framed: None,
            zustand: TransportZustand::Getrennt,
            generation: 0,
        }
    }

    /// Aktueller Transportzustand
    pub fn zustand(&self) -> TransportZustand {
        self.zustand
    }

    /// Aktuelle Verbindungs-Generation. Steigt bei jedem Aufbau und
    /// jedem Schliessen; Zustaende aelterer Generationen sind ungueltig.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Gibt true zurueck wenn gesendet werden kann
    pub fn ist_verbunden(&self) -> bool {
        self.zustand == TransportZustand::Verbunden
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Verbindung<S> {
    /// Uebernimmt einen bereits aufgebauten Stream (Tests, eigene
    /// Transportarten)
    pub fn stream_uebernehmen(&mut self, stream: S) {
        self.framed = Some(Framed::new(stream, FrameCodec::new()));
        self.zustand = TransportZustand::Verbunden;
        self.generation += 1;
        tracing::debug!(generation = self.generation, "Stream uebernommen");
    }

    /// Sendet ein Envelope
    ///
    /// Schlaegt mit `NichtVerbunden` fehl wenn der Transport nicht im
    /// Zustand Verbunden ist.
    pub async fn senden(&mut self, envelope: RpcEnvelope) -> Result<()> {
        if self.zustand != TransportZustand::Verbunden {
            return Err(TrinkgeldError::NichtVerbunden);
        }
        let framed = self
            .framed
            .as_mut()
            .ok_or(TrinkgeldError::NichtVerbunden)?;

        tracing::trace!(methode = envelope.methode(), "Sende Envelope");
        let ergebnis = framed.send(envelope).await;
        match ergebnis {
            Ok(()) => Ok(()),
            Err(e) => {
                self.zustand = TransportZustand::Fehler;
                Err(TrinkgeldError::Getrennt(format!(
                    "Senden fehlgeschlagen: {e}"
                )))
            }
        }
    }

    /// Wartet auf den naechsten Frame
    ///
    /// `Ok(None)` bedeutet: die Gegenseite hat die Verbindung sauber
    /// geschlossen. Unparsbare Frames kommen als `RpcFrame::Ungueltig`
    /// zurueck und werden vom Aufrufer geloggt und verworfen.
    pub async fn naechster_frame(&mut self) -> Result<Option<RpcFrame>> {
        let framed = self
            .framed
            .as_mut()
            .ok_or(TrinkgeldError::NichtVerbunden)?;

        match framed.next().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => {
                self.zustand = TransportZustand::Fehler;
                Err(TrinkgeldError::Getrennt(format!("Lesefehler: {e}")))
            }
            None => {
                self.zustand = TransportZustand::Getrennt;
                self.framed = None;
                self.generation += 1;
                Ok(None)
            }
        }
    }

    /// Schliesst die Verbindung. Idempotent, verschluckt Sendefehler.
    pub async fn schliessen(&mut self) {
        if let Some(mut framed) = self.framed.take() {
            let _ = framed.close().await;
            self.generation += 1;
            tracing::debug!(generation = self.generation, "Verbindung geschlossen");
        }
        self.zustand = TransportZustand::Getrennt;
    }
}

impl Verbindung<TcpStream> {
    /// Baut die TCP-Verbindung zum Koordinator auf
    ///
    /// Bricht nach [`VERBINDUNGS_TIMEOUT`] hart ab und meldet einen
    /// Zeitlimit-Fehler.
    pub async fn verbinden(&mut self, adresse: &str) -> Result<()> {
        self.schliessen().await;
        self.zustand = TransportZustand::Verbindet;
        tracing::info!(adresse, "Verbinde mit ClearNode");

        match tokio::time::timeout(VERBINDUNGS_TIMEOUT, TcpStream::connect(adresse)).await {
            Ok(Ok(stream)) => {
                self.stream_uebernehmen(stream);
                tracing::info!(adresse, "Verbindung zum ClearNode hergestellt");
                Ok(())
            }
            Ok(Err(e)) => {
                self.zustand = TransportZustand::Fehler;
                Err(TrinkgeldError::Verbindung(format!("{adresse}: {e}")))
            }
            Err(_) => {
                self.zustand = TransportZustand::Fehler;
                Err(TrinkgeldError::Zeitlimit(format!(
                    "Verbindungsaufbau zu {adresse} nach {}s abgebrochen",
                    VERBINDUNGS_TIMEOUT.as_secs()
                )))
            }
        }
    }
}
