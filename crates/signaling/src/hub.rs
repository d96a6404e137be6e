//! SignalHub – eine Schleife pro Stream, eine Verbindung pro Zuschauer
//!
//! Der Hub laeuft als eigener tokio-Task und besitzt die
//! Verbindungs-Map exklusiv. Topic-Ereignisse (Join, Answer,
//! ICE-Kandidaten) und Peer-Ereignisse (lokale Kandidaten,
//! Zustandswechsel) werden in einer einzigen `select!`-Schleife
//! verarbeitet – Mutationen der Map laufen dadurch strikt nacheinander
//! und sind gegen "Eintrag fehlt schon" und "Eintrag wurde ersetzt"
//! unempfindlich.
//!
//! Die Zuschauerzahl ist immer die lebende Groesse der Map, nie separat
//! gezaehlt. Der Abbau (stream-ended senden, alle Verbindungen
//! schliessen, Map leeren, Topic verlassen) laeuft genau einmal pro
//! Session, egal ob ihn ein explizites Beenden, der Drop des Handles
//! oder das Ende des Topics ausloest.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use trinkgeld_core::types::{StreamId, ViewerId};
use trinkgeld_protocol::signal::{topic_name, SignalAbsender, SignalEreignis};

use crate::peer::{MedienTracks, PeerConnector, PeerEreignis, PeerVerbindung, ICE_SERVER};
use crate::topic::{TopicAnschluss, TopicBus};

/// Groesse der Peer-Ereignis-Queue
const PEER_EREIGNIS_QUEUE: usize = 64;

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle auf den laufenden Hub
///
/// Drop ohne explizites `beenden` stoesst den Abbau ebenfalls an.
pub struct SignalHub {
    beenden_tx: Option<mpsc::Sender<()>>,
    anzahl_rx: watch::Receiver<usize>,
    aufgabe: Option<JoinHandle<()>>,
}

impl SignalHub {
    /// Startet den Hub fuer einen Stream: Topic abonnieren, Schleife
    /// spawnen
    pub fn starten(
        stream_id: StreamId,
        lokale_tracks: MedienTracks,
        connector: Arc<dyn PeerConnector>,
        bus: &TopicBus,
    ) -> Self {
        let anschluss = bus.beitreten(&topic_name(&stream_id));
        let (beenden_tx, beenden_rx) = mpsc::channel(1);
        let (anzahl_tx, anzahl_rx) = watch::channel(0usize);

        let schleife = HubSchleife {
            anschluss,
            lokale_tracks,
            connector,
            ice_server: ICE_SERVER.iter().map(|s| s.to_string()).collect(),
            peers: HashMap::new(),
            anzahl_tx,
        };
        let aufgabe = tokio::spawn(schleife.laufen(beenden_rx));

        tracing::info!(stream_id = %stream_id, "SignalHub gestartet");
        Self {
            beenden_tx: Some(beenden_tx),
            anzahl_rx,
            aufgabe: Some(aufgabe),
        }
    }

    /// Aktuelle Zuschauerzahl (lebende Groesse der Verbindungs-Map)
    pub fn viewer_anzahl(&self) -> usize {
        *self.anzahl_rx.borrow()
    }

    /// Beobachter auf die Zuschauerzahl
    pub fn anzahl_beobachten(&self) -> watch::Receiver<usize> {
        self.anzahl_rx.clone()
    }

    /// Beendet den Hub und wartet den vollstaendigen Abbau ab
    pub async fn beenden(&mut self) {
        if let Some(tx) = self.beenden_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(aufgabe) = self.aufgabe.take() {
            let _ = aufgabe.await;
        }
    }
}

impl Drop for SignalHub {
    fn drop(&mut self) {
        // Unmount ohne explizites Beenden: Abbau trotzdem anstossen
        if let Some(tx) = self.beenden_tx.take() {
            let _ = tx.try_send(());
        }
    }
}

// ---------------------------------------------------------------------------
// Schleife
// ---------------------------------------------------------------------------

struct HubSchleife {
    anschluss: TopicAnschluss,
    lokale_tracks: MedienTracks,
    connector: Arc<dyn PeerConnector>,
    ice_server: Vec<String>,
    peers: HashMap<ViewerId, Box<dyn PeerVerbindung>>,
    anzahl_tx: watch::Sender<usize>,
}

impl HubSchleife {
    async fn laufen(mut self, mut beenden_rx: mpsc::Receiver<()>) {
        let (peer_tx, mut peer_rx) = mpsc::channel::<PeerEreignis>(PEER_EREIGNIS_QUEUE);

        loop {
            tokio::select! {
                ereignis = self.anschluss.empfangen() => {
                    match ereignis {
                        Some(e) => self.topic_ereignis(e, &peer_tx).await,
                        None => {
                            tracing::warn!("Topic geschlossen – Hub faehrt herunter");
                            break;
                        }
                    }
                }

                Some(pe) = peer_rx.recv() => {
                    self.peer_ereignis(pe).await;
                }

                _ = beenden_rx.recv() => {
                    tracing::debug!("Beenden angefordert");
                    break;
                }
            }
            let _ = self.anzahl_tx.send(self.peers.len());
        }

        // Abbau – genau einmal pro Session, auf jedem Austrittspfad
        self.anschluss.publizieren(SignalEreignis::StreamEnded {});
        for (viewer_id, mut peer) in self.peers.drain() {
            tracing::debug!(viewer = %viewer_id, "Peer-Verbindung wird geschlossen");
            peer.schliessen().await;
        }
        let _ = self.anzahl_tx.send(0);
        tracing::info!("SignalHub beendet");
        // Drop des Anschlusses verlaesst das Topic
    }

    async fn topic_ereignis(
        &mut self,
        ereignis: SignalEreignis,
        peer_tx: &mpsc::Sender<PeerEreignis>,
    ) {
        match ereignis {
            SignalEreignis::ViewerJoin { viewer_id } => {
                self.viewer_beitritt(viewer_id, peer_tx).await;
            }

            SignalEreignis::Answer { viewer_id, sdp } => {
                // Kein Eintrag: spaetes oder doppeltes Ereignis – No-op
                match self.peers.get_mut(&viewer_id) {
                    Some(peer) => {
                        if let Err(e) = peer.antwort_anwenden(sdp).await {
                            tracing::warn!(viewer = %viewer_id, fehler = %e, "Answer nicht anwendbar");
                        }
                    }
                    None => {
                        tracing::debug!(viewer = %viewer_id, "Answer ohne Verbindung ignoriert");
                    }
                }
            }

            SignalEreignis::IceCandidate {
                viewer_id,
                candidate,
                sender: SignalAbsender::Viewer,
            } => {
                if let Some(peer) = self.peers.get_mut(&viewer_id) {
                    // Kandidaten vor der Remote-Beschreibung schlagen
                    // fehl; das ist bei ICE-Zustellung ausser der Reihe
                    // normal und wird verschluckt
                    if peer.kandidat_hinzufuegen(candidate).await.is_err() {
                        tracing::trace!(viewer = %viewer_id, "ICE-Kandidat verworfen");
                    }
                }
            }

            // Eigene Host-Kandidaten kommen durch die
            // Absender-Unterdrueckung normalerweise nicht an
            SignalEreignis::IceCandidate { .. } => {}

            // Offers verschickt nur der Host selbst
            SignalEreignis::Offer { .. } => {}

            SignalEreignis::StreamEnded {} => {
                tracing::debug!("Fremdes stream-ended ignoriert");
            }
        }
    }

    /// Join eines Zuschauers: bestehende Verbindung zuerst abbauen
    /// (Reconnect ohne Leave), neue Verbindung mit den aktuellen
    /// lokalen Spuren aufbauen, Offer adressiert publizieren
    async fn viewer_beitritt(
        &mut self,
        viewer_id: ViewerId,
        peer_tx: &mpsc::Sender<PeerEreignis>,
    ) {
        if let Some(mut alte) = self.peers.remove(&viewer_id) {
            tracing::debug!(viewer = %viewer_id, "Bestehende Verbindung wird ersetzt");
            alte.schliessen().await;
        }

        let mut peer = match self
            .connector
            .verbinden(
                viewer_id.clone(),
                &self.ice_server,
                self.lokale_tracks.clone(),
                peer_tx.clone(),
            )
            .await
        {
            Ok(peer) => peer,
            Err(e) => {
                tracing::warn!(viewer = %viewer_id, fehler = %e, "Peer-Aufbau fehlgeschlagen");
                return;
            }
        };

        match peer.offer_erstellen().await {
            Ok(sdp) => {
                self.anschluss.publizieren(SignalEreignis::Offer {
                    viewer_id: viewer_id.clone(),
                    sdp,
                });
                tracing::info!(viewer = %viewer_id, "Zuschauer verbunden, Offer gesendet");
                self.peers.insert(viewer_id, peer);
            }
            Err(e) => {
                tracing::warn!(viewer = %viewer_id, fehler = %e, "Offer fehlgeschlagen");
                peer.schliessen().await;
            }
        }
    }

    async fn peer_ereignis(&mut self, ereignis: PeerEreignis) {
        match ereignis {
            PeerEreignis::IceKandidat { viewer_id, kandidat } => {
                self.anschluss.publizieren(SignalEreignis::IceCandidate {
                    viewer_id,
                    candidate: kandidat,
                    sender: SignalAbsender::Host,
                });
            }

            PeerEreignis::ZustandGeaendert { viewer_id, zustand } => {
                if zustand.ist_terminal() {
                    // Abbau ist gegen "Eintrag fehlt schon" unempfindlich
                    if let Some(mut peer) = self.peers.remove(&viewer_id) {
                        tracing::info!(viewer = %viewer_id, zustand = ?zustand, "Zuschauer getrennt");
                        peer.schliessen().await;
                    }
                }
            }
        }
    }
}
