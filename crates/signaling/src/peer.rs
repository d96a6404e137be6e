//! Schnittstelle zu den Peer-Verbindungs-Primitiven
//!
//! Die eigentliche WebRTC-Implementierung (Peer-Verbindung, ICE,
//! Medienspuren) liefert ein externer Kollaborateur. Der Hub kennt nur
//! diese Schnittstelle; Tests haengen eine Attrappe dahinter.

use async_trait::async_trait;
use tokio::sync::mpsc;

use trinkgeld_core::types::ViewerId;
use trinkgeld_core::Result;
use trinkgeld_protocol::signal::{IceKandidat, SdpBeschreibung};

/// Oeffentliche STUN-Endpunkte fuer die ICE-Verhandlung
pub const ICE_SERVER: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// Verbindungszustand einer Peer-Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerZustand {
    Neu,
    Verbindet,
    Verbunden,
    Getrennt,
    Fehlgeschlagen,
}

impl PeerZustand {
    /// Zustaende die den sofortigen Abbau des Eintrags ausloesen
    pub fn ist_terminal(&self) -> bool {
        matches!(self, Self::Getrennt | Self::Fehlgeschlagen)
    }
}

/// Ereignisse die eine Peer-Verbindung an den Hub meldet
#[derive(Debug, Clone)]
pub enum PeerEreignis {
    /// Lokal erzeugter ICE-Kandidat, gehoert auf das Topic
    IceKandidat {
        viewer_id: ViewerId,
        kandidat: IceKandidat,
    },
    /// Verbindungszustand hat sich geaendert
    ZustandGeaendert {
        viewer_id: ViewerId,
        zustand: PeerZustand,
    },
}

/// Lokale Medienspuren des Broadcasters
///
/// Nur die Spur-IDs – Codec- und Transport-Interna liegen beim
/// Kollaborateur.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MedienTracks {
    pub track_ids: Vec<String>,
}

impl MedienTracks {
    pub fn neu(track_ids: Vec<String>) -> Self {
        Self { track_ids }
    }
}

/// Baut Peer-Verbindungen zu Zuschauern auf
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Erstellt eine neue Peer-Verbindung fuer einen Zuschauer:
    /// ICE-Server konfigurieren, lokale Spuren anhaengen, Ereignisse an
    /// den uebergebenen Kanal melden
    async fn verbinden(
        &self,
        viewer_id: ViewerId,
        ice_server: &[String],
        tracks: MedienTracks,
        ereignisse: mpsc::Sender<PeerEreignis>,
    ) -> Result<Box<dyn PeerVerbindung>>;
}

/// Eine aufgebaute Peer-Verbindung zu einem Zuschauer
#[async_trait]
pub trait PeerVerbindung: Send {
    /// Erstellt das Offer und setzt es als lokale Beschreibung
    async fn offer_erstellen(&mut self) -> Result<SdpBeschreibung>;

    /// Wendet die Answer des Zuschauers als Remote-Beschreibung an
    async fn antwort_anwenden(&mut self, sdp: SdpBeschreibung) -> Result<()>;

    /// Fuegt einen ICE-Kandidaten des Zuschauers hinzu. Kandidaten vor
    /// der Remote-Beschreibung duerfen fehlschlagen – der Hub
    /// verschluckt das.
    async fn kandidat_hinzufuegen(&mut self, kandidat: IceKandidat) -> Result<()>;

    /// Schliesst die Verbindung; mehrfacher Aufruf ist gefahrlos
    async fn schliessen(&mut self);
}
