//! Trinkgeld Signalisierung – Peer-Verhandlung des Broadcasters
//!
//! Pro Stream ein Broadcast-Topic, pro Zuschauer eine Peer-Verbindung.
//! Der [`hub::SignalHub`] besitzt die Verbindungs-Map exklusiv und
//! verarbeitet alle Topic- und Peer-Ereignisse in einer einzigen
//! geordneten Schleife; nach aussen gibt es nur Nachrichten und
//! Status-Leser.
//!
//! Die eigentlichen WebRTC-Primitiven (Peer-Verbindung, Medienspuren)
//! liefert ein externer Kollaborateur hinter [`peer::PeerConnector`].

pub mod hub;
pub mod peer;
pub mod topic;

pub use hub::SignalHub;
pub use peer::{MedienTracks, PeerConnector, PeerEreignis, PeerVerbindung, PeerZustand, ICE_SERVER};
pub use topic::{TopicAnschluss, TopicBus};
