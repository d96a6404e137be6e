//! In-Memory-Broadcast-Topic fuer die Signalisierung
//!
//! Der Bus verwaltet die Empfangs-Queues aller Teilnehmer pro Topic.
//! Die Zustellung schliesst den Absender aus (keine Selbst-Broadcasts).
//! Produktiv sitzt hier ein externer Pub/Sub-Transport mit derselben
//! Semantik; dieser Bus traegt lokale Laeufe und Tests.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use trinkgeld_protocol::SignalEreignis;

/// Groesse der Empfangs-Queue pro Teilnehmer
const EMPFANGS_QUEUE_GROESSE: usize = 64;

/// Ein Teilnehmer an einem Topic
struct Teilnehmer {
    id: Uuid,
    tx: mpsc::Sender<SignalEreignis>,
}

/// Zentraler Topic-Bus
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone, Default)]
pub struct TopicBus {
    topics: Arc<DashMap<String, Vec<Teilnehmer>>>,
}

impl TopicBus {
    /// Erstellt einen leeren Bus
    pub fn neu() -> Self {
        Self::default()
    }

    /// Tritt einem Topic bei und gibt den Anschluss zurueck
    ///
    /// Der Anschluss meldet sich beim Drop selbst vom Topic ab.
    pub fn beitreten(&self, topic: &str) -> TopicAnschluss {
        let (tx, rx) = mpsc::channel(EMPFANGS_QUEUE_GROESSE);
        let id = Uuid::new_v4();
        self.topics
            .entry(topic.to_string())
            .or_default()
            .push(Teilnehmer { id, tx });
        tracing::debug!(topic, teilnehmer = %id, "Topic beigetreten");
        TopicAnschluss {
            bus: self.clone(),
            topic: topic.to_string(),
            id,
            rx,
        }
    }

    /// Anzahl der Teilnehmer eines Topics
    pub fn teilnehmer_anzahl(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|t| t.len()).unwrap_or(0)
    }

    /// Stellt ein Ereignis an alle Teilnehmer ausser dem Absender zu.
    /// Tote Queues werden dabei ausgeraeumt. Gibt die Anzahl der
    /// erreichten Teilnehmer zurueck.
    fn publizieren(&self, topic: &str, absender: Uuid, ereignis: SignalEreignis) -> usize {
        let Some(mut teilnehmer) = self.topics.get_mut(topic) else {
            return 0;
        };
        let mut zugestellt = 0;
        teilnehmer.retain(|t| {
            if t.id == absender {
                return true;
            }
            match t.tx.try_send(ereignis.clone()) {
                Ok(()) => {
                    zugestellt += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(topic, teilnehmer = %t.id, "Empfangs-Queue voll – Ereignis verworfen");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
        zugestellt
    }

    fn verlassen(&self, topic: &str, id: Uuid) {
        if let Some(mut teilnehmer) = self.topics.get_mut(topic) {
            teilnehmer.retain(|t| t.id != id);
        }
        self.topics.retain(|_, teilnehmer| !teilnehmer.is_empty());
        tracing::debug!(topic, teilnehmer = %id, "Topic verlassen");
    }
}

/// Anschluss eines Teilnehmers an ein Topic
pub struct TopicAnschluss {
    bus: TopicBus,
    topic: String,
    id: Uuid,
    rx: mpsc::Receiver<SignalEreignis>,
}

impl TopicAnschluss {
    /// Stellt ein Ereignis an alle anderen Teilnehmer zu
    pub fn publizieren(&self, ereignis: SignalEreignis) -> usize {
        self.bus.publizieren(&self.topic, self.id, ereignis)
    }

    /// Wartet auf das naechste Ereignis; `None` wenn das Topic
    /// geschlossen wurde
    pub async fn empfangen(&mut self) -> Option<SignalEreignis> {
        self.rx.recv().await
    }

    /// Name des Topics
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for TopicAnschluss {
    fn drop(&mut self) {
        self.bus.verlassen(&self.topic, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trinkgeld_core::types::ViewerId;

    fn join_ereignis(id: &str) -> SignalEreignis {
        SignalEreignis::ViewerJoin {
            viewer_id: ViewerId::neu(id),
        }
    }

    #[tokio::test]
    async fn zustellung_schliesst_den_absender_aus() {
        let bus = TopicBus::neu();
        let mut a = bus.beitreten("stream-signal:x");
        let mut b = bus.beitreten("stream-signal:x");

        let zugestellt = a.publizieren(join_ereignis("v1"));
        assert_eq!(zugestellt, 1);

        assert_eq!(b.empfangen().await, Some(join_ereignis("v1")));
        // Der Absender selbst darf nichts erhalten
        assert!(a.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn getrennte_topics_bleiben_getrennt() {
        let bus = TopicBus::neu();
        let a = bus.beitreten("stream-signal:x");
        let mut fremd = bus.beitreten("stream-signal:y");

        a.publizieren(join_ereignis("v1"));
        assert!(fremd.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn drop_verlaesst_das_topic() {
        let bus = TopicBus::neu();
        let a = bus.beitreten("stream-signal:x");
        let b = bus.beitreten("stream-signal:x");
        assert_eq!(bus.teilnehmer_anzahl("stream-signal:x"), 2);

        drop(b);
        assert_eq!(bus.teilnehmer_anzahl("stream-signal:x"), 1);
        drop(a);
        assert_eq!(bus.teilnehmer_anzahl("stream-signal:x"), 0);
    }

    #[tokio::test]
    async fn publizieren_ohne_mitleser_erreicht_niemanden() {
        let bus = TopicBus::neu();
        let a = bus.beitreten("stream-signal:x");
        assert_eq!(a.publizieren(join_ereignis("v1")), 0);
    }
}
