//! Ereignistypen des Broadcast-Topics fuer die WebRTC-Signalisierung
//!
//! Pro Stream existiert ein Topic dessen Name deterministisch aus der
//! Stream-ID abgeleitet wird. Auf dem Topic laufen die Verhandlungs-
//! Ereignisse zwischen Broadcaster und Zuschauern; die Zustellung
//! schliesst den Absender aus (keine Selbst-Broadcasts).
//!
//! Feldnamen folgen dem bestehenden Draht-Format des Topics (camelCase),
//! nicht der internen snake_case-Konvention.

use serde::{Deserialize, Serialize};
use trinkgeld_core::types::{StreamId, ViewerId};

/// Leitet den Topic-Namen deterministisch aus der Stream-ID ab
pub fn topic_name(stream_id: &StreamId) -> String {
    format!("stream-signal:{stream_id}")
}

/// Wer einen ICE-Kandidaten verschickt hat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAbsender {
    Host,
    Viewer,
}

/// SDP-Beschreibung (Offer oder Answer)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdpBeschreibung {
    /// "offer" oder "answer"
    #[serde(rename = "type")]
    pub typ: String,
    pub sdp: String,
}

/// Ein ICE-Kandidat wie ihn die Peer-Verbindung erzeugt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceKandidat {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u32>,
}

/// Alle Ereignisse auf dem Signalisierungs-Topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum SignalEreignis {
    /// Ein Zuschauer moechte den Stream sehen
    #[serde(rename_all = "camelCase")]
    ViewerJoin { viewer_id: ViewerId },

    /// Offer des Broadcasters an einen bestimmten Zuschauer
    #[serde(rename_all = "camelCase")]
    Offer {
        viewer_id: ViewerId,
        sdp: SdpBeschreibung,
    },

    /// Answer eines Zuschauers auf das Offer
    #[serde(rename_all = "camelCase")]
    Answer {
        viewer_id: ViewerId,
        sdp: SdpBeschreibung,
    },

    /// ICE-Kandidat, adressiert ueber die Zuschauer-ID und markiert mit
    /// dem Absender (Host oder Viewer)
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        viewer_id: ViewerId,
        candidate: IceKandidat,
        sender: SignalAbsender,
    },

    /// Der Broadcaster hat den Stream beendet
    StreamEnded {},
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn topic_name_deterministisch() {
        let id = StreamId(Uuid::nil());
        assert_eq!(topic_name(&id), topic_name(&id));
        assert_eq!(
            topic_name(&id),
            "stream-signal:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn viewer_join_drahtformat() {
        let e = SignalEreignis::ViewerJoin {
            viewer_id: ViewerId::neu("v1"),
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"event\":\"viewer-join\""));
        assert!(json.contains("\"viewerId\":\"v1\""));
    }

    #[test]
    fn ice_candidate_rundreise() {
        let e = SignalEreignis::IceCandidate {
            viewer_id: ViewerId::neu("v2"),
            candidate: IceKandidat {
                candidate: "candidate:1 1 udp 2122260223 192.0.2.1 54400 typ host".into(),
                sdp_mid: Some("0".into()),
                sdp_m_line_index: Some(0),
            },
            sender: SignalAbsender::Viewer,
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"event\":\"ice-candidate\""));
        assert!(json.contains("\"sender\":\"viewer\""));
        let zurueck: SignalEreignis = serde_json::from_str(&json).unwrap();
        assert_eq!(zurueck, e);
    }

    #[test]
    fn stream_ended_leere_payload() {
        let e = SignalEreignis::StreamEnded {};
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"event\":\"stream-ended\""));
        let zurueck: SignalEreignis = serde_json::from_str(&json).unwrap();
        assert_eq!(zurueck, e);
    }

    #[test]
    fn answer_von_drahtformat_parsen() {
        let json = r#"{
            "event": "answer",
            "payload": {
                "viewerId": "v1",
                "sdp": { "type": "answer", "sdp": "v=0..." }
            }
        }"#;
        let e: SignalEreignis = serde_json::from_str(json).unwrap();
        match e {
            SignalEreignis::Answer { viewer_id, sdp } => {
                assert_eq!(viewer_id, ViewerId::neu("v1"));
                assert_eq!(sdp.typ, "answer");
            }
            andere => panic!("Erwartet Answer, erhalten {:?}", andere),
        }
    }
}
