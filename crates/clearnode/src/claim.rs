//! Claim – Batch-Schliessung aller offenen Kanaele
//!
//! Eigene Statusachse getrennt vom Kanal-Lebenszyklus: {Leerlauf, Laedt,
//! Schliesst, Abgeschlossen, Fehler}. Der Koordinator fragt alle offenen
//! Kanaele des Teilnehmers ab; sind keine vorhanden, ist der Claim sofort
//! abgeschlossen (kein Fehler). Sonst wird pro Kanal eine signierte
//! Schliessung angefragt – Abgeschlossen erst wenn jede einzelne
//! bestaetigt wurde. Ein Protokollfehler waehrend Laden oder Schliessen
//! setzt den gesamten Batch auf Fehler; es gibt keinen automatischen
//! Wiederanlauf und keine Teil-Erfolgs-Meldung.

use std::collections::HashSet;

use trinkgeld_core::types::{Address, ChannelId};
use trinkgeld_core::{Result, TrinkgeldError};
use trinkgeld_protocol::rpc::{
    ChannelStatusFilter, ChannelSummary, CloseChannelParams, GetChannelsParams, RpcPayload,
};

/// Status des Claim-Batches
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimStatus {
    Leerlauf,
    /// Kanal-Liste wird abgefragt
    Laedt,
    /// Schliessungen laufen; Abgeschlossen erst nach der letzten
    /// Bestaetigung
    Schliesst,
    Abgeschlossen,
    Fehler(String),
}

/// Koordiniert die Batch-Schliessung
pub struct ClaimKoordinator {
    status: ClaimStatus,
    /// Kanaele deren Schliessung noch nicht bestaetigt wurde
    ausstehend: HashSet<ChannelId>,
}

impl Default for ClaimKoordinator {
    fn default() -> Self {
        Self::neu()
    }
}

impl ClaimKoordinator {
    pub fn neu() -> Self {
        Self {
            status: ClaimStatus::Leerlauf,
            ausstehend: HashSet::new(),
        }
    }

    /// Aktueller Batch-Status
    pub fn status(&self) -> &ClaimStatus {
        &self.status
    }

    /// Anzahl noch unbestaetigter Schliessungen
    pub fn offene_schliessungen(&self) -> usize {
        self.ausstehend.len()
    }

    /// Setzt den Koordinator zurueck (Reconnect/Trennung)
    pub fn zuruecksetzen(&mut self) {
        self.status = ClaimStatus::Leerlauf;
        self.ausstehend.clear();
    }

    /// Startet den Claim: baut die Abfrage aller offenen Kanaele des
    /// Teilnehmers und wechselt nach Laedt
    pub fn starten(&mut self, teilnehmer: Address) -> Result<RpcPayload> {
        if matches!(self.status, ClaimStatus::Laedt | ClaimStatus::Schliesst) {
            return Err(TrinkgeldError::Kanal(
                "Ein Claim laeuft bereits".into(),
            ));
        }
        self.status = ClaimStatus::Laedt;
        self.ausstehend.clear();
        tracing::info!(teilnehmer = %teilnehmer, "Claim gestartet");
        Ok(RpcPayload::GetChannelsRequest(GetChannelsParams {
            participant: teilnehmer,
            status: ChannelStatusFilter::Open,
        }))
    }

    /// Nimmt die Kanal-Liste entgegen und baut pro Kanal die
    /// Schliessungs-Anfrage
    ///
    /// Ohne offene Kanaele wechselt der Status direkt nach Abgeschlossen
    /// (nichts einzufordern ist kein Fehler) und es wird nichts gesendet.
    pub fn kanal_liste_empfangen(
        &mut self,
        kanaele: &[ChannelSummary],
        ziel: Address,
    ) -> Vec<RpcPayload> {
        if self.status != ClaimStatus::Laedt {
            tracing::debug!("Kanal-Liste ausserhalb eines Claims – ignoriert");
            return Vec::new();
        }

        if kanaele.is_empty() {
            tracing::info!("Keine offenen Kanaele – Claim sofort abgeschlossen");
            self.status = ClaimStatus::Abgeschlossen;
            return Vec::new();
        }

        self.status = ClaimStatus::Schliesst;
        self.ausstehend = kanaele.iter().map(|k| k.channel_id).collect();
        tracing::info!(anzahl = kanaele.len(), "Schliesse alle offenen Kanaele");

        kanaele
            .iter()
            .map(|k| {
                RpcPayload::CloseChannelRequest(CloseChannelParams {
                    channel_id: k.channel_id,
                    funds_destination: ziel,
                })
            })
            .collect()
    }

    /// Eine Schliessung wurde bestaetigt. Nach der letzten Bestaetigung
    /// ist der Batch abgeschlossen.
    pub fn schliessung_bestaetigt(&mut self, kanal_id: ChannelId) {
        if self.status != ClaimStatus::Schliesst {
            tracing::debug!(kanal_id = %kanal_id, "Schliessungs-Bestaetigung ausserhalb eines Claims – ignoriert");
            return;
        }
        if !self.ausstehend.remove(&kanal_id) {
            tracing::warn!(kanal_id = %kanal_id, "Bestaetigung fuer unbekannten Kanal");
            return;
        }
        if self.ausstehend.is_empty() {
            self.status = ClaimStatus::Abgeschlossen;
            tracing::info!("Claim abgeschlossen");
        }
    }

    /// Protokollfehler waehrend Laden oder Schliessen setzt den ganzen
    /// Batch auf Fehler – auch wenn einzelne Kanaele schon geschlossen
    /// wurden
    pub fn fehler_empfangen(&mut self, meldung: impl Into<String>) {
        if matches!(self.status, ClaimStatus::Laedt | ClaimStatus::Schliesst) {
            self.status = ClaimStatus::Fehler(meldung.into());
            self.ausstehend.clear();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
