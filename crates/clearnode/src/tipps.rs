//! Trinkgeld-Protokoll – unveraenderliche Liste eingegangener Transfers
//!
//! Jede Transfer-Benachrichtigung des Koordinators wird als
//! unveraenderlicher Eintrag vorne angefuegt (neueste zuerst). Eintraege
//! werden nach dem Einfuegen nie mehr veraendert.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use trinkgeld_core::types::{Address, Amount};
use trinkgeld_protocol::rpc::TransferEintrag;

/// Ein eingegangenes Trinkgeld
#[derive(Debug, Clone, PartialEq)]
pub struct TipTransaktion {
    pub sender: Address,
    pub amount: Amount,
    pub asset: String,
    pub memo: String,
    pub zeitpunkt: DateTime<Utc>,
}

impl From<TransferEintrag> for TipTransaktion {
    fn from(eintrag: TransferEintrag) -> Self {
        let zeitpunkt = Utc
            .timestamp_opt(eintrag.created_at as i64, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self {
            sender: eintrag.sender,
            amount: eintrag.amount,
            asset: eintrag.asset,
            memo: eintrag.memo,
            zeitpunkt,
        }
    }
}

/// Geteiltes, nur anwachsendes Protokoll (neueste zuerst)
///
/// Clone teilt den inneren Zustand; Leser (UI) und Schreiber (Engine)
/// halten dieselbe Liste.
#[derive(Clone, Default)]
pub struct TipProtokoll {
    eintraege: Arc<RwLock<VecDeque<TipTransaktion>>>,
}

impl TipProtokoll {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Fuegt einen Eintrag vorne an
    pub fn anfuegen(&self, tip: TipTransaktion) {
        tracing::info!(
            sender = %tip.sender,
            betrag = %tip.amount,
            asset = %tip.asset,
            "Trinkgeld eingegangen"
        );
        self.eintraege.write().push_front(tip);
    }

    /// Alle Eintraege, neueste zuerst
    pub fn alle(&self) -> Vec<TipTransaktion> {
        self.eintraege.read().iter().cloned().collect()
    }

    /// Der neueste Eintrag
    pub fn neueste(&self) -> Option<TipTransaktion> {
        self.eintraege.read().front().cloned()
    }

    /// Anzahl der Eintraege
    pub fn anzahl(&self) -> usize {
        self.eintraege.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tip(betrag: u128) -> TipTransaktion {
        TipTransaktion {
            sender: Address([0x11u8; 20]),
            amount: Amount(betrag),
            asset: "ytest.usd".into(),
            memo: String::new(),
            zeitpunkt: Utc::now(),
        }
    }

    #[test]
    fn neueste_zuerst() {
        let protokoll = TipProtokoll::neu();
        protokoll.anfuegen(tip(1));
        protokoll.anfuegen(tip(2));
        protokoll.anfuegen(tip(3));

        let alle = protokoll.alle();
        assert_eq!(alle.len(), 3);
        assert_eq!(alle[0].amount, Amount(3));
        assert_eq!(alle[2].amount, Amount(1));
        assert_eq!(protokoll.neueste().unwrap().amount, Amount(3));
    }

    #[test]
    fn clone_teilt_den_zustand() {
        let protokoll = TipProtokoll::neu();
        let leser = protokoll.clone();
        protokoll.anfuegen(tip(7));
        assert_eq!(leser.anzahl(), 1);
    }

    #[test]
    fn eintrag_aus_transfer_benachrichtigung() {
        let eintrag = TransferEintrag {
            sender: Address([0x22u8; 20]),
            amount: Amount(500),
            asset: "ytest.usd".into(),
            memo: "super stream!".into(),
            created_at: 1_700_000_000,
        };
        let tip: TipTransaktion = eintrag.into();
        assert_eq!(tip.memo, "super stream!");
        assert_eq!(tip.zeitpunkt.timestamp(), 1_700_000_000);
    }
}
