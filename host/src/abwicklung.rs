//! Entwicklungs-Abwicklung
//!
//! Platzhalter fuer den On-Chain-Klienten: protokolliert jede
//! Einreichung und meldet Erfolg. Eine produktive Einbindung ersetzt
//! dieses Modul durch die Chain-Bibliothek (Custody/Adjudicator-Aufrufe)
//! hinter derselben Schnittstelle.

use async_trait::async_trait;

use trinkgeld_clearnode::kanal::{KanalDaten, ResizeDaten};
use trinkgeld_clearnode::AbwicklungsKlient;
use trinkgeld_core::types::{Amount, ChannelId};
use trinkgeld_core::Result;
use trinkgeld_protocol::rpc::{ChannelState, ChannelSummary};

/// Protokollierender Abwicklungs-Klient fuer lokale Laeufe
#[derive(Debug, Default)]
pub struct DevAbwicklung;

#[async_trait]
impl AbwicklungsKlient for DevAbwicklung {
    async fn kanal_einreichen(&self, daten: &KanalDaten) -> Result<()> {
        tracing::info!(kanal_id = %daten.kanal_id, "Dev-Abwicklung: Kanal eingereicht");
        Ok(())
    }

    async fn resize_einreichen(&self, daten: &KanalDaten, resize: &ResizeDaten) -> Result<()> {
        tracing::info!(
            kanal_id = %daten.kanal_id,
            version = resize.resize_zustand.version,
            "Dev-Abwicklung: Resize eingereicht"
        );
        Ok(())
    }

    async fn schliessung_einreichen(
        &self,
        kanal_id: ChannelId,
        finaler_zustand: &ChannelState,
    ) -> Result<()> {
        tracing::info!(
            kanal_id = %kanal_id,
            version = finaler_zustand.version,
            "Dev-Abwicklung: Schliessung eingereicht"
        );
        Ok(())
    }

    async fn abheben(&self, asset: &str, betrag: Amount) -> Result<()> {
        tracing::info!(asset, betrag = %betrag, "Dev-Abwicklung: Abhebung eingereicht");
        Ok(())
    }

    async fn offener_kanal(&self, _kanal_id: ChannelId) -> Result<Option<ChannelSummary>> {
        Ok(None)
    }
}
