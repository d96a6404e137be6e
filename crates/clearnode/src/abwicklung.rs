//! Schnittstelle zum On-Chain-Abwicklungs-Klienten
//!
//! Die eigentlichen Vertragsaufrufe (Custody/Adjudicator) liefert eine
//! externe Chain-Bibliothek; die Engine kennt nur diese Schnittstelle.
//! Einreichungen sind pro Kanal-ID idempotent – ein erneuter Versuch
//! nach einem Fehlschlag ist gefahrlos.

use async_trait::async_trait;

use trinkgeld_core::types::{Amount, ChannelId};
use trinkgeld_core::Result;
use trinkgeld_protocol::rpc::{ChannelState, ChannelSummary};

use crate::kanal::{KanalDaten, ResizeDaten};

/// On-Chain-Abwicklung: Einreichen von Kanalzustaenden und Abheben
#[async_trait]
pub trait AbwicklungsKlient: Send + Sync {
    /// Reicht den vorgeschlagenen Kanal mit Anfangszustand und
    /// Koordinator-Signatur on-chain ein
    async fn kanal_einreichen(&self, daten: &KanalDaten) -> Result<()>;

    /// Reicht einen Resize-Zustand samt Beweiszustaenden ein
    async fn resize_einreichen(&self, daten: &KanalDaten, resize: &ResizeDaten) -> Result<()>;

    /// Reicht den finalen Zustand einer Schliessung ein
    async fn schliessung_einreichen(
        &self,
        kanal_id: ChannelId,
        finaler_zustand: &ChannelState,
    ) -> Result<()>;

    /// Hebt zuvor geschlossene, hinterlegte Mittel auf die Wallet ab
    async fn abheben(&self, asset: &str, betrag: Amount) -> Result<()>;

    /// Liest den On-Chain-Zustand eines offenen Kanals
    async fn offener_kanal(&self, kanal_id: ChannelId) -> Result<Option<ChannelSummary>>;
}
