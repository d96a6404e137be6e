//! Trinkgeld ClearNode – Protokoll-Engine zum Abwicklungs-Koordinator
//!
//! Eine Engine pro logischer Session: sie besitzt genau eine persistente
//! Socket-Verbindung zum ClearNode, authentifiziert die Wallet-Session,
//! fuehrt den Kanal-Lebenszyklus (erstellen, einreichen, resize,
//! transfer, schliessen, abheben) und sammelt alle offenen Kanaele als
//! Batch-Claim ein.
//!
//! ## Aufbau
//! - [`verbindung`]: Transport (Frame-Socket mit Verbindungs-Timeout)
//! - [`session`]: Challenge-Response-Authentifizierung der Wallet
//! - [`kanal`]: Zustandsautomat eines einzelnen Zahlungskanals
//! - [`claim`]: Batch-Schliessung aller offenen Kanaele
//! - [`tipps`]: unveraenderliches Protokoll eingegangener Trinkgelder
//! - [`abwicklung`]: Schnittstelle zum On-Chain-Abwicklungs-Klienten
//! - [`engine`]: fasst alles zu einer Engine mit einem einzigen
//!   geordneten Eingangs-Dispatcher zusammen

pub mod abwicklung;
pub mod claim;
pub mod engine;
pub mod kanal;
pub mod session;
pub mod tipps;
pub mod verbindung;

pub use abwicklung::AbwicklungsKlient;
pub use claim::{ClaimKoordinator, ClaimStatus};
pub use engine::{ClearNodeEngine, EngineEinstellungen, EngineStatus};
pub use kanal::{KanalManager, KanalPhase, KanalStatus};
pub use session::{AuthAnfrage, SessionAuthentifikator, SessionZustand};
pub use tipps::{TipProtokoll, TipTransaktion};
pub use verbindung::{TransportZustand, Verbindung};
