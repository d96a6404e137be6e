//! Trinkgeld Krypto – Session-Schluessel und Signer-Schnittstellen
//!
//! Die eigentlichen Signaturverfahren (EIP-712 ueber strukturierte
//! Auth-Payloads, ECDSA ueber Protokollnachrichten) liefert eine externe
//! Signatur-Bibliothek. Dieses Crate definiert die Schnittstellen dazu
//! und stellt einen deterministischen Entwicklungs-Signer fuer Tests und
//! lokale Laeufe bereit.

pub mod schluessel;
pub mod signer;

pub use schluessel::SessionKeyPair;
pub use signer::{
    AuthSignaturAuftrag, DevWalletSigner, NachrichtenSigner, SessionSigner, Signatur, WalletSigner,
};
