//! Signer-Schnittstellen
//!
//! Zwei Signaturpfade, wie sie das Koordinator-Protokoll verlangt:
//!
//! - **WalletSigner**: signiert den strukturierten Auth-Payload mit dem
//!   langlebigen Wallet-Schluessel (EIP-712-artig, typischerweise mit
//!   Nutzerinteraktion, daher async).
//! - **NachrichtenSigner**: signiert rohe Protokollnachrichten mit dem
//!   ephemeren Session-Schluessel (lokal, synchron).
//!
//! Der `DevWalletSigner` und der `SessionSigner` implementieren beide
//! Pfade mit einem deterministischen SHA-256-Schema fuer Tests und
//! lokale Laeufe; produktiv kommen die Implementierungen aus der
//! Wallet-Bibliothek.

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use trinkgeld_core::types::{Address, Allowance};
use trinkgeld_core::{Result, TrinkgeldError};

use crate::schluessel::SessionKeyPair;

// ---------------------------------------------------------------------------
// Signatur
// ---------------------------------------------------------------------------

/// Eine rohe Signatur, auf dem Draht hex-kodiert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signatur(pub Vec<u8>);

impl Signatur {
    /// Hex-Darstellung mit `0x`-Praefix, wie sie ins `sig`-Feld des
    /// Envelopes gehoert
    pub fn als_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0))
    }
}

impl std::fmt::Display for Signatur {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.als_hex())
    }
}

// ---------------------------------------------------------------------------
// Auftraege
// ---------------------------------------------------------------------------

/// Der strukturierte Payload den das Wallet bei der Verifikation
/// unterschreibt: die urspruenglich angefragten Parameter plus die
/// wortwoertliche Challenge des Koordinators
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthSignaturAuftrag {
    pub address: Address,
    pub session_key: Address,
    pub application: String,
    pub allowances: Vec<Allowance>,
    pub expires_at: u64,
    pub scope: String,
    /// Die Challenge exakt wie empfangen – die Signatur deckt genau
    /// diese Bytes ab
    pub challenge: String,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Signiert strukturierte Auth-Payloads mit dem Wallet-Schluessel
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// Die Wallet-Adresse dieses Signers
    fn adresse(&self) -> Address;

    /// Unterschreibt den Auth-Auftrag. Kann Nutzerinteraktion erfordern.
    async fn auth_signieren(&self, auftrag: &AuthSignaturAuftrag) -> Result<Signatur>;
}

/// Signiert rohe Protokollnachrichten mit dem Session-Schluessel
pub trait NachrichtenSigner: Send + Sync {
    /// Die Adresse des signierenden Schluessels
    fn adresse(&self) -> Address;

    /// Unterschreibt die Nachrichten-Bytes
    fn signieren(&self, nachricht: &[u8]) -> Result<Signatur>;
}

// ---------------------------------------------------------------------------
// SessionSigner
// ---------------------------------------------------------------------------

/// Nachrichtensigner auf Basis eines ephemeren Session-Schluesselpaars
pub struct SessionSigner {
    schluessel: SessionKeyPair,
}

impl SessionSigner {
    pub fn neu(schluessel: SessionKeyPair) -> Self {
        Self { schluessel }
    }
}

impl NachrichtenSigner for SessionSigner {
    fn adresse(&self) -> Address {
        self.schluessel.adresse()
    }

    fn signieren(&self, nachricht: &[u8]) -> Result<Signatur> {
        Ok(dev_signatur(self.schluessel.geheimnis(), nachricht))
    }
}

// ---------------------------------------------------------------------------
// DevWalletSigner
// ---------------------------------------------------------------------------

/// Deterministischer Wallet-Signer fuer Tests und lokale Laeufe
///
/// Produktiv ersetzt die Wallet-Bibliothek diese Implementierung durch
/// echte EIP-712-Signaturen.
pub struct DevWalletSigner {
    geheim: [u8; 32],
    adresse: Address,
}

impl DevWalletSigner {
    /// Baut den Signer aus einem festen Geheimnis; die Adresse wird wie
    /// beim Session-Schluessel per Digest abgeleitet
    pub fn aus_geheimnis(geheim: [u8; 32]) -> Self {
        let paar = SessionKeyPair::aus_geheimnis(geheim);
        Self {
            geheim,
            adresse: paar.adresse(),
        }
    }
}

#[async_trait]
impl WalletSigner for DevWalletSigner {
    fn adresse(&self) -> Address {
        self.adresse
    }

    async fn auth_signieren(&self, auftrag: &AuthSignaturAuftrag) -> Result<Signatur> {
        let bytes = serde_json::to_vec(auftrag)
            .map_err(|e| TrinkgeldError::intern(format!("Auth-Auftrag nicht serialisierbar: {e}")))?;
        Ok(dev_signatur(&self.geheim, &bytes))
    }
}

/// Das gemeinsame Entwicklungs-Schema: SHA-256 ueber Geheimnis und
/// Nachricht, zweifach gefaltet auf 64 Bytes
fn dev_signatur(geheim: &[u8; 32], nachricht: &[u8]) -> Signatur {
    let mut erste = Sha256::new();
    erste.update(geheim);
    erste.update(nachricht);
    let a = erste.finalize();

    let mut zweite = Sha256::new();
    zweite.update(a);
    zweite.update(geheim);
    let b = zweite.finalize();

    let mut bytes = Vec::with_capacity(64);
    bytes.extend_from_slice(&a);
    bytes.extend_from_slice(&b);
    Signatur(bytes)
}
