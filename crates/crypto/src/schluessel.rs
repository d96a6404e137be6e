//! Ephemere Session-Schluesselpaare
//!
//! Pro Authentifizierungsversuch wird ein frisches Schluesselpaar
//! erzeugt. Der geheime Teil verlaesst diesen Prozess nie; die abgeleitete
//! Adresse wird dem Koordinator als `session_key` gemeldet. Die Adresse
//! gilt nur solange die zugehoerige Socket-Verbindung offen ist – jede
//! neue Verbindung erfordert ein neues Paar.

use rand::RngCore;
use sha2::{Digest, Sha256};
use trinkgeld_core::types::Address;

/// Domaenentrennung fuer die Adressableitung des Entwicklungs-Schemas
const ADRESS_DOMAENE: &[u8] = b"trinkgeld-session-v1";

/// Ein ephemeres Session-Schluesselpaar
///
/// Die Adressableitung hier ist das Schema des Entwicklungs-Signers
/// (SHA-256-Digest, letzte 20 Bytes). Eine produktive Einbindung ersetzt
/// `generieren` durch die Schluesselerzeugung der Wallet-Bibliothek,
/// die Schnittstelle bleibt gleich.
#[derive(Clone)]
pub struct SessionKeyPair {
    geheim: [u8; 32],
    adresse: Address,
}

impl SessionKeyPair {
    /// Erzeugt ein frisches zufaelliges Schluesselpaar
    pub fn generieren() -> Self {
        let mut geheim = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut geheim);
        Self::aus_geheimnis(geheim)
    }

    /// Baut das Paar aus einem vorhandenen Geheimnis (Tests)
    pub fn aus_geheimnis(geheim: [u8; 32]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(ADRESS_DOMAENE);
        hasher.update(geheim);
        let digest = hasher.finalize();

        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest[12..32]);

        Self {
            geheim,
            adresse: Address(bytes),
        }
    }

    /// Die oeffentliche Adresse des Session-Schluessels
    pub fn adresse(&self) -> Address {
        self.adresse
    }

    /// Der geheime Teil – nur fuer den Signer gedacht
    pub(crate) fn geheimnis(&self) -> &[u8; 32] {
        &self.geheim
    }
}

impl std::fmt::Debug for SessionKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Das Geheimnis darf nicht in Logs landen
        f.debug_struct("SessionKeyPair")
            .field("adresse", &self.adresse)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schluesselpaare_sind_eindeutig() {
        let a = SessionKeyPair::generieren();
        let b = SessionKeyPair::generieren();
        assert_ne!(
            a.adresse(),
            b.adresse(),
            "Zwei frische Paare muessen verschiedene Adressen haben"
        );
    }

    #[test]
    fn adresse_deterministisch_aus_geheimnis() {
        let a = SessionKeyPair::aus_geheimnis([7u8; 32]);
        let b = SessionKeyPair::aus_geheimnis([7u8; 32]);
        assert_eq!(a.adresse(), b.adresse());
    }

    #[test]
    fn debug_verraet_das_geheimnis_nicht() {
        let paar = SessionKeyPair::aus_geheimnis([9u8; 32]);
        let ausgabe = format!("{:?}", paar);
        assert!(!ausgabe.contains("geheim"));
        assert!(!ausgabe.contains("090909"));
    }
}
