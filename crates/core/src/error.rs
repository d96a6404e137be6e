//! Fehlertypen fuer Trinkgeld
//!
//! Zentraler Fehler-Enum der alle Fehlerklassen des Systems abdeckt:
//! Transport, Protokoll, Authentifizierung, Kanal, Abwicklung und
//! Signalisierung. Untermodule konvertieren via `#[from]` oder den
//! Hilfskonstruktoren.

use thiserror::Error;

/// Globaler Result-Alias fuer Trinkgeld
pub type Result<T> = std::result::Result<T, TrinkgeldError>;

/// Alle moeglichen Fehler im Trinkgeld-System
#[derive(Debug, Error)]
pub enum TrinkgeldError {
    // --- Transport ---
    #[error("Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    #[error("Nicht mit dem Koordinator verbunden")]
    NichtVerbunden,

    #[error("Verbindung getrennt: {0}")]
    Getrennt(String),

    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    // --- Protokoll ---
    #[error("Protokollfehler: {0}")]
    Protokoll(String),

    /// Sonderfall des Protokollfehlers: der Koordinator meldet einen
    /// bereits laufenden Resize fuer den Kanal. Als einziger Fehler
    /// automatisch behebbar (einmaliges Wiedereinreichen des gehaltenen
    /// Resize-Zustands).
    #[error("Resize fuer diesen Kanal laeuft bereits")]
    ResizeLaeuftBereits,

    // --- Authentifizierung ---
    #[error("Authentifizierung fehlgeschlagen: {0}")]
    Authentifizierung(String),

    #[error("Kein gueltiger Session-Schluessel vorhanden")]
    SessionFehlt,

    // --- Kanal ---
    #[error("Kanalfehler: {0}")]
    Kanal(String),

    #[error("Veraltete Kanalversion: letzte bestaetigte={letzte}, erhalten={erhalten}")]
    VeralteteVersion { letzte: u64, erhalten: u64 },

    // --- Abwicklung (On-Chain) ---
    #[error("Abwicklungsfehler: {0}")]
    Abwicklung(String),

    // --- Signalisierung ---
    #[error("Signalisierungsfehler: {0}")]
    Signalisierung(String),

    // --- Eingaben & Konfiguration ---
    #[error("Ungueltige Adresse: {0}")]
    UngueltigeAdresse(String),

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl TrinkgeldError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Erstellt einen Protokollfehler, erkennt dabei die behebbare
    /// Resize-laeuft-bereits-Meldung des Koordinators
    pub fn protokoll(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        if msg.to_ascii_lowercase().contains("resize already ongoing") {
            Self::ResizeLaeuftBereits
        } else {
            Self::Protokoll(msg)
        }
    }

    /// Gibt true zurueck wenn der Fehler nach Nutzeraktion wiederholbar ist
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(
            self,
            Self::Zeitlimit(_) | Self::Verbindung(_) | Self::Getrennt(_) | Self::Abwicklung(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = TrinkgeldError::Authentifizierung("Challenge abgelaufen".into());
        assert_eq!(
            e.to_string(),
            "Authentifizierung fehlgeschlagen: Challenge abgelaufen"
        );
    }

    #[test]
    fn wiederholbar_erkennung() {
        assert!(TrinkgeldError::Zeitlimit("test".into()).ist_wiederholbar());
        assert!(TrinkgeldError::Abwicklung("tx fehlgeschlagen".into()).ist_wiederholbar());
        assert!(!TrinkgeldError::SessionFehlt.ist_wiederholbar());
    }

    #[test]
    fn resize_laeuft_bereits_erkennung() {
        let e = TrinkgeldError::protokoll("channel 0xabc: resize already ongoing");
        assert!(matches!(e, TrinkgeldError::ResizeLaeuftBereits));

        let e = TrinkgeldError::protokoll("insufficient funds");
        assert!(matches!(e, TrinkgeldError::Protokoll(_)));
    }

    #[test]
    fn veraltete_version_anzeige() {
        let e = TrinkgeldError::VeralteteVersion {
            letzte: 3,
            erhalten: 2,
        };
        assert!(e.to_string().contains("letzte bestaetigte=3"));
        assert!(e.to_string().contains("erhalten=2"));
    }
}
