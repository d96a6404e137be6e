//! Host-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass die Konsole ohne Konfigurationsdatei
//! lauffaehig ist.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use trinkgeld_clearnode::EngineEinstellungen;

/// Vollstaendige Host-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Verbindung zum ClearNode-Koordinator
    pub koordinator: KoordinatorEinstellungen,
    /// Session-Parameter der Authentifizierung
    pub session: SessionEinstellungen,
    /// Wallet-Einstellungen (Entwicklungs-Signer)
    pub wallet: WalletEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

/// Verbindung zum Koordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KoordinatorEinstellungen {
    /// Adresse des ClearNode (host:port)
    pub adresse: String,
    /// Chain-ID fuer Kanal-Erstellung und Asset-Suche
    pub chain_id: u64,
    /// Symbol des Abrechnungs-Assets
    pub abrechnungs_asset: String,
    /// Dezimalstellen des Abrechnungs-Assets
    pub dezimalstellen: u8,
    /// Frist pro Koordinator-Operation in Sekunden
    pub operations_timeout_sek: u64,
}

impl Default for KoordinatorEinstellungen {
    fn default() -> Self {
        Self {
            adresse: "127.0.0.1:9790".into(),
            chain_id: 11_155_111,
            abrechnungs_asset: "ytest.usd".into(),
            dezimalstellen: 6,
            operations_timeout_sek: 30,
        }
    }
}

/// Session-Parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionEinstellungen {
    /// Anwendungsname in der Auth-Anfrage
    pub application: String,
    /// Geltungsbereich der Session
    pub scope: String,
    /// Zulassung: Betrag des Abrechnungs-Assets in der kleinsten Einheit
    pub allowance_betrag: u64,
    /// Gueltigkeitsdauer der Session in Sekunden
    pub gueltigkeit_sek: u64,
    /// Beim Beenden alle offenen Kanaele einfordern
    pub claim_beim_beenden: bool,
}

impl Default for SessionEinstellungen {
    fn default() -> Self {
        Self {
            application: "trinkgeld-live".into(),
            scope: "console".into(),
            allowance_betrag: 1000,
            gueltigkeit_sek: 86_400,
            claim_beim_beenden: true,
        }
    }
}

/// Wallet-Einstellungen
///
/// Der Entwicklungs-Signer arbeitet mit einem festen Geheimnis; eine
/// produktive Einbindung ersetzt ihn durch die Wallet-Bibliothek.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletEinstellungen {
    /// 32-Byte-Geheimnis des Entwicklungs-Signers (hex)
    pub dev_geheimnis: String,
}

impl Default for WalletEinstellungen {
    fn default() -> Self {
        Self {
            dev_geheimnis: "11".repeat(32),
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl HostConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Leitet die Engine-Einstellungen ab
    pub fn engine_einstellungen(&self) -> EngineEinstellungen {
        EngineEinstellungen {
            koordinator_adresse: self.koordinator.adresse.clone(),
            chain_id: self.koordinator.chain_id,
            abrechnungs_asset: self.koordinator.abrechnungs_asset.clone(),
            abrechnungs_dezimalstellen: self.koordinator.dezimalstellen,
            operations_timeout: Duration::from_secs(self.koordinator.operations_timeout_sek),
        }
    }

    /// Dekodiert das Entwicklungs-Geheimnis
    pub fn dev_geheimnis(&self) -> anyhow::Result<[u8; 32]> {
        let roh = hex::decode(self.wallet.dev_geheimnis.trim_start_matches("0x"))
            .map_err(|e| anyhow::anyhow!("wallet.dev_geheimnis ist kein Hex: {e}"))?;
        roh.try_into()
            .map_err(|_| anyhow::anyhow!("wallet.dev_geheimnis muss 32 Bytes lang sein"))
    }
}
