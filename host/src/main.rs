//! Trinkgeld Host – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging, verbindet sich
//! mit dem ClearNode, authentifiziert die Session und protokolliert
//! eingehende Trinkgelder bis zum Beenden. Auf Wunsch werden beim
//! Beenden alle offenen Kanaele eingefordert (Claim).

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::net::TcpStream;

use trinkgeld_clearnode::{AuthAnfrage, ClearNodeEngine};
use trinkgeld_core::types::{Allowance, Amount};
use trinkgeld_crypto::DevWalletSigner;
use trinkgeld_host::abwicklung::DevAbwicklung;
use trinkgeld_host::HostConfig;
use trinkgeld_observability::logging_initialisieren;

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad =
        std::env::var("TRINKGELD_CONFIG").unwrap_or_else(|_| "trinkgeld.toml".into());

    let config = HostConfig::laden(&config_pfad)?;
    logging_initialisieren(&config.logging.level, &config.logging.format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "Trinkgeld Host wird initialisiert"
    );

    let wallet = Arc::new(DevWalletSigner::aus_geheimnis(config.dev_geheimnis()?));
    let abwicklung = Arc::new(DevAbwicklung);
    let mut engine: ClearNodeEngine<TcpStream> =
        ClearNodeEngine::neu(config.engine_einstellungen(), wallet, abwicklung);

    engine.verbinden().await?;

    // Session authentifizieren: Anfrage, Challenge, Wallet-Signatur
    let anfrage = AuthAnfrage {
        application: config.session.application.clone(),
        allowances: vec![Allowance {
            asset: config.koordinator.abrechnungs_asset.clone(),
            amount: Amount(u128::from(config.session.allowance_betrag)),
        }],
        expires_at: Utc::now().timestamp() as u64 + config.session.gueltigkeit_sek,
        scope: config.session.scope.clone(),
    };
    engine.auth_anfordern(anfrage).await?;
    engine.auth_verifizieren().await?;
    tracing::info!("Session verifiziert – warte auf Trinkgelder");

    // Ereignisschleife: Trinkgelder und Guthaben-Updates bis zum Beenden
    loop {
        tokio::select! {
            weiter = engine.ereignis_abwarten() => {
                match weiter {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!("Koordinator hat die Verbindung geschlossen");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(fehler = %e, "Ereignisschleife beendet");
                        break;
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Beenden angefordert");
                if config.session.claim_beim_beenden {
                    match engine.claim_alle().await {
                        Ok(()) => tracing::info!("Alle offenen Kanaele eingefordert"),
                        Err(e) => tracing::error!(fehler = %e, "Claim fehlgeschlagen"),
                    }
                }
                break;
            }
        }
    }

    let tipps = engine.tipps();
    tracing::info!(anzahl = tipps.anzahl(), "Eingegangene Trinkgelder");

    engine.trennen().await;
    Ok(())
}
