//! ClearNode-Engine – eine Verbindung, ein geordneter Dispatcher
//!
//! Die Engine besitzt die Verbindung und alle Zustandsautomaten
//! exklusiv; der Rest des Systems arbeitet ueber ihre Methoden und liest
//! Status-Schnappschuesse. Eingehende Nachrichten laufen durch genau
//! einen Dispatcher (`verteilen`), streng geordnet, ein Handler nach dem
//! anderen – geteilter Session-Zustand braucht deshalb keine Locks.
//!
//! Jede Operation mit Koordinator-Antwort traegt eine eigene Frist
//! (Standard 30 s); laeuft sie ab, endet die Operation mit einem
//! Zeitlimit-Fehler statt ewig zu haengen. Waehrend einer Operation
//! eintreffende unaufgeforderte Nachrichten (Asset-Liste, Guthaben,
//! Trinkgelder, Challenges) werden nebenbei verarbeitet, nie verworfen.
//!
//! Es gibt keinen automatischen Wiederanlauf – einzige Ausnahme ist der
//! dokumentierte Resize-Wiederanlauf (siehe [`crate::kanal`]).

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use trinkgeld_core::types::{Address, Amount, ChannelId};
use trinkgeld_core::{Result, TrinkgeldError};
use trinkgeld_crypto::{NachrichtenSigner, SessionSigner, WalletSigner};
use trinkgeld_protocol::rpc::{
    AssetListParams, BalanceUpdateParams, ChannelStatusFilter, ChannelSummary, GetAssetsParams,
    GetChannelsParams, RpcEnvelope, RpcPayload, TransferPosten,
};
use trinkgeld_protocol::wire::RpcFrame;

use crate::abwicklung::AbwicklungsKlient;
use crate::claim::{ClaimKoordinator, ClaimStatus};
use crate::kanal::{KanalManager, KanalStatus};
use crate::session::{AuthAnfrage, SessionAuthentifikator, SessionZustand};
use crate::tipps::{TipProtokoll, TipTransaktion};
use crate::verbindung::{TransportZustand, Verbindung};

// ---------------------------------------------------------------------------
// Einstellungen & Status
// ---------------------------------------------------------------------------

/// Einstellungen der Engine
#[derive(Debug, Clone)]
pub struct EngineEinstellungen {
    /// Adresse des ClearNode-Koordinators (host:port)
    pub koordinator_adresse: String,
    /// Chain-ID fuer Kanal-Erstellung und Asset-Suche
    pub chain_id: u64,
    /// Symbol des ausgezeichneten Abrechnungs-Assets
    pub abrechnungs_asset: String,
    /// Erwartete Dezimalstellen des Abrechnungs-Assets
    pub abrechnungs_dezimalstellen: u8,
    /// Frist pro Koordinator-Operation
    pub operations_timeout: Duration,
}

impl Default for EngineEinstellungen {
    fn default() -> Self {
        Self {
            koordinator_adresse: "127.0.0.1:9790".into(),
            chain_id: 11_155_111,
            abrechnungs_asset: "ytest.usd".into(),
            abrechnungs_dezimalstellen: 6,
            operations_timeout: Duration::from_secs(30),
        }
    }
}

/// Schnappschuss des Engine-Zustands fuer Anzeige-Zwecke
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub transport: TransportZustand,
    pub session: SessionZustand,
    pub kanal: KanalStatus,
    pub claim: ClaimStatus,
    pub kanal_id: Option<ChannelId>,
    pub kanal_version: Option<u64>,
    pub letzter_fehler: Option<String>,
    pub guthaben: Option<Amount>,
    pub abrechnungs_token: Option<Address>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Protokoll-Engine einer logischen Session
///
/// Generisch ueber den Stream-Typ; produktiv `TcpStream`, in Tests ein
/// `tokio::io::duplex`-Stream.
pub struct ClearNodeEngine<S> {
    einstellungen: EngineEinstellungen,
    verbindung: Verbindung<S>,
    session: SessionAuthentifikator,
    kanal: KanalManager,
    claim: ClaimKoordinator,
    tipps: TipProtokoll,
    tipp_sender: broadcast::Sender<TipTransaktion>,
    wallet: Arc<dyn WalletSigner>,
    abwicklung: Arc<dyn AbwicklungsKlient>,
    abrechnungs_token: Option<Address>,
    guthaben: Option<Amount>,
    kanal_liste: Vec<ChannelSummary>,
    letzter_fehler: Option<String>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ClearNodeEngine<S> {
    /// Erstellt eine Engine ohne Verbindung
    pub fn neu(
        einstellungen: EngineEinstellungen,
        wallet: Arc<dyn WalletSigner>,
        abwicklung: Arc<dyn AbwicklungsKlient>,
    ) -> Self {
        let (tipp_sender, _) = broadcast::channel(64);
        let session = SessionAuthentifikator::neu(wallet.adresse());
        Self {
            einstellungen,
            verbindung: Verbindung::neu(),
            session,
            kanal: KanalManager::neu(),
            claim: ClaimKoordinator::neu(),
            tipps: TipProtokoll::neu(),
            tipp_sender,
            wallet,
            abwicklung,
            abrechnungs_token: None,
            guthaben: None,
            kanal_liste: Vec::new(),
            letzter_fehler: None,
        }
    }

    /// Uebernimmt einen bereits aufgebauten Stream (Tests, eigene
    /// Transportarten)
    pub async fn stream_uebernehmen(&mut self, stream: S) -> Result<()> {
        self.verbindung.stream_uebernehmen(stream);
        self.nach_verbindungsaufbau().await
    }

    /// Gemeinsamer Pfad nach jedem Verbindungsaufbau: alle Reste der
    /// alten Generation verwerfen, Asset-Liste anfragen
    async fn nach_verbindungsaufbau(&mut self) -> Result<()> {
        self.kanal.zuruecksetzen();
        self.claim.zuruecksetzen();
        self.letzter_fehler = None;
        self.session.verbindung_geoeffnet();

        let env = RpcEnvelope::neu(RpcPayload::GetAssetsRequest(GetAssetsParams {
            chain_id: Some(self.einstellungen.chain_id),
        }));
        self.senden(env).await
    }

    /// Trennt die Verbindung und verwirft alle laufenden Operationen
    pub async fn trennen(&mut self) {
        self.verbindung.schliessen().await;
        self.session.getrennt();
        self.kanal.zuruecksetzen();
        self.claim.zuruecksetzen();
        tracing::info!("Verbindung zum Koordinator getrennt");
    }

    /// Explizite Abmeldung: Session-Schluessel und Challenge verwerfen
    pub fn abmelden(&mut self) {
        self.session.abmelden();
        self.kanal.zuruecksetzen();
        self.claim.zuruecksetzen();
    }

    // -----------------------------------------------------------------
    // Status & Leser
    // -----------------------------------------------------------------

    /// Schnappschuss des Gesamtzustands
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            transport: self.verbindung.zustand(),
            session: self.session.zustand().clone(),
            kanal: self.kanal.status(),
            claim: self.claim.status().clone(),
            kanal_id: self.kanal.kanal_id(),
            kanal_version: self.kanal.version(),
            letzter_fehler: self.letzter_fehler.clone(),
            guthaben: self.guthaben,
            abrechnungs_token: self.abrechnungs_token,
        }
    }

    /// Das geteilte Trinkgeld-Protokoll (neueste zuerst)
    pub fn tipps(&self) -> TipProtokoll {
        self.tipps.clone()
    }

    /// Abonniert eingehende Trinkgelder
    pub fn tipp_abonnieren(&self) -> broadcast::Receiver<TipTransaktion> {
        self.tipp_sender.subscribe()
    }

    /// Zuletzt abgefragte Kanal-Liste
    pub fn kanal_liste(&self) -> &[ChannelSummary] {
        &self.kanal_liste
    }

    /// Token-Adresse des Abrechnungs-Assets, falls schon entdeckt
    pub fn abrechnungs_token(&self) -> Option<Address> {
        self.abrechnungs_token
    }

    /// Letztes gemeldetes Guthaben des Abrechnungs-Assets
    pub fn guthaben(&self) -> Option<Amount> {
        self.guthaben
    }

    // -----------------------------------------------------------------
    // Authentifizierung
    // -----------------------------------------------------------------

    /// Fordert die Authentifizierung an und wartet auf die Challenge
    pub async fn auth_anfordern(&mut self, anfrage: AuthAnfrage) -> Result<()> {
        let env = self.session.auth_anfordern(anfrage)?;
        self.senden(env).await?;

        let frist = self.frist();
        loop {
            match self.ergebnis_abwarten_bis(frist, "Auth-Anfrage").await {
                // Die Challenge wurde im Dispatcher bereits der Session
                // zugestellt
                Ok(RpcPayload::AuthChallenge(_)) => return Ok(()),
                Ok(RpcPayload::Error(p)) => {
                    let fehler = TrinkgeldError::Authentifizierung(p.error);
                    self.session.fehler_setzen(fehler.to_string());
                    self.fehler_merken(&fehler);
                    return Err(fehler);
                }
                Ok(_) => continue,
                Err(e) => {
                    self.session.fehler_setzen(e.to_string());
                    self.fehler_merken(&e);
                    return Err(e);
                }
            }
        }
    }

    /// Laesst das Wallet die Challenge unter den urspruenglich
    /// angefragten Parametern signieren und wartet auf das Ergebnis
    pub async fn auth_verifizieren(&mut self) -> Result<()> {
        let auftrag = self.session.verify_vorbereiten()?;
        let wallet = Arc::clone(&self.wallet);
        let signatur = match wallet.auth_signieren(&auftrag).await {
            Ok(signatur) => signatur,
            Err(e) => {
                let fehler = TrinkgeldError::Authentifizierung(format!("Wallet-Signatur: {e}"));
                self.session.fehler_setzen(fehler.to_string());
                self.fehler_merken(&fehler);
                return Err(fehler);
            }
        };
        let env = self.session.verify_envelope(signatur)?;
        self.senden(env).await?;

        let frist = self.frist();
        loop {
            match self.ergebnis_abwarten_bis(frist, "Auth-Verifikation").await {
                // Das Ergebnis wurde im Dispatcher bereits angewendet
                Ok(RpcPayload::AuthVerifyResult(p)) => {
                    if p.success {
                        return Ok(());
                    }
                    let fehler = TrinkgeldError::Authentifizierung(
                        p.error.unwrap_or_else(|| "Verifikation abgelehnt".into()),
                    );
                    self.fehler_merken(&fehler);
                    return Err(fehler);
                }
                Ok(RpcPayload::Error(p)) => {
                    let fehler = TrinkgeldError::Authentifizierung(p.error);
                    self.session.fehler_setzen(fehler.to_string());
                    self.fehler_merken(&fehler);
                    return Err(fehler);
                }
                Ok(_) => continue,
                Err(e) => {
                    self.session.fehler_setzen(e.to_string());
                    self.fehler_merken(&e);
                    return Err(e);
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Kanal-Lebenszyklus
    // -----------------------------------------------------------------

    /// Fragt die Kanal-Erstellung an und wartet auf den Vorschlag des
    /// Koordinators
    pub async fn kanal_erstellen(&mut self) -> Result<()> {
        let token = self.abrechnungs_token.unwrap_or(Address::NULL);
        let payload = self
            .kanal
            .erstellen_anfragen(self.einstellungen.chain_id, token)?;
        let env = self.session_signieren(payload)?;
        self.senden(env).await?;

        let frist = self.frist();
        loop {
            match self.ergebnis_abwarten_bis(frist, "Kanal-Erstellung").await {
                // Der Vorschlag wurde im Dispatcher bereits uebernommen
                Ok(RpcPayload::CreateChannelResult(_)) => return Ok(()),
                Ok(RpcPayload::Error(p)) => return Err(self.kanal_fehler(p.error)),
                Ok(_) => continue,
                Err(e) => {
                    self.kanal.fehler_setzen(e.to_string());
                    self.fehler_merken(&e);
                    return Err(e);
                }
            }
        }
    }

    /// Reicht den vorgeschlagenen Kanal on-chain ein. Bei Fehlschlag
    /// bleiben die Kanaldaten erhalten; ein erneuter Versuch ist
    /// gefahrlos (Einreichung ist pro Kanal-ID idempotent).
    pub async fn kanal_einreichen(&mut self) -> Result<()> {
        let daten = self.kanal.einreichen_vorbereiten()?;
        let abwicklung = Arc::clone(&self.abwicklung);
        match abwicklung.kanal_einreichen(&daten).await {
            Ok(()) => {
                tracing::info!(kanal_id = %daten.kanal_id, "Kanal on-chain eingereicht");
                self.kanal.einreichung_erfolgt()
            }
            Err(e) => {
                self.kanal.fehler_setzen(e.to_string());
                self.fehler_merken(&e);
                Err(e)
            }
        }
    }

    /// Fragt einen Resize an und wartet auf den Vorschlag.
    ///
    /// Meldet der Koordinator einen bereits laufenden Resize, wird der
    /// gehaltene Resize-Zustand erneut eingereicht statt die Operation
    /// scheitern zu lassen; ohne gehaltenen Zustand wird der Fehler
    /// gemeldet.
    pub async fn kanal_resize(&mut self, betrag: Amount, ziel: Address) -> Result<()> {
        let payload = self.kanal.resize_anfragen(betrag, ziel)?;
        let env = self.session_signieren(payload)?;
        self.senden(env).await?;

        let frist = self.frist();
        loop {
            match self.ergebnis_abwarten_bis(frist, "Kanal-Resize").await {
                Ok(RpcPayload::ResizeChannelResult(p)) => {
                    self.kanal.resize_empfangen(p).map_err(|e| {
                        self.fehler_merken(&e);
                        e
                    })?;
                    return Ok(());
                }
                Ok(RpcPayload::Error(p)) => {
                    let fehler = TrinkgeldError::protokoll(p.error);
                    if matches!(fehler, TrinkgeldError::ResizeLaeuftBereits) {
                        return self.resize_wiederanlauf().await;
                    }
                    return Err(self.kanal_fehler(fehler.to_string()));
                }
                Ok(_) => continue,
                Err(e) => {
                    self.kanal.fehler_setzen(e.to_string());
                    self.fehler_merken(&e);
                    return Err(e);
                }
            }
        }
    }

    /// Reicht den vorliegenden Resize-Vorschlag on-chain ein
    pub async fn resize_einreichen(&mut self) -> Result<()> {
        let (daten, resize) = self.kanal.resize_einreichen_vorbereiten()?;
        let abwicklung = Arc::clone(&self.abwicklung);
        match abwicklung.resize_einreichen(&daten, &resize).await {
            Ok(()) => {
                tracing::info!(kanal_id = %daten.kanal_id, "Resize on-chain eingereicht");
                self.kanal.resize_einreichung_erfolgt()
            }
            Err(e) => {
                self.kanal.fehler_setzen(e.to_string());
                self.fehler_merken(&e);
                Err(e)
            }
        }
    }

    /// Der dokumentierte Wiederanlauf: gehaltenen Resize-Zustand erneut
    /// einreichen
    async fn resize_wiederanlauf(&mut self) -> Result<()> {
        match self.kanal.resize_wiederherstellen() {
            Some((daten, resize)) => {
                let abwicklung = Arc::clone(&self.abwicklung);
                match abwicklung.resize_einreichen(&daten, &resize).await {
                    Ok(()) => self.kanal.resize_einreichung_erfolgt(),
                    Err(e) => {
                        self.kanal.fehler_setzen(e.to_string());
                        self.fehler_merken(&e);
                        Err(e)
                    }
                }
            }
            None => {
                let fehler = TrinkgeldError::ResizeLaeuftBereits;
                self.fehler_merken(&fehler);
                Err(fehler)
            }
        }
    }

    /// Sendet eine Off-Chain-Ueberweisung (Trinkgeld) und wartet auf die
    /// Bestaetigung. Keine On-Chain-Einreichung.
    pub async fn transfer_senden(
        &mut self,
        ziel: Address,
        posten: Vec<TransferPosten>,
    ) -> Result<()> {
        let payload = self.kanal.transfer_anfragen(ziel, posten)?;
        let env = self.session_signieren(payload)?;
        self.senden(env).await?;

        let frist = self.frist();
        loop {
            match self.ergebnis_abwarten_bis(frist, "Transfer").await {
                Ok(RpcPayload::TransferResult(p)) => {
                    if !p.success {
                        return Err(self.kanal_fehler("Transfer abgelehnt".to_string()));
                    }
                    self.kanal.transfer_bestaetigt(p.version).map_err(|e| {
                        self.fehler_merken(&e);
                        e
                    })?;
                    return Ok(());
                }
                Ok(RpcPayload::Error(p)) => return Err(self.kanal_fehler(p.error)),
                Ok(_) => continue,
                Err(e) => {
                    self.kanal.fehler_setzen(e.to_string());
                    self.fehler_merken(&e);
                    return Err(e);
                }
            }
        }
    }

    /// Schliesst den aktuellen Kanal (Einzel-Flow). Liefert der
    /// Koordinator einen finalen Zustand, wird er on-chain eingereicht;
    /// ohne finalen Zustand gilt die Bestaetigung allein.
    pub async fn kanal_schliessen(&mut self, ziel: Address) -> Result<()> {
        let payload = self.kanal.schliessen_anfragen(ziel)?;
        let env = self.session_signieren(payload)?;
        self.senden(env).await?;

        let frist = self.frist();
        loop {
            match self.ergebnis_abwarten_bis(frist, "Kanal-Schliessung").await {
                Ok(RpcPayload::CloseChannelResult(p)) => {
                    let finaler_zustand = self.kanal.geschlossen_empfangen(p)?;
                    if let Some(zustand) = finaler_zustand {
                        let kanal_id = self.kanal.kanal_id().ok_or_else(|| {
                            TrinkgeldError::intern("Schliessung ohne Kanal-ID".to_string())
                        })?;
                        let abwicklung = Arc::clone(&self.abwicklung);
                        match abwicklung.schliessung_einreichen(kanal_id, &zustand).await {
                            Ok(()) => self.kanal.schliessung_eingereicht()?,
                            Err(e) => {
                                self.kanal.fehler_setzen(e.to_string());
                                self.fehler_merken(&e);
                                return Err(e);
                            }
                        }
                    }
                    return Ok(());
                }
                Ok(RpcPayload::Error(p)) => return Err(self.kanal_fehler(p.error)),
                Ok(_) => continue,
                Err(e) => {
                    self.kanal.fehler_setzen(e.to_string());
                    self.fehler_merken(&e);
                    return Err(e);
                }
            }
        }
    }

    /// Hebt zuvor geschlossene Mittel auf die Wallet ab – unabhaengig
    /// von einem konkreten Kanal
    pub async fn abheben(&mut self, asset: &str, betrag: Amount) -> Result<()> {
        // Defensive Pruefung der Session, wie bei allen signierenden
        // Operationen
        self.session.schluessel()?;
        let abwicklung = Arc::clone(&self.abwicklung);
        match abwicklung.abheben(asset, betrag).await {
            Ok(()) => {
                tracing::info!(asset, betrag = %betrag, "Abhebung eingereicht");
                self.kanal.abgehoben();
                Ok(())
            }
            Err(e) => {
                self.kanal.fehler_setzen(e.to_string());
                self.fehler_merken(&e);
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------
    // Claim
    // -----------------------------------------------------------------

    /// Fordert alle offenen Kanaele als Batch ein: Liste abfragen, pro
    /// Kanal eine signierte Schliessung, abgeschlossen erst nach der
    /// letzten Bestaetigung. Im Claim-Flow genuegt die
    /// Koordinator-Bestaetigung; es wird nichts on-chain eingereicht.
    pub async fn claim_alle(&mut self) -> Result<()> {
        // Claim signiert mit dem Session-Schluessel – defensive Pruefung
        // vor dem Start
        self.session.schluessel()?;
        let teilnehmer = self.session.wallet();

        let payload = self.claim.starten(teilnehmer)?;
        let env = RpcEnvelope::neu(payload);
        if let Err(e) = self.senden(env).await {
            self.claim.fehler_empfangen(e.to_string());
            return Err(e);
        }

        // Eine Frist fuer den gesamten Batch
        let frist = self.frist();

        // Phase 1: Kanal-Liste abwarten
        let kanaele = loop {
            match self
                .ergebnis_abwarten_bis(frist, "Claim: Kanal-Abfrage")
                .await
            {
                Ok(RpcPayload::GetChannelsResult(p)) => break p.channels,
                Ok(RpcPayload::Error(p)) => {
                    self.claim.fehler_empfangen(p.error.clone());
                    let fehler = TrinkgeldError::protokoll(p.error);
                    self.fehler_merken(&fehler);
                    return Err(fehler);
                }
                Ok(_) => continue,
                Err(e) => {
                    self.claim.fehler_empfangen(e.to_string());
                    self.fehler_merken(&e);
                    return Err(e);
                }
            }
        };

        let anfragen = self.claim.kanal_liste_empfangen(&kanaele, teilnehmer);
        if *self.claim.status() == ClaimStatus::Abgeschlossen {
            // Keine offenen Kanaele – nichts einzufordern
            return Ok(());
        }

        for payload in anfragen {
            let env = self.session_signieren(payload).map_err(|e| {
                self.claim.fehler_empfangen(e.to_string());
                e
            })?;
            if let Err(e) = self.senden(env).await {
                self.claim.fehler_empfangen(e.to_string());
                return Err(e);
            }
        }

        // Phase 2: alle Bestaetigungen abwarten
        while *self.claim.status() == ClaimStatus::Schliesst {
            match self
                .ergebnis_abwarten_bis(frist, "Claim: Schliessungen")
                .await
            {
                Ok(RpcPayload::CloseChannelResult(p)) => {
                    self.claim.schliessung_bestaetigt(p.channel_id);
                }
                Ok(RpcPayload::Error(p)) => {
                    self.claim.fehler_empfangen(p.error.clone());
                    let fehler = TrinkgeldError::protokoll(p.error);
                    self.fehler_merken(&fehler);
                    return Err(fehler);
                }
                Ok(_) => continue,
                Err(e) => {
                    self.claim.fehler_empfangen(e.to_string());
                    self.fehler_merken(&e);
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    // -----------------------------------------------------------------
    // Abfragen & Ereignisse
    // -----------------------------------------------------------------

    /// Fragt alle offenen Kanaele des Teilnehmers ab (ausserhalb eines
    /// Claims)
    pub async fn kanaele_abfragen(&mut self) -> Result<Vec<ChannelSummary>> {
        let env = RpcEnvelope::neu(RpcPayload::GetChannelsRequest(GetChannelsParams {
            participant: self.session.wallet(),
            status: ChannelStatusFilter::Open,
        }));
        self.senden(env).await?;

        let frist = self.frist();
        loop {
            match self.ergebnis_abwarten_bis(frist, "Kanal-Abfrage").await? {
                RpcPayload::GetChannelsResult(p) => return Ok(p.channels),
                RpcPayload::Error(p) => {
                    let fehler = TrinkgeldError::protokoll(p.error);
                    self.fehler_merken(&fehler);
                    return Err(fehler);
                }
                _ => continue,
            }
        }
    }

    /// Wartet auf die naechste unaufgeforderte Nachricht (Trinkgelder,
    /// Guthaben) und verarbeitet sie. Gibt `false` zurueck wenn der
    /// Koordinator die Verbindung geschlossen hat.
    pub async fn ereignis_abwarten(&mut self) -> Result<bool> {
        match self.verbindung.naechster_frame().await? {
            None => {
                self.verbindung_verloren();
                Ok(false)
            }
            Some(RpcFrame::Ungueltig(grund)) => {
                tracing::warn!(grund = %grund, "Unparsbarer Frame verworfen");
                Ok(true)
            }
            Some(RpcFrame::Nachricht(env)) => {
                if let Some(RpcPayload::Error(p)) = self.verteilen(env) {
                    // Fehler ohne laufende Operation: merken und – falls
                    // ein Claim laeuft – den Batch kippen
                    self.letzter_fehler = Some(p.error.clone());
                    self.claim.fehler_empfangen(p.error);
                }
                Ok(true)
            }
        }
    }

    // -----------------------------------------------------------------
    // Interna
    // -----------------------------------------------------------------

    fn frist(&self) -> tokio::time::Instant {
        tokio::time::Instant::now() + self.einstellungen.operations_timeout
    }

    fn fehler_merken(&mut self, fehler: &TrinkgeldError) {
        self.letzter_fehler = Some(fehler.to_string());
    }

    /// Kanal-Fehlerpfad: Zustandsautomat und letzter Fehler setzen
    fn kanal_fehler(&mut self, meldung: String) -> TrinkgeldError {
        let fehler = TrinkgeldError::protokoll(meldung);
        self.kanal.fehler_setzen(fehler.to_string());
        self.fehler_merken(&fehler);
        fehler
    }

    fn verbindung_verloren(&mut self) {
        tracing::warn!("Koordinator hat die Verbindung geschlossen");
        self.session.getrennt();
        self.kanal.zuruecksetzen();
        self.claim.zuruecksetzen();
    }

    async fn senden(&mut self, envelope: RpcEnvelope) -> Result<()> {
        match self.verbindung.senden(envelope).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.fehler_merken(&e);
                Err(e)
            }
        }
    }

    /// Signiert eine Anfrage mit dem geliehenen Session-Schluessel.
    /// Ist der Schluessel mittendrin verschwunden (Reconnect,
    /// Abmeldung), scheitert die Operation sauber mit `SessionFehlt`.
    fn session_signieren(&self, payload: RpcPayload) -> Result<RpcEnvelope> {
        let schluessel = self.session.schluessel()?;
        let signer = SessionSigner::neu(schluessel.clone());
        let envelope = RpcEnvelope::neu(payload);
        let bytes = envelope
            .signatur_bytes()
            .map_err(|e| TrinkgeldError::intern(format!("Payload nicht serialisierbar: {e}")))?;
        let signatur = signer.signieren(&bytes)?;
        Ok(RpcEnvelope::signiert(envelope.payload, signatur.als_hex()))
    }

    /// Wartet bis zur Frist auf das naechste Anfrage-Ergebnis.
    /// Unaufgeforderte Nachrichten werden nebenbei verarbeitet.
    async fn ergebnis_abwarten_bis(
        &mut self,
        frist: tokio::time::Instant,
        operation: &str,
    ) -> Result<RpcPayload> {
        loop {
            let frame = match tokio::time::timeout_at(frist, self.verbindung.naechster_frame())
                .await
            {
                Err(_) => {
                    return Err(TrinkgeldError::Zeitlimit(format!(
                        "{operation}: keine Antwort vom Koordinator"
                    )))
                }
                Ok(Err(e)) => return Err(e),
                Ok(Ok(None)) => {
                    self.verbindung_verloren();
                    return Err(TrinkgeldError::Getrennt(
                        "Koordinator hat die Verbindung geschlossen".into(),
                    ));
                }
                Ok(Ok(Some(frame))) => frame,
            };

            match frame {
                RpcFrame::Ungueltig(grund) => {
                    tracing::warn!(grund = %grund, "Unparsbarer Frame verworfen");
                    continue;
                }
                RpcFrame::Nachricht(env) => {
                    if let Some(ergebnis) = self.verteilen(env) {
                        return Ok(ergebnis);
                    }
                }
            }
        }
    }

    /// Der eine geordnete Dispatcher: verarbeitet unaufgeforderte
    /// Nachrichten sofort und reicht Anfrage-Ergebnisse an die wartende
    /// Operation weiter
    fn verteilen(&mut self, envelope: RpcEnvelope) -> Option<RpcPayload> {
        tracing::trace!(methode = envelope.methode(), "Nachricht vom Koordinator");
        match envelope.payload {
            // --- Unaufgefordert: sofort verarbeiten -----------------
            RpcPayload::AssetList(p) => {
                self.asset_liste_verarbeiten(p);
                None
            }
            RpcPayload::BalanceUpdate(p) => {
                self.guthaben_verarbeiten(p);
                None
            }
            RpcPayload::TransferNotification(p) => {
                for eintrag in p.transactions {
                    let tip = TipTransaktion::from(eintrag);
                    let _ = self.tipp_sender.send(tip.clone());
                    self.tipps.anfuegen(tip);
                }
                None
            }

            // --- Auth: dem Session-Automaten zustellen, wartende
            //     Operation aufwecken ---------------------------------
            RpcPayload::AuthChallenge(p) => {
                self.session.challenge_empfangen(p.challenge_message.clone());
                Some(RpcPayload::AuthChallenge(p))
            }
            RpcPayload::AuthVerifyResult(p) => {
                self.session.verify_ergebnis(p.success, p.error.clone());
                Some(RpcPayload::AuthVerifyResult(p))
            }

            // --- Kanal-Erstellung: dem Kanal-Automaten zustellen ----
            RpcPayload::CreateChannelResult(p) => {
                self.kanal.erstellt_empfangen(p.clone());
                Some(RpcPayload::CreateChannelResult(p))
            }

            // --- Kanal-Liste: Cache aktualisieren -------------------
            RpcPayload::GetChannelsResult(p) => {
                self.kanal_liste = p.channels.clone();
                Some(RpcPayload::GetChannelsResult(p))
            }

            // --- Versionierte Ergebnisse und Fehler: die wartende
            //     Operation wendet sie an (Versionspruefung,
            //     Resize-Wiederanlauf, Claim-Zaehlung) ----------------
            ergebnis @ (RpcPayload::ResizeChannelResult(_)
            | RpcPayload::TransferResult(_)
            | RpcPayload::CloseChannelResult(_)
            | RpcPayload::Error(_)) => Some(ergebnis),

            // --- Ausgehende Methoden vom Koordinator: unerwartet ----
            andere => {
                tracing::warn!(
                    methode = andere.methode(),
                    "Unerwartete Anfrage-Methode vom Koordinator ignoriert"
                );
                None
            }
        }
    }

    fn asset_liste_verarbeiten(&mut self, p: AssetListParams) {
        let gesucht = p.assets.into_iter().find(|a| {
            a.symbol == self.einstellungen.abrechnungs_asset
                && a.chain_id == self.einstellungen.chain_id
                && a.decimals == self.einstellungen.abrechnungs_dezimalstellen
        });
        match gesucht {
            Some(asset) => {
                tracing::info!(
                    token = %asset.token,
                    symbol = %asset.symbol,
                    "Abrechnungs-Asset entdeckt"
                );
                self.abrechnungs_token = Some(asset.token);
            }
            None => {
                tracing::warn!(
                    asset = %self.einstellungen.abrechnungs_asset,
                    "Abrechnungs-Asset nicht in der Asset-Liste"
                );
            }
        }
    }

    fn guthaben_verarbeiten(&mut self, p: BalanceUpdateParams) {
        if let Some(eintrag) = p
            .balance_updates
            .into_iter()
            .find(|u| u.asset == self.einstellungen.abrechnungs_asset)
        {
            tracing::debug!(guthaben = %eintrag.amount, "Guthaben aktualisiert");
            self.guthaben = Some(eintrag.amount);
        }
    }
}

impl ClearNodeEngine<TcpStream> {
    /// Baut die TCP-Verbindung zum Koordinator auf (10 s Zeitlimit)
    pub async fn verbinden(&mut self) -> Result<()> {
        self.session.verbindung_laeuft();
        let adresse = self.einstellungen.koordinator_adresse.clone();
        match self.verbindung.verbinden(&adresse).await {
            Ok(()) => self.nach_verbindungsaufbau().await,
            Err(e) => {
                self.session.fehler_setzen(e.to_string());
                self.fehler_merken(&e);
                Err(e)
            }
        }
    }
}
