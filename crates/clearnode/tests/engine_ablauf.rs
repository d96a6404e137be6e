//! Integrationstests der ClearNode-Engine gegen einen geskripteten
//! Koordinator ueber einen In-Memory-Stream (`tokio::io::duplex`).
//!
//! Der Koordinator legt seine Antworten vorab in den Stream; die Engine
//! arbeitet sie beim Warten auf ihre Anfrage-Ergebnisse geordnet ab.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio_util::codec::Framed;

use trinkgeld_clearnode::kanal::{KanalDaten, ResizeDaten};
use trinkgeld_clearnode::{
    AbwicklungsKlient, AuthAnfrage, ClaimStatus, ClearNodeEngine, EngineEinstellungen,
    KanalStatus, SessionZustand,
};
use trinkgeld_core::types::{Address, Allocation, Allowance, Amount, ChannelId};
use trinkgeld_core::{Result, TrinkgeldError};
use trinkgeld_crypto::DevWalletSigner;
use trinkgeld_protocol::rpc::{
    AssetInfo, AssetListParams, AuthChallengeParams, AuthVerifyResultParams, BalanceEintrag,
    BalanceUpdateParams, ChannelInfo, ChannelState, ChannelSummary, CloseChannelResultParams,
    CreateChannelResultParams, ErrorParams, GetChannelsResultParams, ResizeChannelResultParams,
    RpcEnvelope, RpcPayload, TransferEintrag, TransferNotificationParams, TransferPosten,
    TransferResultParams,
};
use trinkgeld_protocol::wire::{FrameCodec, RpcFrame};

// ---------------------------------------------------------------------------
// Testbausteine
// ---------------------------------------------------------------------------

/// Geskripteter Koordinator am anderen Ende des Duplex-Streams
struct FakeKoordinator {
    framed: Framed<DuplexStream, FrameCodec>,
}

impl FakeKoordinator {
    fn neu(stream: DuplexStream) -> Self {
        Self {
            framed: Framed::new(stream, FrameCodec::new()),
        }
    }

    async fn senden(&mut self, payload: RpcPayload) {
        self.framed
            .send(RpcEnvelope::neu(payload))
            .await
            .expect("Koordinator-Senden fehlgeschlagen");
    }

    /// Liest die naechste Anfrage der Engine
    async fn naechste_anfrage(&mut self) -> RpcEnvelope {
        loop {
            match self.framed.next().await {
                Some(Ok(RpcFrame::Nachricht(env))) => return env,
                Some(Ok(RpcFrame::Ungueltig(grund))) => panic!("Ungueltiger Frame: {grund}"),
                Some(Err(e)) => panic!("Lesefehler: {e}"),
                None => panic!("Engine hat die Verbindung geschlossen"),
            }
        }
    }
}

/// Abwicklungs-Attrappe: zaehlt Aufrufe, schlaegt auf Wunsch fehl
#[derive(Default)]
struct FakeAbwicklung {
    kanal_einreichungen: AtomicUsize,
    resize_einreichungen: AtomicUsize,
    schliessungen: AtomicUsize,
    abhebungen: AtomicUsize,
    fehlschlaege_vor_erfolg: AtomicUsize,
}

impl FakeAbwicklung {
    fn neu() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn mit_fehlschlaegen(anzahl: usize) -> Arc<Self> {
        let fake = Self::default();
        fake.fehlschlaege_vor_erfolg.store(anzahl, Ordering::SeqCst);
        Arc::new(fake)
    }

    fn vielleicht_fehlschlagen(&self) -> Result<()> {
        let uebrig = self.fehlschlaege_vor_erfolg.load(Ordering::SeqCst);
        if uebrig > 0 {
            self.fehlschlaege_vor_erfolg
                .store(uebrig - 1, Ordering::SeqCst);
            return Err(TrinkgeldError::Abwicklung("tx fehlgeschlagen".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AbwicklungsKlient for FakeAbwicklung {
    async fn kanal_einreichen(&self, _daten: &KanalDaten) -> Result<()> {
        self.vielleicht_fehlschlagen()?;
        self.kanal_einreichungen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn resize_einreichen(&self, _daten: &KanalDaten, _resize: &ResizeDaten) -> Result<()> {
        self.vielleicht_fehlschlagen()?;
        self.resize_einreichungen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn schliessung_einreichen(
        &self,
        _kanal_id: ChannelId,
        _finaler_zustand: &ChannelState,
    ) -> Result<()> {
        self.vielleicht_fehlschlagen()?;
        self.schliessungen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn abheben(&self, _asset: &str, _betrag: Amount) -> Result<()> {
        self.vielleicht_fehlschlagen()?;
        self.abhebungen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn offener_kanal(&self, _kanal_id: ChannelId) -> Result<Option<ChannelSummary>> {
        Ok(None)
    }
}

fn einstellungen() -> EngineEinstellungen {
    EngineEinstellungen {
        operations_timeout: Duration::from_secs(5),
        ..EngineEinstellungen::default()
    }
}

async fn engine_mit_koordinator(
    abwicklung: Arc<FakeAbwicklung>,
) -> (ClearNodeEngine<DuplexStream>, FakeKoordinator) {
    let wallet = Arc::new(DevWalletSigner::aus_geheimnis([0x42u8; 32]));
    let (engine_seite, koordinator_seite) = tokio::io::duplex(64 * 1024);
    let mut engine = ClearNodeEngine::neu(einstellungen(), wallet, abwicklung);
    engine
        .stream_uebernehmen(engine_seite)
        .await
        .expect("Stream-Uebernahme fehlgeschlagen");
    let mut koordinator = FakeKoordinator::neu(koordinator_seite);

    // Die Engine fragt direkt nach dem Aufbau die Asset-Liste ab
    let anfrage = koordinator.naechste_anfrage().await;
    assert_eq!(anfrage.methode(), "get_assets_request");

    (engine, koordinator)
}

fn token() -> Address {
    Address([0x07u8; 20])
}

fn asset_liste() -> RpcPayload {
    RpcPayload::AssetList(AssetListParams {
        assets: vec![
            AssetInfo {
                token: Address([0x09u8; 20]),
                chain_id: 1,
                symbol: "usdc".into(),
                decimals: 6,
            },
            AssetInfo {
                token: token(),
                chain_id: 11_155_111,
                symbol: "ytest.usd".into(),
                decimals: 6,
            },
        ],
    })
}

fn auth_anfrage() -> AuthAnfrage {
    AuthAnfrage {
        application: "trinkgeld-live".into(),
        allowances: vec![Allowance {
            asset: "ytest.usd".into(),
            amount: Amount(1000),
        }],
        expires_at: 1_700_086_400,
        scope: "console".into(),
    }
}

fn kanal_id() -> ChannelId {
    ChannelId([0x11u8; 32])
}

fn erstellungs_antwort() -> RpcPayload {
    RpcPayload::CreateChannelResult(CreateChannelResultParams {
        channel_id: kanal_id(),
        channel: ChannelInfo {
            participants: vec![Address([0x01u8; 20])],
            adjudicator: Address([0x02u8; 20]),
            challenge_duration: 3600,
            nonce: 1,
        },
        state: ChannelState {
            intent: "INITIALIZE".into(),
            version: 0,
            state_data: "0x".into(),
            allocations: vec![],
        },
        server_signature: "0xfeed".into(),
    })
}

fn resize_antwort(version: u64) -> RpcPayload {
    RpcPayload::ResizeChannelResult(ResizeChannelResultParams {
        channel_id: kanal_id(),
        resize_state: ChannelState {
            intent: "RESIZE".into(),
            version,
            state_data: "0x".into(),
            allocations: vec![Allocation {
                destination: Address([0x03u8; 20]),
                asset: "ytest.usd".into(),
                amount: Amount(50),
            }],
        },
        proof_states: vec![],
    })
}

/// Fuehrt die Engine bis zur verifizierten Session
async fn authentifizieren(
    engine: &mut ClearNodeEngine<DuplexStream>,
    koordinator: &mut FakeKoordinator,
) {
    koordinator
        .senden(RpcPayload::AuthChallenge(AuthChallengeParams {
            challenge_message: "unterschreibe mich".into(),
        }))
        .await;
    engine.auth_anfordern(auth_anfrage()).await.unwrap();
    assert_eq!(engine.status().session, SessionZustand::Herausgefordert);

    let anfrage = koordinator.naechste_anfrage().await;
    assert_eq!(anfrage.methode(), "auth_request");

    koordinator
        .senden(RpcPayload::AuthVerifyResult(AuthVerifyResultParams {
            success: true,
            error: None,
        }))
        .await;
    engine.auth_verifizieren().await.unwrap();
    assert_eq!(engine.status().session, SessionZustand::Verifiziert);

    let verify = koordinator.naechste_anfrage().await;
    assert_eq!(verify.methode(), "auth_verify_request");
    assert!(verify.sig.is_some(), "Verify muss die Wallet-Signatur tragen");
}

/// Fuehrt die Engine bis zum eingereichten Kanal (Version 0)
async fn kanal_aufbauen(
    engine: &mut ClearNodeEngine<DuplexStream>,
    koordinator: &mut FakeKoordinator,
) {
    koordinator.senden(erstellungs_antwort()).await;
    engine.kanal_erstellen().await.unwrap();
    assert_eq!(engine.status().kanal, KanalStatus::Erstellt);
    assert_eq!(engine.status().kanal_version, Some(0));

    let anfrage = koordinator.naechste_anfrage().await;
    assert_eq!(anfrage.methode(), "create_channel_request");
    assert!(anfrage.sig.is_some(), "Kanal-Anfragen sind session-signiert");

    engine.kanal_einreichen().await.unwrap();
    assert_eq!(engine.status().kanal, KanalStatus::Eingereicht);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn auth_ablauf_mit_asset_entdeckung() {
    let (mut engine, mut koordinator) = engine_mit_koordinator(FakeAbwicklung::neu()).await;

    // Asset-Liste kommt vor der Challenge – die Engine verarbeitet sie
    // nebenbei und entdeckt das Abrechnungs-Asset
    koordinator.senden(asset_liste()).await;
    authentifizieren(&mut engine, &mut koordinator).await;

    assert_eq!(engine.abrechnungs_token(), Some(token()));
}

#[tokio::test]
async fn kanal_erstellen_resize_und_transfer_erhoehen_die_version() {
    let abwicklung = FakeAbwicklung::neu();
    let (mut engine, mut koordinator) = engine_mit_koordinator(abwicklung.clone()).await;
    koordinator.senden(asset_liste()).await;
    authentifizieren(&mut engine, &mut koordinator).await;
    kanal_aufbauen(&mut engine, &mut koordinator).await;
    assert_eq!(abwicklung.kanal_einreichungen.load(Ordering::SeqCst), 1);

    // Resize: Version 0 -> 1
    koordinator.senden(resize_antwort(1)).await;
    engine
        .kanal_resize(Amount(50), Address([0x03u8; 20]))
        .await
        .unwrap();
    assert_eq!(engine.status().kanal, KanalStatus::Resized);
    assert_eq!(engine.status().kanal_version, Some(1));

    engine.resize_einreichen().await.unwrap();
    assert_eq!(engine.status().kanal, KanalStatus::ResizeEingereicht);
    assert_eq!(abwicklung.resize_einreichungen.load(Ordering::SeqCst), 1);

    // Transfer: Version 1 -> 2
    koordinator
        .senden(RpcPayload::TransferResult(TransferResultParams {
            success: true,
            version: Some(2),
        }))
        .await;
    engine
        .transfer_senden(
            Address([0x04u8; 20]),
            vec![TransferPosten {
                asset: "ytest.usd".into(),
                amount: Amount(5),
            }],
        )
        .await
        .unwrap();
    assert_eq!(engine.status().kanal, KanalStatus::Transferiert);
    assert_eq!(engine.status().kanal_version, Some(2));
}

#[tokio::test]
async fn resize_laeuft_bereits_reicht_gehaltenen_zustand_erneut_ein() {
    let abwicklung = FakeAbwicklung::neu();
    let (mut engine, mut koordinator) = engine_mit_koordinator(abwicklung.clone()).await;
    koordinator.senden(asset_liste()).await;
    authentifizieren(&mut engine, &mut koordinator).await;
    kanal_aufbauen(&mut engine, &mut koordinator).await;

    // Erster Resize liefert den Vorschlag (Version 1)
    koordinator.senden(resize_antwort(1)).await;
    engine
        .kanal_resize(Amount(50), Address([0x03u8; 20]))
        .await
        .unwrap();
    assert_eq!(engine.status().kanal, KanalStatus::Resized);

    // Zweiter Resize mitten im Flug: der Koordinator meldet den schon
    // laufenden Resize -> die Engine reicht den gehaltenen Zustand
    // erneut ein statt zu scheitern
    koordinator
        .senden(RpcPayload::Error(ErrorParams {
            error: "resize already ongoing".into(),
        }))
        .await;
    engine
        .kanal_resize(Amount(20), Address([0x03u8; 20]))
        .await
        .unwrap();

    assert_eq!(engine.status().kanal, KanalStatus::ResizeEingereicht);
    assert_eq!(
        abwicklung.resize_einreichungen.load(Ordering::SeqCst),
        1,
        "Der gehaltene Zustand muss genau einmal eingereicht worden sein"
    );
}

#[tokio::test]
async fn resize_laeuft_bereits_ohne_gehaltenen_zustand_schlaegt_fehl() {
    let (mut engine, mut koordinator) = engine_mit_koordinator(FakeAbwicklung::neu()).await;
    koordinator.senden(asset_liste()).await;
    authentifizieren(&mut engine, &mut koordinator).await;
    kanal_aufbauen(&mut engine, &mut koordinator).await;

    koordinator
        .senden(RpcPayload::Error(ErrorParams {
            error: "resize already ongoing".into(),
        }))
        .await;
    let ergebnis = engine.kanal_resize(Amount(50), Address([0x03u8; 20])).await;

    assert!(matches!(ergebnis, Err(TrinkgeldError::ResizeLaeuftBereits)));
    assert_eq!(engine.status().kanal, KanalStatus::Fehler);
}

#[tokio::test]
async fn einreichung_nach_abwicklungsfehler_wiederholbar() {
    // Der erste Einreichungs-Versuch schlaegt fehl, die Kanaldaten
    // bleiben erhalten, der zweite gelingt
    let abwicklung = FakeAbwicklung::mit_fehlschlaegen(1);
    let (mut engine, mut koordinator) = engine_mit_koordinator(abwicklung.clone()).await;
    koordinator.senden(asset_liste()).await;
    authentifizieren(&mut engine, &mut koordinator).await;

    koordinator.senden(erstellungs_antwort()).await;
    engine.kanal_erstellen().await.unwrap();

    let ergebnis = engine.kanal_einreichen().await;
    assert!(matches!(ergebnis, Err(TrinkgeldError::Abwicklung(_))));
    assert_eq!(engine.status().kanal, KanalStatus::Fehler);

    engine.kanal_einreichen().await.unwrap();
    assert_eq!(engine.status().kanal, KanalStatus::Eingereicht);
    assert_eq!(abwicklung.kanal_einreichungen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn claim_ohne_offene_kanaele_sofort_abgeschlossen() {
    let abwicklung = FakeAbwicklung::neu();
    let (mut engine, mut koordinator) = engine_mit_koordinator(abwicklung.clone()).await;
    koordinator.senden(asset_liste()).await;
    authentifizieren(&mut engine, &mut koordinator).await;

    koordinator
        .senden(RpcPayload::GetChannelsResult(GetChannelsResultParams {
            channels: vec![],
        }))
        .await;
    engine.claim_alle().await.unwrap();

    assert_eq!(engine.status().claim, ClaimStatus::Abgeschlossen);
    assert_eq!(
        abwicklung.schliessungen.load(Ordering::SeqCst),
        0,
        "Im Claim-Flow wird nichts on-chain eingereicht"
    );
}

#[tokio::test]
async fn claim_schliesst_alle_kanaele_und_wartet_auf_jede_bestaetigung() {
    let abwicklung = FakeAbwicklung::neu();
    let (mut engine, mut koordinator) = engine_mit_koordinator(abwicklung.clone()).await;
    koordinator.senden(asset_liste()).await;
    authentifizieren(&mut engine, &mut koordinator).await;

    let kanaele = vec![
        ChannelSummary {
            channel_id: ChannelId([0x21u8; 32]),
            token: token(),
            amount: Amount(100),
            version: 4,
        },
        ChannelSummary {
            channel_id: ChannelId([0x22u8; 32]),
            token: token(),
            amount: Amount(200),
            version: 9,
        },
    ];
    koordinator
        .senden(RpcPayload::GetChannelsResult(GetChannelsResultParams {
            channels: kanaele,
        }))
        .await;
    koordinator
        .senden(RpcPayload::CloseChannelResult(CloseChannelResultParams {
            channel_id: ChannelId([0x21u8; 32]),
            final_state: None,
        }))
        .await;
    koordinator
        .senden(RpcPayload::CloseChannelResult(CloseChannelResultParams {
            channel_id: ChannelId([0x22u8; 32]),
            final_state: None,
        }))
        .await;

    engine.claim_alle().await.unwrap();
    assert_eq!(engine.status().claim, ClaimStatus::Abgeschlossen);

    // Claim-Flow: Koordinator-Bestaetigung genuegt, keine
    // On-Chain-Schliessung
    assert_eq!(abwicklung.schliessungen.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn claim_fehler_beim_schliessen_kippt_den_ganzen_batch() {
    let (mut engine, mut koordinator) = engine_mit_koordinator(FakeAbwicklung::neu()).await;
    koordinator.senden(asset_liste()).await;
    authentifizieren(&mut engine, &mut koordinator).await;

    koordinator
        .senden(RpcPayload::GetChannelsResult(GetChannelsResultParams {
            channels: vec![
                ChannelSummary {
                    channel_id: ChannelId([0x21u8; 32]),
                    token: token(),
                    amount: Amount(100),
                    version: 4,
                },
                ChannelSummary {
                    channel_id: ChannelId([0x22u8; 32]),
                    token: token(),
                    amount: Amount(200),
                    version: 9,
                },
            ],
        }))
        .await;
    // Erster Kanal schliesst, dann meldet der Koordinator einen Fehler
    koordinator
        .senden(RpcPayload::CloseChannelResult(CloseChannelResultParams {
            channel_id: ChannelId([0x21u8; 32]),
            final_state: None,
        }))
        .await;
    koordinator
        .senden(RpcPayload::Error(ErrorParams {
            error: "close fehlgeschlagen".into(),
        }))
        .await;

    let ergebnis = engine.claim_alle().await;
    assert!(ergebnis.is_err());
    assert!(matches!(engine.status().claim, ClaimStatus::Fehler(_)));
}

#[tokio::test]
async fn claim_ohne_verifizierte_session_abgelehnt() {
    let (mut engine, _koordinator) = engine_mit_koordinator(FakeAbwicklung::neu()).await;
    let ergebnis = engine.claim_alle().await;
    assert!(matches!(ergebnis, Err(TrinkgeldError::SessionFehlt)));
}

#[tokio::test]
async fn trinkgelder_landen_im_protokoll_neueste_zuerst() {
    let (mut engine, mut koordinator) = engine_mit_koordinator(FakeAbwicklung::neu()).await;

    let mut empfaenger = engine.tipp_abonnieren();
    koordinator
        .senden(RpcPayload::TransferNotification(
            TransferNotificationParams {
                transactions: vec![
                    TransferEintrag {
                        sender: Address([0x31u8; 20]),
                        amount: Amount(100),
                        asset: "ytest.usd".into(),
                        memo: "erster".into(),
                        created_at: 1_700_000_000,
                    },
                    TransferEintrag {
                        sender: Address([0x32u8; 20]),
                        amount: Amount(200),
                        asset: "ytest.usd".into(),
                        memo: "zweiter".into(),
                        created_at: 1_700_000_100,
                    },
                ],
            },
        ))
        .await;

    assert!(engine.ereignis_abwarten().await.unwrap());

    let tipps = engine.tipps().alle();
    assert_eq!(tipps.len(), 2);
    assert_eq!(tipps[0].memo, "zweiter", "Neueste zuerst");
    assert_eq!(tipps[1].memo, "erster");

    // Abonnenten bekommen die Tipps in Eingangsreihenfolge
    assert_eq!(empfaenger.recv().await.unwrap().memo, "erster");
    assert_eq!(empfaenger.recv().await.unwrap().memo, "zweiter");
}

#[tokio::test]
async fn guthaben_update_fuer_das_abrechnungs_asset() {
    let (mut engine, mut koordinator) = engine_mit_koordinator(FakeAbwicklung::neu()).await;

    koordinator
        .senden(RpcPayload::BalanceUpdate(BalanceUpdateParams {
            balance_updates: vec![
                BalanceEintrag {
                    asset: "usdc".into(),
                    amount: Amount(999),
                },
                BalanceEintrag {
                    asset: "ytest.usd".into(),
                    amount: Amount(1234),
                },
            ],
        }))
        .await;
    engine.ereignis_abwarten().await.unwrap();

    assert_eq!(engine.guthaben(), Some(Amount(1234)));
}

#[tokio::test]
async fn operation_ohne_antwort_laeuft_in_die_frist() {
    let wallet = Arc::new(DevWalletSigner::aus_geheimnis([0x42u8; 32]));
    let (engine_seite, koordinator_seite) = tokio::io::duplex(64 * 1024);
    let mut engine = ClearNodeEngine::neu(
        EngineEinstellungen {
            operations_timeout: Duration::from_millis(100),
            ..EngineEinstellungen::default()
        },
        wallet,
        FakeAbwicklung::neu(),
    );
    engine.stream_uebernehmen(engine_seite).await.unwrap();
    // Der Koordinator antwortet nie
    let _stumm = koordinator_seite;

    let ergebnis = engine.auth_anfordern(auth_anfrage()).await;
    assert!(matches!(ergebnis, Err(TrinkgeldError::Zeitlimit(_))));
    assert!(matches!(engine.status().session, SessionZustand::Fehler(_)));
}

#[tokio::test]
async fn kanal_operation_ohne_session_schlaegt_sauber_fehl() {
    let (mut engine, mut koordinator) = engine_mit_koordinator(FakeAbwicklung::neu()).await;
    koordinator.senden(asset_liste()).await;
    authentifizieren(&mut engine, &mut koordinator).await;
    kanal_aufbauen(&mut engine, &mut koordinator).await;

    // Abmeldung mitten im Ablauf: der Session-Schluessel ist weg, die
    // naechste signierende Operation scheitert sauber
    engine.abmelden();
    let ergebnis = engine.kanal_erstellen().await;
    assert!(matches!(
        ergebnis,
        Err(TrinkgeldError::SessionFehlt) | Err(TrinkgeldError::Kanal(_))
    ));
}

#[tokio::test]
async fn verbindungsverlust_invalidiert_die_session() {
    let (mut engine, koordinator) = engine_mit_koordinator(FakeAbwicklung::neu()).await;
    drop(koordinator);

    let weiter = engine.ereignis_abwarten().await.unwrap();
    assert!(!weiter, "Verbindungsende muss gemeldet werden");
    assert_eq!(engine.status().session, SessionZustand::Leerlauf);
    assert_eq!(engine.status().kanal, KanalStatus::Keiner);
}
