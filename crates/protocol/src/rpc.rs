//! RPC-Protokoll zum ClearNode-Koordinator
//!
//! Jede Nachricht ist ein JSON-Envelope `{method, params, sig?}`.
//! Ausgehende Anfragen tragen die `*_request`-Methodennamen und werden
//! entweder mit dem Wallet-Schluessel (Auth-Verify) oder dem
//! Session-Schluessel (alle Kanal-Operationen) signiert. Eingehende
//! Nachrichten werden anhand des Methodennamens an den zustaendigen
//! Zustandsautomaten verteilt.
//!
//! ## Design
//! - Tagged Enum fuer typsichere Methoden/Parameter-Paare
//! - Unbekannte Methoden und kaputte Frames werden beim Dekodieren als
//!   `RpcFrame::Ungueltig` gemeldet und vom Dispatcher verworfen

use serde::{Deserialize, Serialize};
use trinkgeld_core::types::{Address, Allocation, Allowance, Amount, ChannelId};

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Ein vollstaendiges RPC-Envelope: Methode + Parameter + optionale Signatur
///
/// Auf dem Draht: `{"method": ..., "params": ..., "sig"?: ...}`. Die
/// Serde-Impls sind von Hand geschrieben damit das `sig`-Feld neben dem
/// getaggten Payload liegen kann.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcEnvelope {
    pub payload: RpcPayload,
    /// Hex-kodierte Signatur ueber die Parameter (fehlt bei unsignierten
    /// Anfragen und bei allen eingehenden Nachrichten)
    pub sig: Option<String>,
}

impl serde::Serialize for RpcEnvelope {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::Error;

        let mut wert = serde_json::to_value(&self.payload).map_err(S::Error::custom)?;
        if let Some(sig) = &self.sig {
            let objekt = wert
                .as_object_mut()
                .ok_or_else(|| S::Error::custom("Payload ist kein JSON-Objekt"))?;
            objekt.insert("sig".into(), serde_json::Value::String(sig.clone()));
        }
        wert.serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for RpcEnvelope {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        let mut wert = serde_json::Value::deserialize(deserializer)?;
        let sig = match wert.as_object_mut().and_then(|o| o.remove("sig")) {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s),
            Some(_) => return Err(D::Error::custom("sig muss ein String sein")),
        };
        let payload = RpcPayload::deserialize(wert).map_err(D::Error::custom)?;
        Ok(Self { payload, sig })
    }
}

impl RpcEnvelope {
    /// Erstellt ein unsigniertes Envelope
    pub fn neu(payload: RpcPayload) -> Self {
        Self { payload, sig: None }
    }

    /// Erstellt ein signiertes Envelope
    pub fn signiert(payload: RpcPayload, sig: String) -> Self {
        Self {
            payload,
            sig: Some(sig),
        }
    }

    /// Gibt den Methodennamen des Envelopes zurueck (fuer Logging/Dispatch)
    pub fn methode(&self) -> &'static str {
        self.payload.methode()
    }

    /// Serialisiert die Parameter als kanonische JSON-Bytes – das ist die
    /// Eingabe fuer die Nachrichtensignatur
    pub fn signatur_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.payload)
    }
}

/// Methode + Parameter als tagged Enum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum RpcPayload {
    // -----------------------------------------------------------------
    // Ausgehend (Client -> Koordinator)
    // -----------------------------------------------------------------
    AuthRequest(AuthRequestParams),
    AuthVerifyRequest(AuthVerifyRequestParams),
    GetAssetsRequest(GetAssetsParams),
    CreateChannelRequest(CreateChannelParams),
    GetChannelsRequest(GetChannelsParams),
    ResizeChannelRequest(ResizeChannelParams),
    TransferRequest(TransferParams),
    CloseChannelRequest(CloseChannelParams),

    // -----------------------------------------------------------------
    // Eingehend (Koordinator -> Client)
    // -----------------------------------------------------------------
    AssetList(AssetListParams),
    AuthChallenge(AuthChallengeParams),
    AuthVerifyResult(AuthVerifyResultParams),
    BalanceUpdate(BalanceUpdateParams),
    CreateChannelResult(CreateChannelResultParams),
    GetChannelsResult(GetChannelsResultParams),
    ResizeChannelResult(ResizeChannelResultParams),
    TransferResult(TransferResultParams),
    TransferNotification(TransferNotificationParams),
    CloseChannelResult(CloseChannelResultParams),
    Error(ErrorParams),
}

impl RpcPayload {
    /// Methodenname wie er auf dem Draht steht
    pub fn methode(&self) -> &'static str {
        match self {
            Self::AuthRequest(_) => "auth_request",
            Self::AuthVerifyRequest(_) => "auth_verify_request",
            Self::GetAssetsRequest(_) => "get_assets_request",
            Self::CreateChannelRequest(_) => "create_channel_request",
            Self::GetChannelsRequest(_) => "get_channels_request",
            Self::ResizeChannelRequest(_) => "resize_channel_request",
            Self::TransferRequest(_) => "transfer_request",
            Self::CloseChannelRequest(_) => "close_channel_request",
            Self::AssetList(_) => "asset_list",
            Self::AuthChallenge(_) => "auth_challenge",
            Self::AuthVerifyResult(_) => "auth_verify_result",
            Self::BalanceUpdate(_) => "balance_update",
            Self::CreateChannelResult(_) => "create_channel_result",
            Self::GetChannelsResult(_) => "get_channels_result",
            Self::ResizeChannelResult(_) => "resize_channel_result",
            Self::TransferResult(_) => "transfer_result",
            Self::TransferNotification(_) => "transfer_notification",
            Self::CloseChannelResult(_) => "close_channel_result",
            Self::Error(_) => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// Auth-Nachrichten
// ---------------------------------------------------------------------------

/// Auth-Anfrage: bindet einen frisch erzeugten Session-Schluessel an die
/// Wallet-Adresse, mit Zulassungen, Ablaufzeit und Geltungsbereich
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthRequestParams {
    /// Wallet-Adresse des Broadcasters
    pub address: Address,
    /// Adresse des ephemeren Session-Schluessels
    pub session_key: Address,
    /// Name der anfragenden Anwendung
    pub application: String,
    /// Erlaubte (Asset, Betrag)-Paare fuer den Session-Schluessel
    pub allowances: Vec<Allowance>,
    /// Ablaufzeit des Session-Schluessels (Unix-Sekunden)
    pub expires_at: u64,
    /// Geltungsbereich der Session
    pub scope: String,
}

/// Challenge des Koordinators – der Rohtext wird wortwoertlich
/// aufbewahrt, da die Wallet-Signatur exakt diese Bytes abdeckt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthChallengeParams {
    pub challenge_message: String,
}

/// Verify-Anfrage: die Challenge plus Wallet-Signatur (im `sig`-Feld
/// des Envelopes)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthVerifyRequestParams {
    pub challenge: String,
}

/// Ergebnis der Verifikation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthVerifyResultParams {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Asset- und Guthaben-Nachrichten
// ---------------------------------------------------------------------------

/// Fragt die Asset-Liste des Koordinators ab
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetAssetsParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
}

/// Ein vom Koordinator unterstuetztes Asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub token: Address,
    pub chain_id: u64,
    pub symbol: String,
    pub decimals: u8,
}

/// Asset-Liste des Koordinators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetListParams {
    pub assets: Vec<AssetInfo>,
}

/// Ein Guthaben-Eintrag auf der Abwicklungsschicht
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceEintrag {
    pub asset: String,
    pub amount: Amount,
}

/// Unaufgeforderte Guthaben-Aktualisierung des Koordinators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceUpdateParams {
    pub balance_updates: Vec<BalanceEintrag>,
}

// ---------------------------------------------------------------------------
// Kanal-Nachrichten
// ---------------------------------------------------------------------------

/// Ein Kanalzustand wie ihn der Koordinator vorschlaegt/gegenzeichnet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelState {
    /// Absicht des Zustands (z.B. "INITIALIZE", "RESIZE", "FINALIZE")
    pub intent: String,
    /// Streng monoton steigende Versionsnummer
    pub version: u64,
    /// Opakes Zustands-Datenfeld (hex)
    pub state_data: String,
    /// Aufteilung der hinterlegten Mittel zu dieser Version
    pub allocations: Vec<Allocation>,
}

/// Statische Kanalparameter aus der Erstellungs-Antwort
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub participants: Vec<Address>,
    pub adjudicator: Address,
    pub challenge_duration: u64,
    pub nonce: u64,
}

/// Kanal-Erstellung anfragen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateChannelParams {
    pub chain_id: u64,
    pub token: Address,
}

/// Antwort des Koordinators auf die Kanal-Erstellung: der vorgeschlagene
/// Kanal, der unsignierte Anfangszustand und die Koordinator-Signatur
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateChannelResultParams {
    pub channel_id: ChannelId,
    pub channel: ChannelInfo,
    pub state: ChannelState,
    pub server_signature: String,
}

/// Filter fuer die Kanal-Abfrage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatusFilter {
    Open,
    Closed,
}

/// Alle Kanaele eines Teilnehmers abfragen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetChannelsParams {
    pub participant: Address,
    pub status: ChannelStatusFilter,
}

/// Kurzbeschreibung eines Kanals in der Abfrage-Antwort
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub channel_id: ChannelId,
    pub token: Address,
    pub amount: Amount,
    pub version: u64,
}

/// Antwort auf die Kanal-Abfrage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetChannelsResultParams {
    pub channels: Vec<ChannelSummary>,
}

/// Kanal-Resize anfragen (Aufstockung/Umschichtung der Mittel)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResizeChannelParams {
    pub channel_id: ChannelId,
    pub allocate_amount: Amount,
    pub funds_destination: Address,
}

/// Antwort auf den Resize: der vorgeschlagene neue Zustand plus die
/// Beweiszustaende fuer die On-Chain-Einreichung
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResizeChannelResultParams {
    pub channel_id: ChannelId,
    pub resize_state: ChannelState,
    pub proof_states: Vec<ChannelState>,
}

/// Ein Posten einer Off-Chain-Ueberweisung (Trinkgeld)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferPosten {
    pub asset: String,
    pub amount: Amount,
}

/// Off-Chain-Ueberweisung an einen Empfaenger anfragen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferParams {
    pub destination: Address,
    pub allocations: Vec<TransferPosten>,
}

/// Bestaetigung einer Ueberweisung
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferResultParams {
    pub success: bool,
    /// Neue Kanalversion nach der Ueberweisung, falls der Koordinator
    /// sie mitliefert
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

/// Ein eingegangenes Trinkgeld aus Sicht des Empfaengers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferEintrag {
    pub sender: Address,
    pub amount: Amount,
    pub asset: String,
    #[serde(default)]
    pub memo: String,
    /// Zeitstempel des Koordinators (Unix-Sekunden)
    pub created_at: u64,
}

/// Unaufgeforderte Benachrichtigung ueber eingegangene Ueberweisungen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferNotificationParams {
    pub transactions: Vec<TransferEintrag>,
}

/// Kanal-Schliessung anfragen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseChannelParams {
    pub channel_id: ChannelId,
    pub funds_destination: Address,
}

/// Antwort auf die Schliessung – im Einzel-Flow traegt sie den finalen
/// signierten Zustand fuer die On-Chain-Einreichung, im Claim-Flow
/// genuegt die Bestaetigung allein
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseChannelResultParams {
    pub channel_id: ChannelId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_state: Option<ChannelState>,
}

// ---------------------------------------------------------------------------
// Fehler
// ---------------------------------------------------------------------------

/// Explizite Fehlermeldung des Koordinators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorParams {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
