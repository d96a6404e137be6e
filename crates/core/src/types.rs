//! Gemeinsame Identifikations- und Werttypen fuer Trinkgeld
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen. Adressen und
//! Kanal-IDs werden auf dem Draht als `0x`-praefixierte Hex-Strings
//! transportiert, Betraege als Dezimal-Strings in der kleinsten Einheit
//! des jeweiligen Assets.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::TrinkgeldError;

/// Entfernt ein optionales `0x`-Praefix
fn ohne_praefix(s: &str) -> &str {
    s.strip_prefix("0x").unwrap_or(s)
}

/// Wallet- bzw. Zieladresse (20 Bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// Die Nulladresse (Platzhalter fuer das native Asset)
    pub const NULL: Address = Address([0u8; 20]);

    /// Gibt die inneren Bytes zurueck
    pub fn bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = TrinkgeldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let roh = hex::decode(ohne_praefix(s))
            .map_err(|e| TrinkgeldError::UngueltigeAdresse(format!("{s}: {e}")))?;
        let bytes: [u8; 20] = roh
            .try_into()
            .map_err(|_| TrinkgeldError::UngueltigeAdresse(format!("{s}: erwartet 20 Bytes")))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Eindeutige Kanal-ID (32 Bytes, vom Koordinator vergeben)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub [u8; 32]);

impl ChannelId {
    /// Gibt die inneren Bytes zurueck
    pub fn bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for ChannelId {
    type Err = TrinkgeldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let roh = hex::decode(ohne_praefix(s))
            .map_err(|e| TrinkgeldError::Protokoll(format!("ungueltige Kanal-ID '{s}': {e}")))?;
        let bytes: [u8; 32] = roh.try_into().map_err(|_| {
            TrinkgeldError::Protokoll(format!("ungueltige Kanal-ID '{s}': erwartet 32 Bytes"))
        })?;
        Ok(Self(bytes))
    }
}

impl Serialize for ChannelId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChannelId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Eindeutige Stream-ID des Broadcasters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(pub Uuid);

impl StreamId {
    /// Erstellt eine neue zufaellige StreamId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Zuschauer-ID im Signalisierungs-Topic
///
/// Wird vom Zuschauer selbst vergeben und kommt als opaker String ueber
/// das Broadcast-Topic. Kein UUID-Zwang – der Broadcaster behandelt die
/// ID als reinen Map-Schluessel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewerId(pub String);

impl ViewerId {
    pub fn neu(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "viewer:{}", self.0)
    }
}

/// Betrag in der kleinsten Einheit eines Assets (niemals negativ)
///
/// Auf dem Draht als Dezimal-String transportiert damit grosse Werte
/// JSON-sicher bleiben.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(pub u128);

impl Amount {
    pub const NULL: Amount = Amount(0);

    /// Addiert zwei Betraege, gibt `None` bei Ueberlauf zurueck
    pub fn plus(&self, anderer: Amount) -> Option<Amount> {
        self.0.checked_add(anderer.0).map(Amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = TrinkgeldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u128>()
            .map(Amount)
            .map_err(|e| TrinkgeldError::Protokoll(format!("ungueltiger Betrag '{s}': {e}")))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Zulassung aus der Authentifizierung: wieviel darf der Session-Key
/// pro Asset bewegen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allowance {
    pub asset: String,
    pub amount: Amount,
}

/// Aufteilung der hinterlegten Kanalmittel: (Ziel, Asset, Betrag)
///
/// Die Summe aller Allokationen eines Kanals muss bei jeder bestaetigten
/// Version dem hinterlegten Gesamtbetrag entsprechen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub destination: Address,
    pub asset: String,
    pub amount: Amount,
}

/// Summiert die Betraege einer Allokationsliste, `None` bei Ueberlauf
pub fn allokationssumme(allokationen: &[Allocation]) -> Option<Amount> {
    allokationen
        .iter()
        .try_fold(Amount::NULL, |summe, a| summe.plus(a.amount))
}
