//! Kanal-Lebenszyklus
//!
//! Zustandsautomat eines einzelnen Zahlungskanals: Erstellung,
//! On-Chain-Einreichung, Resize, Transfer (Trinkgeld), Schliessung und
//! Abhebung. Jede Phase traegt genau die Daten die in ihr gueltig sind –
//! unmoegliche Feldkombinationen gibt es damit nicht.
//!
//! Die Kanalversion steigt streng monoton ueber alle akzeptierten
//! Resize-/Transfer-Operationen; ein Ergebnis mit einer Version kleiner
//! oder gleich der letzten bestaetigten wird abgelehnt.
//!
//! Einziger automatischer Wiederanlauf: meldet der Koordinator einen
//! bereits laufenden Resize, wird der gehaltene Resize-Zustand erneut
//! eingereicht statt die Operation scheitern zu lassen. Ohne gehaltenen
//! Zustand wird der Fehler gemeldet, nicht endlos wiederholt.

use trinkgeld_core::types::{Address, Amount, ChannelId};
use trinkgeld_core::{Result, TrinkgeldError};
use trinkgeld_protocol::rpc::{
    ChannelInfo, ChannelState, CloseChannelParams, CloseChannelResultParams, CreateChannelParams,
    CreateChannelResultParams, ResizeChannelParams, ResizeChannelResultParams, RpcPayload,
    TransferParams, TransferPosten,
};

// ---------------------------------------------------------------------------
// Daten
// ---------------------------------------------------------------------------

/// Der vom Koordinator vorgeschlagene Kanal samt Gegensignatur
#[derive(Debug, Clone, PartialEq)]
pub struct KanalDaten {
    pub kanal_id: ChannelId,
    pub token: Address,
    pub kanal: ChannelInfo,
    /// Unsignierter Anfangszustand aus der Erstellungs-Antwort
    pub anfangszustand: ChannelState,
    pub server_signatur: String,
    /// Letzte bestaetigte Kanalversion
    pub version: u64,
}

/// Vorgeschlagener Resize-Zustand samt Beweiszustaenden
#[derive(Debug, Clone, PartialEq)]
pub struct ResizeDaten {
    pub kanal_id: ChannelId,
    pub resize_zustand: ChannelState,
    pub beweis_zustaende: Vec<ChannelState>,
}

// ---------------------------------------------------------------------------
// Phasen
// ---------------------------------------------------------------------------

/// Lebenszyklus-Phase mit den jeweils gueltigen Daten
#[derive(Debug, Clone)]
pub enum KanalPhase {
    /// Kein Kanal vorhanden
    Keiner,
    /// Erstellungs-Anfrage gesendet
    Erstellend { chain_id: u64, token: Address },
    /// Koordinator-Vorschlag erhalten, On-Chain-Einreichung steht aus
    Erstellt(KanalDaten),
    /// Kanal on-chain eingereicht
    Eingereicht(KanalDaten),
    /// Resize-Anfrage gesendet; ein evtl. schon vorliegender
    /// Resize-Vorschlag bleibt fuer den Wiederanlauf erhalten
    Resizing {
        daten: KanalDaten,
        gehaltener_resize: Option<ResizeDaten>,
    },
    /// Resize-Vorschlag erhalten, On-Chain-Einreichung steht aus
    Resized {
        daten: KanalDaten,
        resize: ResizeDaten,
    },
    /// Resize on-chain eingereicht
    ResizeEingereicht(KanalDaten),
    /// Transfer-Anfrage gesendet
    Transferierend(KanalDaten),
    /// Transfer bestaetigt
    Transferiert(KanalDaten),
    /// Schliessungs-Anfrage gesendet
    Schliessend(KanalDaten),
    /// Schliessung vom Koordinator bestaetigt (Claim-Flow: das genuegt)
    Geschlossen(KanalDaten),
    /// Finaler Zustand on-chain eingereicht (Einzel-Flow)
    SchliessenEingereicht(KanalDaten),
    /// Mittel abgehoben
    Abgehoben,
    /// Fehlerzustand; vorhandene Kanal-/Resize-Daten bleiben fuer einen
    /// erneuten Versuch erhalten
    Fehler {
        meldung: String,
        daten: Option<KanalDaten>,
        resize: Option<ResizeDaten>,
    },
}

/// Kompakte Statusansicht der Phase fuer Anzeige-Zwecke
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KanalStatus {
    Keiner,
    Erstellend,
    Erstellt,
    Eingereicht,
    Resizing,
    Resized,
    ResizeEingereicht,
    Transferierend,
    Transferiert,
    Schliessend,
    Geschlossen,
    SchliessenEingereicht,
    Abgehoben,
    Fehler,
}

impl KanalPhase {
    /// Kompakte Statusansicht
    pub fn status(&self) -> KanalStatus {
        match self {
            Self::Keiner => KanalStatus::Keiner,
            Self::Erstellend { .. } => KanalStatus::Erstellend,
            Self::Erstellt(_) => KanalStatus::Erstellt,
            Self::Eingereicht(_) => KanalStatus::Eingereicht,
            Self::Resizing { .. } => KanalStatus::Resizing,
            Self::Resized { .. } => KanalStatus::Resized,
            Self::ResizeEingereicht(_) => KanalStatus::ResizeEingereicht,
            Self::Transferierend(_) => KanalStatus::Transferierend,
            Self::Transferiert(_) => KanalStatus::Transferiert,
            Self::Schliessend(_) => KanalStatus::Schliessend,
            Self::Geschlossen(_) => KanalStatus::Geschlossen,
            Self::SchliessenEingereicht(_) => KanalStatus::SchliessenEingereicht,
            Self::Abgehoben => KanalStatus::Abgehoben,
            Self::Fehler { .. } => KanalStatus::Fehler,
        }
    }

    /// Die gehaltenen Kanaldaten, falls die Phase welche traegt
    pub fn daten(&self) -> Option<&KanalDaten> {
        match self {
            Self::Erstellt(d)
            | Self::Eingereicht(d)
            | Self::ResizeEingereicht(d)
            | Self::Transferierend(d)
            | Self::Transferiert(d)
            | Self::Schliessend(d)
            | Self::Geschlossen(d)
            | Self::SchliessenEingereicht(d) => Some(d),
            Self::Resizing { daten, .. } | Self::Resized { daten, .. } => Some(daten),
            Self::Fehler { daten, .. } => daten.as_ref(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// KanalManager
// ---------------------------------------------------------------------------

/// Zustandsautomat fuer genau einen Kanal
pub struct KanalManager {
    phase: KanalPhase,
}

impl Default for KanalManager {
    fn default() -> Self {
        Self::neu()
    }
}

impl KanalManager {
    pub fn neu() -> Self {
        Self {
            phase: KanalPhase::Keiner,
        }
    }

    /// Aktuelle Phase
    pub fn phase(&self) -> &KanalPhase {
        &self.phase
    }

    /// Kompakter Status
    pub fn status(&self) -> KanalStatus {
        self.phase.status()
    }

    /// ID des aktuellen Kanals, falls vorhanden
    pub fn kanal_id(&self) -> Option<ChannelId> {
        self.phase.daten().map(|d| d.kanal_id)
    }

    /// Letzte bestaetigte Kanalversion, falls ein Kanal vorhanden ist
    pub fn version(&self) -> Option<u64> {
        self.phase.daten().map(|d| d.version)
    }

    /// Setzt den Automaten zurueck (Reconnect/Trennung verwirft alle
    /// laufenden Operationen)
    pub fn zuruecksetzen(&mut self) {
        self.phase = KanalPhase::Keiner;
    }

    /// Setzt den Fehlerzustand und bewahrt dabei gehaltene Daten
    pub fn fehler_setzen(&mut self, meldung: impl Into<String>) {
        let meldung = meldung.into();
        let alte = std::mem::replace(&mut self.phase, KanalPhase::Keiner);
        let (daten, resize) = match alte {
            KanalPhase::Erstellt(d)
            | KanalPhase::Eingereicht(d)
            | KanalPhase::ResizeEingereicht(d)
            | KanalPhase::Transferierend(d)
            | KanalPhase::Transferiert(d)
            | KanalPhase::Schliessend(d)
            | KanalPhase::Geschlossen(d)
            | KanalPhase::SchliessenEingereicht(d) => (Some(d), None),
            KanalPhase::Resizing {
                daten,
                gehaltener_resize,
            } => (Some(daten), gehaltener_resize),
            KanalPhase::Resized { daten, resize } => (Some(daten), Some(resize)),
            KanalPhase::Fehler { daten, resize, .. } => (daten, resize),
            _ => (None, None),
        };
        self.phase = KanalPhase::Fehler {
            meldung,
            daten,
            resize,
        };
    }

    // -----------------------------------------------------------------
    // Erstellung
    // -----------------------------------------------------------------

    /// Baut die Erstellungs-Anfrage und wechselt nach Erstellend
    pub fn erstellen_anfragen(&mut self, chain_id: u64, token: Address) -> Result<RpcPayload> {
        match &self.phase {
            KanalPhase::Keiner
            | KanalPhase::Abgehoben
            | KanalPhase::Fehler { daten: None, .. } => {}
            _ => {
                return Err(TrinkgeldError::Kanal(
                    "Es ist bereits ein Kanal aktiv".into(),
                ))
            }
        }
        self.phase = KanalPhase::Erstellend { chain_id, token };
        Ok(RpcPayload::CreateChannelRequest(CreateChannelParams {
            chain_id,
            token,
        }))
    }

    /// Nimmt die Erstellungs-Antwort des Koordinators entgegen
    pub fn erstellt_empfangen(&mut self, p: CreateChannelResultParams) {
        let KanalPhase::Erstellend { token, .. } = &self.phase else {
            tracing::warn!(
                kanal_id = %p.channel_id,
                "Erstellungs-Antwort ausserhalb der Erstellung ignoriert"
            );
            return;
        };
        let token = *token;
        let version = p.state.version;
        self.phase = KanalPhase::Erstellt(KanalDaten {
            kanal_id: p.channel_id,
            token,
            kanal: p.channel,
            anfangszustand: p.state,
            server_signatur: p.server_signature,
            version,
        });
        tracing::info!(version, "Kanal vom Koordinator vorgeschlagen");
    }

    /// Liefert die Daten fuer die On-Chain-Einreichung.
    /// Auch aus dem Fehlerzustand heraus erlaubt – die Einreichung ist
    /// pro Kanal-ID idempotent, ein erneuter Versuch ist gefahrlos.
    pub fn einreichen_vorbereiten(&self) -> Result<KanalDaten> {
        match &self.phase {
            KanalPhase::Erstellt(d) => Ok(d.clone()),
            KanalPhase::Fehler {
                daten: Some(d), ..
            } => Ok(d.clone()),
            _ => Err(TrinkgeldError::Kanal(
                "Keine Kanaldaten zum Einreichen vorhanden".into(),
            )),
        }
    }

    /// Die Einreichung war erfolgreich
    pub fn einreichung_erfolgt(&mut self) -> Result<()> {
        let alte = std::mem::replace(&mut self.phase, KanalPhase::Keiner);
        match alte {
            KanalPhase::Erstellt(d)
            | KanalPhase::Fehler {
                daten: Some(d), ..
            } => {
                self.phase = KanalPhase::Eingereicht(d);
                Ok(())
            }
            andere => {
                self.phase = andere;
                Err(TrinkgeldError::Kanal(
                    "Einreichung ohne Kanaldaten".into(),
                ))
            }
        }
    }

    // -----------------------------------------------------------------
    // Resize
    // -----------------------------------------------------------------

    /// Baut die Resize-Anfrage. Ein bereits vorliegender
    /// Resize-Vorschlag bleibt fuer den Wiederanlauf erhalten.
    pub fn resize_anfragen(&mut self, betrag: Amount, ziel: Address) -> Result<RpcPayload> {
        let alte = std::mem::replace(&mut self.phase, KanalPhase::Keiner);
        let (daten, gehaltener) = match alte {
            KanalPhase::Erstellt(d)
            | KanalPhase::Eingereicht(d)
            | KanalPhase::ResizeEingereicht(d)
            | KanalPhase::Transferiert(d) => (d, None),
            KanalPhase::Resized { daten, resize } => (daten, Some(resize)),
            andere => {
                self.phase = andere;
                return Err(TrinkgeldError::Kanal(
                    "Resize nur mit vorhandenem Kanal und ohne laufende Operation".into(),
                ));
            }
        };
        let payload = RpcPayload::ResizeChannelRequest(ResizeChannelParams {
            channel_id: daten.kanal_id,
            allocate_amount: betrag,
            funds_destination: ziel,
        });
        self.phase = KanalPhase::Resizing {
            daten,
            gehaltener_resize: gehaltener,
        };
        Ok(payload)
    }

    /// Nimmt den Resize-Vorschlag entgegen und prueft die Version
    pub fn resize_empfangen(&mut self, p: ResizeChannelResultParams) -> Result<()> {
        let KanalPhase::Resizing { daten, .. } = &self.phase else {
            tracing::warn!(kanal_id = %p.channel_id, "Resize-Antwort ausserhalb eines Resize ignoriert");
            return Ok(());
        };
        if daten.kanal_id != p.channel_id {
            tracing::warn!(
                erwartet = %daten.kanal_id,
                erhalten = %p.channel_id,
                "Resize-Antwort fuer fremden Kanal ignoriert"
            );
            return Ok(());
        }
        if p.resize_state.version <= daten.version {
            let fehler = TrinkgeldError::VeralteteVersion {
                letzte: daten.version,
                erhalten: p.resize_state.version,
            };
            self.fehler_setzen(fehler.to_string());
            return Err(fehler);
        }

        let KanalPhase::Resizing { mut daten, .. } =
            std::mem::replace(&mut self.phase, KanalPhase::Keiner)
        else {
            unreachable!("Phase wurde oben geprueft");
        };
        daten.version = p.resize_state.version;
        tracing::info!(version = daten.version, "Resize vom Koordinator vorgeschlagen");
        self.phase = KanalPhase::Resized {
            daten,
            resize: ResizeDaten {
                kanal_id: p.channel_id,
                resize_zustand: p.resize_state,
                beweis_zustaende: p.proof_states,
            },
        };
        Ok(())
    }

    /// Liefert die Daten fuer die On-Chain-Einreichung des Resize
    pub fn resize_einreichen_vorbereiten(&self) -> Result<(KanalDaten, ResizeDaten)> {
        match &self.phase {
            KanalPhase::Resized { daten, resize } => Ok((daten.clone(), resize.clone())),
            KanalPhase::Fehler {
                daten: Some(d),
                resize: Some(r),
                ..
            } => Ok((d.clone(), r.clone())),
            _ => Err(TrinkgeldError::Kanal(
                "Kein Resize-Zustand zum Einreichen vorhanden".into(),
            )),
        }
    }

    /// Die Resize-Einreichung war erfolgreich
    pub fn resize_einreichung_erfolgt(&mut self) -> Result<()> {
        let alte = std::mem::replace(&mut self.phase, KanalPhase::Keiner);
        match alte {
            KanalPhase::Resized { daten, .. }
            | KanalPhase::Fehler {
                daten: Some(daten),
                resize: Some(_),
                ..
            } => {
                self.phase = KanalPhase::ResizeEingereicht(daten);
                Ok(())
            }
            andere => {
                self.phase = andere;
                Err(TrinkgeldError::Kanal(
                    "Resize-Einreichung ohne Resize-Zustand".into(),
                ))
            }
        }
    }

    /// Wiederanlauf nach "Resize laeuft bereits": gibt den gehaltenen
    /// Resize-Zustand zum erneuten Einreichen zurueck, falls vorhanden.
    /// Ohne gehaltenen Zustand wird der Fehlerzustand gesetzt und `None`
    /// gemeldet – kein stilles Endlos-Wiederholen.
    pub fn resize_wiederherstellen(&mut self) -> Option<(KanalDaten, ResizeDaten)> {
        let alte = std::mem::replace(&mut self.phase, KanalPhase::Keiner);
        match alte {
            KanalPhase::Resizing {
                daten,
                gehaltener_resize: Some(resize),
            } => {
                tracing::warn!(
                    kanal_id = %daten.kanal_id,
                    "Resize laeuft bereits – gehaltener Resize-Zustand wird erneut eingereicht"
                );
                let paar = (daten.clone(), resize.clone());
                self.phase = KanalPhase::Resized { daten, resize };
                Some(paar)
            }
            KanalPhase::Resizing {
                daten,
                gehaltener_resize: None,
            } => {
                self.phase = KanalPhase::Fehler {
                    meldung: TrinkgeldError::ResizeLaeuftBereits.to_string(),
                    daten: Some(daten),
                    resize: None,
                };
                None
            }
            andere => {
                self.phase = andere;
                None
            }
        }
    }

    // -----------------------------------------------------------------
    // Transfer
    // -----------------------------------------------------------------

    /// Baut die Transfer-Anfrage (Trinkgeld)
    pub fn transfer_anfragen(
        &mut self,
        ziel: Address,
        posten: Vec<TransferPosten>,
    ) -> Result<RpcPayload> {
        let alte = std::mem::replace(&mut self.phase, KanalPhase::Keiner);
        let daten = match alte {
            KanalPhase::Erstellt(d)
            | KanalPhase::Eingereicht(d)
            | KanalPhase::ResizeEingereicht(d)
            | KanalPhase::Transferiert(d) => d,
            andere => {
                self.phase = andere;
                return Err(TrinkgeldError::Kanal(
                    "Transfer nur mit vorhandenem Kanal und ohne laufende Operation".into(),
                ));
            }
        };
        let payload = RpcPayload::TransferRequest(TransferParams {
            destination: ziel,
            allocations: posten,
        });
        self.phase = KanalPhase::Transferierend(daten);
        Ok(payload)
    }

    /// Transfer-Bestaetigung: zaehlt die Version weiter
    pub fn transfer_bestaetigt(&mut self, version: Option<u64>) -> Result<()> {
        let KanalPhase::Transferierend(daten) = &self.phase else {
            tracing::warn!("Transfer-Bestaetigung ausserhalb eines Transfers ignoriert");
            return Ok(());
        };
        let neue = version.unwrap_or(daten.version + 1);
        if neue <= daten.version {
            let fehler = TrinkgeldError::VeralteteVersion {
                letzte: daten.version,
                erhalten: neue,
            };
            self.fehler_setzen(fehler.to_string());
            return Err(fehler);
        }

        let KanalPhase::Transferierend(mut daten) =
            std::mem::replace(&mut self.phase, KanalPhase::Keiner)
        else {
            unreachable!("Phase wurde oben geprueft");
        };
        daten.version = neue;
        tracing::info!(version = daten.version, "Transfer bestaetigt");
        self.phase = KanalPhase::Transferiert(daten);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Schliessung & Abhebung
    // -----------------------------------------------------------------

    /// Baut die Schliessungs-Anfrage
    pub fn schliessen_anfragen(&mut self, ziel: Address) -> Result<RpcPayload> {
        let alte = std::mem::replace(&mut self.phase, KanalPhase::Keiner);
        let daten = match alte {
            KanalPhase::Erstellt(d)
            | KanalPhase::Eingereicht(d)
            | KanalPhase::ResizeEingereicht(d)
            | KanalPhase::Transferiert(d) => d,
            andere => {
                self.phase = andere;
                return Err(TrinkgeldError::Kanal(
                    "Schliessen nur mit vorhandenem Kanal und ohne laufende Operation".into(),
                ));
            }
        };
        let payload = RpcPayload::CloseChannelRequest(CloseChannelParams {
            channel_id: daten.kanal_id,
            funds_destination: ziel,
        });
        self.phase = KanalPhase::Schliessend(daten);
        Ok(payload)
    }

    /// Nimmt die Schliessungs-Antwort entgegen.
    ///
    /// Liefert den finalen Zustand fuer die On-Chain-Einreichung, falls
    /// der Koordinator einen mitgeschickt hat; ohne finalen Zustand gilt
    /// die Bestaetigung allein (Claim-Flow-Garantie) und die Phase ist
    /// sofort Geschlossen.
    pub fn geschlossen_empfangen(
        &mut self,
        p: CloseChannelResultParams,
    ) -> Result<Option<ChannelState>> {
        let KanalPhase::Schliessend(daten) = &self.phase else {
            tracing::warn!(kanal_id = %p.channel_id, "Schliessungs-Antwort ausserhalb einer Schliessung ignoriert");
            return Ok(None);
        };
        if daten.kanal_id != p.channel_id {
            tracing::warn!(
                erwartet = %daten.kanal_id,
                erhalten = %p.channel_id,
                "Schliessungs-Antwort fuer fremden Kanal ignoriert"
            );
            return Ok(None);
        }

        let KanalPhase::Schliessend(mut daten) =
            std::mem::replace(&mut self.phase, KanalPhase::Keiner)
        else {
            unreachable!("Phase wurde oben geprueft");
        };
        match p.final_state {
            Some(zustand) => {
                if zustand.version > daten.version {
                    daten.version = zustand.version;
                }
                self.phase = KanalPhase::Schliessend(daten);
                Ok(Some(zustand))
            }
            None => {
                tracing::info!(kanal_id = %daten.kanal_id, "Kanal geschlossen (Koordinator-Bestaetigung)");
                self.phase = KanalPhase::Geschlossen(daten);
                Ok(None)
            }
        }
    }

    /// Der finale Zustand wurde on-chain eingereicht
    pub fn schliessung_eingereicht(&mut self) -> Result<()> {
        let alte = std::mem::replace(&mut self.phase, KanalPhase::Keiner);
        match alte {
            KanalPhase::Schliessend(d) => {
                self.phase = KanalPhase::SchliessenEingereicht(d);
                Ok(())
            }
            andere => {
                self.phase = andere;
                Err(TrinkgeldError::Kanal(
                    "Schliessungs-Einreichung ohne laufende Schliessung".into(),
                ))
            }
        }
    }

    /// Abhebung abgeschlossen – unabhaengig von einem konkreten Kanal
    pub fn abgehoben(&mut self) {
        self.phase = KanalPhase::Abgehoben;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
