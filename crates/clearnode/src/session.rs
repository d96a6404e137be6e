//! Wallet-Session-Authentifizierung (Challenge-Response)
//!
//! Zustandsautomat: `Leerlauf -> Verbindet -> Verbunden -> AuthAngefragt
//! -> Herausgefordert -> Verifiziert`, `Fehler` aus jedem nicht-terminalen
//! Zustand erreichbar.
//!
//! Der Session-Schluessel gilt nur solange die tragende Verbindung
//! offen ist: jeder neue Verbindungsaufbau und jedes Abmelden loescht
//! Schluessel, Challenge und Auth-Parameter. Die Challenge wird
//! wortwoertlich aufbewahrt, weil die Wallet-Signatur exakt die
//! ausgestellten Bytes abdeckt, und ist einmalverwendbar.

use trinkgeld_core::types::{Address, Allowance};
use trinkgeld_core::{Result, TrinkgeldError};
use trinkgeld_crypto::{AuthSignaturAuftrag, SessionKeyPair, Signatur};
use trinkgeld_protocol::rpc::{
    AuthRequestParams, AuthVerifyRequestParams, RpcEnvelope, RpcPayload,
};

// ---------------------------------------------------------------------------
// Zustaende
// ---------------------------------------------------------------------------

/// Lebenszyklus einer Wallet-Session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionZustand {
    /// Keine Verbindung, keine Session
    Leerlauf,
    /// Verbindungsaufbau zum Koordinator laeuft
    Verbindet,
    /// Verbunden, noch keine Authentifizierung angefragt
    Verbunden,
    /// Auth-Anfrage gesendet, Challenge steht aus
    AuthAngefragt,
    /// Challenge erhalten, Wallet-Signatur steht aus
    Herausgefordert,
    /// Session verifiziert – Kanal-Operationen sind erlaubt
    Verifiziert,
    /// Authentifizierung fehlgeschlagen
    Fehler(String),
}

/// Was die Anwendung fuer die Session anfragt
#[derive(Debug, Clone, PartialEq)]
pub struct AuthAnfrage {
    pub application: String,
    pub allowances: Vec<Allowance>,
    pub expires_at: u64,
    pub scope: String,
}

/// Die bei der Anfrage festgehaltenen Parameter – die Verifikation muss
/// exakt unter diesen Parametern signieren
#[derive(Debug, Clone, PartialEq)]
struct AuthParameter {
    session_key: Address,
    application: String,
    allowances: Vec<Allowance>,
    expires_at: u64,
    scope: String,
}

// ---------------------------------------------------------------------------
// SessionAuthentifikator
// ---------------------------------------------------------------------------

/// Zustandsautomat der Wallet-Session
///
/// Besitzt den ephemeren Session-Schluessel exklusiv; Kanal- und
/// Claim-Operationen leihen ihn nur zum Signieren aus.
pub struct SessionAuthentifikator {
    zustand: SessionZustand,
    wallet: Address,
    schluessel: Option<SessionKeyPair>,
    parameter: Option<AuthParameter>,
    /// Die Challenge exakt wie empfangen (einmalverwendbar)
    challenge: Option<String>,
}

impl SessionAuthentifikator {
    /// Erstellt den Automaten fuer eine Wallet-Adresse
    pub fn neu(wallet: Address) -> Self {
        Self {
            zustand: SessionZustand::Leerlauf,
            wallet,
            schluessel: None,
            parameter: None,
            challenge: None,
        }
    }

    /// Aktueller Zustand
    pub fn zustand(&self) -> &SessionZustand {
        &self.zustand
    }

    /// Die Wallet-Adresse dieser Session
    pub fn wallet(&self) -> Address {
        self.wallet
    }

    /// Leiht den Session-Schluessel aus – nur bei verifizierter Session.
    ///
    /// Kanal-Operationen muessen hierueber lesen: ist der Schluessel
    /// mittendrin verschwunden (Reconnect, Abmeldung), schlaegt die
    /// Operation sauber mit `SessionFehlt` fehl statt einen veralteten
    /// Schluessel zu verwenden.
    pub fn schluessel(&self) -> Result<&SessionKeyPair> {
        if self.zustand != SessionZustand::Verifiziert {
            return Err(TrinkgeldError::SessionFehlt);
        }
        self.schluessel.as_ref().ok_or(TrinkgeldError::SessionFehlt)
    }

    // -----------------------------------------------------------------
    // Verbindungs-Uebergaenge
    // -----------------------------------------------------------------

    /// Der Transport beginnt den Verbindungsaufbau
    pub fn verbindung_laeuft(&mut self) {
        self.zuruecksetzen();
        self.zustand = SessionZustand::Verbindet;
    }

    /// Der Transport ist verbunden – vorherige Session-Reste sind damit
    /// ungueltig (neue Generation)
    pub fn verbindung_geoeffnet(&mut self) {
        self.zuruecksetzen();
        self.zustand = SessionZustand::Verbunden;
    }

    /// Der Transport wurde getrennt
    pub fn getrennt(&mut self) {
        self.zuruecksetzen();
        self.zustand = SessionZustand::Leerlauf;
    }

    /// Explizite Abmeldung durch den Nutzer
    pub fn abmelden(&mut self) {
        self.zuruecksetzen();
        self.zustand = SessionZustand::Leerlauf;
        tracing::info!("Session abgemeldet");
    }

    fn zuruecksetzen(&mut self) {
        self.schluessel = None;
        self.parameter = None;
        self.challenge = None;
    }

    // -----------------------------------------------------------------
    // Auth-Operationen
    // -----------------------------------------------------------------

    /// Startet die Authentifizierung: erzeugt ein frisches
    /// Schluesselpaar, haelt die angefragten Parameter fest und baut das
    /// Auth-Request-Envelope
    pub fn auth_anfordern(&mut self, anfrage: AuthAnfrage) -> Result<RpcEnvelope> {
        if self.zustand != SessionZustand::Verbunden {
            return Err(TrinkgeldError::Authentifizierung(format!(
                "Auth-Anfrage nur im Zustand Verbunden moeglich (aktuell: {:?})",
                self.zustand
            )));
        }

        let schluessel = SessionKeyPair::generieren();
        let session_key = schluessel.adresse();

        let parameter = AuthParameter {
            session_key,
            application: anfrage.application.clone(),
            allowances: anfrage.allowances.clone(),
            expires_at: anfrage.expires_at,
            scope: anfrage.scope.clone(),
        };

        let envelope = RpcEnvelope::neu(RpcPayload::AuthRequest(AuthRequestParams {
            address: self.wallet,
            session_key,
            application: anfrage.application,
            allowances: anfrage.allowances,
            expires_at: anfrage.expires_at,
            scope: anfrage.scope,
        }));

        self.schluessel = Some(schluessel);
        self.parameter = Some(parameter);
        self.challenge = None;
        self.zustand = SessionZustand::AuthAngefragt;

        tracing::info!(wallet = %self.wallet, session_key = %session_key, "Auth angefragt");
        Ok(envelope)
    }

    /// Nimmt eine Challenge des Koordinators entgegen
    ///
    /// Eine neue Challenge ersetzt eine eventuell noch gehaltene alte –
    /// die alte ist damit nicht mehr verwendbar. Ausserhalb des
    /// Auth-Flusses eintreffende Challenges werden ignoriert.
    pub fn challenge_empfangen(&mut self, roh: String) {
        match self.zustand {
            SessionZustand::AuthAngefragt | SessionZustand::Herausgefordert => {
                self.challenge = Some(roh);
                self.zustand = SessionZustand::Herausgefordert;
                tracing::debug!("Auth-Challenge erhalten");
            }
            _ => {
                tracing::warn!(
                    zustand = ?self.zustand,
                    "Challenge ausserhalb des Auth-Flusses ignoriert"
                );
            }
        }
    }

    /// Baut den Signaturauftrag fuer das Wallet: die urspruenglich
    /// angefragten Parameter plus die wortwoertliche Challenge
    pub fn verify_vorbereiten(&self) -> Result<AuthSignaturAuftrag> {
        if self.zustand != SessionZustand::Herausgefordert {
            return Err(TrinkgeldError::Authentifizierung(
                "Keine Challenge erhalten".into(),
            ));
        }
        let parameter = self.parameter.as_ref().ok_or_else(|| {
            TrinkgeldError::Authentifizierung("Auth-Parameter fehlen".into())
        })?;
        let challenge = self.challenge.as_ref().ok_or_else(|| {
            TrinkgeldError::Authentifizierung("Challenge fehlt".into())
        })?;

        Ok(AuthSignaturAuftrag {
            address: self.wallet,
            session_key: parameter.session_key,
            application: parameter.application.clone(),
            allowances: parameter.allowances.clone(),
            expires_at: parameter.expires_at,
            scope: parameter.scope.clone(),
            challenge: challenge.clone(),
        })
    }

    /// Baut das Verify-Envelope mit der Wallet-Signatur und verbraucht
    /// dabei die Challenge (Einmalverwendung)
    pub fn verify_envelope(&mut self, signatur: Signatur) -> Result<RpcEnvelope> {
        if self.zustand != SessionZustand::Herausgefordert {
            return Err(TrinkgeldError::Authentifizierung(
                "Verify ohne Challenge".into(),
            ));
        }
        let challenge = self.challenge.take().ok_or_else(|| {
            TrinkgeldError::Authentifizierung("Challenge bereits verbraucht".into())
        })?;

        Ok(RpcEnvelope::signiert(
            RpcPayload::AuthVerifyRequest(AuthVerifyRequestParams { challenge }),
            signatur.als_hex(),
        ))
    }

    /// Nimmt das Verifikations-Ergebnis entgegen
    pub fn verify_ergebnis(&mut self, erfolg: bool, fehler: Option<String>) {
        if self.zustand != SessionZustand::Herausgefordert {
            tracing::warn!(
                zustand = ?self.zustand,
                "Verify-Ergebnis ausserhalb des Auth-Flusses ignoriert"
            );
            return;
        }
        if erfolg {
            self.zustand = SessionZustand::Verifiziert;
            tracing::info!(wallet = %self.wallet, "Session verifiziert");
        } else {
            let meldung = fehler.unwrap_or_else(|| "Verifikation abgelehnt".into());
            tracing::warn!(grund = %meldung, "Verifikation fehlgeschlagen");
            self.zuruecksetzen();
            self.zustand = SessionZustand::Fehler(meldung);
        }
    }

    /// Setzt den Automaten in den Fehlerzustand
    pub fn fehler_setzen(&mut self, meldung: impl Into<String>) {
        self.zuruecksetzen();
        self.zustand = SessionZustand::Fehler(meldung.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trinkgeld_core::types::Amount;

    fn wallet() -> Address {
        Address([0xAAu8; 20])
    }

    fn test_anfrage() -> AuthAnfrage {
        AuthAnfrage {
            application: "trinkgeld-live".into(),
            allowances: vec![Allowance {
                asset: "X".into(),
                amount: Amount(1000),
            }],
            expires_at: 1_700_000_000 + 86_400,
            scope: "console".into(),
        }
    }

    #[test]
    fn voller_auth_ablauf_bis_verifiziert() {
        let mut session = SessionAuthentifikator::neu(wallet());
        session.verbindung_geoeffnet();
        assert_eq!(*session.zustand(), SessionZustand::Verbunden);

        let envelope = session.auth_anfordern(test_anfrage()).unwrap();
        assert_eq!(*session.zustand(), SessionZustand::AuthAngefragt);
        match &envelope.payload {
            RpcPayload::AuthRequest(p) => {
                assert_eq!(p.address, wallet());
                assert_eq!(p.scope, "console");
                assert_eq!(p.allowances.len(), 1);
                assert_eq!(p.allowances[0].asset, "X");
                assert_eq!(p.allowances[0].amount, Amount(1000));
            }
            andere => panic!("Erwartet AuthRequest, erhalten {:?}", andere),
        }

        session.challenge_empfangen("challenge-bytes".into());
        assert_eq!(*session.zustand(), SessionZustand::Herausgefordert);

        let auftrag = session.verify_vorbereiten().unwrap();
        assert_eq!(auftrag.challenge, "challenge-bytes");
        assert_eq!(auftrag.scope, "console");

        let envelope = session
            .verify_envelope(Signatur(vec![1, 2, 3]))
            .unwrap();
        assert_eq!(envelope.methode(), "auth_verify_request");
        assert!(envelope.sig.is_some());

        session.verify_ergebnis(true, None);
        assert_eq!(*session.zustand(), SessionZustand::Verifiziert);
        assert!(session.schluessel().is_ok());
    }

    #[test]
    fn auth_anfordern_ohne_verbindung_schlaegt_fehl() {
        let mut session = SessionAuthentifikator::neu(wallet());
        let ergebnis = session.auth_anfordern(test_anfrage());
        assert!(matches!(
            ergebnis,
            Err(TrinkgeldError::Authentifizierung(_))
        ));
    }

    #[test]
    fn challenge_ausserhalb_des_flusses_ignoriert() {
        let mut session = SessionAuthentifikator::neu(wallet());
        session.verbindung_geoeffnet();
        session.challenge_empfangen("zu frueh".into());
        assert_eq!(*session.zustand(), SessionZustand::Verbunden);
        assert!(session.verify_vorbereiten().is_err());
    }

    #[test]
    fn neue_challenge_ersetzt_die_alte() {
        let mut session = SessionAuthentifikator::neu(wallet());
        session.verbindung_geoeffnet();
        session.auth_anfordern(test_anfrage()).unwrap();

        session.challenge_empfangen("alt".into());
        session.challenge_empfangen("neu".into());

        let auftrag = session.verify_vorbereiten().unwrap();
        assert_eq!(auftrag.challenge, "neu", "Die alte Challenge darf nicht mehr verwendbar sein");
    }

    #[test]
    fn challenge_ist_einmalverwendbar() {
        let mut session = SessionAuthentifikator::neu(wallet());
        session.verbindung_geoeffnet();
        session.auth_anfordern(test_anfrage()).unwrap();
        session.challenge_empfangen("einmal".into());

        session.verify_envelope(Signatur(vec![1])).unwrap();
        let zweites = session.verify_envelope(Signatur(vec![2]));
        assert!(zweites.is_err(), "Die Challenge darf nur einmal verwendet werden");
    }

    #[test]
    fn reconnect_invalidiert_session_und_challenge() {
        let mut session = SessionAuthentifikator::neu(wallet());
        session.verbindung_geoeffnet();
        session.auth_anfordern(test_anfrage()).unwrap();
        session.challenge_empfangen("challenge".into());

        // Neue Verbindung: alles Vorherige ist ungueltig
        session.verbindung_geoeffnet();
        assert_eq!(*session.zustand(), SessionZustand::Verbunden);
        assert!(session.schluessel().is_err());
        assert!(session.verify_vorbereiten().is_err());
    }

    #[test]
    fn negative_verifikation_fuehrt_zu_fehler() {
        let mut session = SessionAuthentifikator::neu(wallet());
        session.verbindung_geoeffnet();
        session.auth_anfordern(test_anfrage()).unwrap();
        session.challenge_empfangen("c".into());

        session.verify_ergebnis(false, Some("Signatur ungueltig".into()));
        assert_eq!(
            *session.zustand(),
            SessionZustand::Fehler("Signatur ungueltig".into())
        );
        assert!(session.schluessel().is_err());
    }

    #[test]
    fn abmelden_loescht_alles() {
        let mut session = SessionAuthentifikator::neu(wallet());
        session.verbindung_geoeffnet();
        session.auth_anfordern(test_anfrage()).unwrap();
        session.challenge_empfangen("c".into());
        session.verify_ergebnis(true, None);
        assert!(session.schluessel().is_ok());

        session.abmelden();
        assert_eq!(*session.zustand(), SessionZustand::Leerlauf);
        assert!(session.schluessel().is_err());
    }
}
