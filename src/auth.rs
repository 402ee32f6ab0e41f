use crate::token;

/// Checks a teacher credential. The daemon only ships a fixed-PIN
/// implementation, but call sites never see the scheme, so swapping in a
/// real credential store is a construction-time change only.
pub trait CredentialVerifier: Send {
    fn verify(&self, credential: &str) -> bool;
}

pub struct FixedPinVerifier {
    pin: String,
}

impl FixedPinVerifier {
    pub fn new(pin: impl Into<String>) -> Self {
        Self { pin: pin.into() }
    }
}

impl CredentialVerifier for FixedPinVerifier {
    fn verify(&self, credential: &str) -> bool {
        // An empty configured PIN locks logins out rather than letting
        // an empty credential through.
        !self.pin.is_empty() && credential == self.pin
    }
}

pub fn verifier_from_env() -> Box<dyn CredentialVerifier> {
    let pin = std::env::var("ATTENDANCED_PIN").unwrap_or_else(|_| "1234".to_string());
    Box::new(FixedPinVerifier::new(pin))
}

/// Opaque bearer token handed out on login; lives in AppState for the
/// lifetime of the process (one daemon serves one teacher device).
pub fn issue_token() -> anyhow::Result<String> {
    token::url_safe_token(32)
}
