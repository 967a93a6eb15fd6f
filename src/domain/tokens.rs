//! Subscriber tokens. The two kinds have distinct formats so one can never be
//! accepted where the other is expected.

use once_cell::sync::Lazy;
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use regex::Regex;
use secrecy::{ExposeSecret, Secret};
use uuid::Uuid;

const VERIFICATION_TOKEN_LENGTH: usize = 25;

static VERIFICATION_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^[[:alnum:]]{{{VERIFICATION_TOKEN_LENGTH}}}$"))
        .expect("Invalid verification token pattern")
});

static UNSUBSCRIBE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-f]{32}$").expect("Invalid unsubscribe token pattern"));

/// One-shot secret mailed with the confirmation link. A new one is issued
/// whenever an unsubscribed address signs up again.
#[derive(Clone, Debug)]
pub struct VerificationToken(Secret<String>);

impl VerificationToken {
    pub fn generate() -> Self {
        Self::generate_with_rng(&mut thread_rng())
    }

    fn generate_with_rng(rng: &mut impl Rng) -> Self {
        let token: String = (0..VERIFICATION_TOKEN_LENGTH)
            .map(|_| char::from(rng.sample(Alphanumeric)))
            .collect();

        Self(Secret::new(token))
    }

    pub fn parse(s: String) -> Result<Self, String> {
        if VERIFICATION_TOKEN.is_match(&s) {
            Ok(Self(Secret::new(s)))
        } else {
            Err(format!("Invalid verification token: `{s}`"))
        }
    }
}

impl ExposeSecret<String> for VerificationToken {
    fn expose_secret(&self) -> &String {
        self.0.expose_secret()
    }
}

/// Stable secret embedded in every campaign's unsubscribe link and
/// `List-Unsubscribe` header. It lives as long as the subscriber record.
#[derive(Clone, Debug)]
pub struct UnsubscribeToken(Secret<String>);

impl UnsubscribeToken {
    pub fn generate() -> Self {
        Self(Secret::new(Uuid::new_v4().simple().to_string()))
    }

    pub fn parse(s: String) -> Result<Self, String> {
        if UNSUBSCRIBE_TOKEN.is_match(&s) {
            Ok(Self(Secret::new(s)))
        } else {
            Err(format!("Invalid unsubscribe token: `{s}`"))
        }
    }
}

impl ExposeSecret<String> for UnsubscribeToken {
    fn expose_secret(&self) -> &String {
        self.0.expose_secret()
    }
}
