use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use unicode_segmentation::UnicodeSegmentation;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubscriberName(String);

static FORBIDDEN_CHARS: [char; 10] = ['<', '>', '\'', '"', '\\', '(', ')', '{', '}', '/'];
static FORBIDDEN_CHARS_STRING: Lazy<String> = Lazy::new(|| String::from_iter(FORBIDDEN_CHARS));

impl SubscriberName {
    pub fn parse(s: String) -> Result<SubscriberName, String> {
        match s {
            _ if s.trim().is_empty() => Err(format!(
                "Subscriber name is empty or contains whitespace only: `{s}`"
            )),
            _ if s.graphemes(true).count() > 256 => {
                Err(format!("`{s}` is longer than 256 graphemes"))
            }
            _ if s.chars().any(|c| FORBIDDEN_CHARS.contains(&c)) => Err(format!(
                "`{s}` contains at least one of forbidden characters: {}",
                *FORBIDDEN_CHARS_STRING
            )),
            _ => Ok(Self(s.trim().to_string())),
        }
    }
}

impl AsRef<str> for SubscriberName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for SubscriberName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for SubscriberName {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<SubscriberName> for String {
    fn from(name: SubscriberName) -> Self {
        name.0
    }
}
