use super::{Preferences, SubscriberEmail, SubscriberName, UnsubscribeToken, VerificationToken};
use time::OffsetDateTime;
use uuid::Uuid;

/// A newsletter recipient. Records are never hard-deleted; unsubscribing
/// only clears `is_active`.
#[derive(Clone, Debug)]
pub struct Subscriber {
    pub id: Uuid,
    pub email: SubscriberEmail,
    pub name: SubscriberName,
    pub is_verified: bool,
    pub is_active: bool,
    pub verification_token: VerificationToken,
    pub unsubscribe_token: UnsubscribeToken,
    pub preferences: Preferences,
    pub subscribed_at: OffsetDateTime,
}

impl Subscriber {
    pub fn is_eligible(&self) -> bool {
        self.is_active && self.is_verified
    }
}

#[derive(Debug)]
pub struct NewSubscriber {
    pub email: SubscriberEmail,
    pub name: SubscriberName,
    pub preferences: Preferences,
}
