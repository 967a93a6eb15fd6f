use super::{AudienceFilter, PreferenceCategory};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignType {
    Newsletter,
    Announcement,
    EventDigest,
    PlaceUpdate,
    Promotional,
}

impl CampaignType {
    /// Preference a subscriber must have opted in to in order to receive
    /// campaigns of this type. Announcements go to every eligible subscriber.
    pub fn audience(&self) -> AudienceFilter {
        let category = match self {
            CampaignType::Newsletter => Some(PreferenceCategory::News),
            CampaignType::Announcement => None,
            CampaignType::EventDigest => Some(PreferenceCategory::Events),
            CampaignType::PlaceUpdate => Some(PreferenceCategory::Places),
            CampaignType::Promotional => Some(PreferenceCategory::Offers),
        };

        AudienceFilter { category }
    }
}

impl AsRef<str> for CampaignType {
    fn as_ref(&self) -> &'static str {
        match self {
            CampaignType::Newsletter => "newsletter",
            CampaignType::Announcement => "announcement",
            CampaignType::EventDigest => "event_digest",
            CampaignType::PlaceUpdate => "place_update",
            CampaignType::Promotional => "promotional",
        }
    }
}

impl TryFrom<String> for CampaignType {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_ref() {
            "newsletter" => Ok(CampaignType::Newsletter),
            "announcement" => Ok(CampaignType::Announcement),
            "event_digest" => Ok(CampaignType::EventDigest),
            "place_update" => Ok(CampaignType::PlaceUpdate),
            "promotional" => Ok(CampaignType::Promotional),
            other => Err(format!("`{other}` is not a valid variant of CampaignType")),
        }
    }
}
