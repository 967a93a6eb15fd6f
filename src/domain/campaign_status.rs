use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Campaign lifecycle:
///
/// ```text
/// DRAFT ──► SCHEDULED ──► SENDING ──► SENT
///   │           │            │
///   │           │            └──► ERROR
///   └───────────┴────────────────► CANCELLED
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Sent,
    Cancelled,
    Error,
}

impl CampaignStatus {
    pub const EDITABLE: &'static [CampaignStatus] =
        &[CampaignStatus::Draft, CampaignStatus::Scheduled];
    pub const DISPATCHABLE: &'static [CampaignStatus] =
        &[CampaignStatus::Draft, CampaignStatus::Scheduled];
    pub const CANCELLABLE: &'static [CampaignStatus] = &[
        CampaignStatus::Draft,
        CampaignStatus::Scheduled,
        CampaignStatus::Sending,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Sent | CampaignStatus::Cancelled | CampaignStatus::Error
        )
    }

    pub fn is_editable(&self) -> bool {
        Self::EDITABLE.contains(self)
    }
}

impl AsRef<str> for CampaignStatus {
    fn as_ref(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Sending => "sending",
            CampaignStatus::Sent => "sent",
            CampaignStatus::Cancelled => "cancelled",
            CampaignStatus::Error => "error",
        }
    }
}

impl Display for CampaignStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl TryFrom<String> for CampaignStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, <Self as TryFrom<String>>::Error> {
        match s.as_ref() {
            "draft" => Ok(CampaignStatus::Draft),
            "scheduled" => Ok(CampaignStatus::Scheduled),
            "sending" => Ok(CampaignStatus::Sending),
            "sent" => Ok(CampaignStatus::Sent),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            "error" => Ok(CampaignStatus::Error),
            other => Err(format!("`{other}` is not a valid variant of CampaignStatus")),
        }
    }
}
