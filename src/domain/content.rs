use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, FromRow)]
pub struct EventSummary {
    pub id: Uuid,
    pub title: String,
    #[serde(with = "time::serde::rfc3339")]
    pub starts_at: OffsetDateTime,
    pub location: Option<String>,
    pub url: String,
    pub is_cancelled: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, FromRow)]
pub struct PlaceSummary {
    pub id: Uuid,
    pub name: String,
    pub category: Option<String>,
    pub address: Option<String>,
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, FromRow)]
pub struct PostSummary {
    pub id: Uuid,
    pub title: String,
    pub excerpt: Option<String>,
    pub url: String,
}

/// Current display fields of the items a campaign embeds. Items that no
/// longer exist are simply absent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedContent {
    pub events: Vec<EventSummary>,
    pub places: Vec<PlaceSummary>,
    pub posts: Vec<PostSummary>,
}

impl ResolvedContent {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.places.is_empty() && self.posts.is_empty()
    }
}
