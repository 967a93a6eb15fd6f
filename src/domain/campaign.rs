use super::{CampaignStatus, CampaignType};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

const MAX_LINE_GRAPHEMES: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CampaignTitle(String);

impl CampaignTitle {
    pub fn parse(s: String) -> Result<Self, String> {
        parse_line("Campaign title", &s).map(Self)
    }
}

impl AsRef<str> for CampaignTitle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Email subject line. Line breaks are rejected since the value ends up in a
/// mail header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CampaignSubject(String);

impl CampaignSubject {
    pub fn parse(s: String) -> Result<Self, String> {
        if s.contains(&['\r', '\n'][..]) {
            return Err("Campaign subject must not contain line breaks".into());
        }

        parse_line("Campaign subject", &s).map(Self)
    }
}

impl AsRef<str> for CampaignSubject {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn parse_line(field: &str, s: &str) -> Result<String, String> {
    let trimmed = s.trim();

    if trimmed.is_empty() {
        Err(format!("{field} is empty or contains whitespace only"))
    } else if trimmed.graphemes(true).count() > MAX_LINE_GRAPHEMES {
        Err(format!(
            "{field} is longer than {MAX_LINE_GRAPHEMES} graphemes"
        ))
    } else {
        Ok(trimmed.to_string())
    }
}

/// Ids of the content items embedded in a campaign. These are plain
/// references: the items may be deleted independently of the campaign.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSelection {
    #[serde(default)]
    pub event_ids: Vec<Uuid>,
    #[serde(default)]
    pub place_ids: Vec<Uuid>,
    #[serde(default)]
    pub post_ids: Vec<Uuid>,
}

impl ContentSelection {
    pub fn is_empty(&self) -> bool {
        self.event_ids.is_empty() && self.place_ids.is_empty() && self.post_ids.is_empty()
    }
}

/// Validated campaign input, used both for creation and for edits.
#[derive(Clone, Debug)]
pub struct CampaignDraft {
    pub title: CampaignTitle,
    pub subject: CampaignSubject,
    pub content_html: String,
    pub campaign_type: CampaignType,
    pub content: ContentSelection,
}

impl CampaignDraft {
    pub fn parse(
        title: String,
        subject: String,
        content_html: String,
        campaign_type: CampaignType,
        content: ContentSelection,
    ) -> Result<Self, String> {
        let title = CampaignTitle::parse(title)?;
        let subject = CampaignSubject::parse(subject)?;

        if content_html.trim().is_empty() {
            return Err("Campaign content is empty".into());
        }

        Ok(Self {
            title,
            subject,
            content_html,
            campaign_type,
            content,
        })
    }
}

/// Running aggregates. They mirror the delivery job records and can be
/// recomputed from them at any time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CampaignCounters {
    pub total_sent: i64,
    pub total_delivered: i64,
    pub total_opened: i64,
    pub total_clicked: i64,
    pub total_unsubscribed: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct Campaign {
    pub id: Uuid,
    pub title: String,
    pub subject: String,
    pub content_html: String,
    pub campaign_type: CampaignType,
    pub status: CampaignStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub scheduled_at: Option<OffsetDateTime>,
    pub content: ContentSelection,
    pub counters: CampaignCounters,
    pub last_error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub sending_started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

impl Campaign {
    pub fn from_draft(draft: CampaignDraft, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: draft.title.as_ref().to_string(),
            subject: draft.subject.as_ref().to_string(),
            content_html: draft.content_html,
            campaign_type: draft.campaign_type,
            status: CampaignStatus::Draft,
            scheduled_at: None,
            content: draft.content,
            counters: CampaignCounters::default(),
            last_error: None,
            created_at: now,
            updated_at: now,
            sending_started_at: None,
            completed_at: None,
        }
    }
}
