mod attachment;
mod campaign;
mod campaign_status;
mod campaign_type;
mod content;
mod delivery_job;
mod preferences;
mod stats;
mod subscriber;
mod subscriber_email;
mod subscriber_name;
mod tokens;

pub use attachment::{Attachment, NewAttachment};
pub use campaign::{
    Campaign, CampaignCounters, CampaignDraft, CampaignSubject, CampaignTitle, ContentSelection,
};
pub use campaign_status::CampaignStatus;
pub use campaign_type::CampaignType;
pub use content::{EventSummary, PlaceSummary, PostSummary, ResolvedContent};
pub use delivery_job::{
    ClaimedJob, DeliveryJob, JobCounts, JobKey, JobStatus, TrackingEvent, TrackingOutcome,
};
pub use preferences::{AudienceFilter, Frequency, PreferenceCategory, Preferences};
pub use stats::{CampaignStats, QueueHealth};
pub use subscriber::{NewSubscriber, Subscriber};
pub use subscriber_email::SubscriberEmail;
pub use subscriber_name::SubscriberName;
pub use tokens::{UnsubscribeToken, VerificationToken};
