use crate::{campaigns::CampaignManager, subscriptions::SubscriptionManager, tracking::Tracker};
use axum::extract::FromRef;

#[derive(Clone)]
pub struct AppState {
    pub campaigns: CampaignManager,
    pub subscriptions: SubscriptionManager,
    pub tracker: Tracker,
}

impl FromRef<AppState> for CampaignManager {
    fn from_ref(state: &AppState) -> Self {
        state.campaigns.clone()
    }
}

impl FromRef<AppState> for SubscriptionManager {
    fn from_ref(state: &AppState) -> Self {
        state.subscriptions.clone()
    }
}

impl FromRef<AppState> for Tracker {
    fn from_ref(state: &AppState) -> Self {
        state.tracker.clone()
    }
}
