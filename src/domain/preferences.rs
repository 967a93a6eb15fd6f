use serde::{Deserialize, Serialize};

/// Content categories a subscriber can opt in to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreferenceCategory {
    Events,
    Places,
    Offers,
    News,
}

impl PreferenceCategory {
    pub fn column(&self) -> &'static str {
        match self {
            PreferenceCategory::Events => "pref_events",
            PreferenceCategory::Places => "pref_places",
            PreferenceCategory::Offers => "pref_offers",
            PreferenceCategory::News => "pref_news",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    #[default]
    Weekly,
    Monthly,
}

impl AsRef<str> for Frequency {
    fn as_ref(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        }
    }
}

impl TryFrom<String> for Frequency {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_ref() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            other => Err(format!("`{other}` is not a valid variant of Frequency")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    pub events: bool,
    pub places: bool,
    pub offers: bool,
    pub news: bool,
    pub frequency: Frequency,
}

impl Preferences {
    pub fn accepts(&self, category: PreferenceCategory) -> bool {
        match category {
            PreferenceCategory::Events => self.events,
            PreferenceCategory::Places => self.places,
            PreferenceCategory::Offers => self.offers,
            PreferenceCategory::News => self.news,
        }
    }
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            events: true,
            places: true,
            offers: true,
            news: true,
            frequency: Frequency::default(),
        }
    }
}

/// Restricts an audience snapshot to subscribers who opted in to a category.
/// `None` means every active, verified subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudienceFilter {
    pub category: Option<PreferenceCategory>,
}

impl AudienceFilter {
    pub fn matches(&self, preferences: &Preferences) -> bool {
        self.category
            .map_or(true, |category| preferences.accepts(category))
    }
}
