//! Turns a campaign, one recipient and the freshly resolved content into the
//! email that recipient receives. Rendering has no side effects; every link
//! it emits is derived from [`TrackingLinks`].

use crate::{
    domain::{
        Campaign, EventSummary, JobKey, ResolvedContent, Subscriber, SubscriberEmail,
        SubscriberName, UnsubscribeToken, VerificationToken,
    },
    email_client::OutgoingEmail,
    tracking::LinkSigner,
};
use anyhow::{bail, Context};
use askama::Template;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use reqwest::Url;
use secrecy::ExposeSecret;
use time::{format_description::FormatItem, macros::format_description, UtcOffset};
use uuid::Uuid;

static OUTBOUND_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)href\s*=\s*(?:"(https?://[^"]+)"|'(https?://[^']+)')"#)
        .expect("Invalid link pattern")
});
static ANCHOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*(?:"([^"]*)"|'([^']*)')[^>]*>(.*?)</a\s*>"#)
        .expect("Invalid anchor pattern")
});
static LINE_BREAKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</p>|</h[1-6]>|</li>|</div>").expect("Invalid break pattern")
});
static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("Invalid tag pattern"));
static BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n[ \t]*(\n[ \t]*)+").expect("Invalid blank line pattern"));

const EVENT_START: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute] UTC");

/// Builds the public URLs embedded in emails.
#[derive(Clone, Debug)]
pub struct TrackingLinks {
    base_url: Url,
    signer: LinkSigner,
}

impl TrackingLinks {
    pub fn new(base_url: &str, signer: LinkSigner) -> Result<Self, anyhow::Error> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("Invalid base url `{base_url}`"))?;

        if base_url.cannot_be_a_base() {
            bail!("Base url `{base_url}` cannot carry a path");
        }

        Ok(Self { base_url, signer })
    }

    pub fn open_pixel(&self, key: JobKey) -> Url {
        self.at(&format!(
            "/track/open/{}/{}",
            key.campaign_id, key.subscriber_id
        ))
    }

    pub fn click(&self, key: JobKey, target: &str) -> Url {
        let mut url = self.at(&format!(
            "/track/click/{}/{}",
            key.campaign_id, key.subscriber_id
        ));
        url.query_pairs_mut()
            .append_pair("url", target)
            .append_pair("sig", &self.signer.sign(key, target));
        url
    }

    pub fn unsubscribe(&self, token: &UnsubscribeToken, campaign_id: Option<Uuid>) -> Url {
        let mut url = self.at("/subscriptions/unsubscribe");
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("token", token.expose_secret());
            if let Some(campaign_id) = campaign_id {
                query.append_pair("campaign", &campaign_id.to_string());
            }
        }
        url
    }

    pub fn confirmation(&self, token: &VerificationToken) -> Url {
        let mut url = self.at("/subscriptions/confirm");
        url.query_pairs_mut()
            .append_pair("subscription_token", token.expose_secret());
        url
    }

    fn at(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        let prefix = self.base_url.path().trim_end_matches('/');
        url.set_path(&format!("{prefix}{path}"));
        url.set_query(None);
        url.set_fragment(None);
        url
    }

    fn is_own(&self, target: &str) -> bool {
        target.starts_with(self.base_url.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct RenderedEmail {
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
    pub unsubscribe_url: Option<String>,
}

impl RenderedEmail {
    pub fn into_outgoing(self, to: SubscriberEmail, job: Option<JobKey>) -> OutgoingEmail {
        OutgoingEmail {
            to,
            subject: self.subject,
            html_body: self.html_body,
            text_body: self.text_body,
            unsubscribe_url: self.unsubscribe_url,
            job,
        }
    }
}

struct DigestItem {
    title: String,
    detail: String,
    link: String,
}

#[derive(Template)]
#[template(path = "email/campaign.html")]
struct CampaignHtml<'a> {
    subject: &'a str,
    name: &'a str,
    body: &'a str,
    events: &'a [DigestItem],
    places: &'a [DigestItem],
    posts: &'a [DigestItem],
    unsubscribe_url: &'a str,
    open_pixel_url: &'a str,
}

#[derive(Template)]
#[template(path = "email/campaign.txt")]
struct CampaignText<'a> {
    name: &'a str,
    body: &'a str,
    events: &'a [DigestItem],
    places: &'a [DigestItem],
    posts: &'a [DigestItem],
    unsubscribe_url: &'a str,
}

#[derive(Template)]
#[template(path = "email/confirmation.html")]
struct ConfirmationHtml<'a> {
    name: &'a str,
    confirmation_link: &'a str,
}

#[derive(Template)]
#[template(path = "email/confirmation.txt")]
struct ConfirmationText<'a> {
    name: &'a str,
    confirmation_link: &'a str,
}

/// Renders `campaign` for `recipient`. Cancelled events and content that no
/// longer exists are left out; outbound links go through the click tracker.
pub fn render_campaign(
    campaign: &Campaign,
    recipient: &Subscriber,
    content: &ResolvedContent,
    links: &TrackingLinks,
) -> Result<RenderedEmail, anyhow::Error> {
    let key = JobKey {
        campaign_id: campaign.id,
        subscriber_id: recipient.id,
    };
    let tracked = |target: &str| links.click(key, target).to_string();

    let events = content
        .events
        .iter()
        .filter(|event| !event.is_cancelled)
        .map(|event| -> Result<DigestItem, anyhow::Error> {
            Ok(DigestItem {
                title: event.title.clone(),
                detail: event_detail(event)?,
                link: tracked(&event.url),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let places: Vec<_> = content
        .places
        .iter()
        .map(|place| DigestItem {
            title: place.name.clone(),
            detail: [place.category.as_deref(), place.address.as_deref()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" · "),
            link: tracked(&place.url),
        })
        .collect();

    let posts: Vec<_> = content
        .posts
        .iter()
        .map(|post| DigestItem {
            title: post.title.clone(),
            detail: post.excerpt.clone().unwrap_or_default(),
            link: tracked(&post.url),
        })
        .collect();

    let body = rewrite_links(&campaign.content_html, links, key);
    let unsubscribe_url = links
        .unsubscribe(&recipient.unsubscribe_token, Some(campaign.id))
        .to_string();
    let open_pixel_url = links.open_pixel(key).to_string();

    let html_body = CampaignHtml {
        subject: &campaign.subject,
        name: recipient.name.as_ref(),
        body: &body,
        events: &events,
        places: &places,
        posts: &posts,
        unsubscribe_url: &unsubscribe_url,
        open_pixel_url: &open_pixel_url,
    }
    .render()
    .context("Failed to render campaign html")?;

    let text_body = CampaignText {
        name: recipient.name.as_ref(),
        body: &to_plain_text(&body),
        events: &events,
        places: &places,
        posts: &posts,
        unsubscribe_url: &unsubscribe_url,
    }
    .render()
    .context("Failed to render campaign text")?;

    Ok(RenderedEmail {
        subject: campaign.subject.clone(),
        html_body,
        text_body,
        unsubscribe_url: Some(unsubscribe_url),
    })
}

pub fn render_confirmation(
    name: &SubscriberName,
    confirmation_link: &Url,
) -> Result<RenderedEmail, anyhow::Error> {
    let confirmation_link = confirmation_link.as_str();

    let html_body = ConfirmationHtml {
        name: name.as_ref(),
        confirmation_link,
    }
    .render()
    .context("Failed to render confirmation html")?;

    let text_body = ConfirmationText {
        name: name.as_ref(),
        confirmation_link,
    }
    .render()
    .context("Failed to render confirmation text")?;

    Ok(RenderedEmail {
        subject: "Welcome!".into(),
        html_body,
        text_body,
        unsubscribe_url: None,
    })
}

fn event_detail(event: &EventSummary) -> Result<String, anyhow::Error> {
    let starts_at = event
        .starts_at
        .to_offset(UtcOffset::UTC)
        .format(EVENT_START)
        .context("Failed to format event start")?;

    Ok(match &event.location {
        Some(location) => format!("{starts_at} · {location}"),
        None => starts_at,
    })
}

fn rewrite_links(html: &str, links: &TrackingLinks, key: JobKey) -> String {
    OUTBOUND_LINK
        .replace_all(html, |caps: &Captures| {
            let Some(target) = caps.get(1).or_else(|| caps.get(2)) else {
                return caps[0].to_string();
            };
            let target = target.as_str().replace("&amp;", "&");

            if links.is_own(&target) {
                caps[0].to_string()
            } else {
                format!(r#"href="{}""#, links.click(key, &target))
            }
        })
        .into_owned()
}

fn to_plain_text(html: &str) -> String {
    // Links keep their target as `text (url)`.
    let text = ANCHOR.replace_all(html, |caps: &Captures| {
        let href = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map_or("", |m| m.as_str())
            .replace("&amp;", "&");
        let label = TAGS.replace_all(&caps[3], "");
        let label = label.trim();

        if href.is_empty() {
            label.to_string()
        } else if label.is_empty() || label == href {
            href
        } else {
            format!("{label} ({href})")
        }
    });
    let text = LINE_BREAKS.replace_all(&text, "\n");
    let text = TAGS.replace_all(&text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    BLANK_LINES.replace_all(text.trim(), "\n\n").into_owned()
}
