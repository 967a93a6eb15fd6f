use crate::helpers::{newsletter, TestApp};
use newsletter_delivery::{
    configuration::get_configuration,
    delivery_worker::Dispatcher,
    domain::{EventSummary, JobKey, JobStatus, PlaceSummary, PostSummary, Preferences},
    storage::{InMemoryStore, Stores},
};
use serde_json::{json, Value};
use std::sync::Arc;
use time::{format_description::well_known::Rfc3339, macros::datetime, Duration, OffsetDateTime};
use uuid::Uuid;
use wiremock::{
    matchers::{any, method, path},
    Mock, ResponseTemplate,
};

fn email_body(request: &wiremock::Request) -> Value {
    serde_json::from_slice(&request.body).unwrap()
}

#[tokio::test]
async fn campaign_emails_are_personalized_and_tracked() {
    // given
    let app = TestApp::spawn().await;

    // when
    let (campaign_id, subscriber, links) = app.deliver_newsletter().await;

    // then
    let emails = app.sent_emails().await;
    let body = email_body(&emails[0]);
    assert_eq!(body["To"], "reader@example.com");
    assert_eq!(body["Subject"], "Weekly this week");
    assert!(body["HtmlBody"].as_str().unwrap().contains("Hello Reader"));
    assert_eq!(body["Headers"][0]["Name"], "List-Unsubscribe");

    let pixel = links.with_path("/track/open");
    assert_eq!(
        pixel.path(),
        format!("/track/open/{campaign_id}/{}", subscriber.id)
    );
    let clicks = links.all_with_path("/track/click");
    assert_eq!(clicks.len(), 1);
    assert!(clicks[0]
        .query_pairs()
        .any(|(key, value)| key == "url" && value == "https://example.com/agenda"));
}

#[tokio::test]
async fn scheduled_campaigns_are_sent_once_due() {
    // given
    let app = TestApp::spawn().await;
    app.mock_email_server().await;
    app.verified_subscriber("reader@example.com", Preferences::default())
        .await;
    let id = app.create_campaign(&newsletter("Weekly")).await;
    let now = OffsetDateTime::now_utc();
    let at = (now + Duration::hours(1)).format(&Rfc3339).unwrap();
    app.schedule_campaign(id, &json!({ "scheduled_at": at })).await;

    // when
    app.dispatch_all(now).await;
    let before = app.sent_emails().await.len();
    app.dispatch_all(now + Duration::hours(2)).await;

    // then
    assert_eq!(before, 0);
    assert_eq!(app.sent_emails().await.len(), 1);
    let campaign: Value = app.get_campaign(id).await.json().await.unwrap();
    assert_eq!(campaign["status"], "SENT");
    assert_eq!(campaign["counters"]["total_sent"], 1);
}

#[tokio::test]
async fn a_due_campaign_without_audience_returns_to_draft() {
    // given
    let app = TestApp::spawn().await;
    let id = app.create_campaign(&newsletter("Weekly")).await;
    let now = OffsetDateTime::now_utc();
    let at = (now + Duration::hours(1)).format(&Rfc3339).unwrap();
    app.schedule_campaign(id, &json!({ "scheduled_at": at })).await;

    // when
    app.dispatch_all(now + Duration::hours(2)).await;

    // then
    let campaign: Value = app.get_campaign(id).await.json().await.unwrap();
    assert_eq!(campaign["status"], "DRAFT");
    assert!(campaign["last_error"].is_string());
}

#[tokio::test]
async fn only_subscribers_opted_in_to_the_category_receive_the_campaign() {
    // given
    let app = TestApp::spawn().await;
    app.mock_email_server().await;
    app.verified_subscriber("deals@example.com", Preferences::default())
        .await;
    app.verified_subscriber(
        "no-deals@example.com",
        Preferences {
            offers: false,
            ..Preferences::default()
        },
    )
    .await;
    let mut body = newsletter("Summer sale");
    body["campaign_type"] = json!("PROMOTIONAL");
    let id = app.create_campaign(&body).await;

    // when
    app.send_campaign(id).await;
    app.dispatch_all(OffsetDateTime::now_utc()).await;

    // then
    let emails = app.sent_emails().await;
    assert_eq!(emails.len(), 1);
    assert_eq!(email_body(&emails[0])["To"], "deals@example.com");
}

#[tokio::test]
async fn selected_content_is_embedded_and_missing_items_are_skipped() {
    // given
    let app = TestApp::spawn().await;
    app.mock_email_server().await;
    app.verified_subscriber("reader@example.com", Preferences::default())
        .await;
    let event = EventSummary {
        id: Uuid::new_v4(),
        title: "Harbour festival".into(),
        starts_at: datetime!(2026-07-14 18:00 UTC),
        location: Some("Old harbour".into()),
        url: "https://events.example.com/harbour-festival".into(),
        is_cancelled: false,
    };
    let place = PlaceSummary {
        id: Uuid::new_v4(),
        name: "Covered market".into(),
        category: Some("Market".into()),
        address: Some("2 Market Square".into()),
        url: "https://places.example.com/covered-market".into(),
    };
    let post = PostSummary {
        id: Uuid::new_v4(),
        title: "New cycle lanes".into(),
        excerpt: None,
        url: "https://news.example.com/cycle-lanes".into(),
    };
    app.store.put_event(event.clone()).unwrap();
    app.store.put_place(place.clone()).unwrap();
    app.store.put_post(post.clone()).unwrap();
    let mut body = newsletter("Weekly");
    body["content"] = json!({
        "event_ids": [event.id, Uuid::new_v4()],
        "place_ids": [Uuid::new_v4(), place.id],
        "post_ids": [post.id],
    });
    let id = app.create_campaign(&body).await;

    // when
    app.send_campaign(id).await;
    app.dispatch_all(OffsetDateTime::now_utc()).await;

    // then
    let emails = app.sent_emails().await;
    assert_eq!(emails.len(), 1);
    let html = email_body(&emails[0])["HtmlBody"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(html.contains("Harbour festival"));
    assert!(html.contains("Covered market"));
    assert!(html.contains("New cycle lanes"));
    let targets: Vec<String> = app
        .email_links(&emails[0])
        .all_with_path("/track/click")
        .into_iter()
        .filter_map(|link| {
            link.query_pairs()
                .find(|(key, _)| key == "url")
                .map(|(_, value)| value.into_owned())
        })
        .collect();
    for expected in [
        "https://events.example.com/harbour-festival",
        "https://places.example.com/covered-market",
        "https://news.example.com/cycle-lanes",
    ] {
        assert!(
            targets.iter().any(|target| target == expected),
            "{expected} is not routed through click tracking"
        );
    }
}

#[tokio::test]
async fn transient_failures_are_retried_after_a_backoff() {
    // given
    let app = TestApp::spawn().await;
    let subscriber = app
        .verified_subscriber("reader@example.com", Preferences::default())
        .await;
    Mock::given(path("/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&app.email_server)
        .await;
    app.mock_email_server().await;
    let id = app.create_campaign(&newsletter("Weekly")).await;
    app.send_campaign(id).await;
    let now = OffsetDateTime::now_utc();

    // when
    app.dispatch_all(now).await;
    let key = JobKey {
        campaign_id: id,
        subscriber_id: subscriber.id,
    };
    let after_failure = app.store.job(key).unwrap().unwrap();
    app.dispatch_all(now + Duration::minutes(5)).await;

    // then
    assert_eq!(after_failure.status, JobStatus::Pending);
    assert_eq!(after_failure.retry_count, 1);
    assert!(after_failure.next_attempt_at > now);

    let job = app.store.job(key).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Sent);
    let campaign: Value = app.get_campaign(id).await.json().await.unwrap();
    assert_eq!(campaign["status"], "SENT");
}

#[tokio::test]
async fn rejected_recipients_are_marked_bounced() {
    // given
    let app = TestApp::spawn().await;
    app.verified_subscriber("reader@example.com", Preferences::default())
        .await;
    Mock::given(any())
        .respond_with(
            ResponseTemplate::new(422)
                .set_body_json(json!({ "ErrorCode": 406, "Message": "Inactive recipient" })),
        )
        .expect(1)
        .mount(&app.email_server)
        .await;
    let id = app.create_campaign(&newsletter("Weekly")).await;
    app.send_campaign(id).await;

    // when
    app.dispatch_all(OffsetDateTime::now_utc() + Duration::hours(1))
        .await;

    // then
    let stats = app.campaign_stats(id).await;
    assert_eq!(stats["bounced"], 1);
    assert_eq!(stats["total_sent"], 0);
    assert_eq!(stats["status"], "SENT");
}

#[tokio::test]
async fn cancelled_campaigns_are_not_delivered() {
    // given
    let app = TestApp::spawn().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&app.email_server)
        .await;
    app.verified_subscriber("reader@example.com", Preferences::default())
        .await;
    let id = app.create_campaign(&newsletter("Weekly")).await;
    app.send_campaign(id).await;

    // when
    app.cancel_campaign(id).await;
    app.dispatch_all(OffsetDateTime::now_utc()).await;

    // then
    let stats = app.campaign_stats(id).await;
    assert_eq!(stats["status"], "CANCELLED");
    assert_eq!(stats["pending"], 1);
}

#[test]
fn a_dispatcher_is_not_built_from_settings_that_cannot_make_progress() {
    // given
    let mut config = get_configuration().expect("Failed to read configuration");
    config.dispatcher.batch_size = 0;

    // when
    let dispatcher =
        Dispatcher::from_settings(&config, Stores::in_memory(Arc::new(InMemoryStore::default())));

    // then
    assert!(dispatcher.is_err());
}
