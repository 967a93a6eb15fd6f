use crate::helpers::{newsletter, TestApp};
use newsletter_delivery::domain::Preferences;
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, Duration, OffsetDateTime};
use uuid::Uuid;

fn in_one_hour() -> String {
    (OffsetDateTime::now_utc() + Duration::hours(1))
        .format(&Rfc3339)
        .unwrap()
}

#[tokio::test]
async fn creating_a_campaign_returns_a_draft() {
    // given
    let app = TestApp::spawn().await;

    // when
    let response = app.post_campaign(&newsletter("Weekly")).await;

    // then
    assert_eq!(response.status(), 201);
    let campaign: Value = response.json().await.unwrap();
    assert_eq!(campaign["status"], "DRAFT");
    assert_eq!(campaign["title"], "Weekly");
    assert_eq!(campaign["campaign_type"], "NEWSLETTER");
    assert_eq!(campaign["counters"]["total_sent"], 0);
}

#[tokio::test]
async fn invalid_campaigns_are_rejected_with_a_400() {
    // given
    let app = TestApp::spawn().await;
    let test_cases = vec![
        (
            json!({"title": " ", "subject": "s", "content_html": "<p>x</p>", "campaign_type": "NEWSLETTER"}),
            "empty title",
        ),
        (
            json!({"title": "t", "subject": "two\nlines", "content_html": "<p>x</p>", "campaign_type": "NEWSLETTER"}),
            "multi-line subject",
        ),
        (
            json!({"title": "t", "subject": "s", "content_html": "", "campaign_type": "NEWSLETTER"}),
            "empty body",
        ),
    ];

    for (body, description) in test_cases {
        // when
        let response = app.post_campaign(&body).await;

        // then
        assert_eq!(
            response.status(),
            400,
            "The API did not return a 400 BAD_REQUEST for {description}"
        );
    }
}

#[tokio::test]
async fn malformed_campaigns_are_rejected_with_a_422() {
    // given
    let app = TestApp::spawn().await;
    let test_cases = vec![
        (json!({"title": "t", "subject": "s"}), "missing content"),
        (
            json!({"title": "t", "subject": "s", "content_html": "<p>x</p>", "campaign_type": "FLYER"}),
            "unknown type",
        ),
    ];

    for (body, description) in test_cases {
        // when
        let response = app.post_campaign(&body).await;

        // then
        assert_eq!(
            response.status(),
            422,
            "The API did not fail with 422 Unprocessable Entity for {description}"
        );
    }
}

#[tokio::test]
async fn unknown_campaigns_are_reported_with_a_404() {
    // given
    let app = TestApp::spawn().await;

    // when
    let response = app.get_campaign(Uuid::new_v4()).await;

    // then
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn campaigns_can_be_listed_by_status() {
    // given
    let app = TestApp::spawn().await;
    let draft = app.create_campaign(&newsletter("Draft")).await;
    let scheduled = app.create_campaign(&newsletter("Scheduled")).await;
    app.schedule_campaign(scheduled, &json!({ "scheduled_at": in_one_hour() }))
        .await;

    // when
    let all: Vec<Value> = app.get_campaigns(None).await.json().await.unwrap();
    let drafts: Vec<Value> = app.get_campaigns(Some("DRAFT")).await.json().await.unwrap();

    // then
    assert_eq!(all.len(), 2);
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0]["id"], draft.to_string());
}

#[tokio::test]
async fn drafts_and_scheduled_campaigns_can_be_edited() {
    // given
    let app = TestApp::spawn().await;
    let id = app.create_campaign(&newsletter("Weekly")).await;

    // when
    let response = app.put_campaign(id, &newsletter("Monthly")).await;

    // then
    assert_eq!(response.status(), 200);
    let campaign: Value = response.json().await.unwrap();
    assert_eq!(campaign["title"], "Monthly");
}

#[tokio::test]
async fn sending_campaigns_cannot_be_edited_or_deleted() {
    // given
    let app = TestApp::spawn().await;
    app.verified_subscriber("reader@example.com", Preferences::default())
        .await;
    let id = app.create_campaign(&newsletter("Weekly")).await;
    app.send_campaign(id).await;

    // when
    let edited = app.put_campaign(id, &newsletter("Monthly")).await;
    let deleted = app.delete_campaign(id).await;
    let sent_again = app.send_campaign(id).await;

    // then
    assert_eq!(edited.status(), 409);
    assert_eq!(deleted.status(), 409);
    assert_eq!(sent_again.status(), 409);
}

#[tokio::test]
async fn scheduling_requires_a_future_time() {
    // given
    let app = TestApp::spawn().await;
    let id = app.create_campaign(&newsletter("Weekly")).await;
    let an_hour_ago = (OffsetDateTime::now_utc() - Duration::hours(1))
        .format(&Rfc3339)
        .unwrap();

    // when
    let past = app
        .schedule_campaign(id, &json!({ "scheduled_at": an_hour_ago }))
        .await;
    let future = app
        .schedule_campaign(id, &json!({ "scheduled_at": in_one_hour() }))
        .await;

    // then
    assert_eq!(past.status(), 400);
    assert_eq!(future.status(), 200);
    let campaign: Value = future.json().await.unwrap();
    assert_eq!(campaign["status"], "SCHEDULED");
}

#[tokio::test]
async fn cancelled_campaigns_stay_cancelled() {
    // given
    let app = TestApp::spawn().await;
    let id = app.create_campaign(&newsletter("Weekly")).await;
    app.schedule_campaign(id, &json!({ "scheduled_at": in_one_hour() }))
        .await;

    // when
    let first = app.cancel_campaign(id).await;
    let second = app.cancel_campaign(id).await;
    let send = app.send_campaign(id).await;

    // then
    assert_eq!(first.status(), 200);
    let campaign: Value = first.json().await.unwrap();
    assert_eq!(campaign["status"], "CANCELLED");
    assert_eq!(second.status(), 409);
    assert_eq!(send.status(), 409);
}

#[tokio::test]
async fn sending_without_eligible_recipients_is_refused() {
    // given
    let app = TestApp::spawn().await;
    let id = app.create_campaign(&newsletter("Weekly")).await;

    // when
    let response = app.send_campaign(id).await;

    // then
    assert_eq!(response.status(), 409);
    let campaign: Value = app.get_campaign(id).await.json().await.unwrap();
    assert_eq!(campaign["status"], "DRAFT");
}

#[tokio::test]
async fn sending_enqueues_one_job_per_eligible_subscriber() {
    // given
    let app = TestApp::spawn().await;
    app.verified_subscriber("news@example.com", Preferences::default())
        .await;
    app.verified_subscriber(
        "no-news@example.com",
        Preferences {
            news: false,
            ..Preferences::default()
        },
    )
    .await;
    let id = app.create_campaign(&newsletter("Weekly")).await;

    // when
    let response = app.send_campaign(id).await;

    // then
    assert_eq!(response.status(), 202);
    let dispatch: Value = response.json().await.unwrap();
    assert_eq!(dispatch["enqueued"], 1);
    assert_eq!(dispatch["campaign"]["status"], "SENDING");

    let health = app.queue_health().await;
    assert_eq!(health["pending"], 1);
    assert_eq!(health["failed"], 0);
}

#[tokio::test]
async fn drafts_can_be_deleted() {
    // given
    let app = TestApp::spawn().await;
    let id = app.create_campaign(&newsletter("Weekly")).await;

    // when
    let response = app.delete_campaign(id).await;

    // then
    assert_eq!(response.status(), 204);
    assert_eq!(app.get_campaign(id).await.status(), 404);
}

#[tokio::test]
async fn attachments_are_capped_in_aggregate_size() {
    // given
    let app = TestApp::spawn_with(|config| config.campaigns.max_attachments_bytes = 1_000).await;
    let id = app.create_campaign(&newsletter("Weekly")).await;
    let attachment = |size: i64| {
        json!({
            "file_name": "agenda.pdf",
            "size_bytes": size,
            "mime_type": "application/pdf",
            "storage_path": "uploads/agenda.pdf",
        })
    };

    // when
    let first = app.post_attachment(id, &attachment(600)).await;
    let second = app.post_attachment(id, &attachment(600)).await;

    // then
    assert_eq!(first.status(), 201);
    assert_eq!(second.status(), 400);
    let attachments: Vec<Value> = app.get_attachments(id).await.json().await.unwrap();
    assert_eq!(attachments.len(), 1);
}

#[tokio::test]
async fn attachments_can_be_removed() {
    // given
    let app = TestApp::spawn().await;
    let id = app.create_campaign(&newsletter("Weekly")).await;
    let attachment: Value = app
        .post_attachment(
            id,
            &json!({
                "file_name": "poster.png",
                "size_bytes": 2048,
                "mime_type": "image/png",
                "storage_path": "uploads/poster.png",
            }),
        )
        .await
        .json()
        .await
        .unwrap();
    let attachment_id = Uuid::parse_str(attachment["id"].as_str().unwrap()).unwrap();

    // when
    let removed = app.delete_attachment(id, attachment_id).await;
    let removed_again = app.delete_attachment(id, attachment_id).await;

    // then
    assert_eq!(removed.status(), 204);
    assert_eq!(removed_again.status(), 404);
}

#[tokio::test]
async fn invalid_attachments_are_rejected_with_a_400() {
    // given
    let app = TestApp::spawn().await;
    let id = app.create_campaign(&newsletter("Weekly")).await;

    // when
    let response = app
        .post_attachment(
            id,
            &json!({
                "file_name": "poster.png",
                "size_bytes": 2048,
                "mime_type": "png",
                "storage_path": "uploads/poster.png",
            }),
        )
        .await;

    // then
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn reconciling_recomputes_counters_from_jobs() {
    // given
    let app = TestApp::spawn().await;
    let (campaign_id, _, links) = app.deliver_newsletter().await;
    app.get(links.with_path("/track/open")).await;

    // when
    let response = app.reconcile_stats(campaign_id).await;

    // then
    assert_eq!(response.status(), 200);
    let stats: Value = response.json().await.unwrap();
    assert_eq!(stats["total_sent"], 1);
    assert_eq!(stats["total_opened"], 1);
    assert_eq!(stats["status"], "SENT");
}
