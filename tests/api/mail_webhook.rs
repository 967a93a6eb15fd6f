use crate::helpers::TestApp;
use serde_json::json;
use uuid::Uuid;

fn delivery_record(campaign_id: Uuid, subscriber_id: Uuid) -> serde_json::Value {
    json!({
        "RecordType": "Delivery",
        "MessageID": Uuid::new_v4().to_string(),
        "Recipient": "reader@example.com",
        "DeliveredAt": "2026-04-02T16:33:54.9070259Z",
        "Metadata": {
            "campaign_id": campaign_id.to_string(),
            "subscriber_id": subscriber_id.to_string(),
        },
    })
}

#[tokio::test]
async fn delivery_records_are_counted_once() {
    // given
    let app = TestApp::spawn().await;
    let (campaign_id, subscriber, _) = app.deliver_newsletter().await;
    let record = delivery_record(campaign_id, subscriber.id);

    // when
    let first = app.post_mail_webhook(&record).await;
    let second = app.post_mail_webhook(&record).await;

    // then
    assert_eq!(first.status(), 200);
    assert_eq!(second.status(), 200);
    let stats = app.campaign_stats(campaign_id).await;
    assert_eq!(stats["total_delivered"], 1);
    assert_eq!(stats["delivery_rate"], 100.0);
}

#[tokio::test]
async fn outgoing_emails_carry_the_webhook_metadata() {
    // given
    let app = TestApp::spawn().await;

    // when
    let (campaign_id, subscriber, _) = app.deliver_newsletter().await;

    // then
    let emails = app.sent_emails().await;
    let body: serde_json::Value = serde_json::from_slice(&emails[0].body).unwrap();
    assert_eq!(body["Metadata"]["campaign_id"], campaign_id.to_string());
    assert_eq!(body["Metadata"]["subscriber_id"], subscriber.id.to_string());
}

#[tokio::test]
async fn other_record_types_are_acknowledged_and_ignored() {
    // given
    let app = TestApp::spawn().await;
    let (campaign_id, subscriber, _) = app.deliver_newsletter().await;
    let mut record = delivery_record(campaign_id, subscriber.id);
    record["RecordType"] = json!("SpamComplaint");

    // when
    let response = app.post_mail_webhook(&record).await;

    // then
    assert_eq!(response.status(), 200);
    let stats = app.campaign_stats(campaign_id).await;
    assert_eq!(stats["total_delivered"], 0);
}

#[tokio::test]
async fn records_for_unknown_jobs_are_acknowledged() {
    // given
    let app = TestApp::spawn().await;

    // when
    let with_unknown_pair = app
        .post_mail_webhook(&delivery_record(Uuid::new_v4(), Uuid::new_v4()))
        .await;
    let without_metadata = app
        .post_mail_webhook(&json!({ "RecordType": "Delivery" }))
        .await;

    // then
    assert_eq!(with_unknown_pair.status(), 200);
    assert_eq!(without_metadata.status(), 200);
}
