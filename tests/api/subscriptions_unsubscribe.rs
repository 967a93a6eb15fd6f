use crate::helpers::{newsletter, TestApp};
use claims::assert_some;
use newsletter_delivery::domain::Preferences;
use secrecy::ExposeSecret;

#[tokio::test]
async fn unsubscribe_with_malformed_token_is_rejected_with_a_400() {
    // given
    let app = TestApp::spawn().await;

    // when
    let response = app.unsubscribe("nope").await;

    // then
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn unsubscribe_with_unknown_token_is_rejected_with_a_401() {
    // given
    let app = TestApp::spawn().await;

    // when
    let response = app.unsubscribe("0123456789abcdef0123456789abcdef").await;

    // then
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn a_verification_token_cannot_unsubscribe() {
    // given
    let app = TestApp::spawn().await;
    let subscriber = app
        .verified_subscriber("reader@example.com", Preferences::default())
        .await;

    // when
    let response = app
        .unsubscribe(subscriber.verification_token.expose_secret())
        .await;

    // then
    assert_eq!(response.status(), 400);
    let saved = assert_some!(app.subscriber("reader@example.com").await);
    assert!(saved.is_active);
}

#[tokio::test]
async fn unsubscribe_deactivates_without_deleting_the_subscriber() {
    // given
    let app = TestApp::spawn().await;
    let subscriber = app
        .verified_subscriber("reader@example.com", Preferences::default())
        .await;

    // when
    let response = app
        .unsubscribe(subscriber.unsubscribe_token.expose_secret())
        .await;

    // then
    assert_eq!(response.status(), 200);
    let saved = assert_some!(app.subscriber("reader@example.com").await);
    assert!(!saved.is_active);
}

#[tokio::test]
async fn the_unsubscribe_link_of_a_campaign_is_counted_once() {
    // given
    let app = TestApp::spawn().await;
    let (campaign_id, _, links) = app.deliver_newsletter().await;
    let link = links.with_path("/subscriptions/unsubscribe");

    // when
    let first = app.get(link.clone()).await;
    let second = app.get(link).await;

    // then
    assert_eq!(first.status(), 200);
    assert_eq!(second.status(), 200);
    let stats = app.campaign_stats(campaign_id).await;
    assert_eq!(stats["total_unsubscribed"], 1);
    assert_eq!(stats["unsubscribe_rate"], 100.0);
}

#[tokio::test]
async fn one_click_unsubscribe_accepts_post() {
    // given
    let app = TestApp::spawn().await;
    let (_, _, links) = app.deliver_newsletter().await;

    // when
    let response = app.post(links.with_path("/subscriptions/unsubscribe")).await;

    // then
    assert_eq!(response.status(), 200);
    let saved = assert_some!(app.subscriber("reader@example.com").await);
    assert!(!saved.is_active);
}

#[tokio::test]
async fn unsubscribed_readers_are_left_out_of_later_campaigns() {
    // given
    let app = TestApp::spawn().await;
    let (_, subscriber, _) = app.deliver_newsletter().await;
    app.unsubscribe(subscriber.unsubscribe_token.expose_secret())
        .await;
    let campaign_id = app.create_campaign(&newsletter("Next week")).await;

    // when
    let response = app.send_campaign(campaign_id).await;

    // then
    assert_eq!(response.status(), 409);
}
