use crate::helpers::TestApp;
use claims::assert_some;
use newsletter_delivery::domain::{JobKey, JobStatus};
use uuid::Uuid;

#[tokio::test]
async fn the_open_pixel_is_an_uncacheable_gif() {
    // given
    let app = TestApp::spawn().await;

    // when
    let response = app.get_open_pixel(Uuid::new_v4(), Uuid::new_v4()).await;

    // then
    assert_eq!(response.status(), 200);
    let headers = response.headers();
    assert_eq!(headers["content-type"], "image/gif");
    assert!(headers["cache-control"]
        .to_str()
        .unwrap()
        .contains("no-store"));
    let body = response.bytes().await.unwrap();
    assert!(body.starts_with(b"GIF89a"));
}

#[tokio::test]
async fn opens_are_counted_once_per_recipient() {
    // given
    let app = TestApp::spawn().await;
    let (campaign_id, _, links) = app.deliver_newsletter().await;
    let pixel = links.with_path("/track/open");

    // when
    for _ in 0..3 {
        let response = app.get(pixel.clone()).await;
        assert_eq!(response.status(), 200);
    }

    // then
    let stats = app.campaign_stats(campaign_id).await;
    assert_eq!(stats["total_opened"], 1);
    assert_eq!(stats["open_rate"], 100.0);
}

#[tokio::test]
async fn clicks_redirect_to_the_original_link_and_are_counted_once() {
    // given
    let app = TestApp::spawn().await;
    let (campaign_id, subscriber, links) = app.deliver_newsletter().await;
    let click = links.with_path("/track/click");

    // when
    let first = app.get(click.clone()).await;
    let second = app.get(click).await;

    // then
    for response in [first, second] {
        assert!(response.status().is_redirection());
        assert_eq!(response.headers()["location"], "https://example.com/agenda");
    }
    let stats = app.campaign_stats(campaign_id).await;
    assert_eq!(stats["total_clicked"], 1);

    let job = assert_some!(app
        .store
        .job(JobKey {
            campaign_id,
            subscriber_id: subscriber.id,
        })
        .unwrap());
    assert_eq!(job.status, JobStatus::Clicked);
}

#[tokio::test]
async fn an_open_after_a_click_does_not_downgrade_the_job() {
    // given
    let app = TestApp::spawn().await;
    let (campaign_id, subscriber, links) = app.deliver_newsletter().await;
    app.get(links.with_path("/track/click")).await;

    // when
    app.get(links.with_path("/track/open")).await;

    // then
    let job = assert_some!(app
        .store
        .job(JobKey {
            campaign_id,
            subscriber_id: subscriber.id,
        })
        .unwrap());
    assert_eq!(job.status, JobStatus::Clicked);
    let stats = app.campaign_stats(campaign_id).await;
    assert_eq!(stats["total_opened"], 1);
    assert_eq!(stats["total_clicked"], 1);
}

#[tokio::test]
async fn clicks_for_unknown_recipients_still_redirect() {
    // given
    let app = TestApp::spawn().await;

    // when
    let response = app
        .get_click(Uuid::new_v4(), Uuid::new_v4(), "https://example.com/")
        .await;

    // then
    assert!(response.status().is_redirection());
    assert_eq!(response.headers()["location"], "https://example.com/");
}

#[tokio::test]
async fn clicks_to_targets_that_were_not_signed_are_rejected_with_a_400() {
    // given
    let app = TestApp::spawn().await;
    let (campaign_id, subscriber, links) = app.deliver_newsletter().await;
    let click = links.with_path("/track/click");
    let signature = click
        .query_pairs()
        .find(|(key, _)| key == "sig")
        .map(|(_, value)| value.into_owned())
        .expect("The click link is not signed");

    // when
    let response = app
        .get_click_signed_with(
            campaign_id,
            subscriber.id,
            "https://attacker.example.net/",
            &signature,
        )
        .await;

    // then
    assert_eq!(response.status(), 400);
    assert!(response.headers().get("location").is_none());
    let stats = app.campaign_stats(campaign_id).await;
    assert_eq!(stats["total_clicked"], 0);
}

#[tokio::test]
async fn clicks_to_non_web_targets_are_rejected_with_a_400() {
    // given
    let app = TestApp::spawn().await;
    let test_cases = vec![
        ("javascript:alert(1)", "script link"),
        ("not a url", "malformed url"),
        ("ftp://example.com/file", "ftp link"),
    ];

    for (target, description) in test_cases {
        // when
        let response = app
            .get_click(Uuid::new_v4(), Uuid::new_v4(), target)
            .await;

        // then
        assert_eq!(
            response.status(),
            400,
            "The API did not reject the {description}"
        );
    }
}
