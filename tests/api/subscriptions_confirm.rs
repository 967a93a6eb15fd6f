use crate::helpers::TestApp;
use claims::assert_some;

const VALID_BODY: &str = "name=Imi%C4%99%20Nazwisko&email=imie.nazwisko%40example.com";

#[tokio::test]
async fn confirmation_without_token_is_rejected_with_a_400() {
    // given
    let app = TestApp::spawn().await;

    // when
    let response = app.confirm_subscription_without_token().await;

    // then
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn confirmation_with_malformed_token_is_rejected_with_a_400() {
    // given
    let app = TestApp::spawn().await;

    for token in ["", "a", "not-alphanumeric-but-25-ch"] {
        // when
        let response = app.confirm_subscription(token).await;

        // then
        assert_eq!(response.status(), 400, "token `{token}` was not rejected");
    }
}

#[tokio::test]
async fn confirmation_with_malformed_token_describes_the_problem() {
    // given
    let app = TestApp::spawn().await;

    // when
    let response = app.confirm_subscription("a").await;
    let body = response.text().await.unwrap();

    // then
    assert!(
        body.to_lowercase().contains("invalid"),
        "'{body}' response body did not contain 'invalid' word"
    );
}

#[tokio::test]
async fn confirmation_with_unknown_token_is_rejected_with_a_401() {
    // given
    let app = TestApp::spawn().await;

    // when
    let response = app.confirm_subscription("abcdefghijklmnopqrstuvwxy").await;

    // then
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn clicking_on_the_confirmation_link_confirms_a_subscriber() {
    // given
    let app = TestApp::spawn().await;
    app.mock_email_server().await;
    app.post_subscriptions(VALID_BODY.into()).await;
    let links = app.email_links(&app.sent_emails().await[0]);

    // when
    let response = app.get(links.with_path("/subscriptions/confirm")).await;

    // then
    assert_eq!(response.status(), 200);
    let saved = assert_some!(app.subscriber("imie.nazwisko@example.com").await);
    assert!(saved.is_verified);
    assert!(saved.is_active);
}

#[tokio::test]
async fn subsequent_clicks_on_the_confirmation_link_keep_succeeding() {
    // given
    let app = TestApp::spawn().await;
    app.mock_email_server().await;
    app.post_subscriptions(VALID_BODY.into()).await;
    let link = app
        .email_links(&app.sent_emails().await[0])
        .with_path("/subscriptions/confirm");

    // when
    let first = app.get(link.clone()).await;
    let second = app.get(link).await;

    // then
    assert_eq!(first.status(), 200);
    assert_eq!(second.status(), 200);
}
