use crate::helpers::TestApp;
use claims::assert_some;
use newsletter_delivery::domain::Frequency;
use wiremock::{
    matchers::{method, path},
    Mock, ResponseTemplate,
};

const VALID_BODY: &str = "name=Imi%C4%99%20Nazwisko&email=imie.nazwisko%40example.com";

#[tokio::test]
async fn subscribe_returns_a_200_for_valid_form_data() {
    // given
    let app = TestApp::spawn().await;
    app.mock_email_server().await;

    // when
    let response = app.post_subscriptions(VALID_BODY.into()).await;

    // then
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn subscribe_persists_the_new_subscriber_as_active_and_unverified() {
    // given
    let app = TestApp::spawn().await;
    app.mock_email_server().await;

    // when
    app.post_subscriptions(VALID_BODY.into()).await;

    // then
    let saved = assert_some!(app.subscriber("imie.nazwisko@example.com").await);
    assert_eq!(saved.name.as_ref(), "Imię Nazwisko");
    assert!(saved.is_active);
    assert!(!saved.is_verified);
    assert!(saved.preferences.news);
}

#[tokio::test]
async fn subscribe_normalizes_the_email_address() {
    // given
    let app = TestApp::spawn().await;
    app.mock_email_server().await;
    let body = "name=Reader&email=%20Imie.Nazwisko%40Example.com%20";

    // when
    let response = app.post_subscriptions(body.into()).await;

    // then
    assert_eq!(response.status(), 200);
    assert_some!(app.subscriber("imie.nazwisko@example.com").await);
}

#[tokio::test]
async fn subscribe_stores_the_chosen_preferences() {
    // given
    let app = TestApp::spawn().await;
    app.mock_email_server().await;
    let body = format!("{VALID_BODY}&events=false&offers=false&frequency=monthly");

    // when
    let response = app.post_subscriptions(body).await;

    // then
    assert_eq!(response.status(), 200);
    let saved = assert_some!(app.subscriber("imie.nazwisko@example.com").await);
    assert!(!saved.preferences.events);
    assert!(!saved.preferences.offers);
    assert!(saved.preferences.places);
    assert_eq!(saved.preferences.frequency, Frequency::Monthly);
}

#[tokio::test]
async fn subscribe_returns_a_400_when_fields_are_present_but_invalid() {
    // given
    let app = TestApp::spawn().await;
    let test_cases = vec![
        ("name=Imi%C4%99%20Nazwisko&email=", "empty email"),
        (
            "name=Imi%C4%99%20Nazwisko&email=definitely-not-an-email",
            "invalid email",
        ),
        ("name=&email=imie.nazwisko%40example.com", "empty name"),
        ("name=&email=", "empty both name and email"),
        (
            "name=Imi%C4%99%20Nazwisko&email=imie.nazwisko%40example.com&frequency=hourly",
            "unknown frequency",
        ),
    ];

    for (body, description) in test_cases {
        // when
        let response = app.post_subscriptions(body.into()).await;

        // then
        assert_eq!(
            400,
            response.status().as_u16(),
            "The API did not return a 400 BAD_REQUEST when the payload was {}",
            description
        );
    }
}

#[tokio::test]
async fn subscribe_returns_a_422_when_data_is_missing() {
    // given
    let app = TestApp::spawn().await;
    let test_cases = vec![
        ("name=Imi%C4%99%20Nazwisko", "missing the email"),
        ("email=imie.nazwisko%40example.com", "missing the name"),
        ("", "missing both name and email"),
    ];

    for (body, message) in test_cases {
        // when
        let response = app.post_subscriptions(body.into()).await;

        // then
        assert_eq!(
            response.status(),
            422,
            "The API did not fail with 422 Unprocessable Entity when the payload was {}",
            message
        );
    }
    assert!(app.subscriber("imie.nazwisko@example.com").await.is_none());
}

#[tokio::test]
async fn subscribe_sends_a_confirmation_email_with_a_link() {
    // given
    let app = TestApp::spawn().await;
    Mock::given(path("/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.email_server)
        .await;

    // when
    app.post_subscriptions(VALID_BODY.into()).await;

    // then
    let emails = app.sent_emails().await;
    let links = app.email_links(&emails[0]);
    let confirmation = links.with_path("/subscriptions/confirm");
    assert_eq!(confirmation.host_str(), Some("127.0.0.1"));
    assert!(confirmation
        .query_pairs()
        .any(|(key, _)| key == "subscription_token"));
}

#[tokio::test]
async fn subscribe_fails_if_the_confirmation_email_cannot_be_sent() {
    // given
    let app = TestApp::spawn().await;
    Mock::given(path("/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&app.email_server)
        .await;

    // when
    let response = app.post_subscriptions(VALID_BODY.into()).await;

    // then
    assert_eq!(response.status(), 500);
}
