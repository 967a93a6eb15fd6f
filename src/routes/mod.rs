pub mod admin;
pub mod health_check;
pub mod subscriptions;
pub mod subscriptions_confirm;
pub mod subscriptions_unsubscribe;
pub mod tracking;
pub mod webhooks;
