mod admin_campaigns;
mod dispatcher;
mod mail_webhook;
mod subscriptions;
mod subscriptions_confirm;
mod subscriptions_unsubscribe;
mod tracking;
