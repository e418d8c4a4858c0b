mod subscription;
mod user;
mod webhook_log;

pub use subscription::{CreateSubscription, Subscription, SubscriptionPatch, SubscriptionStatus};
pub use user::{CreateUser, Tier, User};
pub use webhook_log::{CreateWebhookLog, WebhookLog};
