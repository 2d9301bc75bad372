//! Action dispatch for the ASPEN engine.
//!
//! Non-mutating actions (notify, webhook) run directly with template
//! substitution; their failures become failed results, never errors.
//! Platform-mutating actions run a fixed pipeline: connection check, cached
//! health check, live-state fetch, precondition validation, mutation,
//! verification, rollback capture.

pub mod dispatcher;
pub mod notify;
pub mod template;
pub mod webhook;

pub use dispatcher::{ActionContext, ActionDispatcher, ExecutedAction};
pub use notify::{
    DeliveryReceipt, HttpNotificationChannel, InMemoryNotificationChannel, LogNotificationChannel,
    NotificationChannel, NotifyError,
};
pub use template::{render_template, render_template_value, TemplateVars};
pub use webhook::WebhookSender;
