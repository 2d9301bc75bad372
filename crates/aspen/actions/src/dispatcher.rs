//! The action dispatcher.
//!
//! Mutating actions run an ordered pipeline against live platform state:
//! connection check, cached health check, live-state fetch, precondition
//! validation, mutation, re-fetch verification, rollback capture. A
//! failure at any step yields a failed or skipped result; nothing is
//! raised to the caller.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use aspen_platform::{
    ClientRegistry, HealthService, LiveEntityState, PlatformClient, PlatformError,
};
use aspen_store::ConnectionRepository;
use aspen_types::{
    ActionConfig, ActionResult, Agent, BudgetKind, Entity, EntityStatus, ObservationSet,
    RollbackPayload,
};

use crate::notify::NotificationChannel;
use crate::template::{build_vars, render_template, render_template_value};
use crate::webhook::WebhookSender;

/// Context shared by every action of one trigger.
pub struct ActionContext<'a> {
    pub agent: &'a Agent,

    /// The concrete entity, or `None` for an aggregate-mode trigger.
    pub entity: Option<&'a Entity>,

    pub observations: &'a ObservationSet,
    pub summary: &'a str,
    pub now: DateTime<Utc>,
}

/// Full execution output for one action, ready to persist.
#[derive(Debug, Clone)]
pub struct ExecutedAction {
    pub result: ActionResult,
    pub config: serde_json::Value,
    pub state_before: Option<serde_json::Value>,
    pub state_after: Option<serde_json::Value>,
    pub rollback: Option<RollbackPayload>,

    /// Signed budget change in currency units, for cap accounting.
    pub budget_delta: Option<f64>,
}

impl ExecutedAction {
    fn plain(result: ActionResult, config: serde_json::Value) -> Self {
        Self {
            result,
            config,
            state_before: None,
            state_after: None,
            rollback: None,
            budget_delta: None,
        }
    }
}

/// Executes configured actions on trigger.
pub struct ActionDispatcher {
    connections: Arc<dyn ConnectionRepository>,
    clients: ClientRegistry,
    health: Arc<HealthService>,
    notifier: Arc<dyn NotificationChannel>,
    webhooks: WebhookSender,
    platform_timeout: Duration,
}

impl ActionDispatcher {
    pub fn new(
        connections: Arc<dyn ConnectionRepository>,
        clients: ClientRegistry,
        health: Arc<HealthService>,
        notifier: Arc<dyn NotificationChannel>,
    ) -> Self {
        Self {
            connections,
            clients,
            health,
            notifier,
            webhooks: WebhookSender::new(),
            platform_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_platform_timeout(mut self, timeout: Duration) -> Self {
        self.platform_timeout = timeout;
        self
    }

    pub fn with_webhook_sender(mut self, webhooks: WebhookSender) -> Self {
        self.webhooks = webhooks;
        self
    }

    /// Execute one action. Never returns an error; every outcome is an
    /// [`ExecutedAction`] with success/skip/failure encoded in the result.
    pub async fn execute(&self, action: &ActionConfig, ctx: &ActionContext<'_>) -> ExecutedAction {
        let started = Instant::now();
        let config = serde_json::to_value(action).unwrap_or_else(|_| serde_json::json!({}));
        let kind = action.kind_name();

        let mut executed = match action {
            ActionConfig::Notify {
                kind: channel_kind,
                recipients,
                message,
            } => {
                self.execute_notify(*channel_kind, recipients, message.as_deref(), ctx, started)
                    .await
            }
            ActionConfig::Webhook { url, payload } => {
                self.execute_webhook(url, payload.as_ref(), ctx, started).await
            }
            ActionConfig::ScaleBudget {
                percent,
                min_budget,
                max_budget,
                budget_kind,
            } => {
                self.execute_mutation(
                    ctx,
                    started,
                    kind,
                    Mutation::ScaleBudget {
                        percent: *percent,
                        min_budget: *min_budget,
                        max_budget: *max_budget,
                        budget_kind: *budget_kind,
                    },
                )
                .await
            }
            ActionConfig::Pause => {
                self.execute_mutation(ctx, started, kind, Mutation::SetStatus(EntityStatus::Paused))
                    .await
            }
            ActionConfig::Resume => {
                self.execute_mutation(ctx, started, kind, Mutation::SetStatus(EntityStatus::Active))
                    .await
            }
        };

        executed.config = config;
        info!(
            agent_id = %ctx.agent.id,
            action = kind,
            success = executed.result.success,
            skipped = executed.result.skipped,
            "action executed"
        );
        executed
    }

    async fn execute_notify(
        &self,
        channel_kind: aspen_types::NotificationKind,
        recipients: &[String],
        message: Option<&str>,
        ctx: &ActionContext<'_>,
        started: Instant,
    ) -> ExecutedAction {
        let vars = build_vars(ctx.agent, ctx.entity, ctx.observations, ctx.summary);
        let rendered = message.map(|m| render_template(m, &vars));

        let result = match self
            .notifier
            .send(channel_kind, recipients, &vars, rendered.as_deref())
            .await
        {
            Ok(receipt) => ActionResult::success(
                "notify",
                format!(
                    "sent {} notification to {} recipient(s){}",
                    channel_kind,
                    recipients.len(),
                    receipt
                        .message_id
                        .map(|id| format!(" (message {})", id))
                        .unwrap_or_default()
                ),
                elapsed_ms(started),
            ),
            Err(e) => {
                warn!(agent_id = %ctx.agent.id, error = %e, "notification failed");
                ActionResult::failed("notify", e.to_string(), elapsed_ms(started))
            }
        };
        ExecutedAction::plain(result, serde_json::json!({}))
    }

    async fn execute_webhook(
        &self,
        url: &str,
        payload: Option<&serde_json::Value>,
        ctx: &ActionContext<'_>,
        started: Instant,
    ) -> ExecutedAction {
        let vars = build_vars(ctx.agent, ctx.entity, ctx.observations, ctx.summary);
        let body = match payload {
            Some(template) => render_template_value(template, &vars),
            None => serde_json::to_value(&vars).unwrap_or_else(|_| serde_json::json!({})),
        };

        let result = match self.webhooks.send(url, &body).await {
            Ok(status) => ActionResult::success(
                "webhook",
                format!("posted to {} ({})", url, status),
                elapsed_ms(started),
            ),
            Err(e) => {
                warn!(agent_id = %ctx.agent.id, url = url, error = %e, "webhook failed");
                ActionResult::failed("webhook", e, elapsed_ms(started))
            }
        };
        ExecutedAction::plain(result, serde_json::json!({}))
    }

    async fn execute_mutation(
        &self,
        ctx: &ActionContext<'_>,
        started: Instant,
        kind: &str,
        mutation: Mutation,
    ) -> ExecutedAction {
        // 1. Mutations need one concrete entity with a platform connection.
        let entity = match ctx.entity {
            Some(entity) => entity,
            None => {
                return ExecutedAction::plain(
                    ActionResult::skipped(
                        kind,
                        "platform mutations are unavailable in aggregate mode",
                        elapsed_ms(started),
                    ),
                    serde_json::json!({}),
                );
            }
        };
        let connection_id = match &entity.connection_id {
            Some(id) => id,
            None => {
                return ExecutedAction::plain(
                    ActionResult::skipped(kind, "entity has no platform connection", elapsed_ms(started)),
                    serde_json::json!({}),
                );
            }
        };
        let connection = match self.connections.get(connection_id).await {
            Ok(Some(connection)) => connection,
            Ok(None) => {
                return ExecutedAction::plain(
                    ActionResult::skipped(
                        kind,
                        format!("connection {} no longer exists", connection_id),
                        elapsed_ms(started),
                    ),
                    serde_json::json!({}),
                );
            }
            Err(e) => {
                return ExecutedAction::plain(
                    ActionResult::failed(kind, format!("connection lookup failed: {}", e), elapsed_ms(started)),
                    serde_json::json!({}),
                );
            }
        };

        // Provider capability: an unsupported level is a skip, not an error.
        if !entity.provider.supports_level(entity.level) {
            return ExecutedAction::plain(
                ActionResult::skipped(
                    kind,
                    format!("{} does not support {} mutations", entity.provider, entity.level),
                    elapsed_ms(started),
                ),
                serde_json::json!({}),
            );
        }
        let client = match self.clients.get(entity.provider) {
            Some(client) => client,
            None => {
                return ExecutedAction::plain(
                    ActionResult::skipped(
                        kind,
                        format!("no client registered for {}", entity.provider),
                        elapsed_ms(started),
                    ),
                    serde_json::json!({}),
                );
            }
        };

        // 2. Health check (cached). Unhealthy is a skip, not a failure.
        let health = self.health.check(&connection, client.as_ref()).await;
        if !health.healthy {
            return ExecutedAction::plain(
                ActionResult::skipped(
                    kind,
                    format!(
                        "connection unhealthy: {}",
                        health.reason.unwrap_or_else(|| "unknown".into())
                    ),
                    elapsed_ms(started),
                ),
                serde_json::json!({}),
            );
        }

        // 3. Live state, never local cache.
        let live_before: LiveEntityState = match self.platform_call(client.live_state(&entity.id, entity.level)).await
        {
            Ok(state) => state,
            Err(e) => {
                return ExecutedAction::plain(
                    ActionResult::failed(kind, describe_platform_error(&e), elapsed_ms(started)),
                    serde_json::json!({}),
                );
            }
        };
        let state_before = serde_json::to_value(&live_before).ok();

        // 4. Preconditions.
        match &mutation {
            Mutation::SetStatus(target) => {
                if live_before.status == EntityStatus::Archived {
                    return ExecutedAction {
                        result: ActionResult::skipped(kind, "entity is archived", elapsed_ms(started)),
                        config: serde_json::json!({}),
                        state_before,
                        state_after: None,
                        rollback: None,
                        budget_delta: None,
                    };
                }
                if live_before.status == *target {
                    // No-op transitions succeed with skipped=true.
                    return ExecutedAction {
                        result: ActionResult::skipped(
                            kind,
                            format!("entity already {}", target),
                            elapsed_ms(started),
                        ),
                        config: serde_json::json!({}),
                        state_before,
                        state_after: None,
                        rollback: None,
                        budget_delta: None,
                    };
                }
            }
            Mutation::ScaleBudget { .. } => {
                if live_before.status != EntityStatus::Active {
                    return ExecutedAction {
                        result: ActionResult::skipped(
                            kind,
                            format!("entity is {}, not active", live_before.status),
                            elapsed_ms(started),
                        ),
                        config: serde_json::json!({}),
                        state_before,
                        state_after: None,
                        rollback: None,
                        budget_delta: None,
                    };
                }
                if live_before.budget.is_none() {
                    return ExecutedAction {
                        result: ActionResult::skipped(
                            kind,
                            "entity carries no budget at this level",
                            elapsed_ms(started),
                        ),
                        config: serde_json::json!({}),
                        state_before,
                        state_after: None,
                        rollback: None,
                        budget_delta: None,
                    };
                }
            }
        }

        // 5-6. Compute and perform the mutation.
        let (mutation_result, rollback, expected) = match &mutation {
            Mutation::SetStatus(target) => {
                let result = self
                    .platform_call(client.update_status(&entity.id, entity.level, *target))
                    .await;
                (
                    result,
                    RollbackPayload::RestoreStatus {
                        status: live_before.status,
                    },
                    Expected::Status(*target),
                )
            }
            Mutation::ScaleBudget {
                percent,
                min_budget,
                max_budget,
                budget_kind,
            } => {
                let current = live_before.budget.unwrap_or(0.0);
                let mut target = current * (1.0 + percent / 100.0);
                if let Some(min) = min_budget {
                    target = target.max(*min);
                }
                if let Some(max) = max_budget {
                    target = target.min(*max);
                }
                let target = entity.provider.round_budget(target);

                if (target - current).abs() < entity.provider.budget_unit() {
                    return ExecutedAction {
                        result: ActionResult::skipped(
                            kind,
                            format!("budget already at {:.2} after clamping", current),
                            elapsed_ms(started),
                        ),
                        config: serde_json::json!({}),
                        state_before,
                        state_after: None,
                        rollback: None,
                        budget_delta: None,
                    };
                }

                let result = self
                    .platform_call(client.update_budget(&entity.id, entity.level, target, *budget_kind))
                    .await;
                (
                    result,
                    RollbackPayload::RestoreBudget {
                        amount: current,
                        budget_kind: live_before.budget_kind.unwrap_or(*budget_kind),
                    },
                    Expected::Budget(target),
                )
            }
        };

        if let Err(e) = mutation_result {
            // The mutation call itself failed; nothing was committed, so
            // there is nothing to roll back.
            return ExecutedAction {
                result: ActionResult::failed(kind, describe_platform_error(&e), elapsed_ms(started)),
                config: serde_json::json!({}),
                state_before,
                state_after: None,
                rollback: None,
                budget_delta: None,
            };
        }

        // 7. Verify against a fresh live fetch.
        let live_after = match self.platform_call(client.live_state(&entity.id, entity.level)).await
        {
            Ok(state) => state,
            Err(e) => {
                // Mutation was acknowledged but verification failed; keep
                // the rollback payload so the change can be reversed.
                return ExecutedAction {
                    result: ActionResult::failed(
                        kind,
                        format!("verification fetch failed: {}", describe_platform_error(&e)),
                        elapsed_ms(started),
                    )
                    .with_rollback_possible(true),
                    config: serde_json::json!({}),
                    state_before,
                    state_after: None,
                    rollback: Some(rollback),
                    budget_delta: None,
                };
            }
        };
        let state_after = serde_json::to_value(&live_after).ok();

        let verified = match expected {
            Expected::Status(target) => live_after.status == target,
            Expected::Budget(target) => live_after
                .budget
                .map(|b| (b - target).abs() < entity.provider.budget_unit())
                .unwrap_or(false),
        };
        if !verified {
            return ExecutedAction {
                result: ActionResult::failed(
                    kind,
                    "platform did not reflect the change on re-fetch",
                    elapsed_ms(started),
                )
                .with_rollback_possible(true),
                config: serde_json::json!({}),
                state_before,
                state_after,
                rollback: Some(rollback),
                budget_delta: None,
            };
        }

        // 8. Success with rollback data.
        let (description, budget_delta) = match expected {
            Expected::Status(target) => (
                format!("set {} to {}", entity.id.as_str(), target),
                None,
            ),
            Expected::Budget(target) => {
                let before = live_before.budget.unwrap_or(0.0);
                (
                    format!(
                        "scaled budget of {} from {:.2} to {:.2}",
                        entity.id.as_str(),
                        before,
                        target
                    ),
                    Some(target - before),
                )
            }
        };

        ExecutedAction {
            result: ActionResult::success(kind, description, elapsed_ms(started))
                .with_rollback_possible(true),
            config: serde_json::json!({}),
            state_before,
            state_after,
            rollback: Some(rollback),
            budget_delta,
        }
    }

    async fn platform_call<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, PlatformError>>,
    ) -> Result<T, PlatformError> {
        match tokio::time::timeout(self.platform_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(PlatformError::Timeout {
                timeout_ms: self.platform_timeout.as_millis() as u64,
            }),
        }
    }
}

enum Mutation {
    SetStatus(EntityStatus),
    ScaleBudget {
        percent: f64,
        min_budget: Option<f64>,
        max_budget: Option<f64>,
        budget_kind: BudgetKind,
    },
}

enum Expected {
    Status(EntityStatus),
    Budget(f64),
}

fn describe_platform_error(error: &PlatformError) -> String {
    if error.is_transient() {
        format!("transient platform error: {}", error)
    } else {
        format!("platform error: {}", error)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
