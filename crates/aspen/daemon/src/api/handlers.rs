//! REST handlers.
//!
//! The API layer is intentionally thin: validation plus repository calls.
//! All supervision logic lives in the engine.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use aspen_types::{
    AccumulationConfig, ActionConfig, Agent, AgentId, AgentStatus, Condition, EvaluationEvent,
    Schedule, Scope, TriggerConfig, WorkspaceId,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub async fn health_check() -> &'static str {
    "ok"
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub uptime_secs: i64,
}

pub async fn daemon_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "running",
        started_at: state.started_at,
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

#[derive(Deserialize)]
pub struct ListAgentsQuery {
    pub workspace_id: Uuid,
}

pub async fn list_agents(
    State(state): State<AppState>,
    Query(query): Query<ListAgentsQuery>,
) -> ApiResult<Json<Vec<Agent>>> {
    let workspace_id = WorkspaceId::from_uuid(query.workspace_id);
    let agents = state.agents.list_workspace(&workspace_id).await?;
    Ok(Json(agents))
}

/// Request body for creating an agent. Optional sections fall back to
/// engine defaults.
#[derive(Deserialize)]
pub struct CreateAgentRequest {
    pub workspace_id: Uuid,
    pub name: String,
    pub condition: Condition,
    pub scope: Scope,
    #[serde(default)]
    pub skip_condition: bool,
    #[serde(default)]
    pub aggregate: bool,
    pub accumulation: Option<AccumulationConfig>,
    pub trigger: Option<TriggerConfig>,
    pub schedule: Option<Schedule>,
    #[serde(default)]
    pub actions: Vec<ActionConfig>,
}

pub async fn create_agent(
    State(state): State<AppState>,
    Json(request): Json<CreateAgentRequest>,
) -> ApiResult<(StatusCode, Json<Agent>)> {
    let mut agent = Agent::new(
        WorkspaceId::from_uuid(request.workspace_id),
        request.name,
        request.condition,
        request.scope,
    );
    agent.skip_condition = request.skip_condition;
    agent.aggregate = request.aggregate;
    if let Some(accumulation) = request.accumulation {
        agent.accumulation = accumulation;
    }
    if let Some(trigger) = request.trigger {
        agent.trigger = trigger;
    }
    if let Some(schedule) = request.schedule {
        agent.schedule = schedule;
    }
    agent.actions = request.actions;

    agent.validate()?;
    state.agents.create(&agent).await?;
    Ok((StatusCode::CREATED, Json(agent)))
}

pub async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Agent>> {
    let agent_id = AgentId::from_uuid(id);
    state
        .agents
        .get(&agent_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(agent_id.to_string()))
}

/// Replaceable configuration of an existing agent.
#[derive(Deserialize)]
pub struct UpdateAgentRequest {
    pub name: Option<String>,
    pub condition: Option<Condition>,
    pub scope: Option<Scope>,
    pub skip_condition: Option<bool>,
    pub aggregate: Option<bool>,
    pub accumulation: Option<AccumulationConfig>,
    pub trigger: Option<TriggerConfig>,
    pub schedule: Option<Schedule>,
    pub actions: Option<Vec<ActionConfig>>,
}

pub async fn update_agent(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateAgentRequest>,
) -> ApiResult<Json<Agent>> {
    let agent_id = AgentId::from_uuid(id);
    let mut agent = state
        .agents
        .get(&agent_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(agent_id.to_string()))?;

    if let Some(name) = request.name {
        agent.name = name;
    }
    if let Some(condition) = request.condition {
        agent.condition = condition;
    }
    if let Some(scope) = request.scope {
        agent.scope = scope;
    }
    if let Some(skip_condition) = request.skip_condition {
        agent.skip_condition = skip_condition;
    }
    if let Some(aggregate) = request.aggregate {
        agent.aggregate = aggregate;
    }
    if let Some(accumulation) = request.accumulation {
        agent.accumulation = accumulation;
    }
    if let Some(trigger) = request.trigger {
        agent.trigger = trigger;
    }
    if let Some(schedule) = request.schedule {
        agent.schedule = schedule;
    }
    if let Some(actions) = request.actions {
        agent.actions = actions;
    }
    agent.updated_at = Utc::now();

    agent.validate()?;
    state.agents.update(&agent).await?;
    Ok(Json(agent))
}

pub async fn delete_agent(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let agent_id = AgentId::from_uuid(id);
    state.orchestrator.delete_agent(&agent_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn pause_agent(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Agent>> {
    let agent_id = AgentId::from_uuid(id);
    let mut agent = state
        .agents
        .get(&agent_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(agent_id.to_string()))?;
    agent.status = AgentStatus::Paused;
    agent.updated_at = Utc::now();
    state.agents.update(&agent).await?;
    Ok(Json(agent))
}

pub async fn resume_agent(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Agent>> {
    let agent_id = AgentId::from_uuid(id);
    let agent = state.orchestrator.resume_agent(&agent_id, Utc::now()).await?;
    Ok(Json(agent))
}

#[derive(Deserialize)]
pub struct EventsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn list_agent_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<Vec<EvaluationEvent>>> {
    let agent_id = AgentId::from_uuid(id);
    let events = state
        .events
        .recent_evaluations(&agent_id, query.limit.min(500))
        .await?;
    Ok(Json(events))
}
