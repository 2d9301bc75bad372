//! Template variable substitution.
//!
//! Messages and webhook payloads may reference `{{variable}}` placeholders
//! filled from the agent, entity, and observation snapshot. Unknown
//! placeholders are left in place so misconfigured templates stay visible.

use std::collections::BTreeMap;

use aspen_types::{Agent, Entity, ObservationSet};

/// Variables available to action templates.
pub type TemplateVars = BTreeMap<String, String>;

/// Build the variable map for one trigger.
pub fn build_vars(
    agent: &Agent,
    entity: Option<&Entity>,
    observations: &ObservationSet,
    summary: &str,
) -> TemplateVars {
    let mut vars = TemplateVars::new();
    vars.insert("agent_id".into(), agent.id.to_string());
    vars.insert("agent_name".into(), agent.name.clone());
    vars.insert("summary".into(), summary.to_string());

    match entity {
        Some(entity) => {
            vars.insert("entity_id".into(), entity.id.as_str().to_string());
            vars.insert("entity_name".into(), entity.name.clone());
            vars.insert("provider".into(), entity.provider.to_string());
        }
        None => {
            vars.insert("entity_name".into(), "all entities (aggregate)".into());
        }
    }

    for (metric, value) in observations.iter() {
        vars.insert(metric.clone(), format_metric(*value));
    }

    vars
}

/// Replace `{{name}}` placeholders in a template string.
pub fn render_template(template: &str, vars: &TemplateVars) -> String {
    let mut rendered = template.to_string();
    for (name, value) in vars {
        rendered = rendered.replace(&format!("{{{{{}}}}}", name), value);
    }
    rendered
}

/// Recursively render every string inside a JSON value.
pub fn render_template_value(value: &serde_json::Value, vars: &TemplateVars) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => serde_json::Value::String(render_template(s, vars)),
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items.iter().map(|v| render_template_value(v, vars)).collect(),
        ),
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_template_value(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn format_metric(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{:.2}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aspen_types::{
        ComparisonOp, Condition, EntityId, EntityLevel, EntityStatus, Provider, Scope, WorkspaceId,
    };

    fn fixture() -> (Agent, Entity, ObservationSet) {
        let workspace_id = WorkspaceId::generate();
        let agent = Agent::new(
            workspace_id.clone(),
            "overspend watch",
            Condition::Threshold {
                metric: "spend".into(),
                operator: ComparisonOp::Gt,
                value: 100.0,
            },
            Scope::All {
                provider: Provider::Meta,
                level: EntityLevel::Campaign,
            },
        );
        let entity = Entity {
            id: EntityId::new("c1"),
            workspace_id,
            provider: Provider::Meta,
            level: EntityLevel::Campaign,
            name: "Summer Sale".into(),
            status: EntityStatus::Active,
            connection_id: None,
        };
        let mut observations = ObservationSet::new();
        observations.insert("spend", 150.5);
        observations.insert("clicks", 42.0);
        (agent, entity, observations)
    }

    #[test]
    fn test_render_message() {
        let (agent, entity, observations) = fixture();
        let vars = build_vars(&agent, Some(&entity), &observations, "spend exceeded 100");

        let rendered = render_template(
            "{{agent_name}}: {{entity_name}} spent {{spend}} ({{summary}})",
            &vars,
        );
        assert_eq!(
            rendered,
            "overspend watch: Summer Sale spent 150.50 (spend exceeded 100)"
        );
    }

    #[test]
    fn test_unknown_placeholder_left_in_place() {
        let vars = TemplateVars::new();
        assert_eq!(render_template("hello {{nobody}}", &vars), "hello {{nobody}}");
    }

    #[test]
    fn test_aggregate_entity_name() {
        let (agent, _, observations) = fixture();
        let vars = build_vars(&agent, None, &observations, "s");
        assert_eq!(vars["entity_name"], "all entities (aggregate)");
    }

    #[test]
    fn test_render_json_payload() {
        let (agent, entity, observations) = fixture();
        let vars = build_vars(&agent, Some(&entity), &observations, "s");

        let payload = serde_json::json!({
            "text": "{{entity_name}} clicked {{clicks}} times",
            "nested": {"agent": "{{agent_name}}"},
            "count": 3
        });
        let rendered = render_template_value(&payload, &vars);
        assert_eq!(rendered["text"], "Summer Sale clicked 42 times");
        assert_eq!(rendered["nested"]["agent"], "overspend watch");
        assert_eq!(rendered["count"], 3);
    }
}
