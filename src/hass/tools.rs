//! Home Assistant services exposed as tools.
//!
//! Each configured service becomes a tool named `<domain>.<service>` whose
//! arguments are forwarded as the service data. `hass.get_state` reads a
//! single entity.

use std::sync::Arc;

use async_trait::async_trait;

use super::client::{HassClient, HassError};
use crate::config::HassServiceConfig;
use crate::tools::registry::ToolRegistry;
use crate::tools::types::{Tool, ToolError, ToolIntent, ToolOutput};

/// Registry name of the state lookup tool.
pub const GET_STATE_TOOL: &str = "hass.get_state";

/// Split `"light.turn_on"` into `("light", "turn_on")`.
pub fn split_service_name(name: &str) -> Option<(&str, &str)> {
    let (domain, service) = name.split_once('.')?;
    if domain.is_empty() || service.is_empty() || service.contains('.') {
        return None;
    }
    Some((domain, service))
}

fn map_hass_error(e: HassError) -> ToolError {
    if e.is_unavailable() {
        ToolError::Unavailable(e.to_string())
    } else {
        ToolError::ExecutionFailed(e.to_string())
    }
}

/// A single Home Assistant service call.
pub struct HassServiceTool {
    client: Arc<HassClient>,
    name: String,
    domain: String,
    service: String,
    description: String,
    intent: ToolIntent,
}

impl HassServiceTool {
    /// Build a tool from its config entry.
    ///
    /// Returns `None` when the name is not `<domain>.<service>`.
    pub fn from_config(client: Arc<HassClient>, config: &HassServiceConfig) -> Option<Self> {
        let (domain, service) = split_service_name(&config.name)?;
        Some(Self {
            domain: domain.to_owned(),
            service: service.to_owned(),
            name: config.name.clone(),
            description: config.description.clone(),
            intent: config.intent,
            client,
        })
    }
}

#[async_trait]
impl Tool for HassServiceTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "entity_id": {"type": "string"}
            },
            "additionalProperties": true
        })
    }

    fn intent(&self) -> ToolIntent {
        self.intent
    }

    async fn execute(&self, args: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let data = match args {
            serde_json::Value::Null => serde_json::json!({}),
            serde_json::Value::Object(_) => args,
            other => {
                return Err(ToolError::InvalidArguments(format!(
                    "service data must be an object, got {other}"
                )));
            }
        };

        let changed = self
            .client
            .call_service(&self.domain, &self.service, &data)
            .await
            .map_err(map_hass_error)?;

        let count = changed.as_array().map_or(0, Vec::len);
        Ok(
            ToolOutput::message(format!("{} called, {count} entities changed", self.name))
                .with_data(changed),
        )
    }
}

/// Reads the state of one entity.
pub struct HassStateTool {
    client: Arc<HassClient>,
}

impl HassStateTool {
    pub fn new(client: Arc<HassClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for HassStateTool {
    fn name(&self) -> &str {
        GET_STATE_TOOL
    }

    fn description(&self) -> &str {
        "Read the current state of a Home Assistant entity; accepts entity_id"
    }

    fn schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {"entity_id": {"type": "string"}},
            "required": ["entity_id"]
        })
    }

    fn intent(&self) -> ToolIntent {
        ToolIntent::Query
    }

    async fn execute(&self, args: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let entity_id = args
            .get("entity_id")
            .and_then(|e| e.as_str())
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("entity_id is required".into()))?;

        let state = self
            .client
            .get_state(entity_id)
            .await
            .map_err(map_hass_error)?;
        let value = state
            .get("state")
            .and_then(|s| s.as_str())
            .unwrap_or("unknown");
        Ok(ToolOutput::message(format!("{entity_id} is {value}")).with_data(state))
    }
}

/// Register the state tool and every well-formed configured service.
///
/// Returns the number of tools registered.
pub fn register_hass_tools(
    registry: &mut ToolRegistry,
    client: Arc<HassClient>,
    services: &[HassServiceConfig],
) -> usize {
    registry.register(Arc::new(HassStateTool::new(Arc::clone(&client))));
    let mut registered = 1;
    for service in services {
        match HassServiceTool::from_config(Arc::clone(&client), service) {
            Some(tool) => {
                registry.register(Arc::new(tool));
                registered += 1;
            }
            None => tracing::warn!(
                service = %service.name,
                "skipping home assistant service, expected <domain>.<service>"
            ),
        }
    }
    tracing::info!(count = registered, url = %client.base_url(), "home assistant tools registered");
    registered
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use std::time::Duration;

    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(name: &str, intent: ToolIntent) -> HassServiceConfig {
        HassServiceConfig {
            name: name.to_owned(),
            description: format!("{name} service"),
            intent,
        }
    }

    #[test]
    fn service_names_split_on_single_dot() {
        assert_eq!(split_service_name("light.turn_on"), Some(("light", "turn_on")));
        assert_eq!(split_service_name("lights"), None);
        assert_eq!(split_service_name(".turn_on"), None);
        assert_eq!(split_service_name("a.b.c"), None);
    }

    #[test]
    fn register_skips_malformed_names() {
        let client = Arc::new(HassClient::new("http://ha.local", "t", Duration::from_secs(1)).unwrap());
        let mut registry = ToolRegistry::new(Duration::from_secs(1));
        let count = register_hass_tools(
            &mut registry,
            client,
            &[
                service("light.turn_on", ToolIntent::Action),
                service("broken", ToolIntent::Action),
                service("sensor.read", ToolIntent::Query),
            ],
        );
        assert_eq!(count, 3);
        assert!(registry.exists(GET_STATE_TOOL));
        assert!(registry.exists("light.turn_on"));
        assert!(!registry.exists("broken"));
        assert_eq!(registry.intent_of("sensor.read"), Some(ToolIntent::Query));
        assert_eq!(registry.intent_of(GET_STATE_TOOL), Some(ToolIntent::Query));
    }

    #[tokio::test]
    async fn service_tool_forwards_arguments() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/services/light/turn_on"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{"entity_id": "light.cube"}])))
            .expect(1)
            .mount(&server)
            .await;

        let client = Arc::new(HassClient::new(server.uri(), "t", Duration::from_secs(2)).unwrap());
        let tool =
            HassServiceTool::from_config(client, &service("light.turn_on", ToolIntent::Action))
                .unwrap();
        let output = tool
            .execute(serde_json::json!({"entity_id": "light.cube", "rgb_color": [255, 0, 0]}))
            .await
            .unwrap();
        assert_eq!(output.message.as_deref(), Some("light.turn_on called, 1 entities changed"));
    }

    #[tokio::test]
    async fn service_tool_rejects_non_object_arguments() {
        let client = Arc::new(HassClient::new("http://ha.local", "t", Duration::from_secs(1)).unwrap());
        let tool =
            HassServiceTool::from_config(client, &service("light.turn_on", ToolIntent::Action))
                .unwrap();
        let err = tool.execute(serde_json::json!("red")).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn state_tool_reports_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/states/light.cube"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "entity_id": "light.cube", "state": "on", "attributes": {}
            })))
            .mount(&server)
            .await;

        let client = Arc::new(HassClient::new(server.uri(), "t", Duration::from_secs(2)).unwrap());
        let output = HassStateTool::new(client)
            .execute(serde_json::json!({"entity_id": "light.cube"}))
            .await
            .unwrap();
        assert_eq!(output.message.as_deref(), Some("light.cube is on"));
    }
}
