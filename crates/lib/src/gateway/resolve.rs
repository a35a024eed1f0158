//! Endpoint resolution across gateway versions.
//!
//! The gateway's wire API is not version-pinned: the same logical operation
//! lives at different paths depending on the deployed version. Each operation
//! keeps an ordered candidate list (most likely first); the resolver walks it
//! sequentially and accepts the first structurally valid response. The match
//! is tagged with the endpoint that produced it, because the payload shape
//! varies by candidate and the normalizer needs to probe accordingly.

use crate::gateway::client::GatewayClient;
use crate::gateway::error::GatewayError;
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;

/// Logical gateway operations; each maps to one or more candidate endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ConnectionState,
    CreateInstance,
    PairingCode,
    Logout,
    ListContacts,
    ListMessages,
    SendMessage,
    RegisterWebhook,
}

impl Operation {
    pub fn name(self) -> &'static str {
        match self {
            Self::ConnectionState => "connection-state",
            Self::CreateInstance => "create-instance",
            Self::PairingCode => "pairing-code",
            Self::Logout => "logout",
            Self::ListContacts => "list-contacts",
            Self::ListMessages => "list-messages",
            Self::SendMessage => "send-message",
            Self::RegisterWebhook => "register-webhook",
        }
    }

    /// Top-level fields that mark a response as valid for this operation.
    /// An empty list accepts any 2xx JSON.
    fn expected_fields(self) -> &'static [&'static str] {
        match self {
            Self::ConnectionState => &["instance", "state", "data"],
            Self::CreateInstance => &[],
            Self::PairingCode => &["qrcode", "base64", "code", "pairingCode"],
            Self::Logout => &[],
            Self::ListContacts => &["contacts", "data", "chats"],
            Self::ListMessages => &["messages", "data", "conversation", "chats"],
            Self::SendMessage => &["key"],
            Self::RegisterWebhook => &[],
        }
    }
}

/// Request inputs a candidate template may substitute (besides the instance
/// name, which always comes from config).
#[derive(Debug, Clone, Default)]
pub struct OperationParams {
    /// Digits-only phone of the target contact (list-messages, send-message).
    pub phone: Option<String>,
    /// Message page size (list-messages). Defaults to 50.
    pub limit: Option<u32>,
    /// JSON body for POST candidates.
    pub body: Option<Value>,
}

impl OperationParams {
    pub fn with_phone(phone: impl Into<String>) -> Self {
        Self {
            phone: Some(phone.into()),
            ..Self::default()
        }
    }

    pub fn with_body(body: Value) -> Self {
        Self {
            body: Some(body),
            ..Self::default()
        }
    }
}

struct Candidate {
    method: Method,
    path: String,
}

fn candidates(op: Operation, instance: &str, params: &OperationParams) -> Vec<Candidate> {
    let phone = params.phone.as_deref().unwrap_or_default();
    let limit = params.limit.unwrap_or(50);
    let get = |path: String| Candidate {
        method: Method::GET,
        path,
    };
    let post = |path: String| Candidate {
        method: Method::POST,
        path,
    };
    match op {
        Operation::ConnectionState => vec![
            get(format!("instance/connectionState/{}", instance)),
            get(format!("instance/fetchInstances/{}", instance)),
        ],
        Operation::CreateInstance => vec![post("instance/create".to_string())],
        Operation::PairingCode => vec![
            get(format!("instance/connect/{}", instance)),
            get(format!("instance/qrcode/{}", instance)),
            get(format!("instance/qr/{}?image=true", instance)),
        ],
        Operation::Logout => vec![
            post(format!("instance/logout/{}", instance)),
            Candidate {
                method: Method::DELETE,
                path: format!("instance/delete/{}", instance),
            },
        ],
        Operation::ListContacts => vec![
            get(format!("chat/getAllChats/{}", instance)),
            get(format!("instance/contacts/{}", instance)),
            get(format!("contacts/{}", instance)),
            get(format!("contact/getContacts/{}", instance)),
        ],
        Operation::ListMessages => vec![
            get(format!(
                "instance/fetchMessages/{}?number={}&limit={}",
                instance, phone, limit
            )),
            get(format!("message/fetch/{}/{}?limit={}", instance, phone, limit)),
            get(format!("fetch/messages/{}/{}?limit={}", instance, phone, limit)),
            get(format!(
                "messages/conversation/{}/{}?count={}",
                instance, phone, limit
            )),
        ],
        Operation::SendMessage => vec![
            post(format!("message/text/{}", instance)),
            post(format!("message/sendText/{}", instance)),
        ],
        Operation::RegisterWebhook => vec![post(format!("webhook/set/{}", instance))],
    }
}

/// A top-level array is also structurally valid: some gateway versions return
/// the list payload bare instead of wrapped in a keyed object.
fn matches_expected(value: &Value, expected: &[&str]) -> bool {
    if expected.is_empty() {
        return true;
    }
    match value {
        Value::Object(map) => expected.iter().any(|f| map.contains_key(*f)),
        Value::Array(_) => true,
        _ => false,
    }
}

/// Raw gateway response plus the endpoint that produced it.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub operation: &'static str,
    /// Candidate path that matched; shape hint for normalization and logs.
    pub endpoint: String,
    pub body: Value,
}

/// Walks candidate endpoints for a logical operation until one succeeds.
#[derive(Clone)]
pub struct EndpointResolver {
    client: Arc<GatewayClient>,
}

impl EndpointResolver {
    pub fn new(client: Arc<GatewayClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &GatewayClient {
        &self.client
    }

    /// Try candidates in order; first structurally valid response wins.
    /// Candidates run sequentially, never concurrently, so "first success"
    /// stays simple and the gateway is not hit with redundant load.
    pub async fn resolve(
        &self,
        op: Operation,
        params: &OperationParams,
    ) -> Result<Resolved, GatewayError> {
        let instance = self.client.config().snapshot().instance_name;
        let expected = op.expected_fields();
        let mut last: Option<GatewayError> = None;

        for candidate in candidates(op, &instance, params) {
            match self
                .client
                .request(candidate.method.clone(), &candidate.path, params.body.as_ref())
                .await
            {
                Ok(body) if matches_expected(&body, expected) => {
                    return Ok(Resolved {
                        operation: op.name(),
                        endpoint: candidate.path,
                        body,
                    });
                }
                Ok(_) => {
                    log::debug!(
                        "{} via {}: response lacks expected fields, trying next candidate",
                        op.name(),
                        candidate.path
                    );
                    last = Some(GatewayError::UnexpectedShape(expected.join(", ")));
                }
                Err(e) => {
                    log::debug!("{} via {} failed: {}", op.name(), candidate.path, e);
                    last = Some(e);
                }
            }
        }

        Err(GatewayError::AllEndpointsFailed {
            operation: op.name(),
            last: Box::new(last.unwrap_or_else(|| {
                GatewayError::Validation("no candidate endpoints configured".to_string())
            })),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn list_messages_candidates_carry_phone_and_limit() {
        let params = OperationParams {
            phone: Some("5511999990000".to_string()),
            limit: Some(25),
            body: None,
        };
        let cands = candidates(Operation::ListMessages, "sales", &params);
        assert_eq!(cands.len(), 4);
        assert_eq!(
            cands[0].path,
            "instance/fetchMessages/sales?number=5511999990000&limit=25"
        );
        assert!(cands.iter().all(|c| c.path.contains("5511999990000")));
    }

    #[test]
    fn connection_state_prefers_connection_state_endpoint() {
        let cands = candidates(Operation::ConnectionState, "main", &OperationParams::default());
        assert_eq!(cands[0].path, "instance/connectionState/main");
        assert_eq!(cands[1].path, "instance/fetchInstances/main");
    }

    #[test]
    fn expected_field_matching() {
        let expected = Operation::ListMessages.expected_fields();
        assert!(matches_expected(&json!({"messages": []}), expected));
        assert!(matches_expected(&json!({"data": []}), expected));
        assert!(matches_expected(&json!([{"body": "hi"}]), expected));
        assert!(!matches_expected(&json!({"error": "nope"}), expected));
        assert!(!matches_expected(&json!("ok"), expected));
    }

    #[test]
    fn empty_expected_accepts_anything() {
        assert!(matches_expected(&json!({"whatever": 1}), &[]));
        assert!(matches_expected(&json!("ok"), &[]));
    }
}
