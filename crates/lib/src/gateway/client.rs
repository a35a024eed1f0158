//! Authenticated HTTP client for the messaging gateway.

use crate::config::ConfigStore;
use crate::gateway::error::GatewayError;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;

/// Per-request timeout. The reference behavior specifies none; a bounded
/// default keeps hung polls from stacking up.
const REQUEST_TIMEOUT_SECS: u64 = 15;

const BODY_SNIPPET_MAX: usize = 200;

/// Issues calls against the configured base URL with the `apikey` header.
///
/// No retries and no fallback here: candidate iteration is the resolver's
/// job. Configuration is re-read from the store on every call, so runtime
/// updates take effect on the next request.
#[derive(Clone)]
pub struct GatewayClient {
    config: ConfigStore,
    http: reqwest::Client,
}

impl GatewayClient {
    pub fn new(config: ConfigStore) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { config, http }
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    /// Perform one call: 2xx + JSON body => parsed value, anything else => error.
    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Value, GatewayError> {
        let config = self.config.snapshot();
        let url = format!(
            "{}/{}",
            config.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );
        log::debug!("gateway request: {} {}", method, url);

        let mut req = self.http.request(method, &url).header("apikey", &config.api_key);
        if let Some(b) = body {
            req = req.json(b);
        }

        let res = req.send().await?;
        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body: text,
            });
        }
        serde_json::from_str(&text).map_err(|e| {
            let snippet: String = text.chars().take(BODY_SNIPPET_MAX).collect();
            GatewayError::Decode(format!("{} in body {:?}", e, snippet))
        })
    }
}
