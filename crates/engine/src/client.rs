//! Thin wrapper over the proxy's HTTP endpoints.

use {
    commbridge_config::EngineConfig,
    commbridge_protocol::{EngineStatus, EvalResult},
    commbridge_service_traits::{ServiceError, ServiceResult},
    reqwest::{Client, Method, RequestBuilder},
    secrecy::{ExposeSecret, Secret},
    serde_json::{Value, json},
    tracing::debug,
};

/// Header carrying the proxy's session token.
pub const AUTH_HEADER: &str = "mwi-auth-token";

const STATUS_PATH: &str = "/get_status";
const START_PATH: &str = "/start_matlab";
const EVAL_PATH: &str = "/messageservice/json/secure";

#[derive(Clone)]
pub struct ProxyClient {
    http: Client,
    base_url: String,
    auth_token: Option<Secret<String>>,
}

impl std::fmt::Debug for ProxyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyClient")
            .field("base_url", &self.base_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl ProxyClient {
    pub fn new(config: &EngineConfig) -> ServiceResult<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ServiceError::message(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        let mut req = self
            .http
            .request(method, url)
            .header("Accept", "application/json");
        if let Some(token) = &self.auth_token {
            req = req.header(AUTH_HEADER, token.expose_secret().as_str());
        }
        req
    }

    async fn send_json(&self, req: RequestBuilder, what: &str) -> ServiceResult<Value> {
        let resp = req
            .send()
            .await
            .map_err(|e| ServiceError::message(format!("{what} request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ServiceError::message(format!(
                "{what} returned HTTP {status}: {body}"
            )));
        }

        resp.json()
            .await
            .map_err(|e| ServiceError::message(format!("failed to parse {what} response: {e}")))
    }

    /// `GET /get_status`.
    pub async fn get_status(&self) -> ServiceResult<EngineStatus> {
        let body = self
            .send_json(self.request(Method::GET, STATUS_PATH), "status")
            .await?;
        parse_status(&body)
    }

    /// `POST /start_matlab`. Returns as soon as the proxy accepted the request;
    /// the engine itself may still be starting.
    pub async fn start(&self) -> ServiceResult<()> {
        let resp = self
            .request(Method::POST, START_PATH)
            .send()
            .await
            .map_err(|e| ServiceError::message(format!("start request failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ServiceError::message(format!(
                "start returned HTTP {status}: {body}"
            )));
        }
        Ok(())
    }

    /// Evaluate one expression through the message service.
    pub async fn eval(&self, expression: &str) -> ServiceResult<EvalResult> {
        debug!(base_url = %self.base_url, "sending eval request");
        let body = json!({ "messages": { "Eval": [ { "mcode": expression } ] } });
        let resp = self
            .send_json(self.request(Method::POST, EVAL_PATH).json(&body), "eval")
            .await?;
        parse_eval_response(&resp)
    }
}

fn parse_status(body: &Value) -> ServiceResult<EngineStatus> {
    let status = body
        .pointer("/matlab/status")
        .and_then(Value::as_str)
        .ok_or_else(|| ServiceError::message("status response has no matlab.status"))?;
    let licensed = body
        .get("licensing")
        .and_then(Value::as_object)
        .is_some_and(|l| !l.is_empty());
    Ok(EngineStatus {
        licensed,
        status: status.to_string(),
        extra: body.get("error").cloned().unwrap_or(Value::Null),
    })
}

fn parse_eval_response(body: &Value) -> ServiceResult<EvalResult> {
    let first = body
        .pointer("/messages/EvalResponse/0")
        .cloned()
        .ok_or_else(|| ServiceError::message("eval response has no EvalResponse entry"))?;
    Ok(serde_json::from_value(first)?)
}
