use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chagall_core::{GatewayError, GatewayResult};
use serde_json::Value;
use tracing::trace;
use url::Url;

use crate::auth::{AuthSession, AuthUser, Credentials};
use crate::client::RawClient;
use crate::plan::{Operation, QueryPlan};

/// Configuration for the REST client.
#[derive(Clone, Debug)]
pub struct RestConfig {
    /// Project base URL, e.g. `https://abc.example.co`.
    pub base_url: String,
    /// Project API key, sent as `apikey` and as the anonymous bearer token.
    pub api_key: String,
    /// Transport-level request timeout.
    pub timeout: Duration,
}

impl RestConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// [`RawClient`] implementation speaking PostgREST/GoTrue conventions over
/// HTTP: `/rest/v1/{table}` for table operations, `/rest/v1/rpc/{name}` for
/// stored procedures, `/functions/v1/{name}` for edge functions and
/// `/auth/v1/*` for authentication.
#[derive(Debug)]
pub struct RestClient {
    http: reqwest::Client,
    base: Url,
    api_key: String,
    /// Session captured by `sign_in`, used as the bearer token afterwards.
    session: Mutex<Option<AuthSession>>,
}

impl RestClient {
    pub fn new(config: RestConfig) -> GatewayResult<Self> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| GatewayError::Http(format!("invalid base url: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Http(e.to_string()))?;
        Ok(Self {
            http,
            base,
            api_key: config.api_key,
            session: Mutex::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> GatewayResult<Url> {
        self.base
            .join(path)
            .map_err(|e| GatewayError::Http(format!("invalid endpoint {path}: {e}")))
    }

    fn bearer(&self) -> String {
        let session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        match session.as_ref() {
            Some(s) if !s.access_token.is_empty() => s.access_token.clone(),
            _ => self.api_key.clone(),
        }
    }

    fn store_session(&self, session: Option<AuthSession>) {
        *self.session.lock().unwrap_or_else(|e| e.into_inner()) = session;
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> GatewayResult<Value> {
        let resp = req
            .header("apikey", &self.api_key)
            .bearer_auth(self.bearer())
            .send()
            .await
            .map_err(|e| GatewayError::Http(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| GatewayError::Http(e.to_string()))?;
        trace!(%status, bytes = body.len(), "backend response");
        if !status.is_success() {
            return Err(GatewayError::Backend(format!("{status}: {body}")));
        }
        if body.is_empty() {
            Ok(Value::Null)
        } else {
            serde_json::from_str(&body).map_err(GatewayError::from)
        }
    }
}

#[async_trait]
impl RawClient for RestClient {
    async fn run_query(&self, plan: &QueryPlan) -> GatewayResult<Value> {
        let url = self.endpoint(&format!("/rest/v1/{}", plan.table))?;
        let params = plan.query_params();
        let req = match plan.op {
            Operation::Select => self.http.get(url).query(&params),
            Operation::Insert => self
                .http
                .post(url)
                .header("Prefer", "return=representation")
                .json(plan.payload.as_ref().unwrap_or(&Value::Null)),
            Operation::Upsert => self
                .http
                .post(url)
                .header("Prefer", "return=representation,resolution=merge-duplicates")
                .json(plan.payload.as_ref().unwrap_or(&Value::Null)),
            Operation::Update => self
                .http
                .patch(url)
                .query(&params)
                .header("Prefer", "return=representation")
                .json(plan.payload.as_ref().unwrap_or(&Value::Null)),
            Operation::Delete => self.http.delete(url).query(&params),
        };
        self.send(req).await
    }

    async fn rpc(&self, name: &str, args: Value) -> GatewayResult<Value> {
        let url = self.endpoint(&format!("/rest/v1/rpc/{name}"))?;
        self.send(self.http.post(url).json(&args)).await
    }

    async fn invoke_function(&self, name: &str, payload: Value) -> GatewayResult<Value> {
        let url = self.endpoint(&format!("/functions/v1/{name}"))?;
        self.send(self.http.post(url).json(&payload)).await
    }

    async fn get_user(&self) -> GatewayResult<AuthUser> {
        let url = self.endpoint("/auth/v1/user")?;
        let value = self.send(self.http.get(url)).await?;
        serde_json::from_value(value).map_err(GatewayError::from)
    }

    async fn get_session(&self) -> GatewayResult<AuthSession> {
        let session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        session.clone().ok_or(GatewayError::Unsupported)
    }

    async fn sign_in(&self, credentials: &Credentials) -> GatewayResult<AuthSession> {
        let mut url = self.endpoint("/auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");
        let value = self
            .send(self.http.post(url).json(&serde_json::json!({
                "email": credentials.email,
                "password": credentials.password,
            })))
            .await?;
        let session: AuthSession = serde_json::from_value(value)?;
        self.store_session(Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> GatewayResult<()> {
        let url = self.endpoint("/auth/v1/logout")?;
        let result = self.send(self.http.post(url)).await;
        self.store_session(None);
        result.map(|_| ())
    }
}
