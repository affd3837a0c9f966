use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use std::time::Duration;
use tracing::{debug, info};
use vigil_core::{
    HealthRecord, KvEntry, QueryMeta, QueryOptions, Registry, Result, SessionId, SessionSpec,
    VigilError, WaitIndex,
};

use crate::payload::{self, SessionCreate, SessionCreated};
use crate::ConsulConfig;

const INDEX_HEADER: &str = "X-Consul-Index";
const TOKEN_HEADER: &str = "X-Consul-Token";

/// [`Registry`] backed by a Consul agent's HTTP API.
#[derive(Debug, Clone)]
pub struct ConsulRegistry {
    client: Client,
    base: Url,
    config: ConsulConfig,
}

impl ConsulRegistry {
    /// Builds a client and checks that the agent is reachable and the
    /// cluster has a leader.
    pub async fn connect(config: ConsulConfig) -> Result<Self> {
        let registry = Self::new(config)?;
        let leader = registry.leader().await?;
        info!("Connected to Consul at {} (leader {})", registry.base, leader);
        Ok(registry)
    }

    /// Builds a client without contacting the agent.
    pub fn new(config: ConsulConfig) -> Result<Self> {
        config.validate()?;
        let base = Url::parse(&config.base_url())
            .map_err(|e| VigilError::config(format!("invalid consul address: {}", e)))?;
        let client = Client::builder()
            .connect_timeout(config.request_timeout)
            .build()
            .map_err(|e| VigilError::config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base,
            config,
        })
    }

    pub fn config(&self) -> &ConsulConfig {
        &self.config
    }

    /// Address of the current Raft leader.
    pub async fn leader(&self) -> Result<String> {
        let response = self.send(self.request(Method::GET, &["status", "leader"])?).await?;
        let body = response_bytes(response).await?;
        let leader: String = serde_json::from_slice(&body)?;
        if leader.is_empty() {
            return Err(VigilError::connectivity("consul cluster has no leader"));
        }
        Ok(leader)
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        // Url drops dot segments, which would silently address another key
        if let Some(segment) = segments
            .iter()
            .flat_map(|segment| segment.split('/'))
            .find(|part| *part == "." || *part == "..")
        {
            return Err(VigilError::config(format!(
                "path segment {:?} in {:?} cannot be sent to consul",
                segment, segments
            )));
        }
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| VigilError::config(format!("consul address {} cannot be a base", self.base)))?
            .push("v1")
            .extend(segments.iter().flat_map(|segment| segment.split('/')));
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder> {
        let mut builder = self
            .client
            .request(method, self.url(segments)?)
            .timeout(self.config.request_timeout);
        if let Some(dc) = &self.config.datacenter {
            builder = builder.query(&[("dc", dc)]);
        }
        if let Some(token) = &self.config.token {
            builder = builder.header(TOKEN_HEADER, token);
        }
        Ok(builder)
    }

    /// Adds blocking-query parameters and stretches the timeout to cover
    /// the server-side wait.
    fn blocking(&self, mut builder: RequestBuilder, options: &QueryOptions) -> RequestBuilder {
        if options.allow_stale {
            builder = builder.query(&[("stale", "")]);
        }
        if options.wait_index != WaitIndex::ZERO {
            let wait = options.wait_time.unwrap_or(Duration::from_secs(300));
            builder = builder
                .query(&[("index", options.wait_index.value().to_string())])
                .timeout(payload::blocking_timeout(wait, self.config.request_timeout));
            if let Some(wait) = options.wait_time {
                builder = builder.query(&[("wait", payload::format_duration(wait))]);
            }
        }
        builder
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        builder.send().await.map_err(transport_error)
    }

    async fn put_bool(&self, builder: RequestBuilder) -> Result<bool> {
        let response = self.send(builder).await?;
        let body = response_bytes(response).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

fn transport_error(e: reqwest::Error) -> VigilError {
    if e.is_timeout() {
        VigilError::connectivity(format!("request timed out: {}", e))
    } else {
        VigilError::connectivity(e.to_string())
    }
}

fn query_meta(response: &Response) -> QueryMeta {
    let last_index = response
        .headers()
        .get(INDEX_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(0);
    QueryMeta {
        last_index: WaitIndex::new(last_index),
    }
}

/// Body of a successful response, or the matching error.
async fn response_bytes(response: Response) -> Result<Vec<u8>> {
    let status = response.status();
    let body = response.bytes().await.map_err(transport_error)?;
    if status.is_success() {
        return Ok(body.to_vec());
    }
    let message = String::from_utf8_lossy(&body).trim().to_string();
    Err(VigilError::registry(status.as_u16(), message))
}

/// Consul reports writes against a dead session as a 500 mentioning it.
fn session_error(err: VigilError, session: &str) -> VigilError {
    match &err {
        VigilError::Registry { message, .. }
            if message.to_ascii_lowercase().contains("invalid session") =>
        {
            VigilError::session_expired(session)
        }
        _ => err,
    }
}

#[async_trait]
impl Registry for ConsulRegistry {
    async fn create_session(&self, spec: &SessionSpec) -> Result<SessionId> {
        let builder = self
            .request(Method::PUT, &["session", "create"])?
            .json(&SessionCreate::from(spec));
        let body = response_bytes(self.send(builder).await?).await?;
        let created: SessionCreated = serde_json::from_slice(&body)?;
        debug!("Consul session {} created", created.id);
        Ok(created.id)
    }

    async fn renew_session(&self, session: &str) -> Result<()> {
        let response = self
            .send(self.request(Method::PUT, &["session", "renew", session])?)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(VigilError::session_expired(session));
        }
        response_bytes(response).await?;
        Ok(())
    }

    async fn destroy_session(&self, session: &str) -> Result<()> {
        self.put_bool(self.request(Method::PUT, &["session", "destroy", session])?)
            .await?;
        Ok(())
    }

    async fn kv_get(
        &self,
        key: &str,
        options: &QueryOptions,
    ) -> Result<(Option<KvEntry>, QueryMeta)> {
        let builder = self.blocking(self.request(Method::GET, &["kv", key])?, options);
        let response = self.send(builder).await?;
        let meta = query_meta(&response);
        if response.status() == StatusCode::NOT_FOUND {
            return Ok((None, meta));
        }
        let body = response_bytes(response).await?;
        Ok((payload::decode_kv(&body)?, meta))
    }

    async fn kv_put(&self, key: &str, value: &[u8]) -> Result<()> {
        let builder = self.request(Method::PUT, &["kv", key])?.body(value.to_vec());
        if !self.put_bool(builder).await? {
            return Err(VigilError::registry(200, format!("write to {} refused", key)));
        }
        Ok(())
    }

    async fn kv_acquire(&self, key: &str, value: &[u8], session: &str) -> Result<bool> {
        let builder = self
            .request(Method::PUT, &["kv", key])?
            .query(&[("acquire", session)])
            .body(value.to_vec());
        self.put_bool(builder)
            .await
            .map_err(|e| session_error(e, session))
    }

    async fn kv_release(&self, key: &str, session: &str) -> Result<bool> {
        let builder = self
            .request(Method::PUT, &["kv", key])?
            .query(&[("release", session)]);
        self.put_bool(builder)
            .await
            .map_err(|e| session_error(e, session))
    }

    async fn health_state(
        &self,
        options: &QueryOptions,
    ) -> Result<(Vec<HealthRecord>, QueryMeta)> {
        let builder = self.blocking(
            self.request(Method::GET, &["health", "state", "any"])?,
            options,
        );
        let response = self.send(builder).await?;
        let meta = query_meta(&response);
        let body = response_bytes(response).await?;
        Ok((payload::decode_checks(&body)?, meta))
    }
}
