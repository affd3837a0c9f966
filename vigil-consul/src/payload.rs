//! Consul API wire types and their conversion to Vigil types.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use vigil_core::{HealthRecord, KvEntry, Result, SessionSpec, Status, VigilError, WaitIndex};

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct SessionCreate {
    pub name: String,
    #[serde(rename = "TTL")]
    pub ttl: String,
    pub lock_delay: String,
    pub behavior: &'static str,
}

impl From<&SessionSpec> for SessionCreate {
    fn from(spec: &SessionSpec) -> Self {
        Self {
            name: spec.name.clone(),
            ttl: format_duration(spec.ttl),
            lock_delay: format_duration(spec.lock_delay),
            behavior: spec.behavior.as_str(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SessionCreated {
    #[serde(rename = "ID")]
    pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct KvPair {
    pub key: String,
    /// Base64; null for a key created without a value
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub session: Option<String>,
    pub modify_index: u64,
}

impl KvPair {
    pub fn into_entry(self) -> Result<KvEntry> {
        let value = match self.value {
            Some(encoded) => STANDARD.decode(encoded.as_bytes()).map_err(|e| {
                VigilError::serialization(format!("invalid base64 value for {}: {}", self.key, e))
            })?,
            None => Vec::new(),
        };
        Ok(KvEntry {
            key: self.key,
            value,
            session: self.session.filter(|s| !s.is_empty()),
            modify_index: WaitIndex::new(self.modify_index),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct HealthCheck {
    pub node: String,
    #[serde(rename = "CheckID")]
    pub check_id: String,
    #[serde(default)]
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub output: String,
    #[serde(rename = "ServiceID", default)]
    pub service_id: String,
    #[serde(default)]
    pub service_name: String,
}

impl HealthCheck {
    pub fn into_record(self) -> Result<HealthRecord> {
        let status = self.status.parse::<Status>()?;
        Ok(HealthRecord {
            node: self.node,
            service_id: self.service_id,
            service_name: self.service_name,
            check_id: self.check_id,
            name: self.name,
            status,
            notes: self.notes,
            output: self.output,
        })
    }
}

/// Decodes a `/v1/health/state/*` response body.
pub(crate) fn decode_checks(body: &[u8]) -> Result<Vec<HealthRecord>> {
    let checks: Vec<HealthCheck> = serde_json::from_slice(body)?;
    checks.into_iter().map(HealthCheck::into_record).collect()
}

/// Decodes a `/v1/kv/<key>` response body, which lists matching pairs.
pub(crate) fn decode_kv(body: &[u8]) -> Result<Option<KvEntry>> {
    let pairs: Vec<KvPair> = serde_json::from_slice(body)?;
    pairs.into_iter().next().map(KvPair::into_entry).transpose()
}

/// Consul duration string: whole seconds as `"15s"`, otherwise milliseconds.
pub(crate) fn format_duration(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

/// Client-side timeout of a blocking query. Consul adds up to wait/16 of
/// jitter to the requested wait.
pub(crate) fn blocking_timeout(wait: Duration, margin: Duration) -> Duration {
    wait + wait / 16 + margin
}
