//! Push configuration into a running service through its admin API.
//!
//! Each patch key is written on its own (`POST <settings>/<key>` with
//! `{"value": ...}`), so re-running is harmless. The service's settings are
//! snapshotted first and compared afterwards: top-level sections the patch
//! did not address must come back unchanged.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use mediastack_core::atomic::write_private;
use mediastack_core::resolve::interpolate;
use mediastack_core::{ConfigStore, ServiceName, SettingsEndpoint, StackError};

use crate::diff::json_diff;
use crate::error::{io_err, DeployError};
use crate::summary::Summary;

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Header name and value authenticating admin API calls.
#[derive(Clone)]
pub struct Credential {
    pub header: String,
    pub value: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("header", &self.header)
            .field("value", &"<redacted>")
            .finish()
    }
}

pub trait SettingsClient {
    fn get(&self, url: &str, auth: Option<&Credential>) -> Result<Value, DeployError>;
    fn post(&self, url: &str, auth: Option<&Credential>, body: &Value) -> Result<(), DeployError>;
}

pub struct HttpSettingsClient {
    timeout: Duration,
}

impl HttpSettingsClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

fn http_err(url: &str, e: impl fmt::Display) -> DeployError {
    DeployError::Http {
        url: url.to_string(),
        reason: e.to_string(),
    }
}

impl SettingsClient for HttpSettingsClient {
    fn get(&self, url: &str, auth: Option<&Credential>) -> Result<Value, DeployError> {
        let mut request = ureq::get(url).timeout(self.timeout);
        if let Some(c) = auth {
            request = request.set(&c.header, &c.value);
        }
        let response = request.call().map_err(|e| http_err(url, e))?;
        response.into_json().map_err(|e| http_err(url, e))
    }

    fn post(&self, url: &str, auth: Option<&Credential>, body: &Value) -> Result<(), DeployError> {
        let mut request = ureq::post(url).timeout(self.timeout);
        if let Some(c) = auth {
            request = request.set(&c.header, &c.value);
        }
        request.send_json(body).map_err(|e| http_err(url, e))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SettingsReport {
    pub service: String,
    pub snapshot: Option<PathBuf>,
    pub applied: Vec<String>,
    /// Already at the target value.
    pub skipped: Vec<String>,
    /// Key and reason for each rejected write.
    pub failed: Vec<(String, String)>,
    /// Top-level keys outside the patch whose value changed anyway.
    pub drifted: Vec<String>,
    #[serde(skip)]
    pub diff: String,
}

impl SettingsReport {
    pub fn summary(&self) -> Summary {
        let mut summary = Summary::new();
        let name = format!("settings {}", self.service);
        summary.pass(
            &name,
            format!(
                "{} applied, {} unchanged",
                self.applied.len(),
                self.skipped.len()
            ),
        );
        for (key, reason) in &self.failed {
            summary.warn(&name, format!("{key}: {reason}"));
        }
        for key in &self.drifted {
            summary.warn(&name, format!("{key} changed outside the patch"));
        }
        summary
    }
}

// ---------------------------------------------------------------------------
// Applier
// ---------------------------------------------------------------------------

pub struct SettingsApplier<'a> {
    client: &'a dyn SettingsClient,
    store: &'a ConfigStore,
    snapshots_dir: PathBuf,
}

impl<'a> SettingsApplier<'a> {
    pub fn new(
        client: &'a dyn SettingsClient,
        store: &'a ConfigStore,
        snapshots_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            store,
            snapshots_dir: snapshots_dir.into(),
        }
    }

    fn credential(
        &self,
        service: &ServiceName,
        endpoint: &SettingsEndpoint,
    ) -> Result<Option<Credential>, DeployError> {
        let Some(auth) = &endpoint.auth else {
            return Ok(None);
        };
        let header = endpoint
            .auth_header
            .clone()
            .unwrap_or_else(|| "x-api-key".to_string());
        let value = self.store.get(&auth.group, &auth.key)?.ok_or_else(|| {
            StackError::UnresolvedBinding {
                service: service.clone(),
                key: header.clone(),
                group: auth.group.clone(),
                name: auth.key.clone(),
            }
        })?;
        Ok(Some(Credential { header, value }))
    }

    /// The patch with `${group.KEY}` placeholders substituted in every string.
    fn resolved_patch(
        &self,
        service: &ServiceName,
        endpoint: &SettingsEndpoint,
    ) -> Result<Vec<(String, Value)>, DeployError> {
        endpoint
            .patch
            .iter()
            .map(|(key, value)| -> Result<(String, Value), DeployError> {
                Ok((key.clone(), self.interpolate_value(service, key, value)?))
            })
            .collect()
    }

    fn interpolate_value(
        &self,
        service: &ServiceName,
        key: &str,
        value: &Value,
    ) -> Result<Value, DeployError> {
        Ok(match value {
            Value::String(s) => Value::String(interpolate(s, self.store, service, key)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.interpolate_value(service, key, v))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| -> Result<(String, Value), DeployError> {
                        Ok((k.clone(), self.interpolate_value(service, key, v)?))
                    })
                    .collect::<Result<_, _>>()?,
            ),
            other => other.clone(),
        })
    }

    /// Snapshot, push every patch key that differs, then verify nothing
    /// outside the patch moved. Only a failed snapshot is an error; rejected
    /// keys are reported.
    pub fn apply_settings(
        &self,
        service: &ServiceName,
        endpoint: &SettingsEndpoint,
    ) -> Result<SettingsReport, DeployError> {
        let auth = self.credential(service, endpoint)?;
        let patch = self.resolved_patch(service, endpoint)?;
        let settings_url = endpoint.settings_url();

        let before = self.client.get(&settings_url, auth.as_ref())?;
        let snapshot = self.save_snapshot(service, &before)?;

        let mut report = SettingsReport {
            service: service.to_string(),
            snapshot: Some(snapshot),
            ..SettingsReport::default()
        };

        for (key, target) in &patch {
            if lookup(&before, key) == Some(target) {
                tracing::debug!(%service, key = %key, "already set");
                report.skipped.push(key.clone());
                continue;
            }
            let url = endpoint.key_url(key);
            match self
                .client
                .post(&url, auth.as_ref(), &json!({ "value": target }))
            {
                Ok(()) => report.applied.push(key.clone()),
                Err(e) => {
                    tracing::warn!(%service, key = %key, error = %e, "setting rejected");
                    report.failed.push((key.clone(), e.to_string()));
                }
            }
        }

        if report.applied.is_empty() {
            return Ok(report);
        }

        let after = self.client.get(&settings_url, auth.as_ref())?;
        let addressed: BTreeSet<&str> = patch.iter().map(|(k, _)| top_level(k)).collect();
        report.drifted = untouched_changes(&before, &after, &addressed);
        for key in &report.drifted {
            tracing::warn!(%service, key = %key, "setting changed outside the patch");
        }

        report.diff = json_diff(&before, &after, &format!("{service}/settings.json"))?;
        tracing::info!(
            %service,
            applied = report.applied.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "settings applied"
        );
        Ok(report)
    }

    /// Re-post the snapshot values of the patched keys. Uses the latest
    /// snapshot when `snapshot` is `None`.
    pub fn rollback(
        &self,
        service: &ServiceName,
        endpoint: &SettingsEndpoint,
        snapshot: Option<&Path>,
    ) -> Result<SettingsReport, DeployError> {
        let path = match snapshot {
            Some(p) => p.to_path_buf(),
            None => self.latest_snapshot(service)?.ok_or_else(|| DeployError::Io {
                path: self.snapshots_dir.join(service.as_str()),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no snapshot"),
            })?,
        };
        let raw = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        let saved: Value = serde_json::from_str(&raw)?;
        let auth = self.credential(service, endpoint)?;

        let mut report = SettingsReport {
            service: service.to_string(),
            snapshot: Some(path),
            ..SettingsReport::default()
        };
        for key in endpoint.patch.keys() {
            let Some(value) = lookup(&saved, key) else {
                report.skipped.push(key.clone());
                continue;
            };
            let url = endpoint.key_url(key);
            match self.client.post(&url, auth.as_ref(), &json!({ "value": value })) {
                Ok(()) => report.applied.push(key.clone()),
                Err(e) => report.failed.push((key.clone(), e.to_string())),
            }
        }
        Ok(report)
    }

    pub fn latest_snapshot(&self, service: &ServiceName) -> Result<Option<PathBuf>, DeployError> {
        let dir = self.snapshots_dir.join(service.as_str());
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&dir, e)),
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|x| x == "json"))
            .collect();
        files.sort();
        Ok(files.pop())
    }

    fn save_snapshot(&self, service: &ServiceName, value: &Value) -> Result<PathBuf, DeployError> {
        let dir = self.snapshots_dir.join(service.as_str());
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
        let mut path = dir.join(format!("{stamp}.json"));
        let mut n = 1;
        while path.exists() {
            path = dir.join(format!("{stamp}-{n}.json"));
            n += 1;
        }
        // Settings carry API keys.
        write_private(&path, &serde_json::to_string_pretty(value)?)?;
        tracing::debug!(%service, path = %path.display(), "settings snapshot saved");
        Ok(path)
    }
}

fn top_level(key: &str) -> &str {
    key.split('.').next().unwrap_or(key)
}

/// Value at a dotted path (`downloaders.real_debrid.api_key`).
pub fn lookup<'v>(value: &'v Value, dotted: &str) -> Option<&'v Value> {
    dotted
        .split('.')
        .try_fold(value, |current, segment| current.get(segment))
}

/// Top-level keys not in `addressed` whose value differs between the two
/// documents (including keys that appeared or vanished).
fn untouched_changes(before: &Value, after: &Value, addressed: &BTreeSet<&str>) -> Vec<String> {
    let keys: BTreeSet<&str> = [before, after]
        .iter()
        .filter_map(|v| v.as_object())
        .flat_map(|m| m.keys().map(String::as_str))
        .collect();
    keys.into_iter()
        .filter(|k| !addressed.contains(k))
        .filter(|k| before.get(*k) != after.get(*k))
        .map(str::to_string)
        .collect()
}
