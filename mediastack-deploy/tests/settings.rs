use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};

use mediastack_core::{ConfigRef, ConfigStore, ServiceName, SettingsEndpoint};
use mediastack_deploy::settings::Credential;
use mediastack_deploy::{DeployError, SettingsApplier, SettingsClient};
use serde_json::{json, Value};
use tempfile::TempDir;

const BASE: &str = "http://riven.test:8080";
const SETTINGS: &str = "http://riven.test:8080/api/v1/settings";

/// Settings API double. POST `<settings>/<dotted.key>` with `{"value": v}`
/// sets that path in the stored document.
struct FakeSettings {
    state: RefCell<Value>,
    rejected: HashSet<String>,
    /// Applied to the document after every accepted POST, simulating a
    /// server that rewrites unrelated settings.
    clobber: Option<(String, Value)>,
    seen_auth: RefCell<Vec<Option<String>>>,
    posts: RefCell<Vec<String>>,
}

impl FakeSettings {
    fn new(state: Value) -> Self {
        Self {
            state: RefCell::new(state),
            rejected: HashSet::new(),
            clobber: None,
            seen_auth: RefCell::new(vec![]),
            posts: RefCell::new(vec![]),
        }
    }

    fn rejecting(mut self, key: &str) -> Self {
        self.rejected.insert(key.to_string());
        self
    }

    fn clobbering(mut self, key: &str, value: Value) -> Self {
        self.clobber = Some((key.to_string(), value));
        self
    }

    fn value(&self) -> Value {
        self.state.borrow().clone()
    }
}

fn set_path(doc: &mut Value, dotted: &str, value: Value) {
    let mut current = doc;
    let segments: Vec<&str> = dotted.split('.').collect();
    for segment in &segments[..segments.len() - 1] {
        if !current.get(*segment).is_some_and(Value::is_object) {
            current[*segment] = json!({});
        }
        current = &mut current[*segment];
    }
    current[segments[segments.len() - 1]] = value;
}

impl SettingsClient for FakeSettings {
    fn get(&self, url: &str, auth: Option<&Credential>) -> Result<Value, DeployError> {
        assert_eq!(url, SETTINGS);
        self.seen_auth
            .borrow_mut()
            .push(auth.map(|c| format!("{}: {}", c.header, c.value)));
        Ok(self.value())
    }

    fn post(&self, url: &str, _auth: Option<&Credential>, body: &Value) -> Result<(), DeployError> {
        let key = url
            .strip_prefix(&format!("{SETTINGS}/"))
            .expect("post under the settings path");
        self.posts.borrow_mut().push(key.to_string());
        if self.rejected.contains(key) {
            return Err(DeployError::Http {
                url: url.to_string(),
                reason: "status code 422".to_string(),
            });
        }
        let mut state = self.state.borrow_mut();
        set_path(&mut state, key, body["value"].clone());
        if let Some((k, v)) = &self.clobber {
            set_path(&mut state, k, v.clone());
        }
        Ok(())
    }
}

fn riven() -> ServiceName {
    ServiceName::from("riven")
}

fn initial() -> Value {
    json!({
        "version": "0.20.1",
        "debug": false,
        "downloaders": {"real_debrid": {"enabled": false, "api_key": ""}},
        "symlink": {"rclone_path": "/mnt/old", "library_path": "/mnt/library"},
        "updaters": {"plex": {"enabled": false, "url": "http://localhost:32400"}}
    })
}

fn endpoint(patch: Value) -> SettingsEndpoint {
    let patch: BTreeMap<String, Value> = serde_json::from_value(patch).unwrap();
    SettingsEndpoint {
        base_url: format!("{BASE}/"),
        path: "/api/v1/settings".to_string(),
        auth_header: None,
        auth: Some(ConfigRef {
            group: "riven".to_string(),
            key: "API_KEY".to_string(),
        }),
        patch,
    }
}

fn default_patch() -> Value {
    json!({
        "downloaders.real_debrid.enabled": true,
        "downloaders.real_debrid.api_key": "${zurg.RD_TOKEN}",
        "symlink.rclone_path": "/mnt/zurg/__all__",
        "updaters.plex.enabled": true
    })
}

struct Env {
    dir: TempDir,
    store: ConfigStore,
}

impl Env {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::at(dir.path());
        store.set("riven", "API_KEY", "riven-key-0001").unwrap();
        store.set("zurg", "RD_TOKEN", "rd-token-abc").unwrap();
        Self { dir, store }
    }

    fn applier<'a>(&'a self, client: &'a FakeSettings) -> SettingsApplier<'a> {
        SettingsApplier::new(client, &self.store, self.dir.path().join("snapshots"))
    }
}

#[test]
fn patch_merges_and_leaves_other_settings_alone() {
    let env = Env::new();
    let client = FakeSettings::new(initial());
    let report = env
        .applier(&client)
        .apply_settings(&riven(), &endpoint(default_patch()))
        .unwrap();

    assert_eq!(report.applied.len(), 4);
    assert!(report.failed.is_empty());
    assert!(report.drifted.is_empty());

    let after = client.value();
    assert_eq!(after["downloaders"]["real_debrid"]["enabled"], json!(true));
    assert_eq!(after["downloaders"]["real_debrid"]["api_key"], json!("rd-token-abc"));
    assert_eq!(after["symlink"]["rclone_path"], json!("/mnt/zurg/__all__"));
    // Untouched siblings survive.
    assert_eq!(after["symlink"]["library_path"], json!("/mnt/library"));
    assert_eq!(after["updaters"]["plex"]["url"], json!("http://localhost:32400"));
    assert_eq!(after["version"], json!("0.20.1"));

    assert!(report.diff.contains("+") && report.diff.contains("rd-token-abc"));
    assert_eq!(
        client.seen_auth.borrow()[0].as_deref(),
        Some("x-api-key: riven-key-0001")
    );
}

#[test]
fn snapshot_is_saved_before_patching() {
    let env = Env::new();
    let client = FakeSettings::new(initial());
    let applier = env.applier(&client);
    let report = applier
        .apply_settings(&riven(), &endpoint(default_patch()))
        .unwrap();

    let snapshot = report.snapshot.unwrap();
    assert!(snapshot.starts_with(env.dir.path().join("snapshots").join("riven")));
    let saved: Value = serde_json::from_str(&std::fs::read_to_string(&snapshot).unwrap()).unwrap();
    assert_eq!(saved, initial());
    assert_eq!(applier.latest_snapshot(&riven()).unwrap(), Some(snapshot.clone()));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&snapshot).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

#[test]
fn second_apply_skips_every_key() {
    let env = Env::new();
    let client = FakeSettings::new(initial());
    let applier = env.applier(&client);
    let ep = endpoint(default_patch());
    applier.apply_settings(&riven(), &ep).unwrap();
    client.posts.borrow_mut().clear();

    let again = applier.apply_settings(&riven(), &ep).unwrap();
    assert!(again.applied.is_empty());
    assert_eq!(again.skipped.len(), 4);
    assert!(client.posts.borrow().is_empty());
    assert!(again.diff.is_empty());
}

#[test]
fn rejected_key_does_not_stop_the_rest() {
    let env = Env::new();
    let client = FakeSettings::new(initial()).rejecting("updaters.plex.enabled");
    let report = env
        .applier(&client)
        .apply_settings(&riven(), &endpoint(default_patch()))
        .unwrap();

    assert_eq!(report.applied.len(), 3);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "updaters.plex.enabled");
    assert!(report.failed[0].1.contains("422"));
    assert_eq!(client.value()["updaters"]["plex"]["enabled"], json!(false));

    let summary = report.summary();
    assert!(!summary.is_success());
    assert_eq!(summary.failed(), 0);
    assert_eq!(summary.warnings(), 1);
}

#[test]
fn server_side_rewrite_is_reported_as_drift() {
    let env = Env::new();
    let client = FakeSettings::new(initial()).clobbering("debug", json!(true));
    let report = env
        .applier(&client)
        .apply_settings(&riven(), &endpoint(default_patch()))
        .unwrap();

    assert_eq!(report.drifted, vec!["debug".to_string()]);
    assert_eq!(report.summary().warnings(), 1);
}

#[test]
fn rollback_restores_snapshot_values() {
    let env = Env::new();
    let client = FakeSettings::new(initial());
    let applier = env.applier(&client);
    let ep = endpoint(default_patch());
    applier.apply_settings(&riven(), &ep).unwrap();
    assert_eq!(client.value()["symlink"]["rclone_path"], json!("/mnt/zurg/__all__"));

    let report = applier.rollback(&riven(), &ep, None).unwrap();
    assert_eq!(report.applied.len(), 4);
    assert_eq!(client.value(), initial());
}

#[test]
fn rollback_without_snapshot_errors() {
    let env = Env::new();
    let client = FakeSettings::new(initial());
    let err = env
        .applier(&client)
        .rollback(&riven(), &endpoint(default_patch()), None)
        .unwrap_err();
    assert!(matches!(err, DeployError::Io { .. }));
}

#[test]
fn missing_credential_fails_before_any_request() {
    let env = Env::new();
    env.store.remove("riven", "API_KEY").unwrap();
    let client = FakeSettings::new(initial());
    let err = env
        .applier(&client)
        .apply_settings(&riven(), &endpoint(default_patch()))
        .unwrap_err();

    assert!(err.is_validation());
    assert!(err.to_string().contains("API_KEY"), "{err}");
    assert!(client.seen_auth.borrow().is_empty());
}

#[test]
fn missing_placeholder_value_fails_before_any_request() {
    let env = Env::new();
    env.store.remove("zurg", "RD_TOKEN").unwrap();
    let client = FakeSettings::new(initial());
    let err = env
        .applier(&client)
        .apply_settings(&riven(), &endpoint(default_patch()))
        .unwrap_err();
    assert!(err.is_validation());
    assert!(client.posts.borrow().is_empty());
}

#[test]
fn custom_auth_header_is_used() {
    let env = Env::new();
    let client = FakeSettings::new(initial());
    let mut ep = endpoint(json!({"debug": true}));
    ep.auth_header = Some("Authorization".to_string());
    env.applier(&client).apply_settings(&riven(), &ep).unwrap();
    assert_eq!(
        client.seen_auth.borrow()[0].as_deref(),
        Some("Authorization: riven-key-0001")
    );
}
