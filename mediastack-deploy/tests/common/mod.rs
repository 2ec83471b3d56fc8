#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use mediastack_core::types::RestartPolicy;
use mediastack_core::{
    ConfigRef, ConfigStore, DeploymentGraph, EnvBinding, EnvValue, HealthProbe, MountSpec,
    ProbeKind, Propagation, ServiceDefinition, ServiceName, StackManifest, VolumeMount,
};
use mediastack_deploy::{InMemoryRuntime, Prober, RuntimeEngine};
use mediastack_host::{HostError, MountControl, MountOutcome};
use tempfile::TempDir;

pub const MEDIA: &str = "/mnt/zurg";

pub fn fast_probe(kind: ProbeKind) -> HealthProbe {
    HealthProbe {
        interval_ms: 0,
        retries: 3,
        ..HealthProbe::new(kind)
    }
}

fn tcp(address: &str) -> HealthProbe {
    fast_probe(ProbeKind::Tcp {
        address: address.to_string(),
    })
}

/// zurg → rclone (mount) → plex, and db → app.
pub fn manifest() -> StackManifest {
    let mut zurg = ServiceDefinition::new("zurg", "ghcr.io/debridmediamanager/zurg-testing:latest");
    zurg.health = Some(tcp("127.0.0.1:9999"));

    let mut rclone = ServiceDefinition::new("rclone", "rclone/rclone:latest");
    rclone.depends_on = vec!["zurg".into()];
    rclone.volumes = vec![VolumeMount {
        host_path: PathBuf::from(MEDIA),
        container_path: PathBuf::from("/data"),
        propagation: Some(Propagation::Rshared),
        read_only: false,
    }];

    let mut plex = ServiceDefinition::new("plex", "plexinc/pms-docker:latest");
    plex.depends_on = vec!["rclone".into()];
    plex.requires_mounts = vec![PathBuf::from(MEDIA)];

    let mut db = ServiceDefinition::new("db", "postgres:16-alpine");
    db.health = Some(tcp("127.0.0.1:5432"));
    db.env = vec![EnvBinding {
        key: "POSTGRES_PASSWORD".to_string(),
        value: EnvValue::Secret {
            secret: ConfigRef {
                group: "db".to_string(),
                key: "PASSWORD".to_string(),
            },
        },
    }];
    db.named_volumes = vec!["db-data".to_string()];
    db.volumes = vec![VolumeMount {
        host_path: PathBuf::from("db-data"),
        container_path: PathBuf::from("/var/lib/postgresql/data"),
        propagation: None,
        read_only: false,
    }];
    db.restart = RestartPolicy::Always;

    let mut app = ServiceDefinition::new("app", "spoked/riven:latest");
    app.depends_on = vec!["db".into()];
    app.health = Some(fast_probe(ProbeKind::Http {
        url: "http://127.0.0.1:8080/".to_string(),
        expect_status: None,
        expect_body: None,
    }));
    app.env = vec![EnvBinding {
        key: "DATABASE_URL".to_string(),
        value: EnvValue::Literal("postgres://app:${db.PASSWORD}@db/app".to_string()),
    }];

    StackManifest {
        project: "stack".to_string(),
        network: "stack-net".to_string(),
        mounts: vec![MountSpec {
            host_path: PathBuf::from(MEDIA),
            propagation: Propagation::Rshared,
        }],
        secrets: vec![],
        services: vec![zurg, rclone, plex, db, app],
    }
}

pub struct Fixture {
    pub dir: TempDir,
    pub store: ConfigStore,
    pub manifest: StackManifest,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::at(dir.path());
        store.set("db", "PASSWORD", "s3cret-password").unwrap();
        Self {
            dir,
            store,
            manifest: manifest(),
        }
    }

    pub fn graph(&self) -> DeploymentGraph {
        DeploymentGraph::from_manifest(&self.manifest).unwrap()
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

/// Healthy whenever the container is running, unless listed in `down`.
pub struct RunningProber<'a> {
    pub runtime: &'a InMemoryRuntime,
    pub down: HashSet<ServiceName>,
}

impl<'a> RunningProber<'a> {
    pub fn new(runtime: &'a InMemoryRuntime) -> Self {
        Self {
            runtime,
            down: HashSet::new(),
        }
    }

    pub fn with_down(mut self, service: &str) -> Self {
        self.down.insert(service.into());
        self
    }
}

impl Prober for RunningProber<'_> {
    fn probe(&self, service: &ServiceName, _probe: &HealthProbe) -> Result<(), String> {
        if self.down.contains(service) {
            return Err("connection refused".to_string());
        }
        match self.runtime.state(service) {
            Ok(s) if s.container.is_running() => Ok(()),
            Ok(s) => Err(format!("container {}", s.container)),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Records mount operations. Releasing a path while a service that
/// references it is still running is recorded as a violation.
pub struct FakeMounts<'a> {
    pub runtime: &'a InMemoryRuntime,
    pub holders: Vec<(PathBuf, ServiceName)>,
    pub failing: HashSet<PathBuf>,
    pub log: RefCell<Vec<String>>,
    pub prepared: RefCell<HashSet<PathBuf>>,
    pub violations: RefCell<Vec<String>>,
}

impl<'a> FakeMounts<'a> {
    pub fn new(runtime: &'a InMemoryRuntime, manifest: &StackManifest) -> Self {
        let holders = manifest
            .services
            .iter()
            .flat_map(|s| {
                s.mount_dependencies()
                    .into_iter()
                    .map(move |p| (p, s.name.clone()))
            })
            .collect();
        Self {
            runtime,
            holders,
            failing: HashSet::new(),
            log: RefCell::new(vec![]),
            prepared: RefCell::new(HashSet::new()),
            violations: RefCell::new(vec![]),
        }
    }

    pub fn failing_on(mut self, path: &str) -> Self {
        self.failing.insert(PathBuf::from(path));
        self
    }

    pub fn ensure_count(&self, path: &str) -> usize {
        let entry = format!("ensure {path}");
        self.log.borrow().iter().filter(|l| **l == entry).count()
    }
}

impl MountControl for FakeMounts<'_> {
    fn ensure_shared(&self, spec: &MountSpec) -> Result<MountOutcome, HostError> {
        self.log
            .borrow_mut()
            .push(format!("ensure {}", spec.host_path.display()));
        if self.failing.contains(&spec.host_path) {
            return Err(HostError::Mount {
                path: spec.host_path.clone(),
                reason: "permission denied".to_string(),
            });
        }
        if self.prepared.borrow_mut().insert(spec.host_path.clone()) {
            Ok(MountOutcome::Prepared { bind_created: true })
        } else {
            Ok(MountOutcome::AlreadyPrepared)
        }
    }

    fn release(&self, path: &Path) -> Result<bool, HostError> {
        self.log
            .borrow_mut()
            .push(format!("release {}", path.display()));
        for (held, service) in &self.holders {
            let running = self
                .runtime
                .state(service)
                .map(|s| s.container.is_running())
                .unwrap_or(false);
            if held == path && running {
                self.violations
                    .borrow_mut()
                    .push(format!("{} released while {service} runs", path.display()));
            }
        }
        Ok(self.prepared.borrow_mut().remove(path))
    }

    fn is_prepared(&self, spec: &MountSpec) -> Result<bool, HostError> {
        Ok(self.prepared.borrow().contains(&spec.host_path))
    }
}

/// Position of the first call equal to `call`.
pub fn position(calls: &[String], call: &str) -> usize {
    calls
        .iter()
        .position(|c| c == call)
        .unwrap_or_else(|| panic!("{call} not in {calls:?}"))
}
