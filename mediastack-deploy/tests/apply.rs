mod common;

use std::collections::HashSet;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::time::Duration;

use common::{position, Fixture, FakeMounts, RunningProber, MEDIA};
use mediastack_core::{Backoff, ContainerStatus, ProbeKind, ServiceName, ServiceState};
use mediastack_deploy::{
    Action, ApplyOptions, DeployError, Drift, InMemoryRuntime, LiveProber, Orchestrator,
};

fn name(s: &str) -> ServiceName {
    s.into()
}

#[test]
fn apply_twice_is_idempotent() {
    let fx = Fixture::new();
    let graph = fx.graph();
    let runtime = InMemoryRuntime::new();
    let mounts = FakeMounts::new(&runtime, &fx.manifest);
    let prober = RunningProber::new(&runtime);
    let orch = Orchestrator::new(&fx.manifest, &fx.store, &runtime, &mounts, &prober);

    let first = orch.apply(&graph, ApplyOptions::default()).unwrap();
    assert!(first.summary().is_success(), "{:?}", first.summary());
    assert!(first
        .outcomes
        .iter()
        .all(|o| o.action == Some(Action::Created)));

    runtime.clear_calls();
    let second = orch.apply(&graph, ApplyOptions::default()).unwrap();
    assert!(second
        .outcomes
        .iter()
        .all(|o| o.action == Some(Action::Unchanged)
            && o.state == ServiceState::Running { healthy: true }));

    let calls = runtime.calls();
    assert!(
        !calls.iter().any(|c| c.starts_with("up ")
            || c.starts_with("recreate ")
            || c.starts_with("start ")),
        "unexpected restarts: {calls:?}"
    );
    assert_eq!(runtime.networks().len(), 1);
    assert_eq!(runtime.declared().unwrap().services.len(), 5);
}

#[test]
fn dependents_start_after_their_dependencies_are_ready() {
    let fx = Fixture::new();
    let runtime = InMemoryRuntime::new();
    let mounts = FakeMounts::new(&runtime, &fx.manifest);
    let prober = RunningProber::new(&runtime);
    let orch = Orchestrator::new(&fx.manifest, &fx.store, &runtime, &mounts, &prober);

    let report = orch.apply(&fx.graph(), ApplyOptions::default()).unwrap();

    let ready_at = |svc: &str| {
        report
            .transitions
            .iter()
            .position(|t| t.service == name(svc) && t.state == ServiceState::Running { healthy: true })
            .unwrap()
    };
    let starting_at = |svc: &str| {
        report
            .transitions
            .iter()
            .position(|t| t.service == name(svc) && t.state == ServiceState::Starting)
            .unwrap()
    };
    assert!(ready_at("db") < starting_at("app"));
    assert!(ready_at("zurg") < starting_at("rclone"));
    assert!(ready_at("rclone") < starting_at("plex"));
}

#[test]
fn unhealthy_dependency_blocks_its_subtree() {
    let fx = Fixture::new();
    let runtime = InMemoryRuntime::new();
    let mounts = FakeMounts::new(&runtime, &fx.manifest);
    let prober = RunningProber::new(&runtime).with_down("db");
    let orch = Orchestrator::new(&fx.manifest, &fx.store, &runtime, &mounts, &prober);

    let report = orch.apply(&fx.graph(), ApplyOptions::default()).unwrap();

    assert_eq!(
        report.state_of(&name("db")),
        Some(&ServiceState::Running { healthy: false })
    );
    assert_eq!(
        report.state_of(&name("app")),
        Some(&ServiceState::Blocked { by: name("db") })
    );
    assert!(!runtime.calls().contains(&"up app".to_string()));
    // The other branch is unaffected.
    assert_eq!(
        report.state_of(&name("plex")),
        Some(&ServiceState::Running { healthy: true })
    );
    let summary = report.summary();
    assert!(!summary.is_success());
    assert!(summary.status_line().starts_with("⚠️ 1 of 5 checks failed"));
}

#[test]
fn tolerated_health_timeout_lets_dependents_start() {
    let fx = Fixture::new();
    let runtime = InMemoryRuntime::new();
    let mounts = FakeMounts::new(&runtime, &fx.manifest);
    let prober = RunningProber::new(&runtime).with_down("db");
    let orch = Orchestrator::new(&fx.manifest, &fx.store, &runtime, &mounts, &prober);

    let options = ApplyOptions {
        tolerate_unhealthy: true,
        ..ApplyOptions::default()
    };
    let report = orch.apply(&fx.graph(), options).unwrap();
    assert_eq!(
        report.state_of(&name("app")),
        Some(&ServiceState::Running { healthy: true })
    );
    let summary = report.summary();
    assert!(!summary.is_success());
    assert_eq!(summary.warnings(), 1);
    assert!(summary.status_line().starts_with("⚠️"));
}

#[test]
fn failed_mount_keeps_dependent_services_down() {
    let fx = Fixture::new();
    let runtime = InMemoryRuntime::new();
    let mounts = FakeMounts::new(&runtime, &fx.manifest).failing_on(MEDIA);
    let prober = RunningProber::new(&runtime);
    let orch = Orchestrator::new(&fx.manifest, &fx.store, &runtime, &mounts, &prober);

    let report = orch.apply(&fx.graph(), ApplyOptions::default()).unwrap();

    assert!(matches!(
        report.state_of(&name("rclone")),
        Some(ServiceState::Failed { reason }) if reason.contains("/mnt/zurg")
    ));
    assert_eq!(
        report.state_of(&name("plex")),
        Some(&ServiceState::Blocked { by: name("rclone") })
    );
    let calls = runtime.calls();
    assert!(!calls.contains(&"up rclone".to_string()));
    assert!(!calls.contains(&"up plex".to_string()));
    assert!(calls.contains(&"up zurg".to_string()));
}

#[test]
fn mount_is_ensured_once_per_run_and_again_next_run() {
    let fx = Fixture::new();
    let runtime = InMemoryRuntime::new();
    let mounts = FakeMounts::new(&runtime, &fx.manifest);
    let prober = RunningProber::new(&runtime);
    let orch = Orchestrator::new(&fx.manifest, &fx.store, &runtime, &mounts, &prober);

    orch.apply(&fx.graph(), ApplyOptions::default()).unwrap();
    assert_eq!(mounts.ensure_count(MEDIA), 1);
    orch.apply(&fx.graph(), ApplyOptions::default()).unwrap();
    assert_eq!(mounts.ensure_count(MEDIA), 2);

    let log = mounts.log.borrow();
    let calls = runtime.calls();
    assert_eq!(log[0], format!("ensure {MEDIA}"));
    assert!(position(&calls, "up zurg") < position(&calls, "up rclone"));
}

#[test]
fn cycle_is_rejected_before_anything_runs() {
    let mut fx = Fixture::new();
    for service in fx.manifest.services.iter_mut() {
        if service.name.as_str() == "db" {
            service.depends_on.push("app".into());
        }
    }
    let graph = mediastack_core::DeploymentGraph::from_services(fx.manifest.services.clone())
        .unwrap();
    let runtime = InMemoryRuntime::new();
    let mounts = FakeMounts::new(&runtime, &fx.manifest);
    let prober = RunningProber::new(&runtime);
    let orch = Orchestrator::new(&fx.manifest, &fx.store, &runtime, &mounts, &prober);

    let err = orch.apply(&graph, ApplyOptions::default()).unwrap_err();
    assert!(err.is_validation(), "{err}");
    assert!(err.to_string().contains("cycle"));
    assert!(runtime.calls().is_empty());
    assert!(mounts.log.borrow().is_empty());
}

#[test]
fn missing_secret_is_rejected_before_anything_runs() {
    let fx = Fixture::new();
    fx.store.remove("db", "PASSWORD").unwrap();
    let runtime = InMemoryRuntime::new();
    let mounts = FakeMounts::new(&runtime, &fx.manifest);
    let prober = RunningProber::new(&runtime);
    let orch = Orchestrator::new(&fx.manifest, &fx.store, &runtime, &mounts, &prober);

    let err = orch.apply(&fx.graph(), ApplyOptions::default()).unwrap_err();
    assert!(matches!(err, DeployError::Stack(_)));
    assert!(err.is_validation());
    assert!(runtime.calls().is_empty());
}

#[test]
fn changed_binding_recreates_only_affected_services() {
    let fx = Fixture::new();
    let graph = fx.graph();
    let runtime = InMemoryRuntime::new();
    let mounts = FakeMounts::new(&runtime, &fx.manifest);
    let prober = RunningProber::new(&runtime);
    let orch = Orchestrator::new(&fx.manifest, &fx.store, &runtime, &mounts, &prober);
    orch.apply(&graph, ApplyOptions::default()).unwrap();

    fx.store.set("db", "PASSWORD", "rotated-password").unwrap();
    let report = orch.apply(&graph, ApplyOptions::default()).unwrap();

    let action = |svc: &str| report.outcome(&name(svc)).and_then(|o| o.action);
    assert_eq!(action("db"), Some(Action::Recreated));
    assert_eq!(action("app"), Some(Action::Recreated));
    assert_eq!(action("zurg"), Some(Action::Unchanged));
    assert_eq!(action("plex"), Some(Action::Unchanged));

    let statuses = orch.status(&graph).unwrap();
    assert!(statuses.iter().all(|s| s.drift == Drift::InSync));
}

#[test]
fn stopped_container_is_started_not_recreated() {
    let fx = Fixture::new();
    let graph = fx.graph();
    let runtime = InMemoryRuntime::new();
    let mounts = FakeMounts::new(&runtime, &fx.manifest);
    let prober = RunningProber::new(&runtime);
    let orch = Orchestrator::new(&fx.manifest, &fx.store, &runtime, &mounts, &prober);
    orch.apply(&graph, ApplyOptions::default()).unwrap();

    runtime.set_status("zurg", ContainerStatus::Exited);
    let report = orch.apply(&graph, ApplyOptions::default()).unwrap();
    assert_eq!(
        report.outcome(&name("zurg")).and_then(|o| o.action),
        Some(Action::Started)
    );
    assert!(runtime.calls().contains(&"start zurg".to_string()));
}

#[test]
fn runtime_failure_marks_service_failed_and_blocks_dependents() {
    let fx = Fixture::new();
    let runtime = InMemoryRuntime::new();
    runtime.fail_on("zurg");
    let mounts = FakeMounts::new(&runtime, &fx.manifest);
    let prober = RunningProber::new(&runtime);
    let orch = Orchestrator::new(&fx.manifest, &fx.store, &runtime, &mounts, &prober);

    let report = orch.apply(&fx.graph(), ApplyOptions::default()).unwrap();
    assert!(matches!(
        report.state_of(&name("zurg")),
        Some(ServiceState::Failed { .. })
    ));
    assert_eq!(
        report.state_of(&name("rclone")),
        Some(&ServiceState::Blocked { by: name("zurg") })
    );
    assert_eq!(
        report.state_of(&name("plex")),
        Some(&ServiceState::Blocked { by: name("rclone") })
    );
    assert_eq!(
        report.state_of(&name("app")),
        Some(&ServiceState::Running { healthy: true })
    );
}

#[test]
fn update_pulls_then_refreshes() {
    let fx = Fixture::new();
    let graph = fx.graph();
    let runtime = InMemoryRuntime::new();
    runtime.fail_pull_on("plex");
    let mounts = FakeMounts::new(&runtime, &fx.manifest);
    let prober = RunningProber::new(&runtime);
    let orch = Orchestrator::new(&fx.manifest, &fx.store, &runtime, &mounts, &prober)
        .with_pull_retry(2, Backoff::Fixed(Duration::ZERO));
    orch.apply(&graph, ApplyOptions::default()).unwrap();
    runtime.clear_calls();

    let report = orch.update(&graph, ApplyOptions::default()).unwrap();

    let calls = runtime.calls();
    assert_eq!(calls.iter().filter(|c| *c == "pull plex").count(), 2);
    assert!(position(&calls, "pull app") < position(&calls, "declare stack"));
    assert!(report
        .outcomes
        .iter()
        .all(|o| o.action == Some(Action::Refreshed)));
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("plex"));
    let summary = report.summary();
    assert!(!summary.is_success());
    assert_eq!(summary.failed(), 0);
}

/// Minimal HTTP responder: answers every connection with `status`.
fn http_server(status: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            let body = "ok";
            let _ = write!(
                stream,
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
        }
    });
    format!("http://{addr}/health")
}

/// db probed over TCP, app over HTTP, app depends on db.
fn end_to_end(app_status: &'static str) -> mediastack_deploy::RunReport {
    let mut fx = Fixture::new();
    let db_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let db_addr = db_listener.local_addr().unwrap().to_string();
    let app_url = http_server(app_status);

    fx.manifest
        .services
        .retain(|s| s.name.as_str() == "db" || s.name.as_str() == "app");
    for service in fx.manifest.services.iter_mut() {
        let kind = match service.name.as_str() {
            "db" => ProbeKind::Tcp {
                address: db_addr.clone(),
            },
            _ => ProbeKind::Http {
                url: app_url.clone(),
                expect_status: None,
                expect_body: Some("ok".to_string()),
            },
        };
        let mut probe = common::fast_probe(kind);
        probe.timeout_ms = 1_000;
        service.health = Some(probe);
    }

    let runtime = InMemoryRuntime::new();
    let mounts = FakeMounts::new(&runtime, &fx.manifest);
    let prober = LiveProber::new(&runtime);
    let orch = Orchestrator::new(&fx.manifest, &fx.store, &runtime, &mounts, &prober);
    let report = orch.apply(&fx.graph(), ApplyOptions::default()).unwrap();
    drop(db_listener);
    report
}

#[test]
fn end_to_end_ready_when_both_probes_pass() {
    let report = end_to_end("200 OK");
    assert_eq!(
        report.state_of(&name("db")),
        Some(&ServiceState::Running { healthy: true })
    );
    assert_eq!(
        report.state_of(&name("app")),
        Some(&ServiceState::Running { healthy: true })
    );
    assert!(report.summary().is_success());
}

#[test]
fn end_to_end_not_ready_when_app_probe_fails() {
    let report = end_to_end("503 Service Unavailable");
    assert_eq!(
        report.state_of(&name("db")),
        Some(&ServiceState::Running { healthy: true })
    );
    let app = report.outcome(&name("app")).unwrap();
    assert_eq!(app.state, ServiceState::Running { healthy: false });
    assert!(app.detail.as_deref().unwrap_or_default().contains("503"));

    let names: HashSet<_> = report.outcomes.iter().map(|o| o.service.clone()).collect();
    assert_eq!(names.len(), 2);

    let summary = report.summary();
    assert!(!summary.is_success());
    assert!(summary.status_line().starts_with("⚠️"));
}
