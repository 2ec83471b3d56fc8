//! Readiness probing.
//!
//! A probe is retried at its interval until it succeeds, its retries run out,
//! or its max wait elapses. Timing out is a [`Readiness`] value, never an
//! error: the caller decides whether dependents are blocked.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use mediastack_core::{
    retry, Backoff, DeploymentGraph, HealthProbe, HealthStatus, ProbeKind, ServiceName,
};

use crate::error::DeployError;
use crate::runtime::RuntimeEngine;
use crate::summary::Summary;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready { attempts: u32 },
    TimedOut { attempts: u32, last_error: String },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready { .. })
    }
}

/// One probe attempt. `Err` carries a human-readable reason.
pub trait Prober {
    fn probe(&self, service: &ServiceName, probe: &HealthProbe) -> Result<(), String>;
}

/// Probes the real endpoints: HTTP via ureq, TCP connect, exec through the
/// runtime.
pub struct LiveProber<'a> {
    runtime: &'a dyn RuntimeEngine,
}

impl<'a> LiveProber<'a> {
    pub fn new(runtime: &'a dyn RuntimeEngine) -> Self {
        Self { runtime }
    }
}

impl Prober for LiveProber<'_> {
    fn probe(&self, service: &ServiceName, probe: &HealthProbe) -> Result<(), String> {
        match &probe.kind {
            ProbeKind::Http {
                url,
                expect_status,
                expect_body,
            } => {
                let response = match ureq::get(url).timeout(probe.timeout()).call() {
                    Ok(r) => r,
                    Err(ureq::Error::Status(_, r)) => r,
                    Err(e) => return Err(e.to_string()),
                };
                let status = response.status();
                let status_ok = match expect_status {
                    Some(expected) => status == *expected,
                    None => (200..300).contains(&status),
                };
                if !status_ok {
                    return Err(format!("{url} returned {status}"));
                }
                if let Some(needle) = expect_body {
                    let body = response.into_string().map_err(|e| e.to_string())?;
                    if !body.contains(needle.as_str()) {
                        return Err(format!("{url} body does not contain '{needle}'"));
                    }
                }
                Ok(())
            }
            ProbeKind::Tcp { address } => {
                let addr = address
                    .to_socket_addrs()
                    .map_err(|e| format!("{address}: {e}"))?
                    .next()
                    .ok_or_else(|| format!("{address}: no address"))?;
                TcpStream::connect_timeout(&addr, probe.timeout())
                    .map(|_| ())
                    .map_err(|e| format!("{address}: {e}"))
            }
            ProbeKind::Exec { command } => {
                let out = self
                    .runtime
                    .exec(service, command)
                    .map_err(|e| e.to_string())?;
                if out.success() {
                    Ok(())
                } else {
                    Err(format!(
                        "`{}` exited with {}: {}",
                        command.join(" "),
                        out.code.map_or("signal".to_string(), |c| c.to_string()),
                        out.stderr.trim()
                    ))
                }
            }
        }
    }
}

pub struct HealthChecker<'a> {
    prober: &'a dyn Prober,
}

impl<'a> HealthChecker<'a> {
    pub fn new(prober: &'a dyn Prober) -> Self {
        Self { prober }
    }

    /// Poll `probe` until it succeeds, its retries run out or `max_wait`
    /// has elapsed. A zero `max_wait` leaves only the retry bound.
    pub fn wait_ready(
        &self,
        service: &ServiceName,
        probe: &HealthProbe,
        max_wait: Duration,
    ) -> Readiness {
        let started = Instant::now();
        let mut attempts = 0;

        // Ok(Err(_)) stops early once slow attempts have used up the budget.
        let outcome = retry(
            probe.retries.max(1),
            Backoff::Fixed(probe.interval()),
            |attempt| {
                attempts = attempt;
                match self.prober.probe(service, probe) {
                    Ok(()) => Ok(Ok(())),
                    Err(e) if !max_wait.is_zero() && started.elapsed() >= max_wait => {
                        Ok(Err(e))
                    }
                    Err(e) => {
                        tracing::debug!(%service, attempt, error = %e, "not ready");
                        Err(e)
                    }
                }
            },
        );

        match outcome {
            Ok(Ok(())) => {
                tracing::info!(%service, attempts, probe = %probe.kind, "ready");
                Readiness::Ready { attempts }
            }
            Ok(Err(last_error)) | Err(last_error) => {
                tracing::warn!(%service, attempts, error = %last_error, "health timeout");
                Readiness::TimedOut {
                    attempts,
                    last_error,
                }
            }
        }
    }

    /// Probe every service of `graph` in start order without changing
    /// anything.
    pub fn check_all(
        &self,
        graph: &DeploymentGraph,
        runtime: &dyn RuntimeEngine,
    ) -> Result<Summary, DeployError> {
        let mut summary = Summary::new();
        for service in graph.topological_order()? {
            let name = &service.name;
            let state = runtime.state(name)?;
            if !state.container.is_running() {
                summary.fail(name.as_str(), format!("container {}", state.container));
                continue;
            }
            match &service.health {
                Some(probe) => match self.wait_ready(name, probe, probe.max_wait()) {
                    Readiness::Ready { attempts } => summary.pass(
                        name.as_str(),
                        format!("{} ok after {attempts} attempt(s)", probe.kind),
                    ),
                    Readiness::TimedOut { last_error, .. } => {
                        summary.fail(name.as_str(), last_error)
                    }
                },
                None if state.health == HealthStatus::Unhealthy => {
                    summary.warn(name.as_str(), "runtime reports unhealthy")
                }
                None => summary.pass(name.as_str(), "running"),
            }
        }
        Ok(summary)
    }
}
