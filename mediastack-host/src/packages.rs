//! Container engine packages through apt, including the vendor repository
//! registration (keyring + `sources.list.d` entry).

use std::fs;
use std::io::{ErrorKind, Read};
use std::path::PathBuf;
use std::time::Duration;

use mediastack_core::config::AptConfig;

use crate::command::{argv, CommandRunner};
use crate::error::{io_err, HostError};
use crate::facts::HostFacts;
use crate::systemd::write_if_changed;

const APT_ENV: &str = "DEBIAN_FRONTEND=noninteractive";

pub struct AptPackages<R> {
    runner: R,
    config: AptConfig,
    timeout: Duration,
}

impl<R: CommandRunner> AptPackages<R> {
    pub fn new(runner: R, config: AptConfig, timeout: Duration) -> Self {
        Self {
            runner,
            config,
            timeout,
        }
    }

    pub fn sources_path(&self) -> PathBuf {
        self.config
            .sources_dir
            .join(format!("{}.list", self.config.repository_name))
    }

    /// `deb [arch=amd64 signed-by=/etc/apt/keyrings/docker.asc] <url> bookworm stable`
    pub fn sources_line(&self, facts: &HostFacts) -> String {
        format!(
            "deb [arch={} signed-by={}] {} {} {}\n",
            facts.architecture,
            self.config.keyring_path.display(),
            self.config.repository_url,
            facts.codename,
            self.config.component
        )
    }

    pub fn is_installed(&self, package: &str) -> Result<bool, HostError> {
        let out = self
            .runner
            .run("dpkg-query", &argv(&["-W", "-f=${Status}", package]))?;
        Ok(out.success() && out.stdout.contains("install ok installed"))
    }

    /// Configured packages that dpkg does not report as installed.
    pub fn missing(&self) -> Result<Vec<String>, HostError> {
        let mut missing = Vec::new();
        for package in &self.config.packages {
            if !self.is_installed(package)? {
                missing.push(package.clone());
            }
        }
        Ok(missing)
    }

    /// Download the keyring if absent and write the sources entry if it
    /// differs. Returns `true` when anything changed.
    pub fn ensure_repository(&self, facts: &HostFacts) -> Result<bool, HostError> {
        let mut changed = false;
        let keyring = &self.config.keyring_path;
        if !keyring.exists() {
            let key = fetch(&self.config.key_url, self.timeout)?;
            if let Some(parent) = keyring.parent() {
                fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
            }
            fs::write(keyring, key).map_err(|e| io_err(keyring, e))?;
            changed = true;
        }
        changed |= write_if_changed(&self.sources_path(), &self.sources_line(facts))?;
        Ok(changed)
    }

    /// Install whatever is missing. Returns the packages installed.
    pub fn install(&self, facts: &HostFacts) -> Result<Vec<String>, HostError> {
        let missing = self.missing()?;
        if missing.is_empty() {
            tracing::debug!("engine packages already installed");
            return Ok(missing);
        }
        self.ensure_repository(facts)?;
        self.runner
            .run_checked("env", &argv(&[APT_ENV, "apt-get", "update"]))?;
        let mut args = argv(&[APT_ENV, "apt-get", "install", "-y"]);
        args.extend(missing.iter().cloned());
        self.runner.run_checked("env", &args)?;
        tracing::info!(packages = %missing.join(" "), "installed packages");
        Ok(missing)
    }

    /// Purge the configured packages and remove the repository registration.
    /// The repository files are removed even when apt fails; every failure
    /// is returned together.
    pub fn purge(&self) -> Result<(), HostError> {
        let mut errors = Vec::new();
        let mut args = argv(&[APT_ENV, "apt-get", "purge", "-y"]);
        args.extend(self.config.packages.iter().cloned());
        if let Err(e) = self.runner.run_checked("env", &args) {
            tracing::warn!(error = %e, "package purge failed");
            errors.push(e);
        }

        for path in [self.sources_path(), self.config.keyring_path.clone()] {
            match fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "removed"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => errors.push(io_err(&path, e)),
            }
        }
        HostError::from_steps("package purge", errors)?;
        tracing::info!("engine packages and repository removed");
        Ok(())
    }
}

fn fetch(url: &str, timeout: Duration) -> Result<Vec<u8>, HostError> {
    let download_err = |reason: String| HostError::Download {
        url: url.to_string(),
        reason,
    };
    let response = ureq::get(url)
        .timeout(timeout)
        .call()
        .map_err(|e| download_err(e.to_string()))?;
    let mut body = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut body)
        .map_err(|e| download_err(e.to_string()))?;
    Ok(body)
}
