//! Boot-time registration of managed mounts as systemd units.
//!
//! Each [`MountSpec`] gets a oneshot unit ordered before the container
//! engine, and the engine gets a drop-in requiring those units, so the
//! propagation is re-established on every boot before any container starts.

use std::fs;
use std::path::{Path, PathBuf};

use mediastack_core::types::MountSpec;
use mediastack_renderer::context::UNIT_PREFIX;
use mediastack_renderer::engine::DROPIN_FILE;
use mediastack_renderer::Renderer;

use crate::command::{argv, CommandRunner};
use crate::error::{io_err, HostError};

/// Result of [`BootUnits::install`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitChanges {
    pub written: Vec<PathBuf>,
    pub unchanged: Vec<PathBuf>,
}

impl UnitChanges {
    pub fn changed(&self) -> bool {
        !self.written.is_empty()
    }
}

pub struct BootUnits<R> {
    runner: R,
    unit_dir: PathBuf,
    engine_unit: String,
}

impl<R: CommandRunner> BootUnits<R> {
    pub fn new(runner: R, unit_dir: impl Into<PathBuf>, engine_unit: impl Into<String>) -> Self {
        Self {
            runner,
            unit_dir: unit_dir.into(),
            engine_unit: engine_unit.into(),
        }
    }

    fn dropin_path(&self) -> PathBuf {
        self.unit_dir
            .join(format!("{}.d", self.engine_unit))
            .join(DROPIN_FILE)
    }

    /// Write (only when content differs) and enable one unit per mount plus
    /// the engine drop-in. `daemon-reload` runs only if something changed.
    pub fn install(
        &self,
        renderer: &Renderer,
        mounts: &[MountSpec],
    ) -> Result<UnitChanges, HostError> {
        let mut changes = UnitChanges::default();
        if mounts.is_empty() {
            return Ok(changes);
        }

        let mut unit_names = Vec::with_capacity(mounts.len());
        for mount in mounts {
            let unit = renderer.mount_unit(mount, &self.engine_unit)?;
            let path = self.unit_dir.join(&unit.relative_path);
            record(&mut changes, &path, write_if_changed(&path, &unit.contents)?);
            unit_names.push(unit.relative_path.display().to_string());
        }

        let dropin = renderer.engine_dropin(&self.engine_unit, mounts)?;
        let dropin_path = self.unit_dir.join(&dropin.relative_path);
        record(
            &mut changes,
            &dropin_path,
            write_if_changed(&dropin_path, &dropin.contents)?,
        );

        if changes.changed() {
            self.runner
                .run_checked("systemctl", &argv(&["daemon-reload"]))?;
        }
        let mut enable = argv(&["enable"]);
        enable.extend(unit_names);
        self.runner.run_checked("systemctl", &enable)?;

        tracing::info!(
            written = changes.written.len(),
            unchanged = changes.unchanged.len(),
            "boot units registered"
        );
        Ok(changes)
    }

    /// Names of managed unit files currently present.
    pub fn installed(&self) -> Result<Vec<String>, HostError> {
        if !self.unit_dir.exists() {
            return Ok(vec![]);
        }
        let mut names: Vec<String> = fs::read_dir(&self.unit_dir)
            .map_err(|e| io_err(&self.unit_dir, e))?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(UNIT_PREFIX) && n.ends_with(".service"))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Disable and delete every managed unit and the engine drop-in.
    /// Returns the removed files. A unit that cannot be removed does not stop
    /// the others; the failures are returned together after `daemon-reload`.
    pub fn remove_all(&self) -> Result<Vec<PathBuf>, HostError> {
        let mut removed = Vec::new();
        let mut errors = Vec::new();
        for name in self.installed()? {
            match self.runner.run("systemctl", &argv(&["disable", &name])) {
                Ok(out) if !out.success() => {
                    tracing::warn!(unit = %name, stderr = %out.stderr.trim(), "disable failed");
                }
                Ok(_) => {}
                Err(e) => errors.push(e),
            }
            let path = self.unit_dir.join(&name);
            match fs::remove_file(&path) {
                Ok(()) => removed.push(path),
                Err(e) => {
                    tracing::warn!(unit = %name, error = %e, "unit not removed");
                    errors.push(io_err(&path, e));
                }
            }
        }
        let dropin = self.dropin_path();
        if dropin.exists() {
            match fs::remove_file(&dropin) {
                Ok(()) => removed.push(dropin),
                Err(e) => errors.push(io_err(&dropin, e)),
            }
        }
        if !removed.is_empty() || !errors.is_empty() {
            if let Err(e) = self
                .runner
                .run_checked("systemctl", &argv(&["daemon-reload"]))
            {
                errors.push(e);
            }
        }
        HostError::from_steps("boot unit removal", errors)?;
        Ok(removed)
    }
}

fn record(changes: &mut UnitChanges, path: &Path, written: bool) {
    if written {
        changes.written.push(path.to_path_buf());
    } else {
        changes.unchanged.push(path.to_path_buf());
    }
}

/// Write `contents` to `path` unless it already holds exactly that.
pub fn write_if_changed(path: &Path, contents: &str) -> Result<bool, HostError> {
    if let Ok(existing) = fs::read_to_string(path) {
        if existing == contents {
            return Ok(false);
        }
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    fs::write(path, contents).map_err(|e| io_err(path, e))?;
    Ok(true)
}
