//! MountPreparer: turn a host directory into a bind mount with the requested
//! propagation, verified against the live mount table.

use std::path::{Path, PathBuf};
use std::time::Duration;

use mediastack_core::types::MountSpec;
use mediastack_core::{retry, Backoff};

use crate::command::{argv, CommandRunner};
use crate::error::{io_err, HostError};
use crate::mountinfo;

/// What `ensure_shared` had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountOutcome {
    /// Already a mount point with the requested propagation; nothing ran.
    AlreadyPrepared,
    /// Propagation was applied; `bind_created` when the self-bind was needed.
    Prepared { bind_created: bool },
}

/// Host mount namespace operations.
pub trait MountControl {
    /// Make `spec.host_path` a mount point with `spec.propagation`. Idempotent.
    fn ensure_shared(&self, spec: &MountSpec) -> Result<MountOutcome, HostError>;

    /// Unmount everything stacked at `path`. Returns `false` when nothing was
    /// mounted there.
    fn release(&self, path: &Path) -> Result<bool, HostError>;

    /// Whether `spec` currently holds, without changing anything.
    fn is_prepared(&self, spec: &MountSpec) -> Result<bool, HostError>;
}

/// [`MountControl`] backed by `mount(8)` and a mountinfo file.
pub struct MountPreparer<R> {
    runner: R,
    mountinfo: PathBuf,
    verify_attempts: u32,
    verify_delay: Duration,
}

impl<R: CommandRunner> MountPreparer<R> {
    pub fn new(runner: R, mountinfo: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            mountinfo: mountinfo.into(),
            verify_attempts: 5,
            verify_delay: Duration::from_millis(200),
        }
    }

    /// Override how often the mount table is re-read after mutating it.
    pub fn with_verification(mut self, attempts: u32, delay: Duration) -> Self {
        self.verify_attempts = attempts;
        self.verify_delay = delay;
        self
    }

    fn current(&self, path: &Path) -> Result<Option<mountinfo::MountEntry>, HostError> {
        let entries = mountinfo::read(&self.mountinfo)?;
        Ok(mountinfo::find(&entries, path).cloned())
    }

    fn holds(&self, spec: &MountSpec) -> Result<bool, HostError> {
        let entries = mountinfo::read(&self.mountinfo)?;
        Ok(mountinfo::holds(&entries, &spec.host_path, spec.propagation))
    }
}

impl<R: CommandRunner> MountControl for MountPreparer<R> {
    fn ensure_shared(&self, spec: &MountSpec) -> Result<MountOutcome, HostError> {
        let path = &spec.host_path;
        let path_arg = path.display().to_string();

        if self.holds(spec)? {
            tracing::debug!(path = %path.display(), "mount already prepared");
            return Ok(MountOutcome::AlreadyPrepared);
        }

        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| io_err(path, e))?;
        }

        let bind_created = self.current(path)?.is_none();
        if bind_created {
            self.runner
                .run_checked("mount", &argv(&["--bind", &path_arg, &path_arg]))?;
        }
        self.runner
            .run_checked("mount", &argv(&[spec.propagation.mount_flag(), &path_arg]))?;

        retry(
            self.verify_attempts,
            Backoff::Fixed(self.verify_delay),
            |_| match (self.holds(spec), self.current(path)) {
                (Ok(true), _) => Ok(()),
                (Err(e), _) | (_, Err(e)) => Err(e.to_string()),
                (Ok(false), Ok(Some(_))) => {
                    Err(format!("{} propagation not observed", spec.propagation))
                }
                (Ok(false), Ok(None)) => Err("not a mount point after bind".to_string()),
            },
        )
        .map_err(|reason| HostError::Mount {
            path: path.clone(),
            reason,
        })?;

        tracing::info!(
            path = %path.display(),
            propagation = %spec.propagation,
            bind_created,
            "mount prepared"
        );
        Ok(MountOutcome::Prepared { bind_created })
    }

    fn release(&self, path: &Path) -> Result<bool, HostError> {
        let path_arg = path.display().to_string();
        let mut released = false;
        // FUSE mounts propagated from containers may be stacked on the bind.
        for _ in 0..4 {
            if self.current(path)?.is_none() {
                break;
            }
            self.runner.run_checked("umount", &argv(&[&path_arg]))?;
            released = true;
        }
        if self.current(path)?.is_some() {
            return Err(HostError::Mount {
                path: path.to_path_buf(),
                reason: "still mounted after unmount".to_string(),
            });
        }
        if released {
            tracing::info!(path = %path.display(), "mount released");
        }
        Ok(released)
    }

    fn is_prepared(&self, spec: &MountSpec) -> Result<bool, HostError> {
        self.holds(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutput;
    use mediastack_core::types::Propagation;
    use std::cell::RefCell;
    use std::fs;

    /// Simulates mount(8) by editing a mountinfo file.
    struct FakeMount {
        table: PathBuf,
        calls: RefCell<Vec<String>>,
        next_id: RefCell<u32>,
    }

    impl FakeMount {
        fn new(table: PathBuf) -> Self {
            fs::write(&table, "22 1 8:1 / / rw,relatime - ext4 /dev/sda1 rw\n").unwrap();
            Self {
                table,
                calls: RefCell::new(vec![]),
                next_id: RefCell::new(100),
            }
        }
    }

    impl CommandRunner for FakeMount {
        fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, HostError> {
            self.calls
                .borrow_mut()
                .push(format!("{program} {}", args.join(" ")));
            let mut table = fs::read_to_string(&self.table).unwrap();
            match (program, args.first().map(String::as_str)) {
                ("mount", Some("--bind")) => {
                    let mut id = self.next_id.borrow_mut();
                    *id += 1;
                    table.push_str(&format!(
                        "{id} 22 8:1 {p} {p} rw,relatime - ext4 /dev/sda1 rw\n",
                        p = args[1]
                    ));
                }
                ("mount", Some(flag @ ("--make-rshared" | "--make-shared"))) => {
                    let recursive = flag == "--make-rshared";
                    let root = Path::new(&args[1]);
                    let lines: Vec<String> = table
                        .lines()
                        .map(|l| {
                            let hit = l.split_whitespace().nth(4).map(Path::new).is_some_and(
                                |p| if recursive { p.starts_with(root) } else { p == root },
                            );
                            if hit && !l.contains("shared:") {
                                l.replacen(" - ", " shared:9 - ", 1)
                            } else {
                                l.to_string()
                            }
                        })
                        .collect();
                    table = lines.join("\n") + "\n";
                }
                ("umount", Some(p)) => {
                    let keep: Vec<&str> = table
                        .lines()
                        .filter(|l| l.split_whitespace().nth(4) != Some(p))
                        .collect();
                    table = keep.join("\n") + "\n";
                }
                _ => return Ok(CommandOutput::failed(1, "unsupported")),
            }
            fs::write(&self.table, table).unwrap();
            Ok(CommandOutput::ok(""))
        }
    }

    fn spec(path: &Path) -> MountSpec {
        MountSpec {
            host_path: path.to_path_buf(),
            propagation: Propagation::Rshared,
        }
    }

    #[test]
    fn binds_then_shares_then_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("zurg");
        let fake = FakeMount::new(tmp.path().join("mountinfo"));
        let preparer = MountPreparer::new(&fake, tmp.path().join("mountinfo"))
            .with_verification(1, Duration::ZERO);

        let first = preparer.ensure_shared(&spec(&target)).unwrap();
        assert_eq!(first, MountOutcome::Prepared { bind_created: true });
        assert!(target.is_dir());
        assert!(preparer.is_prepared(&spec(&target)).unwrap());

        let second = preparer.ensure_shared(&spec(&target)).unwrap();
        assert_eq!(second, MountOutcome::AlreadyPrepared);
        assert_eq!(fake.calls.borrow().len(), 2, "no commands on the second run");
    }

    #[test]
    fn existing_private_mount_only_gets_propagation() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("zurg");
        let fake = FakeMount::new(tmp.path().join("mountinfo"));
        fake.run("mount", &argv(&["--bind", &target.display().to_string()]))
            .unwrap();
        fake.calls.borrow_mut().clear();

        let preparer = MountPreparer::new(&fake, tmp.path().join("mountinfo"))
            .with_verification(1, Duration::ZERO);
        let outcome = preparer.ensure_shared(&spec(&target)).unwrap();
        assert_eq!(outcome, MountOutcome::Prepared { bind_created: false });
        assert_eq!(fake.calls.borrow().len(), 1);
        assert!(fake.calls.borrow()[0].starts_with("mount --make-rshared"));
    }

    #[test]
    fn private_child_mount_is_made_shared_too() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("zurg");
        let child = target.join("__all__");
        let fake = FakeMount::new(tmp.path().join("mountinfo"));
        let target_arg = target.display().to_string();
        fake.run("mount", &argv(&["--bind", &target_arg])).unwrap();
        fake.run("mount", &argv(&["--make-shared", &target_arg])).unwrap();
        fake.run("mount", &argv(&["--bind", &child.display().to_string()]))
            .unwrap();
        fake.calls.borrow_mut().clear();

        let preparer = MountPreparer::new(&fake, tmp.path().join("mountinfo"))
            .with_verification(1, Duration::ZERO);
        assert!(!preparer.is_prepared(&spec(&target)).unwrap());
        let outcome = preparer.ensure_shared(&spec(&target)).unwrap();
        assert_eq!(outcome, MountOutcome::Prepared { bind_created: false });
        assert_eq!(
            fake.calls.borrow().as_slice(),
            [format!("mount --make-rshared {target_arg}")]
        );
        assert!(preparer.is_prepared(&spec(&target)).unwrap());
    }

    #[test]
    fn unverified_propagation_is_a_mount_error() {
        struct Ignores;
        impl CommandRunner for Ignores {
            fn run(&self, _p: &str, _a: &[String]) -> Result<CommandOutput, HostError> {
                Ok(CommandOutput::ok(""))
            }
        }
        let tmp = tempfile::tempdir().unwrap();
        let table = tmp.path().join("mountinfo");
        fs::write(&table, "22 1 8:1 / / rw - ext4 /dev/sda1 rw\n").unwrap();
        let preparer = MountPreparer::new(Ignores, &table)
            .with_verification(2, Duration::ZERO);
        let err = preparer.ensure_shared(&spec(&tmp.path().join("x"))).unwrap_err();
        assert!(matches!(err, HostError::Mount { .. }), "got: {err}");
    }

    #[test]
    fn release_is_a_noop_when_not_mounted() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("zurg");
        let fake = FakeMount::new(tmp.path().join("mountinfo"));
        let preparer = MountPreparer::new(&fake, tmp.path().join("mountinfo"))
            .with_verification(1, Duration::ZERO);

        assert!(!preparer.release(&target).unwrap());
        preparer.ensure_shared(&spec(&target)).unwrap();
        assert!(preparer.release(&target).unwrap());
        assert!(!preparer.is_prepared(&spec(&target)).unwrap());
    }
}
