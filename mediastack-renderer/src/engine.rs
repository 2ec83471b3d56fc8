//! Tera rendering engine: [`TemplateKind`] enum and [`Renderer`].
//!
//! | Template      | Output                                                       |
//! |---------------|--------------------------------------------------------------|
//! | MountUnit     | `<unit dir>/mediastack-mount-<path>.service`                 |
//! | EngineDropIn  | `<unit dir>/<engine unit>.d/mediastack-mounts.conf`          |
//! | DefaultStack  | `<root>/stack.yaml`                                          |

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tera::Tera;

use mediastack_core::types::MountSpec;

use crate::context::{to_tera_context, DefaultStackCtx, EngineDropInCtx, MountUnitCtx};
use crate::error::RenderError;

// ---------------------------------------------------------------------------
// Embedded templates: baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    ("mount.service.tera", include_str!("templates/mount.service.tera")),
    (
        "engine-dropin.conf.tera",
        include_str!("templates/engine-dropin.conf.tera"),
    ),
    ("stack.yaml.tera", include_str!("templates/stack.yaml.tera")),
];

/// File name of the drop-in placed in `<engine unit>.d/`.
pub const DROPIN_FILE: &str = "mediastack-mounts.conf";

// ---------------------------------------------------------------------------
// Overrides
// ---------------------------------------------------------------------------

/// Reads `<dir>/<name>` for every built-in template name. Files that do not
/// shadow a built-in are ignored; a missing directory means no overrides.
fn read_overrides(dir: &Path) -> Result<HashMap<&'static str, String>, RenderError> {
    let mut found = HashMap::new();
    for kind in TemplateKind::all() {
        let name = kind.template_name();
        let path = dir.join(name);
        match std::fs::read_to_string(&path) {
            Ok(body) => {
                tracing::debug!(template = name, path = %path.display(), "template override");
                found.insert(name, body.replace("\r\n", "\n"));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(RenderError::Io { path, source }),
        }
    }
    Ok(found)
}

fn build_tera(overrides_dir: Option<&Path>) -> Result<Tera, RenderError> {
    let mut overrides = match overrides_dir {
        Some(dir) => read_overrides(dir)?,
        None => HashMap::new(),
    };
    let mut tera = Tera::default();
    tera.add_raw_templates(TPLS.iter().map(|(name, builtin)| {
        let body = overrides
            .remove(name)
            .unwrap_or_else(|| (*builtin).to_string());
        (*name, body)
    }))?;
    Ok(tera)
}

// ---------------------------------------------------------------------------
// TemplateKind
// ---------------------------------------------------------------------------

/// Every template the renderer knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    MountUnit,
    EngineDropIn,
    DefaultStack,
}

impl TemplateKind {
    pub fn all() -> &'static [TemplateKind] {
        &[
            TemplateKind::MountUnit,
            TemplateKind::EngineDropIn,
            TemplateKind::DefaultStack,
        ]
    }

    pub fn template_name(&self) -> &'static str {
        match self {
            TemplateKind::MountUnit => "mount.service.tera",
            TemplateKind::EngineDropIn => "engine-dropin.conf.tera",
            TemplateKind::DefaultStack => "stack.yaml.tera",
        }
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// A rendered file, relative to the directory it belongs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    pub relative_path: PathBuf,
    pub contents: String,
}

/// Tera-based renderer for systemd units and the default manifest.
///
/// `user_template_dir` may contain `.tera` files named like the embedded ones;
/// they replace the defaults. Create once and reuse.
pub struct Renderer {
    tera: Tera,
}

impl Renderer {
    /// Embedded templates only.
    pub fn new() -> Result<Self, RenderError> {
        Self::with_overrides(None)
    }

    pub fn with_overrides(user_template_dir: Option<&Path>) -> Result<Self, RenderError> {
        Ok(Renderer {
            tera: build_tera(user_template_dir)?,
        })
    }

    fn render<T: serde::Serialize>(
        &self,
        kind: TemplateKind,
        ctx: &T,
    ) -> Result<String, RenderError> {
        let tera_ctx = to_tera_context(ctx)?;
        Ok(self.tera.render(kind.template_name(), &tera_ctx)?)
    }

    /// Oneshot unit that bind-mounts `mount` onto itself and applies its
    /// propagation before the container engine starts.
    pub fn mount_unit(
        &self,
        mount: &MountSpec,
        engine_unit: &str,
    ) -> Result<RenderedFile, RenderError> {
        let ctx = MountUnitCtx::from_mount(mount, engine_unit);
        Ok(RenderedFile {
            relative_path: PathBuf::from(&ctx.unit_name),
            contents: self.render(TemplateKind::MountUnit, &ctx)?,
        })
    }

    /// Drop-in making `engine_unit` require every mount unit.
    pub fn engine_dropin(
        &self,
        engine_unit: &str,
        mounts: &[MountSpec],
    ) -> Result<RenderedFile, RenderError> {
        let ctx = EngineDropInCtx::new(engine_unit, mounts);
        Ok(RenderedFile {
            relative_path: PathBuf::from(format!("{engine_unit}.d")).join(DROPIN_FILE),
            contents: self.render(TemplateKind::EngineDropIn, &ctx)?,
        })
    }

    /// The default media stack manifest as YAML text.
    pub fn default_stack(&self, ctx: &DefaultStackCtx) -> Result<String, RenderError> {
        self.render(TemplateKind::DefaultStack, ctx)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use mediastack_core::types::Propagation;

    fn zurg_mount() -> MountSpec {
        MountSpec {
            host_path: PathBuf::from("/mnt/zurg"),
            propagation: Propagation::Rshared,
        }
    }

    #[test]
    fn renderer_new_succeeds() {
        Renderer::new().expect("Renderer::new should succeed with embedded templates");
    }

    #[test]
    fn mount_unit_orders_before_engine() {
        let renderer = Renderer::new().unwrap();
        let unit = renderer.mount_unit(&zurg_mount(), "docker.service").unwrap();
        assert_eq!(
            unit.relative_path,
            PathBuf::from("mediastack-mount-mnt-zurg.service")
        );
        assert!(unit.contents.contains("Before=docker.service"));
        assert!(unit.contents.contains("mount --bind /mnt/zurg /mnt/zurg"));
        assert!(unit.contents.contains("/bin/mount --make-rshared /mnt/zurg"));
        assert!(unit.contents.contains("RequiredBy=docker.service"));
    }

    #[test]
    fn dropin_lists_every_mount_unit() {
        let renderer = Renderer::new().unwrap();
        let other = MountSpec {
            host_path: PathBuf::from("/mnt/other"),
            propagation: Propagation::Shared,
        };
        let dropin = renderer
            .engine_dropin("docker.service", &[zurg_mount(), other])
            .unwrap();
        assert_eq!(
            dropin.relative_path,
            PathBuf::from("docker.service.d/mediastack-mounts.conf")
        );
        assert!(dropin
            .contents
            .contains("After=mediastack-mount-mnt-zurg.service\nRequires=mediastack-mount-mnt-zurg.service"));
        assert!(dropin.contents.contains("Requires=mediastack-mount-mnt-other.service"));
    }

    #[test]
    fn no_crlf_in_any_rendered_output() {
        let renderer = Renderer::new().unwrap();
        let outputs = [
            renderer.mount_unit(&zurg_mount(), "docker.service").unwrap().contents,
            renderer
                .engine_dropin("docker.service", &[zurg_mount()])
                .unwrap()
                .contents,
            renderer.default_stack(&DefaultStackCtx::default()).unwrap(),
        ];
        for content in &outputs {
            assert!(!content.contains('\r'));
        }
    }

    #[test]
    fn override_dir_replaces_only_known_templates() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("engine-dropin.conf.tera"),
            "[Unit]\r\n# custom {{ engine_unit }}\r\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("unrelated.tera"), "{{ broken").unwrap();

        let renderer = Renderer::with_overrides(Some(dir.path())).unwrap();
        let dropin = renderer
            .engine_dropin("docker.service", &[zurg_mount()])
            .unwrap();
        assert!(dropin.contents.starts_with("[Unit]\n# custom docker.service"));
        assert!(!dropin.contents.contains('\r'));
        let unit = renderer.mount_unit(&zurg_mount(), "docker.service").unwrap();
        assert!(unit.contents.contains("Before=docker.service"));
    }

    #[test]
    fn every_kind_has_an_embedded_template() {
        for kind in TemplateKind::all() {
            assert!(TPLS.iter().any(|(name, _)| *name == kind.template_name()));
        }
    }
}
