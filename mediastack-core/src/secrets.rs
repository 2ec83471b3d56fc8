//! Secret provisioning: collect or generate once, persist immediately, reuse
//! forever unless rotation is requested.

use std::collections::HashMap;
use std::io::{BufRead, Write};

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};

use crate::config_store::ConfigStore;
use crate::error::StackError;
use crate::types::{
    ConfigRef, GenerationMethod, Secret, SecretConstraint, SecretPolicy, SecretShape, SecretSpec,
    ShapeFormat,
};

// ---------------------------------------------------------------------------
// Prompting
// ---------------------------------------------------------------------------

/// Source of operator answers.
pub trait Prompter {
    /// Ask for `label`. `default` is shown and may be returned for an empty answer
    /// by the caller; implementations return the raw (trimmed) answer.
    fn prompt(&self, label: &str, default: Option<&str>) -> Result<Option<String>, std::io::Error>;
}

/// Reads answers from stdin, one line per prompt.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn prompt(&self, label: &str, default: Option<&str>) -> Result<Option<String>, std::io::Error> {
        let mut stderr = std::io::stderr();
        match default {
            Some(d) if !d.is_empty() => write!(stderr, "{label} [{d}]: ")?,
            _ => write!(stderr, "{label}: ")?,
        }
        stderr.flush()?;

        let mut line = String::new();
        let read = std::io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stdin closed",
            ));
        }
        let answer = line.trim().to_string();
        Ok((!answer.is_empty()).then_some(answer))
    }
}

/// Never asks; every prompt gets an empty answer. Used for `--non-interactive`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrompt;

impl Prompter for NoPrompt {
    fn prompt(&self, _label: &str, _default: Option<&str>) -> Result<Option<String>, std::io::Error> {
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Generation and validation
// ---------------------------------------------------------------------------

/// Produce a value of the requested shape from the OS RNG.
pub fn generate(shape: SecretShape) -> String {
    match shape.format {
        ShapeFormat::Hex => {
            let mut bytes = vec![0u8; shape.length];
            OsRng.fill_bytes(&mut bytes);
            hex::encode(bytes)
        }
        ShapeFormat::Base64 => {
            let mut bytes = vec![0u8; shape.length];
            OsRng.fill_bytes(&mut bytes);
            STANDARD.encode(bytes)
        }
        ShapeFormat::Alphanumeric => OsRng
            .sample_iter(&Alphanumeric)
            .take(shape.length)
            .map(char::from)
            .collect(),
    }
}

/// Check `value` against `constraint`.
pub fn validate(key: &str, value: &str, constraint: &SecretConstraint) -> Result<(), StackError> {
    let invalid = |reason: String| StackError::Validation {
        key: key.to_string(),
        reason,
    };
    let len = value.chars().count();
    if let Some(exact) = constraint.exact_len {
        if len != exact {
            return Err(invalid(format!("expected exactly {exact} characters, got {len}")));
        }
    }
    if let Some(min) = constraint.min_len {
        if len < min {
            return Err(invalid(format!("expected at least {min} characters, got {len}")));
        }
    }
    if let Some(charset) = constraint.charset {
        if let Some(bad) = value.chars().find(|c| !charset.accepts(*c)) {
            return Err(invalid(format!("character '{bad}' is not {charset}")));
        }
    }
    if value.contains('\n') {
        return Err(invalid("value must be a single line".to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Provisioner
// ---------------------------------------------------------------------------

/// Resolves [`SecretSpec`]s into persisted [`Secret`]s.
pub struct SecretProvisioner<'a> {
    store: &'a ConfigStore,
    prompter: &'a dyn Prompter,
    supplied: HashMap<ConfigRef, String>,
}

impl<'a> SecretProvisioner<'a> {
    pub fn new(store: &'a ConfigStore, prompter: &'a dyn Prompter) -> Self {
        Self {
            store,
            prompter,
            supplied: HashMap::new(),
        }
    }

    /// Pre-supplied values (`--set group.KEY=value`) take precedence over
    /// prompting and generation.
    pub fn with_supplied(mut self, supplied: HashMap<ConfigRef, String>) -> Self {
        self.supplied = supplied;
        self
    }

    /// Validate every pre-supplied value before anything is written, so a bad
    /// value aborts the run with nothing mutated.
    pub fn validate_supplied(&self, specs: &[SecretSpec]) -> Result<(), StackError> {
        for spec in specs {
            if let Some(value) = self.supplied.get(&spec.config_ref()) {
                validate(&spec.key, value, &spec.constraint)?;
            }
        }
        Ok(())
    }

    /// Return the stored value for `spec`, or obtain one according to its
    /// policy and persist it immediately. With `rotate`, a stored value is
    /// replaced.
    pub fn provision(&self, spec: &SecretSpec, rotate: bool) -> Result<Secret, StackError> {
        let persisted_at = self.store.file_path(&spec.group);

        if !rotate {
            if let Some(existing) = self.store.get(&spec.group, &spec.key)? {
                tracing::debug!(group = %spec.group, key = %spec.key, "reusing stored secret");
                return Ok(Secret::new(
                    &spec.key,
                    existing,
                    GenerationMethod::Stored,
                    persisted_at,
                ));
            }
        }

        let (value, method) = match self.supplied.get(&spec.config_ref()) {
            Some(value) => (value.clone(), GenerationMethod::Supplied),
            None => self.obtain(spec)?,
        };
        validate(&spec.key, &value, &spec.constraint)?;

        self.store.set(&spec.group, &spec.key, &value)?;
        tracing::info!(
            group = %spec.group,
            key = %spec.key,
            method = ?method,
            "secret provisioned"
        );
        Ok(Secret::new(&spec.key, value, method, persisted_at))
    }

    /// Provision every spec in order; the first failure aborts.
    pub fn provision_all(
        &self,
        specs: &[SecretSpec],
        rotate: &[ConfigRef],
    ) -> Result<Vec<Secret>, StackError> {
        self.validate_supplied(specs)?;
        specs
            .iter()
            .map(|spec| self.provision(spec, rotate.contains(&spec.config_ref())))
            .collect()
    }

    fn obtain(&self, spec: &SecretSpec) -> Result<(String, GenerationMethod), StackError> {
        let ask = |default: Option<&str>| {
            self.prompter
                .prompt(spec.prompt_label(), default)
                .map_err(|source| StackError::Prompt {
                    key: spec.key.clone(),
                    source,
                })
        };
        match &spec.policy {
            SecretPolicy::Generated(shape) => Ok((generate(*shape), GenerationMethod::Random)),
            SecretPolicy::Prompted { default } => match (ask(default.as_deref())?, default) {
                (Some(answer), _) => Ok((answer, GenerationMethod::Prompted)),
                (None, Some(default)) => Ok((default.clone(), GenerationMethod::Prompted)),
                (None, None) => Err(StackError::Validation {
                    key: spec.key.clone(),
                    reason: "a value is required (no default declared)".to_string(),
                }),
            },
            SecretPolicy::Required => match ask(None)? {
                Some(value) => Ok((value, GenerationMethod::Prompted)),
                None => Err(StackError::Validation {
                    key: spec.key.clone(),
                    reason: "a value is required".to_string(),
                }),
            },
        }
    }
}

/// Parse a `group.KEY` reference.
pub fn parse_ref(raw: &str) -> Result<ConfigRef, StackError> {
    match raw.split_once('.') {
        Some((group, key)) if !group.is_empty() && !key.is_empty() => Ok(ConfigRef {
            group: group.to_string(),
            key: key.to_string(),
        }),
        _ => Err(StackError::Validation {
            key: raw.to_string(),
            reason: "expected group.KEY".to_string(),
        }),
    }
}

/// Parse `group.KEY=value` assignments from the command line.
pub fn parse_assignment(raw: &str) -> Result<(ConfigRef, String), StackError> {
    let (target, value) = raw.split_once('=').ok_or_else(|| StackError::Validation {
        key: raw.to_string(),
        reason: "expected group.KEY=value".to_string(),
    })?;
    Ok((parse_ref(target)?, value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Charset;
    use std::cell::RefCell;
    use tempfile::TempDir;

    /// Answers prompts from a queue and records the labels asked.
    struct Scripted {
        answers: RefCell<Vec<Option<String>>>,
        asked: RefCell<Vec<String>>,
    }

    impl Scripted {
        fn new(answers: &[Option<&str>]) -> Self {
            Self {
                answers: RefCell::new(answers.iter().rev().map(|a| a.map(str::to_string)).collect()),
                asked: RefCell::new(vec![]),
            }
        }
    }

    impl Prompter for Scripted {
        fn prompt(&self, label: &str, _default: Option<&str>) -> Result<Option<String>, std::io::Error> {
            self.asked.borrow_mut().push(label.to_string());
            Ok(self.answers.borrow_mut().pop().flatten())
        }
    }

    fn spec(key: &str, policy: SecretPolicy) -> SecretSpec {
        SecretSpec {
            group: "riven".to_string(),
            key: key.to_string(),
            policy,
            constraint: SecretConstraint::default(),
            label: None,
        }
    }

    fn hex16() -> SecretPolicy {
        SecretPolicy::Generated(SecretShape {
            format: ShapeFormat::Hex,
            length: 16,
        })
    }

    #[test]
    fn generated_shapes_have_expected_lengths() {
        let hex = generate(SecretShape { format: ShapeFormat::Hex, length: 16 });
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));

        let b64 = generate(SecretShape { format: ShapeFormat::Base64, length: 32 });
        assert_eq!(b64.len(), 44);

        let alnum = generate(SecretShape { format: ShapeFormat::Alphanumeric, length: 24 });
        assert_eq!(alnum.len(), 24);
        assert!(alnum.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn stored_value_is_stable_without_rotate() {
        let root = TempDir::new().unwrap();
        let store = ConfigStore::at(root.path());
        let provisioner = SecretProvisioner::new(&store, &NoPrompt);
        let s = spec("API_KEY", hex16());

        let first = provisioner.provision(&s, false).unwrap();
        assert_eq!(first.generation_method, GenerationMethod::Random);
        let second = provisioner.provision(&s, false).unwrap();
        assert_eq!(second.generation_method, GenerationMethod::Stored);
        assert_eq!(first.expose(), second.expose());

        let rotated = provisioner.provision(&s, true).unwrap();
        assert_ne!(rotated.expose(), first.expose());
        assert_eq!(
            store.get("riven", "API_KEY").unwrap().as_deref(),
            Some(rotated.expose())
        );
    }

    #[test]
    fn prompted_falls_back_to_default() {
        let root = TempDir::new().unwrap();
        let store = ConfigStore::at(root.path());
        let prompter = Scripted::new(&[None]);
        let provisioner = SecretProvisioner::new(&store, &prompter);
        let s = spec(
            "PLEX_CLAIM",
            SecretPolicy::Prompted {
                default: Some("none".to_string()),
            },
        );
        let secret = provisioner.provision(&s, false).unwrap();
        assert_eq!(secret.expose(), "none");
        assert_eq!(prompter.asked.borrow().as_slice(), ["PLEX_CLAIM"]);
    }

    #[test]
    fn prompted_without_default_rejects_an_empty_answer() {
        let root = TempDir::new().unwrap();
        let store = ConfigStore::at(root.path());
        let prompter = Scripted::new(&[None]);
        let provisioner = SecretProvisioner::new(&store, &prompter);
        let err = provisioner
            .provision(&spec("TOKEN", SecretPolicy::Prompted { default: None }), false)
            .unwrap_err();
        assert!(matches!(err, StackError::Validation { .. }));
        assert_eq!(store.get("riven", "TOKEN").unwrap(), None);
    }

    #[test]
    fn prompted_with_empty_default_is_optional() {
        let root = TempDir::new().unwrap();
        let store = ConfigStore::at(root.path());
        let provisioner = SecretProvisioner::new(&store, &NoPrompt);
        let s = spec(
            "PLEX_CLAIM",
            SecretPolicy::Prompted {
                default: Some(String::new()),
            },
        );
        assert_eq!(provisioner.provision(&s, false).unwrap().expose(), "");
    }

    #[test]
    fn required_without_answer_is_validation_error() {
        let root = TempDir::new().unwrap();
        let store = ConfigStore::at(root.path());
        let provisioner = SecretProvisioner::new(&store, &NoPrompt);
        let err = provisioner
            .provision(&spec("RD_TOKEN", SecretPolicy::Required), false)
            .unwrap_err();
        assert!(matches!(err, StackError::Validation { .. }));
        assert_eq!(store.get("riven", "RD_TOKEN").unwrap(), None);
    }

    #[test]
    fn supplied_value_violating_constraint_aborts_before_any_write() {
        let root = TempDir::new().unwrap();
        let store = ConfigStore::at(root.path());
        let mut api = spec("API_KEY", SecretPolicy::Required);
        api.constraint = SecretConstraint {
            exact_len: Some(32),
            min_len: None,
            charset: Some(Charset::Alphanumeric),
        };
        let other = spec("DB_PASSWORD", hex16());

        let supplied = HashMap::from([(api.config_ref(), "too-short".to_string())]);
        let provisioner = SecretProvisioner::new(&store, &NoPrompt).with_supplied(supplied);
        let err = provisioner.provision_all(&[other, api], &[]).unwrap_err();
        assert!(matches!(err, StackError::Validation { .. }));
        assert_eq!(store.get("riven", "DB_PASSWORD").unwrap(), None);
    }

    #[test]
    fn parse_assignment_forms() {
        let (target, value) = parse_assignment("zurg.RD_TOKEN=abc=def").unwrap();
        assert_eq!(target.group, "zurg");
        assert_eq!(target.key, "RD_TOKEN");
        assert_eq!(value, "abc=def");
        assert!(parse_assignment("noequals").is_err());
        assert!(parse_assignment("nogroup=value").is_err());
        assert!(parse_ref("zurg.").is_err());
        assert_eq!(parse_ref("riven.API_KEY").unwrap().to_string(), "riven.API_KEY");
    }
}
