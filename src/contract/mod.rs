//! Contract suites: data-driven tables of help and show cases.
//!
//! A suite is a TOML file. Each `[[help]]` row runs a help invocation and
//! checks stdout; each `[[show]]` row runs a command as one certificate
//! identity and checks the stream that identity selects.


use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::Context;
use include_dir::{Dir, include_dir};
use serde::{Deserialize, Serialize};

use crate::checker::{ContractChecker, ContractViolation};
use crate::command::CommandSpec;
use crate::identity::Identity;

static BUILTIN: Dir<'static> = include_dir!("$CARGO_MANIFEST_DIR/contracts");

fn default_help_args() -> Vec<String> {
    vec!["--help".to_string()]
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Suite {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Named expectation sets shared between rows.
    #[serde(default)]
    pub expect_sets: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub help: Vec<HelpRow>,
    #[serde(default)]
    pub show: Vec<ShowRow>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HelpRow {
    pub command: String,
    #[serde(default = "default_help_args")]
    pub args: Vec<String>,
    pub expect: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ShowRow {
    pub cli: String,
    pub identity: String,
    #[serde(default)]
    pub expect: Option<Vec<String>>,
    #[serde(default)]
    pub expect_set: Option<String>,
}

/// A fully resolved, independently runnable row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Case {
    Help {
        command: CommandSpec,
        expected: Vec<String>,
    },
    Show {
        cli: String,
        identity: Identity,
        expected: Vec<String>,
    },
}

impl Case {
    pub fn name(&self) -> String {
        match self {
            Self::Help { command, .. } => {
                let mut parts = vec![command.name.as_str()];
                parts.extend(command.args.iter().map(String::as_str));
                parts.join(" ")
            }
            Self::Show { cli, identity, .. } => format!("{cli} as {identity}"),
        }
    }

    pub fn expected(&self) -> &[String] {
        match self {
            Self::Help { expected, .. } | Self::Show { expected, .. } => expected,
        }
    }

    /// Execute the case once and return its violations.
    ///
    /// # Errors
    ///
    /// Propagates execution failures from the checker.
    pub fn run(&self, checker: &ContractChecker<'_>) -> anyhow::Result<Vec<ContractViolation>> {
        match self {
            Self::Help { command, expected } => checker.verify_help(command, expected),
            Self::Show {
                cli,
                identity,
                expected,
            } => checker.verify_show_by_identity(cli, identity, expected),
        }
    }
}

impl ShowRow {
    fn resolve(&self, sets: &BTreeMap<String, Vec<String>>) -> Result<Case, String> {
        let identity = Identity::parse(&self.identity).map_err(|e| e.to_string())?;
        let expected = match (&self.expect, &self.expect_set) {
            (Some(_), Some(_)) => {
                return Err(format!(
                    "{}: set either 'expect' or 'expect_set', not both",
                    self.identity
                ));
            }
            (Some(list), None) => list.clone(),
            (None, Some(set)) => sets
                .get(set)
                .cloned()
                .ok_or_else(|| format!("{}: unknown expect_set {set:?}", self.identity))?,
            (None, None) => identity.default_expectations().ok_or_else(|| {
                format!(
                    "{}: a successful invocation needs an explicit 'expect' or 'expect_set'",
                    self.identity
                )
            })?,
        };
        Ok(Case::Show {
            cli: self.cli.clone(),
            identity,
            expected,
        })
    }
}

impl Suite {
    /// Resolve every row into a runnable case, help rows first.
    ///
    /// # Errors
    ///
    /// Returns a human-readable error for the first row that cannot be
    /// resolved: bad identity, unknown or conflicting expectation source,
    /// empty command, or an empty expectation set.
    pub fn cases(&self) -> Result<Vec<Case>, String> {
        let mut cases = Vec::with_capacity(self.help.len() + self.show.len());
        for (i, row) in self.help.iter().enumerate() {
            if row.command.trim().is_empty() {
                return Err(format!("help[{i}]: 'command' must be non-empty"));
            }
            cases.push(Case::Help {
                command: CommandSpec::new(row.command.as_str()).args(row.args.iter().cloned()),
                expected: row.expect.clone(),
            });
        }
        for (i, row) in self.show.iter().enumerate() {
            if row.cli.trim().is_empty() {
                return Err(format!("show[{i}]: 'cli' must be non-empty"));
            }
            cases.push(row.resolve(&self.expect_sets).map_err(|e| format!("show[{i}]: {e}"))?);
        }
        for case in &cases {
            if case.expected().is_empty() {
                return Err(format!("{}: expectation set is empty", case.name()));
            }
        }
        Ok(cases)
    }
}

/// Validate suite bytes: UTF-8, TOML, non-empty name, at least one row,
/// and every row resolvable to a non-empty expectation set.
///
/// # Errors
///
/// Returns a human-readable error string if validation fails.
pub fn validate(bytes: &[u8]) -> Result<Suite, String> {
    let text = std::str::from_utf8(bytes).map_err(|_| "suite file is not valid UTF-8")?;
    let suite: Suite = toml::from_str(text).map_err(|e| format!("invalid suite TOML: {e}"))?;
    if suite.name.trim().is_empty() {
        return Err("suite 'name' must be non-empty".to_string());
    }
    if suite.help.is_empty() && suite.show.is_empty() {
        return Err("suite must have at least one [[help]] or [[show]] row".to_string());
    }
    suite.cases()?;
    Ok(suite)
}

/// Load and validate a suite file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or fails validation.
pub fn load_file(path: &Path) -> anyhow::Result<Suite> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("cannot read suite file: {}", path.display()))?;
    validate(&bytes).map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))
}

/// Where a discovered suite came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    File(PathBuf),
    Builtin(PathBuf),
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(p) => write!(f, "{}", p.display()),
            Self::Builtin(p) => write!(f, "<built-in>/{}", p.display()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveredSuite {
    /// Path relative to its root without extension, e.g. `tps/config`.
    pub id: String,
    pub origin: Origin,
}

impl DiscoveredSuite {
    /// Load and validate the suite.
    ///
    /// # Errors
    ///
    /// Returns an error if the suite cannot be read or fails validation.
    pub fn load(&self) -> anyhow::Result<Suite> {
        match &self.origin {
            Origin::File(path) => load_file(path),
            Origin::Builtin(path) => {
                let file = BUILTIN
                    .get_file(path)
                    .ok_or_else(|| anyhow::anyhow!("built-in suite missing: {}", path.display()))?;
                validate(file.contents()).map_err(|e| anyhow::anyhow!("{}: {e}", self.origin))
            }
        }
    }
}

/// Search dirs in priority order (highest first):
/// 1. `.certcheck/contracts/` in CWD
/// 2. `{config_dir}/certcheck/contracts/`
///
/// Built-in suites are appended after these by [`discover`].
pub fn default_search_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd.join(".certcheck/contracts"));
    }
    if let Some(config) = dirs::config_dir() {
        dirs.push(config.join("certcheck/contracts"));
    }
    dirs
}

fn suite_id(relative: &Path) -> String {
    let id = relative.with_extension("").to_string_lossy().into_owned();
    #[cfg(windows)]
    let id = id.replace('\\', "/");
    id
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<DiscoveredSuite>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut entries: Vec<_> = entries.filter_map(Result::ok).collect();
    entries.sort_by_key(std::fs::DirEntry::file_name);

    for entry in &entries {
        let path = entry.path();
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        if path.is_dir() {
            collect_files(root, &path, out);
        } else if path.extension().is_some_and(|e| e == "toml") {
            let id = suite_id(path.strip_prefix(root).unwrap_or(&path));
            out.push(DiscoveredSuite {
                id,
                origin: Origin::File(path),
            });
        }
    }
}

fn collect_builtin(dir: &Dir<'static>, out: &mut Vec<DiscoveredSuite>) {
    let mut files: Vec<_> = dir
        .files()
        .filter(|f| f.path().extension().is_some_and(|e| e == "toml"))
        .collect();
    files.sort_by_key(|f| f.path());
    for file in files {
        out.push(DiscoveredSuite {
            id: suite_id(file.path()),
            origin: Origin::Builtin(file.path().to_path_buf()),
        });
    }
    let mut dirs: Vec<_> = dir.dirs().collect();
    dirs.sort_by_key(|d| d.path());
    for sub in dirs {
        collect_builtin(sub, out);
    }
}

/// Discover suites in `search_dirs`, then the built-in ones. When the same
/// id appears more than once the first occurrence wins.
pub fn discover(search_dirs: &[PathBuf], filter: Option<&str>) -> Vec<DiscoveredSuite> {
    let mut result = Vec::new();
    for dir in search_dirs {
        if dir.is_dir() {
            collect_files(dir, dir, &mut result);
        }
    }
    collect_builtin(&BUILTIN, &mut result);

    let mut seen = HashSet::new();
    result.retain(|s| seen.insert(s.id.clone()));

    if let Some(name) = filter {
        result.retain(|s| s.id == name);
    }
    result
}
