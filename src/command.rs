use std::collections::BTreeMap;

use serde::Serialize;

/// Global `pki` options in the order the client expects them.
const KNOWN_OPTIONS: &[(&str, &str)] = &[
    ("nssdb", "-d"),
    ("nssdb_password", "-c"),
    ("hostname", "-h"),
    ("port", "-p"),
    ("protocol", "-P"),
    ("certnick", "-n"),
];

/// One `pki` invocation: a subcommand, its positional args, and the global
/// options that select the target and the client certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSpec {
    pub name: String,
    pub args: Vec<String>,
    pub options: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            options: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Render the argument vector passed to the `pki` binary.
    ///
    /// Known options come first in `pki`'s own order, unknown keys follow
    /// as `--key value` sorted by key, then the subcommand and its args.
    pub fn to_args(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (key, flag) in KNOWN_OPTIONS {
            if let Some(value) = self.options.get(*key) {
                out.push((*flag).to_string());
                out.push(value.clone());
            }
        }
        for (key, value) in &self.options {
            if KNOWN_OPTIONS.iter().any(|(k, _)| k == key) {
                continue;
            }
            out.push(format!("--{key}"));
            out.push(value.clone());
        }
        out.push(self.name.clone());
        out.extend(self.args.iter().cloned());
        out
    }

    /// Human-readable form for reports and logs. The NSS database password
    /// is masked.
    pub fn display_line(&self, binary: &str) -> String {
        let mut parts = vec![binary.to_string()];
        let mut mask_next = false;
        for arg in self.to_args() {
            if mask_next {
                parts.push("<redacted>".to_string());
                mask_next = false;
                continue;
            }
            mask_next = arg == "-c";
            parts.push(arg);
        }
        parts.join(" ")
    }
}
