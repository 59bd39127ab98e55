//! The contract checker: one invocation per case, then literal-string
//! assertions on the stream selected by the identity in use.

use std::fmt;

use serde::Serialize;

use crate::command::CommandSpec;
use crate::config::Settings;
use crate::executor::{ExecutionResults, Executor};
use crate::identity::{Identity, Stream};
use crate::runner::HostResult;

/// An expected fragment or line was absent from the actual output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractViolation {
    pub host: String,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    pub stream: Stream,
    pub missing: String,
    pub actual: String,
}

impl fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: `{}`", self.host, self.command)?;
        if let Some(identity) = &self.identity {
            write!(f, " as {identity}")?;
        }
        let verb = match self.stream {
            Stream::Stdout => "contain",
            Stream::StderrLines => "include the line",
        };
        write!(
            f,
            ": expected {} to {verb} {:?}\ngot:\n{}",
            self.stream, self.missing, self.actual
        )
    }
}

impl std::error::Error for ContractViolation {}

/// Turn the violations of a case into a test result, failing on the first.
///
/// # Errors
///
/// Returns the first violation if there is any.
pub fn ensure(violations: Vec<ContractViolation>) -> Result<(), ContractViolation> {
    violations.into_iter().next().map_or(Ok(()), Err)
}

pub struct ContractChecker<'a> {
    executor: &'a dyn Executor,
    settings: &'a Settings,
    group: String,
}

impl<'a> ContractChecker<'a> {
    pub fn new(
        executor: &'a dyn Executor,
        settings: &'a Settings,
        group: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            settings,
            group: group.into(),
        }
    }

    /// Run a help command and require every fragment in each host's stdout.
    ///
    /// Returns the violations found; an empty vector means the case passed.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be executed or no host answered.
    pub fn verify_help(
        &self,
        command: &CommandSpec,
        expected: &[String],
    ) -> anyhow::Result<Vec<ContractViolation>> {
        let results = self.run(command)?;
        let described = self.executor.describe(command);
        Ok(check(&results, Stream::Stdout, expected, &described, None))
    }

    /// Build the invocation of `cli` authenticated as `identity`: NSS
    /// database, port of the identity's subsystem, protocol and nickname.
    ///
    /// # Errors
    ///
    /// Returns an error if no port is configured for the identity's subsystem.
    pub fn show_command(&self, cli: &str, identity: &Identity) -> anyhow::Result<CommandSpec> {
        let pki = &self.settings.pki;
        let port = self.settings.port_for(&identity.subsystem)?;
        let mut cmd = CommandSpec::new(cli)
            .option("nssdb", pki.nssdb.as_str())
            .option("port", port.to_string())
            .option("protocol", pki.protocol.as_str())
            .option("certnick", identity.nickname.as_str());
        if let Some(password) = &pki.nssdb_password {
            cmd = cmd.option("nssdb_password", password.as_str());
        }
        if let Some(hostname) = &pki.hostname {
            cmd = cmd.option("hostname", hostname.as_str());
        }
        Ok(cmd)
    }

    /// Run `cli` as `identity` and check `expected` on the identity's stream:
    /// substrings of stdout for a valid admin, whole stderr lines otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be built or executed, or no
    /// host answered.
    pub fn verify_show_by_identity(
        &self,
        cli: &str,
        identity: &Identity,
        expected: &[String],
    ) -> anyhow::Result<Vec<ContractViolation>> {
        let command = self.show_command(cli, identity)?;
        let results = self.run(&command)?;
        let described = self.executor.describe(&command);
        Ok(check(
            &results,
            identity.expected_stream(),
            expected,
            &described,
            Some(identity),
        ))
    }

    fn run(&self, command: &CommandSpec) -> anyhow::Result<ExecutionResults> {
        let results = self.executor.execute(&self.group, command)?;
        if results.is_empty() {
            anyhow::bail!(
                "no host in group {} returned a result for `{}`",
                self.group,
                self.executor.describe(command)
            );
        }
        Ok(results)
    }
}

fn stream_contains(result: &HostResult, stream: Stream, fragment: &str) -> bool {
    match stream {
        Stream::Stdout => result.stdout.contains(fragment),
        Stream::StderrLines => result.stderr_lines.iter().any(|l| l == fragment),
    }
}

fn stream_text(result: &HostResult, stream: Stream) -> String {
    match stream {
        Stream::Stdout => result.stdout.clone(),
        Stream::StderrLines => result.stderr_lines.join("\n"),
    }
}

/// Apply the same assertion to every host independently.
fn check(
    results: &ExecutionResults,
    stream: Stream,
    expected: &[String],
    command: &str,
    identity: Option<&Identity>,
) -> Vec<ContractViolation> {
    let mut violations = Vec::new();
    for (host, result) in results {
        for fragment in expected {
            if stream_contains(result, stream, fragment) {
                continue;
            }
            violations.push(ContractViolation {
                host: host.clone(),
                command: command.to_string(),
                identity: identity.map(|i| i.nickname.clone()),
                stream,
                missing: fragment.clone(),
                actual: stream_text(result, stream),
            });
        }
    }
    violations
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    use super::*;
    use crate::identity::{EXPIRED_MESSAGE, FORBIDDEN_MESSAGE, REVOKED_MESSAGE};

    const CONFIG_VALUES: &[&str] = &[
        "channel.blocksize: 224",
        "channel.defKeyIndex: 0",
        "channel.defKeyVersion: 0",
        "channel.encryption: true",
        "failover.pod.enable: false",
        "general.applet_ext: ijc",
        "general.search.sizelimit.default: 1",
        "general.search.sizelimit.max: 1",
        "general.search.timelimit.default: 10",
        "general.search.timelimit.max: 10",
        "general.verifyProof: 1",
    ];

    /// Answers like a TPS server would, based on the `certnick` option.
    struct FakeTps {
        hosts: Vec<&'static str>,
        calls: RefCell<Vec<CommandSpec>>,
    }

    impl FakeTps {
        fn new(hosts: &[&'static str]) -> Self {
            Self {
                hosts: hosts.to_vec(),
                calls: RefCell::new(Vec::new()),
            }
        }

        fn answer(command: &CommandSpec) -> HostResult {
            if command.args.iter().any(|a| a == "--help") {
                return HostResult {
                    stdout: "usage: tps-config-show [OPTIONS...]\n    \
                             --help            Show help options\n    \
                             --output <file>   Output file to store general properties."
                        .to_string(),
                    ..HostResult::default()
                };
            }
            let nick = command.options.get("certnick").map_or("", String::as_str);
            let failure = |line: &str| HostResult {
                stdout: String::new(),
                stderr_lines: vec![line.to_string()],
                exit_code: 255,
            };
            match nick {
                "TPS_AdminV" => HostResult {
                    stdout: CONFIG_VALUES.join("\n"),
                    ..HostResult::default()
                },
                "TPS_AgentV" | "TPS_OperatorV" => failure(FORBIDDEN_MESSAGE),
                n if n.ends_with('R') => failure(REVOKED_MESSAGE),
                n if n.ends_with('E') => failure(EXPIRED_MESSAGE),
                _ => failure("unexpected"),
            }
        }
    }

    impl Executor for FakeTps {
        fn execute(&self, _group: &str, command: &CommandSpec) -> anyhow::Result<ExecutionResults> {
            self.calls.borrow_mut().push(command.clone());
            Ok(self
                .hosts
                .iter()
                .map(|h| ((*h).to_string(), Self::answer(command)))
                .collect())
        }

        fn describe(&self, command: &CommandSpec) -> String {
            command.display_line("pki")
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    fn identity(nick: &str) -> Identity {
        Identity::parse(nick).unwrap()
    }

    #[test]
    fn valid_admin_sees_all_config_values_on_stdout() {
        let exec = FakeTps::new(&["localhost"]);
        let settings = Settings::default();
        let checker = ContractChecker::new(&exec, &settings, "master");
        let violations = checker
            .verify_show_by_identity(
                "tps-config-show",
                &identity("TPS_AdminV"),
                &strings(CONFIG_VALUES),
            )
            .unwrap();
        assert!(violations.is_empty(), "{violations:?}");
    }

    #[test]
    fn valid_non_admins_are_forbidden() {
        let exec = FakeTps::new(&["localhost"]);
        let settings = Settings::default();
        let checker = ContractChecker::new(&exec, &settings, "master");
        for nick in ["TPS_AgentV", "TPS_OperatorV"] {
            let violations = checker
                .verify_show_by_identity(
                    "tps-config-show",
                    &identity(nick),
                    &strings(&[FORBIDDEN_MESSAGE]),
                )
                .unwrap();
            assert!(violations.is_empty(), "{nick}: {violations:?}");
        }
    }

    #[test]
    fn revoked_and_expired_fail_with_ssl_alert() {
        let exec = FakeTps::new(&["localhost"]);
        let settings = Settings::default();
        let checker = ContractChecker::new(&exec, &settings, "master");
        for role in ["Admin", "Agent", "Operator"] {
            let revoked = identity(&format!("TPS_{role}R"));
            let expired = identity(&format!("TPS_{role}E"));
            assert!(
                checker
                    .verify_show_by_identity(
                        "tps-config-show",
                        &revoked,
                        &revoked.default_expectations().unwrap(),
                    )
                    .unwrap()
                    .is_empty()
            );
            assert!(
                checker
                    .verify_show_by_identity(
                        "tps-config-show",
                        &expired,
                        &expired.default_expectations().unwrap(),
                    )
                    .unwrap()
                    .is_empty()
            );
        }
    }

    #[test]
    fn stderr_requires_whole_line_match() {
        let exec = FakeTps::new(&["localhost"]);
        let settings = Settings::default();
        let checker = ContractChecker::new(&exec, &settings, "master");
        let violations = checker
            .verify_show_by_identity(
                "tps-config-show",
                &identity("TPS_AgentR"),
                &strings(&["CERTIFICATE_REVOKED"]),
            )
            .unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].stream, Stream::StderrLines);
        assert_eq!(violations[0].identity.as_deref(), Some("TPS_AgentR"));
    }

    #[test]
    fn admin_expectations_are_not_checked_on_stderr() {
        let exec = FakeTps::new(&["localhost"]);
        let settings = Settings::default();
        let checker = ContractChecker::new(&exec, &settings, "master");
        let violations = checker
            .verify_show_by_identity(
                "tps-config-show",
                &identity("TPS_AdminV"),
                &strings(&[FORBIDDEN_MESSAGE]),
            )
            .unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].stream, Stream::Stdout);
    }

    #[test]
    fn violation_names_missing_fragment_host_and_identity() {
        let exec = FakeTps::new(&["pki1", "pki2"]);
        let settings = Settings::default();
        let checker = ContractChecker::new(&exec, &settings, "master");
        let violations = checker
            .verify_show_by_identity(
                "tps-config-show",
                &identity("TPS_AdminV"),
                &strings(&["channel.blocksize: 224", "general.verifyProof: 2"]),
            )
            .unwrap();
        assert_eq!(violations.len(), 2, "one violation per host");
        let hosts: Vec<_> = violations.iter().map(|v| v.host.as_str()).collect();
        assert_eq!(hosts, vec!["pki1", "pki2"]);

        let msg = violations[0].to_string();
        assert!(msg.contains("general.verifyProof: 2"), "{msg}");
        assert!(msg.contains("TPS_AdminV"), "{msg}");
        assert!(msg.contains("tps-config-show"), "{msg}");
        assert!(msg.starts_with("pki1:"), "{msg}");
    }

    #[test]
    fn show_command_binds_identity_settings() {
        let exec = FakeTps::new(&["localhost"]);
        let mut settings = Settings::default();
        settings.pki.nssdb_password = Some("Secret.123".to_string());
        settings.pki.hostname = Some("pki.example.com".to_string());
        let checker = ContractChecker::new(&exec, &settings, "master");
        let cmd = checker
            .show_command("tps-config-show", &identity("TPS_OperatorV"))
            .unwrap();
        let expected: BTreeMap<String, String> = [
            ("nssdb", "/opt/pkitest/certdb"),
            ("nssdb_password", "Secret.123"),
            ("hostname", "pki.example.com"),
            ("port", "25443"),
            ("protocol", "https"),
            ("certnick", "TPS_OperatorV"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(cmd.options, expected);
        assert_eq!(cmd.name, "tps-config-show");
    }

    #[test]
    fn show_command_requires_subsystem_port() {
        let exec = FakeTps::new(&["localhost"]);
        let settings = Settings::default();
        let checker = ContractChecker::new(&exec, &settings, "master");
        let err = checker
            .verify_show_by_identity("est-config-show", &identity("EST_AdminV"), &[])
            .unwrap_err();
        assert!(err.to_string().contains("EST"));
        assert!(exec.calls.borrow().is_empty(), "nothing should run");
    }

    #[test]
    fn help_is_idempotent() {
        let exec = FakeTps::new(&["localhost"]);
        let settings = Settings::default();
        let checker = ContractChecker::new(&exec, &settings, "master");
        let cmd = CommandSpec::new("tps-config-show").arg("--help");
        let expected = strings(&[
            "--help            Show help options",
            "--output <file>   Output file to store general properties.",
        ]);
        let first = checker.verify_help(&cmd, &expected).unwrap();
        let second = checker.verify_help(&cmd, &expected).unwrap();
        assert!(first.is_empty());
        assert_eq!(first, second);
        assert_eq!(exec.calls.borrow().len(), 2);
    }

    #[test]
    fn help_missing_fragment_is_reported() {
        let exec = FakeTps::new(&["localhost"]);
        let settings = Settings::default();
        let checker = ContractChecker::new(&exec, &settings, "master");
        let cmd = CommandSpec::new("tps-config-show").arg("--help");
        let violations = checker
            .verify_help(
                &cmd,
                &strings(&["--input <file>    Input file containing general properties."]),
            )
            .unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].identity, None);
        assert_eq!(violations[0].command, "pki tps-config-show --help");
        assert!(ensure(violations).is_err());
    }

    #[test]
    fn empty_host_set_is_an_execution_failure() {
        let exec = FakeTps::new(&[]);
        let settings = Settings::default();
        let checker = ContractChecker::new(&exec, &settings, "master");
        let err = checker
            .verify_help(&CommandSpec::new("tps-config").arg("--help"), &[])
            .unwrap_err();
        assert!(err.to_string().contains("no host"));
    }

    #[test]
    fn ensure_passes_without_violations() {
        assert!(ensure(Vec::new()).is_ok());
    }
}
