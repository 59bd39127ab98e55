//! Certificate identities used to authenticate a `pki` invocation.
//!
//! Test certificates follow the nickname convention
//! `<SUBSYSTEM>_<Role><Validity>`, e.g. `TPS_AdminV` or `CA_AgentR`.

use std::fmt;

use serde::Serialize;

pub const FORBIDDEN_MESSAGE: &str = "ForbiddenException: Authorization Error";
pub const REVOKED_MESSAGE: &str = "FATAL: SSL alert received: CERTIFICATE_REVOKED";
pub const EXPIRED_MESSAGE: &str = "FATAL: SSL alert received: CERTIFICATE_EXPIRED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Agent,
    Operator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Validity {
    Valid,
    Revoked,
    Expired,
}

/// Output stream an expectation set is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stream {
    /// Substring containment in the full stdout text.
    Stdout,
    /// Exact membership in the sequence of stderr lines.
    StderrLines,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::StderrLines => f.write_str("stderr lines"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub nickname: String,
    pub subsystem: String,
    pub role: Role,
    pub validity: Validity,
}

impl Identity {
    /// Parse a certificate nickname such as `TPS_OperatorE`.
    ///
    /// # Errors
    ///
    /// Returns an error if the nickname has no `_` separator, an empty
    /// subsystem, an unknown role, or an unknown validity suffix.
    pub fn parse(nickname: &str) -> anyhow::Result<Self> {
        let (subsystem, rest) = nickname
            .split_once('_')
            .ok_or_else(|| anyhow::anyhow!("nickname {nickname:?} has no '_' separator"))?;
        if subsystem.is_empty() {
            anyhow::bail!("nickname {nickname:?} has an empty subsystem prefix");
        }

        let (role_part, suffix) = match rest.char_indices().last() {
            Some((idx, c)) => (&rest[..idx], c),
            None => anyhow::bail!("nickname {nickname:?} has no role"),
        };

        let role = match role_part {
            "Admin" => Role::Admin,
            "Agent" => Role::Agent,
            "Operator" => Role::Operator,
            other => anyhow::bail!("nickname {nickname:?}: unknown role {other:?}"),
        };
        let validity = match suffix {
            'V' => Validity::Valid,
            'R' => Validity::Revoked,
            'E' => Validity::Expired,
            other => anyhow::bail!("nickname {nickname:?}: unknown validity suffix {other:?}"),
        };

        Ok(Self {
            nickname: nickname.to_string(),
            subsystem: subsystem.to_string(),
            role,
            validity,
        })
    }

    /// Only a valid admin certificate is expected to succeed.
    pub fn expects_success(&self) -> bool {
        self.role == Role::Admin && self.validity == Validity::Valid
    }

    pub fn expected_stream(&self) -> Stream {
        if self.expects_success() {
            Stream::Stdout
        } else {
            Stream::StderrLines
        }
    }

    /// The failure message this identity must produce, or `None` for the
    /// success path whose expectations depend on the command.
    pub fn default_expectations(&self) -> Option<Vec<String>> {
        let message = match (self.role, self.validity) {
            (_, Validity::Revoked) => REVOKED_MESSAGE,
            (_, Validity::Expired) => EXPIRED_MESSAGE,
            (Role::Admin, Validity::Valid) => return None,
            (Role::Agent | Role::Operator, Validity::Valid) => FORBIDDEN_MESSAGE,
        };
        Some(vec![message.to_string()])
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.nickname)
    }
}
