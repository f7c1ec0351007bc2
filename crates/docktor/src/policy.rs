//! Read-only command policy.
//!
//! Every diagnostic command passes through [`CommandPolicy::check`] before it
//! is dispatched. The allow-list is fixed at compile time and shared by every
//! concurrent investigation.

use crate::error::PolicyViolation;

/// Verbs that only read cluster state
pub const READ_ONLY_VERBS: &[&str] = &["get", "describe", "logs", "top", "explain"];

/// Flags that would redirect credentials or never return
const DENIED_FLAGS: &[&str] = &[
    "--kubeconfig",
    "--context",
    "--cluster",
    "--user",
    "--server",
    "--token",
    "--as",
    "--as-group",
    "--as-uid",
    "--watch",
    "--watch-only",
    "-w",
    "--follow",
];

/// Allow-list enforcement for diagnostic commands
#[derive(Debug, Clone, Copy)]
pub struct CommandPolicy {
    verbs: &'static [&'static str],
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::read_only()
    }
}

impl CommandPolicy {
    pub fn read_only() -> Self {
        Self {
            verbs: READ_ONLY_VERBS,
        }
    }

    pub fn allowed_verbs(&self) -> &'static [&'static str] {
        self.verbs
    }

    /// Validate a command and return its normalized tokens.
    ///
    /// A leading `kubectl` token is accepted and stripped so the first
    /// returned token is always the verb.
    pub fn check(&self, tokens: &[String]) -> Result<Vec<String>, PolicyViolation> {
        let tokens: Vec<String> = tokens
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        let args = match tokens.first().map(String::as_str) {
            Some("kubectl") => &tokens[1..],
            _ => &tokens[..],
        };

        let verb = args.first().ok_or(PolicyViolation::Empty)?;
        if !self.verbs.contains(&verb.as_str()) {
            return Err(PolicyViolation::DisallowedVerb { verb: verb.clone() });
        }

        for arg in &args[1..] {
            let flag = arg.split('=').next().unwrap_or(arg);
            // `-f` means --follow for logs but --filename elsewhere
            if DENIED_FLAGS.contains(&flag) || (verb == "logs" && flag == "-f") {
                return Err(PolicyViolation::DisallowedFlag {
                    flag: flag.to_string(),
                });
            }
        }

        Ok(args.to_vec())
    }
}
