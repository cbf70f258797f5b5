//! User environment assignments (`--environment`).
//!
//! Values use shell syntax and are evaluated inside the build container, in
//! order, so each assignment sees the ones before it:
//!
//! ```text
//! CFLAGS="-O2 -g" PATH=$PATH:/opt/tools/bin
//! ```

use crate::container::{CommandInvocation, Environment, ShellChannel};
use crate::error::{ChannelError, ConfigurationError};

/// One `NAME=value` assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentAssignment {
    /// Variable name
    pub name: String,
    /// Unevaluated shell value
    pub value: String,
}

impl EnvironmentAssignment {
    fn parse(assignment: &str) -> Result<Self, ConfigurationError> {
        match assignment.split_once('=') {
            Some((name, value)) if is_valid_name(name) => Ok(Self {
                name: name.to_string(),
                value: value.to_string(),
            }),
            _ => Err(ConfigurationError::InvalidEnvironment {
                assignment: assignment.to_string(),
            }),
        }
    }

    /// Whether the value needs a shell to evaluate
    fn is_literal(&self) -> bool {
        !self
            .value
            .chars()
            .any(|c| matches!(c, '$' | '`' | '"' | '\'' | '\\' | '~' | '*' | '?' | '['))
    }

    /// Evaluate the value in `env` inside the container
    async fn evaluate<C: ShellChannel>(
        &self,
        env: &Environment,
        channel: &mut C,
    ) -> Result<String, ChannelError> {
        if self.is_literal() {
            return Ok(self.value.clone());
        }
        // an assignment expands like the right-hand side of NAME=value, without word splitting
        let script = format!("CIBW_EVALUATED={}; printf '%s' \"$CIBW_EVALUATED\"", self.value);
        let output = channel
            .exec(CommandInvocation::new(["sh", "-c", script.as_str()]).env(env).capture())
            .await?;
        Ok(output.text())
    }
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parsed `--environment` option
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedEnvironment {
    assignments: Vec<EnvironmentAssignment>,
}

impl ParsedEnvironment {
    /// Parse space-separated assignments, honouring shell quoting
    pub fn parse(env_string: &str) -> Result<Self, ConfigurationError> {
        let assignments = split_env_items(env_string)?
            .iter()
            .map(|item| EnvironmentAssignment::parse(item))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { assignments })
    }

    /// The assignments in order
    pub fn assignments(&self) -> &[EnvironmentAssignment] {
        &self.assignments
    }

    /// Apply the assignments on top of `base`
    pub async fn as_environment<C: ShellChannel>(
        &self,
        base: Environment,
        channel: &mut C,
    ) -> Result<Environment, ChannelError> {
        let mut env = base;
        for assignment in &self.assignments {
            let value = assignment.evaluate(&env, channel).await?;
            env.insert(assignment.name.as_str(), value);
        }
        Ok(env)
    }
}

/// Split on unquoted whitespace, keeping quotes in the items
fn split_env_items(env_string: &str) -> Result<Vec<String>, ConfigurationError> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut chars = env_string.chars();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        match (quote, c) {
            (None, c) if c.is_whitespace() => {
                if !current.is_empty() {
                    items.push(std::mem::take(&mut current));
                }
            }
            (None, '\'' | '"') => {
                quote = Some(c);
                current.push(c);
            }
            (Some(q), c) if c == q => {
                quote = None;
                current.push(c);
            }
            (Some('\''), c) => current.push(c),
            (_, '\\') => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            (_, c) => current.push(c),
        }
    }

    if quote.is_some() {
        return Err(ConfigurationError::InvalidEnvironment {
            assignment: env_string.to_string(),
        });
    }
    if !current.is_empty() {
        items.push(current);
    }
    Ok(items)
}
