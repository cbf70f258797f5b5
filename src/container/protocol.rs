//! Marker framing for commands sent to a container shell.
//!
//! Each command is wrapped in a subshell that prints a footer after it exits:
//!
//! ```text
//! (
//!     cd /project || { printf "%04d%s\n" 1 6f1c...marker; exit 1; }
//!     env PATH=/usr/bin python setup.py bdist_wheel
//!     printf "%04d%s\n" $? 6f1c...marker
//! )
//! ```
//!
//! The reader consumes output until it sees a line ending in the marker; the
//! four digits in front of the marker are the exit status. A working
//! directory that can't be entered answers with status 1 and runs nothing.

use super::env::os_as_bytes;
use super::{CommandInvocation, ContainerPath};

/// Width of the zero-padded exit status in the footer
pub const STATUS_WIDTH: usize = 4;

/// Quote `value` for a POSIX shell.
///
/// Strings made only of safe characters are returned unchanged; everything
/// else is single-quoted with embedded quotes spliced as `'"'"'`.
pub fn shell_quote(value: &[u8]) -> Vec<u8> {
    if value.is_empty() {
        return b"''".to_vec();
    }
    let safe = value
        .iter()
        .all(|b| b.is_ascii_alphanumeric() || b"@%+=:,./-_".contains(b));
    if safe {
        return value.to_vec();
    }

    let mut quoted = Vec::with_capacity(value.len() + 2);
    quoted.push(b'\'');
    for &b in value {
        if b == b'\'' {
            quoted.extend_from_slice(b"'\"'\"'");
        } else {
            quoted.push(b);
        }
    }
    quoted.push(b'\'');
    quoted
}

/// Render the script for one invocation
pub fn build_script(
    invocation: &CommandInvocation,
    default_cwd: &ContainerPath,
    marker: &str,
) -> Vec<u8> {
    let cwd = invocation.cwd.as_ref().unwrap_or(default_cwd);

    let mut script = Vec::new();
    script.extend_from_slice(b"(\n    cd ");
    script.extend_from_slice(&shell_quote(cwd.as_str().as_bytes()));
    script.extend_from_slice(b" || { printf \"%04d%s\\n\" 1 ");
    script.extend_from_slice(marker.as_bytes());
    script.extend_from_slice(b"; exit 1; }\n    env");

    if let Some(env) = &invocation.env {
        for (key, value) in env.iter() {
            script.push(b' ');
            script.extend_from_slice(&shell_quote(&os_as_bytes(key)));
            script.push(b'=');
            script.extend_from_slice(&shell_quote(&os_as_bytes(value)));
        }
    }
    for arg in &invocation.args {
        script.push(b' ');
        script.extend_from_slice(&shell_quote(arg.as_bytes()));
    }

    script.extend_from_slice(b"\n    printf \"%04d%s\\n\" $? ");
    script.extend_from_slice(marker.as_bytes());
    script.extend_from_slice(b"\n)\n");
    script
}

/// A parsed footer line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    /// Bytes of command output on the footer line before the status digits
    pub output_len: usize,
    /// Exit status
    pub status: i32,
}

/// Check whether `line` is the footer for `marker`.
///
/// Returns `Ok(None)` for ordinary output lines and an error when the line
/// carries the marker but no valid status.
pub fn parse_footer(line: &[u8], marker: &str) -> Result<Option<Footer>, String> {
    let Some(body) = line.strip_suffix(b"\n") else {
        return Ok(None);
    };
    let Some(head) = body.strip_suffix(marker.as_bytes()) else {
        return Ok(None);
    };
    if head.len() < STATUS_WIDTH {
        return Err(format!("footer too short: {:?}", String::from_utf8_lossy(line)));
    }

    let output_len = head.len() - STATUS_WIDTH;
    let digits = &head[output_len..];
    let status = std::str::from_utf8(digits)
        .ok()
        .filter(|d| d.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|d| d.parse::<i32>().ok())
        .ok_or_else(|| format!("bad exit status {:?}", String::from_utf8_lossy(digits)))?;

    Ok(Some(Footer { output_len, status }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Environment;

    const MARKER: &str = "0f6c1f7e-3a52-4f0f-9b8c-2b9a3c0f7d11";

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote(b"plain/path-1.0"), b"plain/path-1.0");
        assert_eq!(shell_quote(b""), b"''");
        assert_eq!(shell_quote(b"two words"), b"'two words'");
        assert_eq!(shell_quote(b"it's"), b"'it'\"'\"'s'");
        assert_eq!(shell_quote(b"$HOME"), b"'$HOME'");
    }

    #[test]
    fn test_build_script_layout() {
        let env: Environment = [("PATH", "/usr/bin"), ("A B", "x y")].into_iter().collect();
        let invocation = CommandInvocation::new(["echo", "hello world"]).env(&env);
        let script = build_script(&invocation, &ContainerPath::new("/project"), MARKER);
        let expected = format!(
            "(\n    cd /project || {{ printf \"%04d%s\\n\" 1 {MARKER}; exit 1; }}\n    \
             env 'A B'='x y' PATH=/usr/bin echo 'hello world'\n    \
             printf \"%04d%s\\n\" $? {MARKER}\n)\n"
        );
        assert_eq!(String::from_utf8(script).unwrap(), expected);
    }

    #[test]
    fn test_build_script_cwd_override() {
        let invocation = CommandInvocation::new(["true"]).cwd(&ContainerPath::new("/root"));
        let script =
            String::from_utf8(build_script(&invocation, &ContainerPath::new("/project"), MARKER))
                .unwrap();
        assert!(script.contains("cd /root || {"));
        assert!(script.contains("    env true\n"));
    }

    #[test]
    fn test_parse_footer() {
        let line = format!("0000{MARKER}\n");
        assert_eq!(
            parse_footer(line.as_bytes(), MARKER).unwrap(),
            Some(Footer { output_len: 0, status: 0 })
        );

        let line = format!("no newline at end0127{MARKER}\n");
        assert_eq!(
            parse_footer(line.as_bytes(), MARKER).unwrap(),
            Some(Footer { output_len: 17, status: 127 })
        );
    }

    #[test]
    fn test_parse_footer_ignores_output() {
        assert_eq!(parse_footer(b"hello\n", MARKER).unwrap(), None);
        let partial = format!("0001{MARKER}");
        assert_eq!(parse_footer(partial.as_bytes(), MARKER).unwrap(), None);
    }

    #[test]
    fn test_parse_footer_rejects_bad_status() {
        let line = format!("1{MARKER}\n");
        assert!(parse_footer(line.as_bytes(), MARKER).is_err());
        let line = format!("00x1{MARKER}\n");
        assert!(parse_footer(line.as_bytes(), MARKER).is_err());
    }
}
