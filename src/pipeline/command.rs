//! Placeholder substitution in user command templates.

use regex::{Captures, Regex};
use std::sync::LazyLock;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| {
        Regex::new(r"(#?)\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex is valid")
    });

/// Substitute `{key}` placeholders with their values.
///
/// Unknown keys are left alone, and `#{key}` escapes to a literal `{key}`.
/// Unlike `str::replace` chains this leaves shell syntax such as `${HOME}`
/// and `{a,b}` untouched.
pub fn format_safe(template: &str, params: &[(&str, &str)]) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures<'_>| {
            let escaped = !caps[1].is_empty();
            let key = &caps[2];
            match params.iter().find(|(name, _)| *name == key) {
                Some(_) if escaped => format!("{{{key}}}"),
                Some((_, value)) => value.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Fill a user command template; `{python}` and `{pip}` are always available
pub fn prepare_command(command: &str, params: &[(&str, &str)]) -> String {
    let mut all: Vec<(&str, &str)> = vec![("python", "python"), ("pip", "pip")];
    all.extend_from_slice(params);
    format_safe(command, &all)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_safe_substitutes() {
        assert_eq!(
            format_safe(
                "auditwheel repair -w {dest_dir} {wheel}",
                &[("wheel", "a.whl"), ("dest_dir", "/out")]
            ),
            "auditwheel repair -w /out a.whl"
        );
    }

    #[test]
    fn test_format_safe_escape() {
        assert_eq!(
            format_safe("echo #{wheel} {wheel}", &[("wheel", "a.whl")]),
            "echo {wheel} a.whl"
        );
    }

    #[test]
    fn test_format_safe_leaves_shell_syntax() {
        let template = "echo ${HOME} {unknown} #{other}";
        assert_eq!(format_safe(template, &[("wheel", "a.whl")]), template);
    }

    #[test]
    fn test_prepare_command_defaults() {
        assert_eq!(
            prepare_command("{pip} install {project}", &[("project", "/project")]),
            "pip install /project"
        );
        assert_eq!(prepare_command("{python} -m pytest", &[]), "python -m pytest");
    }
}
