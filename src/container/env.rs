//! Lossless container environments.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};

/// Environment variables of a container process.
///
/// Keys and values are kept as raw bytes so values that are not valid UTF-8
/// survive a round trip through the container unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<OsString, OsString>,
}

impl Environment {
    /// Empty environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the output of `env -0`: NUL-terminated `KEY=VALUE` records
    pub fn from_env0(bytes: &[u8]) -> Result<Self, String> {
        let mut vars = BTreeMap::new();
        for record in bytes.split(|b| *b == 0).filter(|r| !r.is_empty()) {
            let eq = record
                .iter()
                .position(|b| *b == b'=')
                .ok_or_else(|| format!("record without '=': {}", String::from_utf8_lossy(record)))?;
            vars.insert(
                os_from_bytes(record[..eq].to_vec()),
                os_from_bytes(record[eq + 1..].to_vec()),
            );
        }
        Ok(Self { vars })
    }

    /// Value of `key`
    pub fn get(&self, key: &str) -> Option<&OsStr> {
        self.vars.get(OsStr::new(key)).map(OsString::as_os_str)
    }

    /// Value of `key` decoded lossily
    pub fn get_lossy(&self, key: &str) -> Option<String> {
        self.get(key).map(|v| v.to_string_lossy().into_owned())
    }

    /// Set `key`, returning the previous value
    pub fn insert(
        &mut self,
        key: impl Into<OsString>,
        value: impl Into<OsString>,
    ) -> Option<OsString> {
        self.vars.insert(key.into(), value.into())
    }

    /// Remove `key`
    pub fn remove(&mut self, key: &str) -> Option<OsString> {
        self.vars.remove(OsStr::new(key))
    }

    /// Put `dir` at the front of `PATH`
    pub fn prepend_path(&mut self, dir: &str) {
        let mut path = OsString::from(dir);
        if let Some(existing) = self.get("PATH").filter(|p| !p.is_empty()) {
            path.push(":");
            path.push(existing);
        }
        self.insert("PATH", path);
    }

    /// Variables in key order
    pub fn iter(&self) -> impl Iterator<Item = (&OsStr, &OsStr)> {
        self.vars.iter().map(|(k, v)| (k.as_os_str(), v.as_os_str()))
    }

    /// Number of variables
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// True when no variables are set
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K: Into<OsString>, V: Into<OsString>> FromIterator<(K, V)> for Environment {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

#[cfg(unix)]
pub(crate) fn os_from_bytes(bytes: Vec<u8>) -> OsString {
    use std::os::unix::ffi::OsStringExt;
    OsString::from_vec(bytes)
}

#[cfg(not(unix))]
pub(crate) fn os_from_bytes(bytes: Vec<u8>) -> OsString {
    OsString::from(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(unix)]
pub(crate) fn os_as_bytes(value: &OsStr) -> Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;
    Cow::Borrowed(value.as_bytes())
}

#[cfg(not(unix))]
pub(crate) fn os_as_bytes(value: &OsStr) -> Cow<'_, [u8]> {
    match value.to_string_lossy() {
        Cow::Borrowed(s) => Cow::Borrowed(s.as_bytes()),
        Cow::Owned(s) => Cow::Owned(s.into_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env0() {
        let env = Environment::from_env0(b"PATH=/usr/bin:/bin\0MULTI=a\nb=c\0EMPTY=\0").unwrap();
        assert_eq!(env.len(), 3);
        assert_eq!(env.get_lossy("PATH").as_deref(), Some("/usr/bin:/bin"));
        assert_eq!(env.get_lossy("MULTI").as_deref(), Some("a\nb=c"));
        assert_eq!(env.get_lossy("EMPTY").as_deref(), Some(""));
    }

    #[test]
    fn test_from_env0_rejects_garbage() {
        assert!(Environment::from_env0(b"NOEQUALS\0").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_values_survive() {
        let env = Environment::from_env0(b"BIN=\xff\xfe\x80ok\0").unwrap();
        assert_eq!(os_as_bytes(env.get("BIN").unwrap()).as_ref(), b"\xff\xfe\x80ok");
    }

    #[test]
    fn test_prepend_path() {
        let mut env = Environment::new();
        env.prepend_path("/opt/b/bin");
        assert_eq!(env.get_lossy("PATH").as_deref(), Some("/opt/b/bin"));
        env.prepend_path("/opt/a/bin");
        assert_eq!(env.get_lossy("PATH").as_deref(), Some("/opt/a/bin:/opt/b/bin"));
    }
}
