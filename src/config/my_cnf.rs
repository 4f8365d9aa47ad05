//! Ordered server directives rendered into the instance's `my.cnf`.

use std::fmt::Write as _;

/// Option group header written at the top of the generated file.
pub const SECTION_HEADER: &str = "[mysqld]";

/// Ordered mapping of server directives.
///
/// Keys are canonicalised so `skip_networking` and `skip-networking` refer to
/// the same directive, matching how `mysqld` parses option files. A directive
/// without a value renders as a bare flag line.
///
/// # Examples
/// ```
/// use mysqld_ephemeral::MyCnf;
///
/// let mut cnf = MyCnf::new();
/// cnf.set("port", "3307");
/// cnf.set_flag("skip-networking");
/// assert_eq!(cnf.render(), "[mysqld]\nport=3307\nskip-networking\n");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MyCnf {
    directives: Vec<(String, Option<String>)>,
}

impl MyCnf {
    /// Creates an empty directive set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            directives: Vec::new(),
        }
    }

    /// Sets `key` to `value`, keeping the original position when the key is
    /// already present. An empty `value` turns the directive into a flag.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let raw = value.into();
        let stored = if raw.is_empty() { None } else { Some(raw) };
        self.upsert(key, stored);
    }

    /// Sets `key` as a flag-only directive.
    pub fn set_flag(&mut self, key: &str) {
        self.upsert(key, None);
    }

    /// Sets `key` to `value` only when the key is absent.
    pub fn set_default(&mut self, key: &str, value: impl Into<String>) {
        if !self.contains(key) {
            self.set(key, value);
        }
    }

    /// Returns `true` when `key` is present, with or without a value.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Returns the value configured for `key`, or `None` when the key is
    /// absent or flag-only.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&str> {
        self.position(key)
            .and_then(|index| self.directives.get(index))
            .and_then(|(_, value)| value.as_deref())
    }

    /// Removes `key`, returning `true` when it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.position(key) {
            Some(index) => {
                self.directives.remove(index);
                true
            }
            None => false,
        }
    }

    /// Iterates directives in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.directives
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_deref()))
    }

    /// Returns the number of directives.
    #[must_use]
    pub fn len(&self) -> usize {
        self.directives.len()
    }

    /// Returns `true` when no directives are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    /// Renders the option file: the section header followed by one
    /// `key=value` or bare `key` line per directive.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(16 + self.directives.len() * 32);
        out.push_str(SECTION_HEADER);
        out.push('\n');
        for (key, value) in self.iter() {
            // Writing into a String cannot fail.
            let _ignored = match value {
                Some(value) => writeln!(out, "{key}={value}"),
                None => writeln!(out, "{key}"),
            };
        }
        out
    }

    fn upsert(&mut self, key: &str, value: Option<String>) {
        let canonical = canonical_key(key);
        match self.position(&canonical) {
            Some(index) => {
                if let Some(slot) = self.directives.get_mut(index) {
                    slot.1 = value;
                }
            }
            None => self.directives.push((canonical, value)),
        }
    }

    fn position(&self, key: &str) -> Option<usize> {
        let canonical = canonical_key(key);
        self.directives.iter().position(|(k, _)| *k == canonical)
    }
}

impl<K, V> FromIterator<(K, V)> for MyCnf
where
    K: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut cnf = Self::new();
        for (key, value) in iter {
            cnf.set(key.as_ref(), value);
        }
        cnf
    }
}

fn canonical_key(key: &str) -> String {
    key.trim().replace('_', "-")
}
