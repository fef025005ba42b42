use std::fmt;

/// An ordered sequence of keys describing a path from a root element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Directory(Vec<String>);

impl Directory {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Directory(keys.into_iter().map(Into::into).collect())
    }

    /// The empty directory: resolves to the root itself.
    pub fn root() -> Self {
        Directory(Vec::new())
    }

    /// Parses a JSON Pointer such as `/user/id`.
    ///
    /// `~1` unescapes to `/` and `~0` to `~`. The empty string is the root.
    pub fn from_pointer(pointer: &str) -> Self {
        if pointer.is_empty() {
            return Self::root();
        }
        let body = pointer.strip_prefix('/').unwrap_or(pointer);
        Directory(body.split('/').map(unescape_segment).collect())
    }

    pub fn push(&mut self, key: impl Into<String>) {
        self.0.push(key.into());
    }

    pub fn join(&self, key: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.push(key);
        next
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn unescape_segment(segment: &str) -> String {
    if !segment.contains('~') {
        return segment.to_string();
    }
    segment.replace("~1", "/").replace("~0", "~")
}

fn escape_segment(segment: &str) -> String {
    if !segment.contains(['~', '/']) {
        return segment.to_string();
    }
    segment.replace('~', "~0").replace('/', "~1")
}

impl fmt::Display for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for key in &self.0 {
            write!(f, "/{}", escape_segment(key))?;
        }
        Ok(())
    }
}

impl From<Vec<String>> for Directory {
    fn from(keys: Vec<String>) -> Self {
        Directory(keys)
    }
}

impl From<&[&str]> for Directory {
    fn from(keys: &[&str]) -> Self {
        Directory::new(keys.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for Directory {
    fn from(keys: [&str; N]) -> Self {
        Directory::new(keys)
    }
}

impl<S: Into<String>> FromIterator<S> for Directory {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Directory::new(iter)
    }
}

impl AsRef<[String]> for Directory {
    fn as_ref(&self) -> &[String] {
        &self.0
    }
}
