use bytes::{BufMut, BytesMut};

use crate::error::{HttpError, HttpResult};

/// One header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Reject anything that would let the header escape its line.
    pub fn validate(&self) -> HttpResult<()> {
        let invalid = |reason| HttpError::InvalidHeader {
            name: self.name.clone(),
            reason,
        };
        if self.name.is_empty() {
            return Err(invalid("empty name"));
        }
        if !self.name.bytes().all(is_token_byte) {
            return Err(invalid("name is not a token"));
        }
        if self.value.bytes().any(|b| b == b'\r' || b == b'\n') {
            return Err(invalid("value contains CR or LF"));
        }
        if self.value.bytes().any(|b| b == 0) {
            return Err(invalid("value contains NUL"));
        }
        Ok(())
    }

    fn write_to(&self, out: &mut BytesMut) {
        out.put_slice(self.name.as_bytes());
        out.put_slice(b": ");
        out.put_slice(self.value.trim().as_bytes());
        out.put_slice(b"\r\n");
    }
}

/// RFC 9110 `tchar`.
pub(crate) fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Headers in insertion order. Duplicate names are kept (`Set-Cookie`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<Header>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push(Header::new(name, value));
    }

    /// First value for `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Drop every header called `name`. Returns how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|h| !h.name.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate and append every header as `Name: value\r\n`.
    pub(crate) fn write_to(&self, out: &mut BytesMut) -> HttpResult<()> {
        for header in &self.entries {
            header.validate()?;
            header.write_to(out);
        }
        Ok(())
    }
}

impl FromIterator<Header> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = Header>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl FromIterator<(String, String)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(n, v)| Header::new(n, v))
                .collect(),
        }
    }
}
