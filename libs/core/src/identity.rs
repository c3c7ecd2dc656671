use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::wire;

/// Identity of a target object on the server side.
///
/// The textual form is `category/name`, or just `name` when the category is
/// empty. The name is never empty and the category never contains `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity {
    category: String,
    name: String,
}

impl Identity {
    /// Create an identity with an empty category
    pub fn new(name: impl Into<String>) -> Result<Self> {
        Self::with_category("", name)
    }

    pub fn with_category(category: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let category = category.into();
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidName("identity name must not be empty".to_string()));
        }
        // The textual form splits on the first '/'.
        if category.contains('/') {
            return Err(Error::InvalidName(format!(
                "identity category `{category}` must not contain '/'"
            )));
        }
        Ok(Self { category, name })
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        wire::put_str(buf, &self.category);
        wire::put_str(buf, &self.name);
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let category = wire::get_str(buf)?;
        let name = wire::get_str(buf)?;
        Self::with_category(category, name)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.category.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.category, self.name)
        }
    }
}

impl FromStr for Identity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((category, name)) => Self::with_category(category, name),
            None => Self::new(s),
        }
    }
}

impl TryFrom<String> for Identity {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Identity> for String {
    fn from(id: Identity) -> Self {
        id.to_string()
    }
}
