// A wrapper around the SDK `Region` to avoid exposing it in the API.

use std::{borrow::Cow, fmt, str::FromStr};

// Both SSO clients share a single region per invocation, so the `sso` crate's re-export is used
// for both of them.
use aws_sdk_sso::config::Region as SdkRegion;

/// An AWS region.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct Region(pub(crate) SdkRegion);

impl Region {
    /// Construct a new `Region` for the given string.
    pub fn new(region: impl Into<Cow<'static, str>>) -> Self {
        Self(SdkRegion::new(region))
    }
}

impl FromStr for Region {
    type Err = InvalidRegion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = !s.is_empty()
            && s.split('-').count() >= 3
            && s
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if valid {
            Ok(Self::new(s.to_string()))
        } else {
            Err(InvalidRegion(s.to_string()))
        }
    }
}

impl AsRef<str> for Region {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl<'de> serde::Deserialize<'de> for Region {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let region = String::deserialize(deserializer)?;
        region.parse().map_err(serde::de::Error::custom)
    }
}

impl serde::Serialize for Region {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_ref())
    }
}

/// A region string that doesn't look like an AWS region.
#[derive(Debug, thiserror::Error)]
#[error("invalid AWS region {0:?}")]
pub struct InvalidRegion(String);
