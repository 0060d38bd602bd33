//! Panel object identifiers of the form `p<page>b<widget>`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for invalid object IDs
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("'{0}' is not an openHASP object id of the form p#b#")]
pub struct ObjectIdError(pub String);

/// Identifies a widget on the panel, e.g. `p1b2` is widget 2 on page 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectId {
    page: u32,
    widget: u32,
}

impl ObjectId {
    pub fn new(page: u32, widget: u32) -> Self {
        Self { page, widget }
    }

    /// Page the widget lives on (page 0 is shown on top of every page)
    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn widget(&self) -> u32 {
        self.widget
    }
}

fn parse_number(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

impl FromStr for ObjectId {
    type Err = ObjectIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ObjectIdError(s.to_string());
        let rest = s.strip_prefix('p').ok_or_else(invalid)?;
        let (page, widget) = rest.split_once('b').ok_or_else(invalid)?;

        match (parse_number(page), parse_number(widget)) {
            (Some(page), Some(widget)) => Ok(Self { page, widget }),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for ObjectId {
    type Error = ObjectIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ObjectId> for String {
    fn from(id: ObjectId) -> String {
        id.to_string()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}b{}", self.page, self.widget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object_id() {
        let id: ObjectId = "p12b3".parse().unwrap();
        assert_eq!(id.page(), 12);
        assert_eq!(id.widget(), 3);
        assert_eq!(id.to_string(), "p12b3");
    }

    #[test]
    fn test_page_zero_is_valid() {
        let id: ObjectId = "p0b1".parse().unwrap();
        assert_eq!(id.page(), 0);
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["", "p", "pb", "p1", "p1b", "pxb1", "b1p1", "p1b2c", "P1B2", "p-1b2"] {
            assert!(bad.parse::<ObjectId>().is_err(), "{bad} should be rejected");
        }
    }
}
