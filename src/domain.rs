use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

/// Disease identifier grouping a set of runs (for example a MeSH id).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupKey(String);

impl GroupKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GroupKey {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        normalize_segment(value)
            .map(Self)
            .ok_or_else(|| HarvestError::InvalidGroupKey(value.to_string()))
    }
}

impl TryFrom<String> for GroupKey {
    type Error = HarvestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GroupKey> for String {
    fn from(value: GroupKey) -> Self {
        value.0
    }
}

/// Sequencing run accession; one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemId(String);

impl ItemId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemId {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        normalize_segment(value)
            .map(Self)
            .ok_or_else(|| HarvestError::InvalidItemId(value.to_string()))
    }
}

impl TryFrom<String> for ItemId {
    type Error = HarvestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ItemId> for String {
    fn from(value: ItemId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkItem {
    pub group: GroupKey,
    pub id: ItemId,
}

impl WorkItem {
    pub fn new(group: GroupKey, id: ItemId) -> Self {
        Self { group, id }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.id)
    }
}

// Both keys end up as a single directory or file name segment.
fn normalize_segment(value: &str) -> Option<String> {
    let trimmed = value.trim();
    let is_valid = !trimmed.is_empty()
        && trimmed != "."
        && trimmed != ".."
        && !trimmed
            .chars()
            .any(|ch| matches!(ch, '/' | '\\' | '\0' | '\t' | '\n' | '\r'));
    is_valid.then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_item_id_trims_whitespace() {
        let id: ItemId = "  SRR1234567 ".parse().unwrap();
        assert_eq!(id.as_str(), "SRR1234567");
    }

    #[test]
    fn parse_item_id_rejects_path_segments() {
        assert_matches!("../etc".parse::<ItemId>(), Err(HarvestError::InvalidItemId(_)));
        assert_matches!("a\\b".parse::<ItemId>(), Err(HarvestError::InvalidItemId(_)));
        assert_matches!("..".parse::<ItemId>(), Err(HarvestError::InvalidItemId(_)));
        assert_matches!("   ".parse::<ItemId>(), Err(HarvestError::InvalidItemId(_)));
    }

    #[test]
    fn parse_group_key_rejects_tabs() {
        let err = "D00\t3093".parse::<GroupKey>().unwrap_err();
        assert_matches!(err, HarvestError::InvalidGroupKey(_));
    }

    #[test]
    fn group_key_deserializes_through_validation() {
        let key: GroupKey = serde_json::from_str("\"D003093\"").unwrap();
        assert_eq!(key.as_str(), "D003093");
        assert!(serde_json::from_str::<GroupKey>("\"a/b\"").is_err());
    }
}
