use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::record::Record;
use crate::store::StoreError;

/// Enumeration of the kinds of mutation the change feed reports.
/// Insert: a record was created.
/// Modify: an existing record had at least one field changed.
/// Remove: a record was deleted (never by this system, but observed all the same).
#[derive(Debug, PartialEq, Eq, Clone, Copy, Deserialize, Serialize, sqlx::Type)]
#[sqlx(type_name = "change_kind")]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Modify,
    Remove,
}

/// Allow casting `ChangeKind` from strings.
impl FromStr for ChangeKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(ChangeKind::Insert),
            "MODIFY" => Ok(ChangeKind::Modify),
            "REMOVE" => Ok(ChangeKind::Remove),
            invalid => Err(StoreError::ParseChangeKindError(invalid.to_owned())),
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChangeKind::Insert => write!(f, "INSERT"),
            ChangeKind::Modify => write!(f, "MODIFY"),
            ChangeKind::Remove => write!(f, "REMOVE"),
        }
    }
}

/// One entry of the change feed: what happened, and the record as it looks afterwards.
/// `new_image` is `None` for removals.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ChangeEvent {
    pub id: i64,
    pub kind: ChangeKind,
    pub new_image: Option<Record>,
}

impl ChangeEvent {
    pub fn new(id: i64, kind: ChangeKind, new_image: Option<Record>) -> Self {
        Self {
            id,
            kind,
            new_image,
        }
    }

    /// The status of the new image, or an empty string when there is none.
    pub fn status(&self) -> &str {
        self.new_image
            .as_ref()
            .map(|record| record.status.as_str())
            .unwrap_or_default()
    }

    pub fn supplier_ref(&self) -> &str {
        self.new_image
            .as_ref()
            .map(|record| record.supplier_ref.as_str())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_kind_round_trips_through_strings() {
        for kind in [ChangeKind::Insert, ChangeKind::Modify, ChangeKind::Remove] {
            assert_eq!(ChangeKind::from_str(&kind.to_string()).unwrap(), kind);
        }
        assert!(ChangeKind::from_str("insert").is_err());
    }

    #[test]
    fn removal_has_empty_status() {
        let event = ChangeEvent::new(1, ChangeKind::Remove, None);

        assert_eq!(event.status(), "");
        assert_eq!(event.supplier_ref(), "");
    }
}
