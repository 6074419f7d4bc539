use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Id (and partition key) of the item every session-consistency drill reads.
pub const DESIGNATED_ITEM_ID: &str = "1";

const PAYLOAD_FIELDS: usize = 10;

/// Synthetic record written by drills.
///
/// Every payload field carries the same value so items have a stable,
/// non-trivial size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrillItem {
    pub id: String,
    pub pk: String,
    pub payload: Vec<String>,
}

impl DrillItem {
    /// Item whose id, partition key and payload are one fresh UUID.
    #[must_use]
    pub fn random() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    /// Item whose id, partition key and payload all equal `id`.
    #[must_use]
    pub fn with_id(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            pk: id.clone(),
            payload: vec![id.clone(); PAYLOAD_FIELDS],
            id,
        }
    }

    /// Fresh item placed in `partition_key`'s logical partition.
    #[must_use]
    pub fn random_in_partition(partition_key: impl Into<String>) -> Self {
        let mut item = Self::random();
        item.pk = partition_key.into();
        item
    }

    /// Value of the property `partition_key_path` points at.
    ///
    /// Paths that name no item property resolve to the empty partition.
    #[must_use]
    pub fn partition_value(&self, partition_key_path: &str) -> &str {
        match partition_key_path.trim_start_matches('/') {
            "id" => &self.id,
            "pk" => &self.pk,
            _ => "",
        }
    }

    /// The item session-consistency drills read.
    #[must_use]
    pub fn designated() -> Self {
        Self::with_id(DESIGNATED_ITEM_ID)
    }
}
