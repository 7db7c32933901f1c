//! Server-owned documents the client lists and edits without interpreting them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::DeviceUid;
use crate::core::cbor::Value;
use crate::error::DecodeError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Automation {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    /// Triggers, conditions and actions, kept as the gateway sent them.
    #[serde(default)]
    pub automation: serde_json::Value,
}

impl Automation {
    /// Parses `{automations: [...]}`; a missing or non-array list is empty.
    pub fn list_from_cbor(doc: &Value) -> Result<Vec<Automation>, DecodeError> {
        match doc.get("automations") {
            Some(list @ Value::Array(_)) => list.deserialize(),
            _ => Ok(vec![]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupItem {
    pub group_id: String,
    pub device_uid: DeviceUid,
    pub endpoint_id: u8,
    pub order: u32,
    pub label: String,
}

/// Membership key of an endpoint: `"{uid}::{endpoint}"`.
pub fn endpoint_key(device_uid: &DeviceUid, endpoint: u8) -> String {
    format!("{}::{}", device_uid, endpoint)
}

/// Groups with their normalised items and the lookup maps derived from them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupSet {
    pub groups: Vec<Group>,
    pub items: Vec<GroupItem>,
    members: HashMap<String, String>,
    labels: HashMap<String, String>,
}

impl GroupSet {
    pub fn new(groups: Vec<Group>, items: Vec<GroupItem>) -> Self {
        let mut members = HashMap::new();
        let mut labels = HashMap::new();

        for item in &items {
            let key = endpoint_key(&item.device_uid, item.endpoint_id);
            members.insert(key.clone(), item.group_id.clone());
            let label = item.label.trim();
            if !label.is_empty() {
                labels.insert(key, label.to_owned());
            }
        }

        Self {
            groups,
            items,
            members,
            labels,
        }
    }

    /// Builds the set from `{groups: [...]}` and `{items: [...]}`.
    pub fn from_cbor(groups_doc: &Value, items_doc: &Value) -> Result<Self, DecodeError> {
        let groups = match groups_doc.get("groups") {
            Some(list @ Value::Array(_)) => list.deserialize()?,
            _ => vec![],
        };

        let items = items_doc
            .get("items")
            .and_then(Value::as_array)
            .unwrap_or_default()
            .iter()
            .filter_map(normalize_item)
            .collect();

        Ok(Self::new(groups, items))
    }

    pub fn group_for_endpoint(&self, device_uid: &DeviceUid, endpoint: u8) -> Option<&str> {
        self.members.get(&endpoint_key(device_uid, endpoint)).map(String::as_str)
    }

    pub fn label_for_endpoint(&self, device_uid: &DeviceUid, endpoint: u8) -> Option<&str> {
        self.labels.get(&endpoint_key(device_uid, endpoint)).map(String::as_str)
    }

    pub fn items_in_group<'a>(&'a self, group_id: &'a str) -> impl Iterator<Item = &'a GroupItem> + 'a {
        self.items.iter().filter(move |it| it.group_id == group_id)
    }
}

// Items without a group id, without a uid, or with endpoint <= 0 are dropped.
fn normalize_item(raw: &Value) -> Option<GroupItem> {
    let group_id = raw.get("group_id").map(Value::to_string).unwrap_or_default();
    let device_uid = DeviceUid::normalized(raw.get("device_uid").and_then(Value::as_str).unwrap_or_default());
    let endpoint_id = raw.get("endpoint_id").and_then(Value::as_u64).unwrap_or(0);

    if group_id.is_empty() || group_id == "null" || device_uid.is_empty() || endpoint_id == 0 {
        return None;
    }

    Some(GroupItem {
        group_id,
        device_uid,
        endpoint_id: u8::try_from(endpoint_id).ok()?,
        order: raw
            .get("order")
            .and_then(Value::as_u64)
            .and_then(|o| u32::try_from(o).ok())
            .unwrap_or(0),
        label: raw.get("label").and_then(Value::as_str).unwrap_or_default().to_owned(),
    })
}
