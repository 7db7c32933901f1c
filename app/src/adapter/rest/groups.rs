use std::sync::Arc;

use tokio::sync::{Mutex, watch};

use super::GatewayApi;
use crate::core::DeviceUid;
use crate::core::cbor::Value;
use crate::documents::GroupSet;
use crate::error::{Error, ValidationError};

impl GatewayApi {
    /// Groups and their items, fetched together.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_groups(&self) -> Result<GroupSet, Error> {
        let (groups, items) = tokio::try_join!(
            self.get_cbor(&["api", "groups"]),
            self.get_cbor(&["api", "groups", "items"])
        )?;
        Ok(GroupSet::from_cbor(&groups, &items)?)
    }

    async fn post_group_op(&self, body: Value) -> Result<Value, Error> {
        self.post_cbor(&["api", "groups"], &body).await
    }

    async fn post_group_item_op(&self, body: Value) -> Result<Value, Error> {
        self.post_cbor(&["api", "groups", "items"], &body).await
    }
}

/// Owns the current [`GroupSet`]. Every mutation reloads it; reloads run one at a time so results
/// land in request order.
#[derive(Debug, Clone)]
pub struct GroupStore {
    api: GatewayApi,
    snapshot_tx: Arc<watch::Sender<GroupSet>>,
    reload_lock: Arc<Mutex<()>>,
}

impl GroupStore {
    pub fn new(api: GatewayApi) -> Self {
        let (snapshot_tx, _) = watch::channel(GroupSet::default());
        Self {
            api,
            snapshot_tx: Arc::new(snapshot_tx),
            reload_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn snapshot(&self) -> GroupSet {
        self.snapshot_tx.borrow().clone()
    }

    /// Notified after every reload. Dropping the receiver detaches it.
    pub fn subscribe(&self) -> watch::Receiver<GroupSet> {
        self.snapshot_tx.subscribe()
    }

    #[tracing::instrument(skip(self))]
    pub async fn reload(&self) -> Result<(), Error> {
        let _guard = self.reload_lock.lock().await;

        let groups = self.api.fetch_groups().await?;
        tracing::debug!("Loaded {} groups with {} items", groups.groups.len(), groups.items.len());
        self.snapshot_tx.send_replace(groups);

        Ok(())
    }

    /// Returns the id the gateway assigned.
    pub async fn create(&self, name: &str) -> Result<String, Error> {
        let name = non_empty("name", name)?;
        let res = self
            .api
            .post_group_op(Value::map([("op", Value::from("create")), ("name", Value::from(name))]))
            .await?;
        self.reload().await?;

        Ok(res.get("id").map(Value::to_string).unwrap_or_default())
    }

    pub async fn rename(&self, id: &str, name: &str) -> Result<(), Error> {
        let id = non_empty("id", id)?;
        let name = non_empty("name", name)?;
        self.api
            .post_group_op(Value::map([
                ("op", Value::from("rename")),
                ("id", Value::from(id)),
                ("name", Value::from(name)),
            ]))
            .await?;
        self.reload().await
    }

    pub async fn delete(&self, id: &str) -> Result<(), Error> {
        let id = non_empty("id", id)?;
        self.api
            .post_group_op(Value::map([("op", Value::from("delete")), ("id", Value::from(id))]))
            .await?;
        self.reload().await
    }

    /// Moves the endpoint into `group_id`, or out of any group when `None`.
    pub async fn set_for_endpoint(&self, uid: &DeviceUid, endpoint: u8, group_id: Option<&str>) -> Result<(), Error> {
        let target = item_target(uid, endpoint)?;

        let body = match group_id.map(str::trim).filter(|g| !g.is_empty()) {
            Some(group_id) => item_op("set", target, [("group_id", Value::from(group_id))]),
            None => item_op("remove", target, []),
        };
        self.api.post_group_item_op(body).await?;
        self.reload().await
    }

    pub async fn set_label(&self, uid: &DeviceUid, endpoint: u8, label: &str) -> Result<(), Error> {
        let target = item_target(uid, endpoint)?;
        self.api
            .post_group_item_op(item_op("label", target, [("label", Value::from(label))]))
            .await?;
        self.reload().await
    }

    /// Assigns 1-based positions in the given order. Entries without uid or endpoint are skipped
    /// but still take up a position.
    pub async fn reorder(&self, group_id: &str, ordered: &[(DeviceUid, u8)]) -> Result<(), Error> {
        let group_id = non_empty("group_id", group_id)?;

        for body in reorder_ops(group_id, ordered) {
            self.api.post_group_item_op(body).await?;
        }
        self.reload().await
    }
}

fn non_empty<'a>(field: &'static str, value: &'a str) -> Result<&'a str, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::field(field, "must not be empty"));
    }
    Ok(value)
}

fn item_target(uid: &DeviceUid, endpoint: u8) -> Result<(&DeviceUid, u8), ValidationError> {
    if uid.is_empty() {
        return Err(ValidationError::field("device_uid", "must not be empty"));
    }
    if endpoint == 0 {
        return Err(ValidationError::Endpoint(0));
    }
    Ok((uid, endpoint))
}

fn item_op<const N: usize>(op: &str, (uid, endpoint): (&DeviceUid, u8), extra: [(&str, Value); N]) -> Value {
    let mut entries = vec![
        ("op", Value::from(op)),
        ("device_uid", Value::from(uid.as_str())),
        ("endpoint_id", Value::from(endpoint)),
    ];
    entries.extend(extra);
    Value::map(entries)
}

fn reorder_ops(group_id: &str, ordered: &[(DeviceUid, u8)]) -> Vec<Value> {
    ordered
        .iter()
        .enumerate()
        .filter_map(|(i, (uid, endpoint))| {
            let target = item_target(uid, *endpoint).ok()?;
            Some(item_op(
                "reorder",
                target,
                [("group_id", Value::from(group_id)), ("order", Value::from(i as u64 + 1))],
            ))
        })
        .collect()
}
