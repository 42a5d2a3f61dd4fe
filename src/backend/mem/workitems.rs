use crate::api::ups::Workitem;
use crate::backend::{StorageError, WorkitemStore};
use crate::types::UI;
use async_trait::async_trait;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Workitem storage backed by a map keyed by workitem UID.
#[derive(Debug, Clone, Default)]
pub struct MemWorkitemStore {
	inner: Arc<RwLock<BTreeMap<UI, Workitem>>>,
}

impl MemWorkitemStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl WorkitemStore for MemWorkitemStore {
	async fn insert(&self, workitem: Workitem) -> Result<bool, StorageError> {
		let mut map = self.inner.write().await;
		match map.entry(workitem.uid.clone()) {
			Entry::Occupied(_) => Ok(false),
			Entry::Vacant(slot) => {
				slot.insert(workitem);
				Ok(true)
			}
		}
	}

	async fn get(&self, uid: &str) -> Result<Option<Workitem>, StorageError> {
		Ok(self.inner.read().await.get(uid).cloned())
	}

	async fn update(&self, workitem: Workitem) -> Result<(), StorageError> {
		self.inner
			.write()
			.await
			.insert(workitem.uid.clone(), workitem);
		Ok(())
	}

	async fn delete(&self, uid: &str) -> Result<bool, StorageError> {
		Ok(self.inner.write().await.remove(uid).is_some())
	}

	async fn all(&self) -> Result<Vec<Workitem>, StorageError> {
		Ok(self.inner.read().await.values().cloned().collect())
	}
}
