use crate::backend::{InstanceStore, StorageError, StoredInstance};
use crate::types::UI;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Instance storage backed by a map keyed by SOP Instance UID.
///
/// Reads run concurrently; writes take the map exclusively. Ordering by UID
/// keeps study and series listings deterministic.
#[derive(Debug, Clone, Default)]
pub struct MemInstanceStore {
	inner: Arc<RwLock<BTreeMap<UI, StoredInstance>>>,
}

impl MemInstanceStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl InstanceStore for MemInstanceStore {
	async fn exists(&self, sop_instance_uid: &str) -> Result<bool, StorageError> {
		Ok(self.inner.read().await.contains_key(sop_instance_uid))
	}

	async fn put(&self, instance: StoredInstance) -> Result<(), StorageError> {
		self.inner
			.write()
			.await
			.insert(instance.sop_instance_uid.clone(), instance);
		Ok(())
	}

	async fn get(&self, sop_instance_uid: &str) -> Result<Option<StoredInstance>, StorageError> {
		Ok(self.inner.read().await.get(sop_instance_uid).cloned())
	}

	async fn study(
		&self,
		study_instance_uid: &str,
	) -> Result<Vec<StoredInstance>, StorageError> {
		Ok(self
			.inner
			.read()
			.await
			.values()
			.filter(|instance| instance.study_instance_uid == study_instance_uid)
			.cloned()
			.collect())
	}

	async fn series(
		&self,
		study_instance_uid: &str,
		series_instance_uid: &str,
	) -> Result<Vec<StoredInstance>, StorageError> {
		Ok(self
			.inner
			.read()
			.await
			.values()
			.filter(|instance| {
				instance.study_instance_uid == study_instance_uid
					&& instance.series_instance_uid == series_instance_uid
			})
			.cloned()
			.collect())
	}

	async fn delete_study(&self, study_instance_uid: &str) -> Result<usize, StorageError> {
		let mut map = self.inner.write().await;
		let doomed: Vec<UI> = map
			.values()
			.filter(|instance| instance.study_instance_uid == study_instance_uid)
			.map(|instance| instance.sop_instance_uid.clone())
			.collect();
		for uid in &doomed {
			map.remove(uid);
		}
		Ok(doomed.len())
	}

	async fn all(&self) -> Result<Vec<StoredInstance>, StorageError> {
		Ok(self.inner.read().await.values().cloned().collect())
	}
}
