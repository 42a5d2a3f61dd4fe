//! Abstract storage consumed by the protocol engine.
//!
//! The engine only ever talks to these traits; the in-memory implementations
//! in [`mem`] are reference backends for tests and single-node deployments.

use crate::api::ups::Workitem;
use crate::types::UI;
use async_trait::async_trait;
use bytes::Bytes;
use dicom::object::InMemDicomObject;
use thiserror::Error;

pub mod mem;

#[derive(Debug, Error)]
pub enum StorageError {
	#[error("storage is out of resources: {0}")]
	OutOfResources(String),
	#[error(transparent)]
	Backend {
		source: Box<dyn std::error::Error + Send + Sync>,
	},
}

/// One stored composite instance: its dataset for metadata access plus the
/// original `application/dicom` encoding for retrieval.
#[derive(Debug, Clone)]
pub struct StoredInstance {
	pub sop_class_uid: UI,
	pub sop_instance_uid: UI,
	pub study_instance_uid: UI,
	pub series_instance_uid: UI,
	pub dataset: InMemDicomObject,
	pub data: Bytes,
}

#[async_trait]
pub trait InstanceStore: Send + Sync {
	async fn exists(&self, sop_instance_uid: &str) -> Result<bool, StorageError>;

	/// Inserts or overwrites the instance under its SOP Instance UID.
	async fn put(&self, instance: StoredInstance) -> Result<(), StorageError>;

	async fn get(&self, sop_instance_uid: &str) -> Result<Option<StoredInstance>, StorageError>;

	/// All instances of a study, ordered by SOP Instance UID.
	async fn study(&self, study_instance_uid: &str)
		-> Result<Vec<StoredInstance>, StorageError>;

	/// All instances of a series, ordered by SOP Instance UID.
	async fn series(
		&self,
		study_instance_uid: &str,
		series_instance_uid: &str,
	) -> Result<Vec<StoredInstance>, StorageError>;

	/// Removes a study and returns the number of deleted instances.
	async fn delete_study(&self, study_instance_uid: &str) -> Result<usize, StorageError>;

	async fn all(&self) -> Result<Vec<StoredInstance>, StorageError>;
}

#[async_trait]
pub trait WorkitemStore: Send + Sync {
	/// Inserts a new workitem. Returns `false` when the UID is already taken;
	/// the existing workitem is left untouched.
	async fn insert(&self, workitem: Workitem) -> Result<bool, StorageError>;

	async fn get(&self, uid: &str) -> Result<Option<Workitem>, StorageError>;

	/// Replaces a stored workitem. Callers serialize per-UID mutations
	/// through the workitem lock map.
	async fn update(&self, workitem: Workitem) -> Result<(), StorageError>;

	async fn delete(&self, uid: &str) -> Result<bool, StorageError>;

	async fn all(&self) -> Result<Vec<Workitem>, StorageError>;
}
