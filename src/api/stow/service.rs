use crate::backend::{InstanceStore, StorageError, StoredInstance};
use crate::config::StowConfig;
use crate::types::UI;
use bytes::Bytes;
use dicom::core::value::{DataSetSequence, PrimitiveValue, Value};
use dicom::core::{DataElement, VR};
use dicom::dictionary_std::tags;
use dicom::object::mem::InMemElement;
use dicom::object::InMemDicomObject;
use std::sync::Arc;
use url::Url;

use super::pipeline;

/// DICOM failure reason codes for per-instance store failures.
///
/// <https://dicom.nema.org/medical/dicom/current/output/chtml/part07/chapter_C.html>
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
pub enum FailureReason {
	InvalidAttributeValue = 0x0106,
	ProcessingFailure = 0x0110,
	DuplicateSopInstance = 0x0111,
	NoSuchObjectInstance = 0x0112,
	MandatoryAttributeMissing = 0x0120,
	SopClassNotSupported = 0x0122,
	TransferSyntaxNotSupported = 0x0124,
	OutOfResources = 0xA700,
}

impl FailureReason {
	pub const fn code(self) -> u16 {
		self as u16
	}
}

/// One instance decoded from a store request, before validation.
#[derive(Debug, Clone)]
pub struct IncomingInstance {
	pub dataset: InMemDicomObject,
	/// The original `application/dicom` encoding, absent for instances that
	/// arrived as DICOM JSON.
	pub data: Option<Bytes>,
}

/// <https://dicom.nema.org/medical/dicom/current/output/html/part03.html#table_10-11>
#[derive(Debug, Clone)]
pub struct StoredReference {
	pub sop_class_uid: UI,
	pub sop_instance_uid: UI,
	pub retrieve_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FailedReference {
	pub sop_class_uid: Option<UI>,
	pub sop_instance_uid: Option<UI>,
	pub reason: FailureReason,
	pub description: String,
}

/// The classified outcome of one store request.
#[derive(Debug, Default)]
pub struct StowResults {
	pub stored: Vec<StoredReference>,
	pub failed: Vec<FailedReference>,
	pub warnings: Vec<String>,
}

impl StowResults {
	pub fn is_full_success(&self) -> bool {
		self.failed.is_empty() && !self.stored.is_empty()
	}

	pub fn is_full_failure(&self) -> bool {
		self.stored.is_empty()
	}

	pub fn is_partial_success(&self) -> bool {
		!self.stored.is_empty() && !self.failed.is_empty()
	}

	pub fn is_empty(&self) -> bool {
		self.stored.is_empty() && self.failed.is_empty()
	}
}

impl From<StowResults> for InMemDicomObject {
	fn from(results: StowResults) -> Self {
		let mut object = Self::new_empty();

		let mut referenced_sequence = InMemElement::new(
			tags::REFERENCED_SOP_SEQUENCE,
			VR::SQ,
			Value::Sequence(DataSetSequence::empty()),
		);
		let referenced_items = referenced_sequence.items_mut().expect("sequence exists");
		for stored in results.stored {
			let mut item = Self::from_element_iter([
				DataElement::new(
					tags::REFERENCED_SOP_CLASS_UID,
					VR::UI,
					PrimitiveValue::from(stored.sop_class_uid),
				),
				DataElement::new(
					tags::REFERENCED_SOP_INSTANCE_UID,
					VR::UI,
					PrimitiveValue::from(stored.sop_instance_uid),
				),
			]);
			if let Some(url) = stored.retrieve_url {
				item.put(DataElement::new(
					tags::RETRIEVE_URL,
					VR::UR,
					PrimitiveValue::from(url),
				));
			}
			referenced_items.push(item);
		}

		let mut failed_sequence = InMemElement::new(
			tags::FAILED_SOP_SEQUENCE,
			VR::SQ,
			Value::Sequence(DataSetSequence::empty()),
		);
		let failed_items = failed_sequence.items_mut().expect("sequence exists");
		for failed in results.failed {
			let mut item = Self::from_element_iter([DataElement::new(
				tags::FAILURE_REASON,
				VR::US,
				PrimitiveValue::U16(vec![failed.reason.code()].into()),
			)]);
			if let Some(sop_class_uid) = failed.sop_class_uid {
				item.put(DataElement::new(
					tags::REFERENCED_SOP_CLASS_UID,
					VR::UI,
					PrimitiveValue::from(sop_class_uid),
				));
			}
			if let Some(sop_instance_uid) = failed.sop_instance_uid {
				item.put(DataElement::new(
					tags::REFERENCED_SOP_INSTANCE_UID,
					VR::UI,
					PrimitiveValue::from(sop_instance_uid),
				));
			}
			failed_items.push(item);
		}

		object.put(referenced_sequence);
		object.put(failed_sequence);
		object
	}
}

/// The store transaction over an abstract instance store.
#[derive(Clone)]
pub struct StowService {
	instances: Arc<dyn InstanceStore>,
	config: StowConfig,
	retrieve_base: Option<Url>,
}

impl StowService {
	pub fn new(
		instances: Arc<dyn InstanceStore>,
		config: StowConfig,
		retrieve_base: Option<Url>,
	) -> Self {
		Self {
			instances,
			config,
			retrieve_base,
		}
	}

	/// Validates and stores each instance independently, classifying the
	/// outcome. A single failed instance never aborts the request.
	pub async fn store(
		&self,
		instances: Vec<IncomingInstance>,
		scope_study_uid: Option<&str>,
	) -> StowResults {
		pipeline::ingest(
			self.instances.as_ref(),
			&self.config,
			instances,
			scope_study_uid,
			self.retrieve_base.as_ref(),
		)
		.await
	}
}

pub(super) fn map_storage_error(error: &StorageError) -> FailureReason {
	match error {
		StorageError::OutOfResources(_) | StorageError::Backend { .. } => {
			FailureReason::OutOfResources
		}
	}
}

/// Builds a stored-instance record from a validated dataset, synthesizing the
/// Part 10 encoding when the instance arrived as DICOM JSON.
pub(super) fn to_stored_instance(
	incoming: IncomingInstance,
	sop_class_uid: &str,
	sop_instance_uid: &str,
	study_instance_uid: &str,
	series_instance_uid: &str,
) -> Result<StoredInstance, Box<dyn std::error::Error + Send + Sync>> {
	let data = match incoming.data {
		Some(data) => data,
		None => {
			use dicom::dictionary_std::uids;
			use dicom::object::meta::FileMetaTableBuilder;

			let file = incoming.dataset.clone().with_meta(
				FileMetaTableBuilder::new()
					.transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
					.media_storage_sop_class_uid(sop_class_uid)
					.media_storage_sop_instance_uid(sop_instance_uid),
			)?;
			let mut buffer = Vec::new();
			file.write_all(&mut buffer)?;
			Bytes::from(buffer)
		}
	};

	Ok(StoredInstance {
		sop_class_uid: sop_class_uid.to_owned(),
		sop_instance_uid: sop_instance_uid.to_owned(),
		study_instance_uid: study_instance_uid.to_owned(),
		series_instance_uid: series_instance_uid.to_owned(),
		dataset: incoming.dataset,
		data,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	fn results(stored: usize, failed: usize) -> StowResults {
		StowResults {
			stored: (0..stored)
				.map(|index| StoredReference {
					sop_class_uid: "1.2.840.10008.5.1.4.1.1.2".to_owned(),
					sop_instance_uid: format!("1.2.{index}"),
					retrieve_url: None,
				})
				.collect(),
			failed: (0..failed)
				.map(|index| FailedReference {
					sop_class_uid: None,
					sop_instance_uid: Some(format!("9.9.{index}")),
					reason: FailureReason::ProcessingFailure,
					description: String::new(),
				})
				.collect(),
			warnings: Vec::new(),
		}
	}

	#[test]
	fn classification_predicates() {
		let full_success = results(2, 0);
		assert!(full_success.is_full_success());
		assert!(!full_success.is_full_failure());
		assert!(!full_success.is_partial_success());
		assert!(!full_success.is_empty());

		let full_failure = results(0, 2);
		assert!(!full_failure.is_full_success());
		assert!(full_failure.is_full_failure());
		assert!(!full_failure.is_partial_success());
		assert!(!full_failure.is_empty());

		let partial = results(1, 1);
		assert!(!partial.is_full_success());
		assert!(!partial.is_full_failure());
		assert!(partial.is_partial_success());
		assert!(!partial.is_empty());

		let empty = results(0, 0);
		assert!(empty.is_empty());
		assert!(!empty.is_full_success());
		assert!(!empty.is_partial_success());
	}

	#[test]
	fn failure_reason_codes() {
		assert_eq!(FailureReason::ProcessingFailure.code(), 0x0110);
		assert_eq!(FailureReason::DuplicateSopInstance.code(), 0x0111);
		assert_eq!(FailureReason::NoSuchObjectInstance.code(), 0x0112);
		assert_eq!(FailureReason::MandatoryAttributeMissing.code(), 0x0120);
		assert_eq!(FailureReason::SopClassNotSupported.code(), 0x0122);
		assert_eq!(FailureReason::TransferSyntaxNotSupported.code(), 0x0124);
		assert_eq!(FailureReason::OutOfResources.code(), 0xA700);
	}

	#[test]
	fn response_dataset_references_both_sequences() {
		let mut results = results(1, 1);
		results.stored[0].retrieve_url =
			Some("http://localhost/dicom-web/studies/1/series/2/instances/1.2.0".to_owned());

		let object = InMemDicomObject::from(results);
		let referenced = object.get(tags::REFERENCED_SOP_SEQUENCE).unwrap();
		let failed = object.get(tags::FAILED_SOP_SEQUENCE).unwrap();

		let referenced_item = &referenced.items().expect("items")[0];
		assert!(referenced_item.get(tags::RETRIEVE_URL).is_some());

		let failed_item = &failed.items().expect("items")[0];
		assert_eq!(
			failed_item
				.get(tags::FAILURE_REASON)
				.unwrap()
				.to_int::<u16>()
				.unwrap(),
			0x0110
		);
	}
}
