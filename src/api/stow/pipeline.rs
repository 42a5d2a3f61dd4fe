//! The STOW-RS ingestion pipeline.
//!
//! Each instance is validated and stored independently; the pipeline always
//! classifies and continues, so one bad instance never aborts the batch.

use crate::api::stow::service::{
	map_storage_error, to_stored_instance, FailedReference, FailureReason, IncomingInstance,
	StoredReference, StowResults,
};
use crate::backend::InstanceStore;
use crate::config::{DuplicatePolicy, StowConfig};
use crate::types::is_valid_uid;
use dicom::core::Tag;
use dicom::dictionary_std::tags;
use dicom::object::InMemDicomObject;
use tracing::{info, warn};
use url::Url;

/// Tags every stored instance must carry.
const REQUIRED_TAGS: &[Tag] = &[
	tags::SOP_CLASS_UID,
	tags::SOP_INSTANCE_UID,
	tags::STUDY_INSTANCE_UID,
	tags::SERIES_INSTANCE_UID,
];

struct InstanceIdentity {
	sop_class_uid: String,
	sop_instance_uid: String,
	study_instance_uid: String,
	series_instance_uid: String,
}

enum Rejection {
	Reason(FailureReason, String),
}

pub async fn ingest(
	store: &dyn InstanceStore,
	config: &StowConfig,
	instances: Vec<IncomingInstance>,
	scope_study_uid: Option<&str>,
	retrieve_base: Option<&Url>,
) -> StowResults {
	let mut results = StowResults::default();
	let additional_tags = config.additional_tags();

	for incoming in instances {
		let identity = match validate(&incoming.dataset, config, &additional_tags, scope_study_uid)
		{
			Ok(identity) => identity,
			Err(Rejection::Reason(reason, description)) => {
				warn!(description, "Rejected instance");
				results.failed.push(FailedReference {
					sop_class_uid: element_text(&incoming.dataset, tags::SOP_CLASS_UID),
					sop_instance_uid: element_text(&incoming.dataset, tags::SOP_INSTANCE_UID),
					reason,
					description,
				});
				continue;
			}
		};

		let exists = match store.exists(&identity.sop_instance_uid).await {
			Ok(exists) => exists,
			Err(error) => {
				results.failed.push(FailedReference {
					sop_class_uid: Some(identity.sop_class_uid),
					sop_instance_uid: Some(identity.sop_instance_uid),
					reason: map_storage_error(&error),
					description: error.to_string(),
				});
				continue;
			}
		};

		if exists {
			match config.duplicate_policy {
				DuplicatePolicy::Reject => {
					results.failed.push(FailedReference {
						sop_class_uid: Some(identity.sop_class_uid),
						sop_instance_uid: Some(identity.sop_instance_uid.clone()),
						reason: FailureReason::DuplicateSopInstance,
						description: format!(
							"SOP Instance {} is already stored",
							identity.sop_instance_uid
						),
					});
					continue;
				}
				DuplicatePolicy::Accept => {
					// Already stored: counted as a success without a rewrite.
					results
						.warnings
						.push(format!(
							"SOP Instance {} was already stored",
							identity.sop_instance_uid
						));
					results.stored.push(stored_reference(&identity, retrieve_base));
					continue;
				}
				DuplicatePolicy::Replace => {
					info!(
						sop_instance_uid = identity.sop_instance_uid,
						"Replacing stored instance"
					);
				}
			}
		}

		let instance = match to_stored_instance(
			incoming,
			&identity.sop_class_uid,
			&identity.sop_instance_uid,
			&identity.study_instance_uid,
			&identity.series_instance_uid,
		) {
			Ok(instance) => instance,
			Err(error) => {
				results.failed.push(FailedReference {
					sop_class_uid: Some(identity.sop_class_uid),
					sop_instance_uid: Some(identity.sop_instance_uid),
					reason: FailureReason::ProcessingFailure,
					description: error.to_string(),
				});
				continue;
			}
		};

		match store.put(instance).await {
			Ok(()) => {
				info!(
					sop_instance_uid = identity.sop_instance_uid,
					"Successfully stored instance"
				);
				results.stored.push(stored_reference(&identity, retrieve_base));
			}
			Err(error) => {
				results.failed.push(FailedReference {
					sop_class_uid: Some(identity.sop_class_uid),
					sop_instance_uid: Some(identity.sop_instance_uid),
					reason: map_storage_error(&error),
					description: error.to_string(),
				});
			}
		}
	}

	results
}

fn validate(
	dataset: &InMemDicomObject,
	config: &StowConfig,
	additional_tags: &[Tag],
	scope_study_uid: Option<&str>,
) -> Result<InstanceIdentity, Rejection> {
	if config.validate_required_attributes {
		for &tag in REQUIRED_TAGS.iter().chain(additional_tags) {
			if element_text(dataset, tag).is_none() {
				return Err(Rejection::Reason(
					FailureReason::MandatoryAttributeMissing,
					format!("required attribute {tag} is missing"),
				));
			}
		}
	}

	let identity = InstanceIdentity {
		sop_class_uid: element_text(dataset, tags::SOP_CLASS_UID).ok_or_else(missing_identity)?,
		sop_instance_uid: element_text(dataset, tags::SOP_INSTANCE_UID)
			.ok_or_else(missing_identity)?,
		study_instance_uid: element_text(dataset, tags::STUDY_INSTANCE_UID)
			.ok_or_else(missing_identity)?,
		series_instance_uid: element_text(dataset, tags::SERIES_INSTANCE_UID)
			.ok_or_else(missing_identity)?,
	};

	if config.validate_sop_classes
		&& !config.allowed_sop_classes.contains(&identity.sop_class_uid)
	{
		return Err(Rejection::Reason(
			FailureReason::SopClassNotSupported,
			format!("SOP Class {} is not supported", identity.sop_class_uid),
		));
	}

	if config.validate_uid_format {
		for (name, uid) in [
			("SOPClassUID", &identity.sop_class_uid),
			("SOPInstanceUID", &identity.sop_instance_uid),
			("StudyInstanceUID", &identity.study_instance_uid),
			("SeriesInstanceUID", &identity.series_instance_uid),
		] {
			if !is_valid_uid(uid) {
				return Err(Rejection::Reason(
					FailureReason::InvalidAttributeValue,
					format!("{name} `{uid}` is not a valid UID"),
				));
			}
		}
	}

	if scope_study_uid.is_some_and(|scope| scope != identity.study_instance_uid) {
		return Err(Rejection::Reason(
			FailureReason::InvalidAttributeValue,
			format!(
				"instance belongs to study {} instead of the request target",
				identity.study_instance_uid
			),
		));
	}

	Ok(identity)
}

fn missing_identity() -> Rejection {
	Rejection::Reason(
		FailureReason::MandatoryAttributeMissing,
		"instance identity attributes are missing".to_owned(),
	)
}

fn element_text(dataset: &InMemDicomObject, tag: Tag) -> Option<String> {
	dataset
		.get(tag)
		.and_then(|element| element.to_str().ok())
		.map(|value| value.trim_end_matches(['\0', ' ']).to_owned())
		.filter(|value| !value.is_empty())
}

fn stored_reference(identity: &InstanceIdentity, retrieve_base: Option<&Url>) -> StoredReference {
	StoredReference {
		sop_class_uid: identity.sop_class_uid.clone(),
		sop_instance_uid: identity.sop_instance_uid.clone(),
		retrieve_url: retrieve_base.map(|base| {
			format!(
				"{base}/studies/{}/series/{}/instances/{}",
				identity.study_instance_uid,
				identity.series_instance_uid,
				identity.sop_instance_uid
			)
		}),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::api::stow::service::IncomingInstance;
	use crate::backend::mem::MemInstanceStore;
	use dicom::core::{PrimitiveValue, VR};
	use dicom::object::mem::InMemElement;

	fn stow_config(duplicate_policy: DuplicatePolicy) -> StowConfig {
		StowConfig {
			duplicate_policy,
			validate_required_attributes: true,
			validate_sop_classes: false,
			allowed_sop_classes: Vec::new(),
			validate_uid_format: true,
			additional_required_tags: Vec::new(),
		}
	}

	fn instance(sop_instance_uid: &str) -> IncomingInstance {
		IncomingInstance {
			dataset: InMemDicomObject::from_element_iter([
				InMemElement::new(
					tags::SOP_CLASS_UID,
					VR::UI,
					PrimitiveValue::from("1.2.840.10008.5.1.4.1.1.2"),
				),
				InMemElement::new(
					tags::SOP_INSTANCE_UID,
					VR::UI,
					PrimitiveValue::from(sop_instance_uid),
				),
				InMemElement::new(
					tags::STUDY_INSTANCE_UID,
					VR::UI,
					PrimitiveValue::from("1.2.3"),
				),
				InMemElement::new(
					tags::SERIES_INSTANCE_UID,
					VR::UI,
					PrimitiveValue::from("1.2.3.4"),
				),
			]),
			data: None,
		}
	}

	#[tokio::test]
	async fn stores_valid_instances() {
		let store = MemInstanceStore::new();
		let results = ingest(
			&store,
			&stow_config(DuplicatePolicy::Reject),
			vec![instance("1.1"), instance("1.2")],
			None,
			None,
		)
		.await;

		assert!(results.is_full_success());
		assert_eq!(results.stored.len(), 2);
		assert!(store.exists("1.1").await.unwrap());
		assert!(store.exists("1.2").await.unwrap());
	}

	#[tokio::test]
	async fn duplicate_under_reject_yields_partial_success() {
		let store = MemInstanceStore::new();
		let config = stow_config(DuplicatePolicy::Reject);

		let first = ingest(&store, &config, vec![instance("1.1")], None, None).await;
		assert!(first.is_full_success());

		let second = ingest(
			&store,
			&config,
			vec![instance("2.2"), instance("1.1")],
			None,
			None,
		)
		.await;

		assert!(second.is_partial_success());
		assert_eq!(second.stored.len(), 1);
		assert_eq!(second.failed.len(), 1);
		assert_eq!(
			second.failed[0].reason,
			FailureReason::DuplicateSopInstance
		);
	}

	#[tokio::test]
	async fn duplicate_under_accept_counts_as_stored() {
		let store = MemInstanceStore::new();
		let config = stow_config(DuplicatePolicy::Accept);

		ingest(&store, &config, vec![instance("1.1")], None, None).await;
		let results = ingest(&store, &config, vec![instance("1.1")], None, None).await;

		assert!(results.is_full_success());
		assert_eq!(results.warnings.len(), 1);
	}

	#[tokio::test]
	async fn duplicate_under_replace_overwrites() {
		let store = MemInstanceStore::new();
		let config = stow_config(DuplicatePolicy::Replace);

		ingest(&store, &config, vec![instance("1.1")], None, None).await;
		let results = ingest(&store, &config, vec![instance("1.1")], None, None).await;

		assert!(results.is_full_success());
		assert!(results.warnings.is_empty());
	}

	#[tokio::test]
	async fn missing_required_attribute_fails_instance() {
		let store = MemInstanceStore::new();
		let mut incomplete = instance("1.1");
		incomplete
			.dataset
			.remove_element(tags::SERIES_INSTANCE_UID);

		let results = ingest(
			&store,
			&stow_config(DuplicatePolicy::Reject),
			vec![incomplete],
			None,
			None,
		)
		.await;

		assert!(results.is_full_failure());
		assert_eq!(
			results.failed[0].reason,
			FailureReason::MandatoryAttributeMissing
		);
	}

	#[tokio::test]
	async fn malformed_uid_fails_instance() {
		let store = MemInstanceStore::new();
		let results = ingest(
			&store,
			&stow_config(DuplicatePolicy::Reject),
			vec![instance("not-a-uid")],
			None,
			None,
		)
		.await;

		assert!(results.is_full_failure());
		assert_eq!(
			results.failed[0].reason,
			FailureReason::InvalidAttributeValue
		);
	}

	#[tokio::test]
	async fn sop_class_allowlist_is_enforced() {
		let store = MemInstanceStore::new();
		let mut config = stow_config(DuplicatePolicy::Reject);
		config.validate_sop_classes = true;
		config.allowed_sop_classes = vec!["1.2.840.10008.5.1.4.1.1.4".to_owned()];

		let results = ingest(&store, &config, vec![instance("1.1")], None, None).await;

		assert!(results.is_full_failure());
		assert_eq!(
			results.failed[0].reason,
			FailureReason::SopClassNotSupported
		);
	}

	#[tokio::test]
	async fn study_scope_mismatch_fails_instance() {
		let store = MemInstanceStore::new();
		let results = ingest(
			&store,
			&stow_config(DuplicatePolicy::Reject),
			vec![instance("1.1")],
			Some("9.9.9"),
			None,
		)
		.await;

		assert!(results.is_full_failure());
		assert_eq!(
			results.failed[0].reason,
			FailureReason::InvalidAttributeValue
		);
	}

	#[tokio::test]
	async fn retrieve_urls_are_derived_from_base() {
		let store = MemInstanceStore::new();
		let base: Url = "http://localhost:8080/dicom-web".parse().unwrap();
		let results = ingest(
			&store,
			&stow_config(DuplicatePolicy::Reject),
			vec![instance("1.1")],
			None,
			Some(&base),
		)
		.await;

		assert_eq!(
			results.stored[0].retrieve_url.as_deref(),
			Some("http://localhost:8080/dicom-web/studies/1.2.3/series/1.2.3.4/instances/1.1")
		);
	}
}
