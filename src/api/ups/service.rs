use crate::api::ups::state::{
	ProcedureStepState, WorkitemLocks, WorkitemPriority,
};
use crate::backend::{StorageError, WorkitemStore};
use crate::types::{generate_uid, AE, UI};
use dicom::core::value::{DataSetSequence, PrimitiveValue, Value};
use dicom::core::VR;
use dicom::dictionary_std::tags;
use dicom::object::mem::InMemElement;
use dicom::object::InMemDicomObject;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors of the workitem service.
///
/// <https://dicom.nema.org/medical/dicom/current/output/chtml/part18/sect_11.html>
#[derive(Debug, Error)]
pub enum UpsError {
	#[error("workitem {uid} does not exist")]
	WorkitemNotFound { uid: UI },
	#[error("workitem {uid} already exists")]
	WorkitemAlreadyExists { uid: UI },
	#[error("transition from {from} to {to} is not allowed")]
	InvalidStateTransition {
		from: ProcedureStepState,
		to: ProcedureStepState,
	},
	#[error("a transaction UID is required to leave IN PROGRESS")]
	TransactionUidRequired,
	#[error("the supplied transaction UID does not match the workitem")]
	TransactionUidMismatch,
	#[error("workitem {uid} is in a final state")]
	WorkitemInFinalState { uid: UI },
	#[error("workitem {uid} is not IN PROGRESS")]
	NotInProgress { uid: UI },
	#[error(transparent)]
	Storage(#[from] StorageError),
}

/// Progress of an IN PROGRESS workitem: a percentage plus free text.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressInformation {
	pub percent: Option<f64>,
	pub description: Option<String>,
}

/// A Unified Procedure Step.
///
/// The UID is assigned at creation and immutable; the state is only ever
/// changed through [`Workitem::transition`]. The transaction UID exists from
/// the first entry into IN PROGRESS onward.
#[derive(Debug, Clone)]
pub struct Workitem {
	pub uid: UI,
	pub state: ProcedureStepState,
	pub priority: WorkitemPriority,
	pub transaction_uid: Option<UI>,
	pub patient_name: Option<String>,
	pub patient_id: Option<String>,
	pub procedure_step_label: Option<String>,
	pub progress: Option<ProgressInformation>,
	pub subscribers: BTreeSet<AE>,
	dataset: InMemDicomObject,
}

impl Workitem {
	/// Builds a new SCHEDULED workitem from a create-request dataset.
	/// A state declared in the dataset is overridden.
	pub fn new(uid: UI, mut dataset: InMemDicomObject) -> Self {
		dataset.put(InMemElement::new(
			tags::SOP_INSTANCE_UID,
			VR::UI,
			PrimitiveValue::from(uid.clone()),
		));
		dataset.put(InMemElement::new(
			tags::PROCEDURE_STEP_STATE,
			VR::CS,
			PrimitiveValue::from(ProcedureStepState::Scheduled.to_string()),
		));

		let mut workitem = Self {
			uid,
			state: ProcedureStepState::Scheduled,
			priority: WorkitemPriority::default(),
			transaction_uid: None,
			patient_name: None,
			patient_id: None,
			procedure_step_label: None,
			progress: None,
			subscribers: BTreeSet::new(),
			dataset,
		};
		workitem.refresh_derived();
		workitem
	}

	/// The dataset as exposed to clients. The transaction UID is never
	/// included; state and progress reflect the current lifecycle.
	pub fn to_dataset(&self) -> InMemDicomObject {
		let mut dataset = self.dataset.clone();
		dataset.remove_element(tags::TRANSACTION_UID);
		dataset.put(InMemElement::new(
			tags::PROCEDURE_STEP_STATE,
			VR::CS,
			PrimitiveValue::from(self.state.to_string()),
		));

		if let Some(progress) = &self.progress {
			let mut item = InMemDicomObject::new_empty();
			if let Some(percent) = progress.percent {
				item.put(InMemElement::new(
					tags::PROCEDURE_STEP_PROGRESS,
					VR::DS,
					PrimitiveValue::F64(vec![percent].into()),
				));
			}
			if let Some(description) = &progress.description {
				item.put(InMemElement::new(
					tags::PROCEDURE_STEP_PROGRESS_DESCRIPTION,
					VR::LO,
					PrimitiveValue::from(description.as_str()),
				));
			}
			let mut sequence = InMemElement::new(
				tags::PROCEDURE_STEP_PROGRESS_INFORMATION_SEQUENCE,
				VR::SQ,
				Value::Sequence(DataSetSequence::empty()),
			);
			sequence.items_mut().expect("sequence exists").push(item);
			dataset.put(sequence);
		}

		dataset
	}

	/// Applies one state transition, enforcing the transaction UID rules.
	///
	/// Entering IN PROGRESS adopts the supplied transaction UID or assigns a
	/// fresh one. Leaving IN PROGRESS requires the supplied UID to match the
	/// stored one exactly.
	pub fn transition(
		&mut self,
		target: ProcedureStepState,
		transaction_uid: Option<&str>,
	) -> Result<(), UpsError> {
		let from = self.state;
		if from.is_final() {
			return Err(UpsError::WorkitemInFinalState {
				uid: self.uid.clone(),
			});
		}
		if !from.can_transition(target) {
			return Err(UpsError::InvalidStateTransition { from, to: target });
		}

		match target {
			ProcedureStepState::InProgress => {
				let transaction_uid = transaction_uid
					.map_or_else(generate_uid, str::to_owned);
				self.dataset.put(InMemElement::new(
					tags::TRANSACTION_UID,
					VR::UI,
					PrimitiveValue::from(transaction_uid.clone()),
				));
				self.transaction_uid = Some(transaction_uid);
			}
			_ if from == ProcedureStepState::InProgress => {
				let supplied = transaction_uid.ok_or(UpsError::TransactionUidRequired)?;
				if self.transaction_uid.as_deref() != Some(supplied) {
					return Err(UpsError::TransactionUidMismatch);
				}
			}
			_ => {}
		}

		self.state = target;
		Ok(())
	}

	fn merge(&mut self, changes: &InMemDicomObject) {
		// The UID, the state and the transaction UID are not writable
		// through an update.
		let immutable = [
			tags::SOP_INSTANCE_UID,
			tags::PROCEDURE_STEP_STATE,
			tags::TRANSACTION_UID,
		];
		let tags: Vec<_> = changes.tags().collect();
		for tag in tags {
			if immutable.contains(&tag) {
				continue;
			}
			if let Some(element) = changes.get(tag) {
				self.dataset.put(element.clone());
			}
		}
		self.refresh_derived();
	}

	fn refresh_derived(&mut self) {
		self.priority = element_str(&self.dataset, tags::SCHEDULED_PROCEDURE_STEP_PRIORITY)
			.and_then(|value| value.parse().ok())
			.unwrap_or_default();
		self.patient_name = element_str(&self.dataset, tags::PATIENT_NAME);
		self.patient_id = element_str(&self.dataset, tags::PATIENT_ID);
		self.procedure_step_label = element_str(&self.dataset, tags::PROCEDURE_STEP_LABEL);
	}
}

fn element_str(dataset: &InMemDicomObject, tag: dicom::core::Tag) -> Option<String> {
	dataset
		.get(tag)
		.and_then(|element| element.to_str().ok())
		.map(|value| value.trim().to_owned())
		.filter(|value| !value.is_empty())
}

fn element_float(dataset: &InMemDicomObject, tag: dicom::core::Tag) -> Option<f64> {
	dataset.get(tag).and_then(|element| element.to_float64().ok())
}

/// Progress attributes carried by an update dataset, either nested in the
/// progress information sequence or flat.
fn extract_progress(changes: &InMemDicomObject) -> Option<ProgressInformation> {
	if let Some(item) = changes
		.get(tags::PROCEDURE_STEP_PROGRESS_INFORMATION_SEQUENCE)
		.and_then(|element| element.items())
		.and_then(|items| items.first())
	{
		return Some(ProgressInformation {
			percent: element_float(item, tags::PROCEDURE_STEP_PROGRESS),
			description: element_str(item, tags::PROCEDURE_STEP_PROGRESS_DESCRIPTION),
		});
	}

	let percent = element_float(changes, tags::PROCEDURE_STEP_PROGRESS);
	let description = element_str(changes, tags::PROCEDURE_STEP_PROGRESS_DESCRIPTION);
	(percent.is_some() || description.is_some())
		.then_some(ProgressInformation { percent, description })
}

/// Search filters plus pagination.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkitemQuery {
	pub state: Option<ProcedureStepState>,
	pub priority: Option<WorkitemPriority>,
	pub patient_id: Option<String>,
	/// Equality match, or prefix match with a `*` suffix.
	pub patient_name: Option<String>,
	pub offset: usize,
	pub limit: usize,
}

#[derive(Debug)]
pub struct WorkitemPage {
	pub workitems: Vec<Workitem>,
	pub has_more: bool,
	pub next_offset: Option<usize>,
}

fn matches_query(workitem: &Workitem, query: &WorkitemQuery) -> bool {
	if query.state.is_some_and(|state| state != workitem.state) {
		return false;
	}
	if query
		.priority
		.is_some_and(|priority| priority != workitem.priority)
	{
		return false;
	}
	if let Some(patient_id) = &query.patient_id {
		if workitem.patient_id.as_deref() != Some(patient_id.as_str()) {
			return false;
		}
	}
	if let Some(pattern) = &query.patient_name {
		let name = workitem.patient_name.as_deref().unwrap_or_default();
		let matched = pattern
			.strip_suffix('*')
			.map_or_else(|| name == pattern, |prefix| name.starts_with(prefix));
		if !matched {
			return false;
		}
	}
	true
}

/// The outcome of a cancellation request.
#[derive(Debug)]
pub enum CancellationOutcome {
	/// The workitem was still SCHEDULED and is now CANCELED.
	Canceled(Box<Workitem>),
	/// The workitem is IN PROGRESS; the performer decides whether to honor
	/// the request.
	Requested,
}

/// The workitem lifecycle and query engine over an abstract store.
#[derive(Clone)]
pub struct UpsService {
	store: Arc<dyn WorkitemStore>,
	locks: WorkitemLocks,
}

impl UpsService {
	pub fn new(store: Arc<dyn WorkitemStore>) -> Self {
		Self {
			store,
			locks: WorkitemLocks::new(),
		}
	}

	/// Creates a workitem in SCHEDULED state. The UID is taken from the
	/// request, falling back to the dataset's SOP Instance UID, falling back
	/// to a generated one.
	pub async fn create(
		&self,
		requested_uid: Option<&str>,
		dataset: InMemDicomObject,
	) -> Result<Workitem, UpsError> {
		let uid = requested_uid
			.map(str::to_owned)
			.or_else(|| element_str(&dataset, tags::SOP_INSTANCE_UID))
			.unwrap_or_else(generate_uid);

		let workitem = Workitem::new(uid.clone(), dataset);
		if !self.store.insert(workitem.clone()).await? {
			return Err(UpsError::WorkitemAlreadyExists { uid });
		}
		info!(uid, "Created workitem");
		Ok(workitem)
	}

	pub async fn retrieve(&self, uid: &str) -> Result<Workitem, UpsError> {
		self.store
			.get(uid)
			.await?
			.ok_or_else(|| UpsError::WorkitemNotFound {
				uid: uid.to_owned(),
			})
	}

	/// Merges an update dataset into the workitem.
	///
	/// Updates against a final-state workitem are rejected; updates against
	/// an IN PROGRESS workitem require its transaction UID; progress
	/// attributes are only accepted while IN PROGRESS.
	pub async fn update(
		&self,
		uid: &str,
		changes: &InMemDicomObject,
		transaction_uid: Option<&str>,
	) -> Result<Workitem, UpsError> {
		let _guard = self.locks.acquire(uid).await;
		let mut workitem = self.retrieve(uid).await?;

		if workitem.state.is_final() {
			return Err(UpsError::WorkitemInFinalState {
				uid: uid.to_owned(),
			});
		}
		if workitem.state == ProcedureStepState::InProgress {
			let supplied = transaction_uid.ok_or(UpsError::TransactionUidRequired)?;
			if workitem.transaction_uid.as_deref() != Some(supplied) {
				return Err(UpsError::TransactionUidMismatch);
			}
		}

		let progress = extract_progress(changes);
		if progress.is_some() && workitem.state != ProcedureStepState::InProgress {
			return Err(UpsError::NotInProgress {
				uid: uid.to_owned(),
			});
		}

		workitem.merge(changes);
		if let Some(progress) = progress {
			workitem.progress = Some(progress);
		}
		self.store.update(workitem.clone()).await?;
		Ok(workitem)
	}

	pub async fn change_state(
		&self,
		uid: &str,
		target: ProcedureStepState,
		transaction_uid: Option<&str>,
	) -> Result<Workitem, UpsError> {
		let _guard = self.locks.acquire(uid).await;
		let mut workitem = self.retrieve(uid).await?;
		workitem.transition(target, transaction_uid)?;
		self.store.update(workitem.clone()).await?;
		info!(uid, state = %workitem.state, "Changed workitem state");
		Ok(workitem)
	}

	/// Requests cancellation. A SCHEDULED workitem is canceled directly; for
	/// an IN PROGRESS one the request is recorded for the performer.
	pub async fn request_cancellation(
		&self,
		uid: &str,
		reason: Option<&str>,
	) -> Result<CancellationOutcome, UpsError> {
		let _guard = self.locks.acquire(uid).await;
		let mut workitem = self.retrieve(uid).await?;

		match workitem.state {
			ProcedureStepState::Scheduled => {
				if let Some(reason) = reason {
					workitem.dataset.put(InMemElement::new(
						tags::REASON_FOR_CANCELLATION,
						VR::LT,
						PrimitiveValue::from(reason),
					));
				}
				workitem.transition(ProcedureStepState::Canceled, None)?;
				self.store.update(workitem.clone()).await?;
				info!(uid, "Canceled scheduled workitem");
				Ok(CancellationOutcome::Canceled(Box::new(workitem)))
			}
			ProcedureStepState::InProgress => Ok(CancellationOutcome::Requested),
			_ => Err(UpsError::WorkitemInFinalState {
				uid: uid.to_owned(),
			}),
		}
	}

	pub async fn subscribe(&self, uid: &str, aet: &str) -> Result<(), UpsError> {
		let _guard = self.locks.acquire(uid).await;
		let mut workitem = self.retrieve(uid).await?;
		workitem.subscribers.insert(aet.to_owned());
		self.store.update(workitem).await?;
		Ok(())
	}

	pub async fn unsubscribe(&self, uid: &str, aet: &str) -> Result<(), UpsError> {
		let _guard = self.locks.acquire(uid).await;
		let mut workitem = self.retrieve(uid).await?;
		workitem.subscribers.remove(aet);
		self.store.update(workitem).await?;
		Ok(())
	}

	/// Deletes a workitem outright. Soft-delete is not supported.
	pub async fn delete(&self, uid: &str) -> Result<(), UpsError> {
		let _guard = self.locks.acquire(uid).await;
		if !self.store.delete(uid).await? {
			return Err(UpsError::WorkitemNotFound {
				uid: uid.to_owned(),
			});
		}
		self.locks.remove(uid).await;
		Ok(())
	}

	pub async fn search(&self, query: &WorkitemQuery) -> Result<WorkitemPage, UpsError> {
		let matches: Vec<Workitem> = self
			.store
			.all()
			.await?
			.into_iter()
			.filter(|workitem| matches_query(workitem, query))
			.collect();

		let total = matches.len();
		let workitems: Vec<Workitem> = matches
			.into_iter()
			.skip(query.offset)
			.take(query.limit)
			.collect();
		let consumed = query.offset + workitems.len();
		let has_more = consumed < total;

		Ok(WorkitemPage {
			workitems,
			has_more,
			next_offset: has_more.then_some(consumed),
		})
	}
}
