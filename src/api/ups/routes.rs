use crate::api::ups::{
	CancellationOutcome, ProcedureStepState, UpsError, Workitem, WorkitemPriority, WorkitemQuery,
};
use crate::api::{codec_error_response, json_array_response, json_response};
use crate::dicomweb::json::{decode_payload, encode_object, EncodeOptions};
use crate::dicomweb::CodecError;
use crate::AppState;
use axum::extract::Query;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use dicom::dictionary_std::tags;
use dicom::object::InMemDicomObject;
use serde::Deserialize;
use tracing::{error, instrument};

fn ups_error_response(error: &UpsError) -> Response {
	let status = match error {
		UpsError::WorkitemNotFound { .. } => StatusCode::NOT_FOUND,
		UpsError::WorkitemAlreadyExists { .. }
		| UpsError::InvalidStateTransition { .. }
		| UpsError::TransactionUidMismatch
		| UpsError::WorkitemInFinalState { .. }
		| UpsError::NotInProgress { .. } => StatusCode::CONFLICT,
		UpsError::TransactionUidRequired => StatusCode::BAD_REQUEST,
		UpsError::Storage(source) => {
			error!("storage failure during workitem operation: {source}");
			StatusCode::INTERNAL_SERVER_ERROR
		}
	};
	(status, error.to_string()).into_response()
}

/// Decodes a request body that must contain exactly one dataset.
fn decode_single_dataset(body: &[u8]) -> Result<InMemDicomObject, Response> {
	let mut datasets = decode_payload(body).map_err(|err| codec_error_response(&err))?;
	if datasets.len() != 1 {
		return Err(codec_error_response(&CodecError::MalformedPayload(
			"expected exactly one dataset".to_owned(),
		)));
	}
	Ok(datasets.remove(0))
}

fn element_text(dataset: &InMemDicomObject, tag: dicom::core::Tag) -> Option<String> {
	dataset
		.get(tag)
		.and_then(|element| element.to_str().ok())
		.map(|value| value.trim().to_owned())
		.filter(|value| !value.is_empty())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CreateParameters {
	/// Optional `?workitem={uid}` selecting the UID of the new workitem.
	workitem: Option<String>,
}

#[instrument(skip_all)]
pub(crate) async fn create(state: &AppState, uri: &Uri, body: &[u8]) -> Response {
	let Query(params) = match Query::<CreateParameters>::try_from_uri(uri) {
		Ok(query) => query,
		Err(rejection) => return rejection.into_response(),
	};
	let dataset = match decode_single_dataset(body) {
		Ok(dataset) => dataset,
		Err(rejection) => return rejection,
	};

	match state.ups.create(params.workitem.as_deref(), dataset).await {
		Ok(workitem) => Response::builder()
			.status(StatusCode::CREATED)
			.header(
				header::LOCATION,
				format!(
					"{}/workitems/{}",
					state.config.server.http.path_prefix, workitem.uid
				),
			)
			.body(axum::body::Body::empty())
			.unwrap(),
		Err(err) => ups_error_response(&err),
	}
}

#[instrument(skip_all)]
pub(crate) async fn retrieve(state: &AppState, workitem_uid: &str) -> Response {
	match state.ups.retrieve(workitem_uid).await {
		Ok(workitem) => {
			let dataset = encode_object(&workitem.to_dataset(), &EncodeOptions::default());
			json_response(StatusCode::OK, &dataset)
		}
		Err(err) => ups_error_response(&err),
	}
}

#[instrument(skip_all)]
pub(crate) async fn update(state: &AppState, workitem_uid: &str, body: &[u8]) -> Response {
	let changes = match decode_single_dataset(body) {
		Ok(dataset) => dataset,
		Err(rejection) => return rejection,
	};
	let transaction_uid = element_text(&changes, tags::TRANSACTION_UID);

	match state
		.ups
		.update(workitem_uid, &changes, transaction_uid.as_deref())
		.await
	{
		Ok(_) => StatusCode::OK.into_response(),
		Err(err) => ups_error_response(&err),
	}
}

#[instrument(skip_all)]
pub(crate) async fn change_state(state: &AppState, workitem_uid: &str, body: &[u8]) -> Response {
	let request = match decode_single_dataset(body) {
		Ok(dataset) => dataset,
		Err(rejection) => return rejection,
	};

	let Some(target) = element_text(&request, tags::PROCEDURE_STEP_STATE)
		.and_then(|value| value.parse::<ProcedureStepState>().ok())
	else {
		return codec_error_response(&CodecError::MalformedPayload(
			"missing or unknown Procedure Step State".to_owned(),
		));
	};
	let transaction_uid = element_text(&request, tags::TRANSACTION_UID);

	match state
		.ups
		.change_state(workitem_uid, target, transaction_uid.as_deref())
		.await
	{
		Ok(workitem) => {
			let dataset = encode_object(&workitem.to_dataset(), &EncodeOptions::default());
			json_response(StatusCode::OK, &dataset)
		}
		Err(err) => ups_error_response(&err),
	}
}

#[instrument(skip_all)]
pub(crate) async fn request_cancellation(
	state: &AppState,
	workitem_uid: &str,
	body: &[u8],
) -> Response {
	// The cancellation request body is optional.
	let reason = if body.is_empty() {
		None
	} else {
		match decode_single_dataset(body) {
			Ok(dataset) => element_text(&dataset, tags::REASON_FOR_CANCELLATION),
			Err(rejection) => return rejection,
		}
	};

	match state
		.ups
		.request_cancellation(workitem_uid, reason.as_deref())
		.await
	{
		Ok(CancellationOutcome::Canceled(_)) => StatusCode::OK.into_response(),
		Ok(CancellationOutcome::Requested) => StatusCode::ACCEPTED.into_response(),
		Err(err) => ups_error_response(&err),
	}
}

#[instrument(skip_all)]
pub(crate) async fn subscribe(state: &AppState, workitem_uid: &str, aet: &str) -> Response {
	match state.ups.subscribe(workitem_uid, aet).await {
		Ok(()) => StatusCode::CREATED.into_response(),
		Err(err) => ups_error_response(&err),
	}
}

#[instrument(skip_all)]
pub(crate) async fn unsubscribe(state: &AppState, workitem_uid: &str, aet: &str) -> Response {
	match state.ups.unsubscribe(workitem_uid, aet).await {
		Ok(()) => StatusCode::OK.into_response(),
		Err(err) => ups_error_response(&err),
	}
}

/// Query parameters for a workitem search.
///
/// Attribute filters accept both the DICOM keyword and the tag form.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkitemQueryParameters {
	#[serde(rename = "ProcedureStepState", alias = "00741000", alias = "state")]
	pub state: Option<ProcedureStepState>,
	#[serde(
		rename = "ScheduledProcedureStepPriority",
		alias = "00741200",
		alias = "priority"
	)]
	pub priority: Option<WorkitemPriority>,
	#[serde(rename = "PatientID", alias = "00100020")]
	pub patient_id: Option<String>,
	#[serde(rename = "PatientName", alias = "00100010")]
	pub patient_name: Option<String>,
	pub limit: usize,
	pub offset: usize,
}

impl Default for WorkitemQueryParameters {
	fn default() -> Self {
		Self {
			state: None,
			priority: None,
			patient_id: None,
			patient_name: None,
			limit: 200,
			offset: 0,
		}
	}
}

impl From<WorkitemQueryParameters> for WorkitemQuery {
	fn from(params: WorkitemQueryParameters) -> Self {
		Self {
			state: params.state,
			priority: params.priority,
			patient_id: params.patient_id,
			patient_name: params.patient_name,
			offset: params.offset,
			limit: params.limit,
		}
	}
}

#[instrument(skip_all)]
pub(crate) async fn search(state: &AppState, uri: &Uri) -> Response {
	let Query(params) = match Query::<WorkitemQueryParameters>::try_from_uri(uri) {
		Ok(query) => query,
		Err(rejection) => return rejection.into_response(),
	};
	let query = WorkitemQuery::from(params);

	match state.ups.search(&query).await {
		Ok(page) => {
			let items: Vec<serde_json::Value> = page
				.workitems
				.iter()
				.map(Workitem::to_dataset)
				.map(|dataset| encode_object(&dataset, &EncodeOptions::default()))
				.collect();
			let mut response = json_array_response(items);
			if let Some(next_offset) = page.next_offset {
				// There are further results beyond this page.
				if let Ok(value) = header::HeaderValue::from_str(&format!(
					"299 dicomweb-rst \"there are additional results, continue at offset {next_offset}\""
				)) {
					response.headers_mut().insert(header::WARNING, value);
				}
			}
			response
		}
		Err(err) => ups_error_response(&err),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_workitem_query_params() {
		let uri = Uri::from_static(
			"http://test?ProcedureStepState=IN%20PROGRESS&PatientName=Doe^*&limit=5&offset=10",
		);
		let Query(params) = Query::<WorkitemQueryParameters>::try_from_uri(&uri).unwrap();

		assert_eq!(
			params,
			WorkitemQueryParameters {
				state: Some(ProcedureStepState::InProgress),
				priority: None,
				patient_id: None,
				patient_name: Some("Doe^*".to_owned()),
				limit: 5,
				offset: 10,
			}
		);
	}

	#[test]
	fn parse_workitem_query_params_tag_aliases() {
		let uri = Uri::from_static("http://test?00741200=STAT&00100020=PAT1");
		let Query(params) = Query::<WorkitemQueryParameters>::try_from_uri(&uri).unwrap();

		assert_eq!(params.priority, Some(WorkitemPriority::Stat));
		assert_eq!(params.patient_id.as_deref(), Some("PAT1"));
	}

	#[test]
	fn parse_workitem_query_params_default() {
		let uri = Uri::from_static("http://test");
		let Query(params) = Query::<WorkitemQueryParameters>::try_from_uri(&uri).unwrap();

		assert_eq!(params, WorkitemQueryParameters::default());
	}
}
