use crate::api::stow::{FailedReference, FailureReason, IncomingInstance};
use crate::api::{codec_error_response, json_response};
use crate::dicomweb::json::{decode_payload, encode_object, EncodeOptions};
use crate::dicomweb::multipart::MultipartRelated;
use crate::dicomweb::MediaType;
use crate::AppState;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Buf;
use dicom::object::{FileDicomObject, InMemDicomObject};
use tracing::{instrument, warn};

/// HTTP entry point of the Store Transaction.
///
/// <https://dicom.nema.org/medical/dicom/current/output/html/part18.html#sect_10.5>
#[instrument(skip_all)]
pub(crate) async fn store_instances(
	state: &AppState,
	scope_study_uid: Option<&str>,
	headers: &HeaderMap,
	body: &[u8],
) -> Response {
	let Some(content_type) = headers
		.get(CONTENT_TYPE)
		.and_then(|value| value.to_str().ok())
	else {
		return (
			StatusCode::UNSUPPORTED_MEDIA_TYPE,
			"missing Content-Type header",
		)
			.into_response();
	};

	if body.is_empty() {
		return (StatusCode::BAD_REQUEST, "empty store request body").into_response();
	}

	let multipart = match MultipartRelated::parse_with_content_type(content_type, body) {
		Ok(multipart) => multipart,
		Err(err) => return codec_error_response(&err),
	};
	if multipart.parts().is_empty() {
		return (StatusCode::BAD_REQUEST, "store request without parts").into_response();
	}

	let mut incoming: Vec<IncomingInstance> = Vec::new();
	let mut undecodable: Vec<FailedReference> = Vec::new();
	for part in multipart.into_parts() {
		if part.content_type.matches(&MediaType::application_dicom()) {
			match FileDicomObject::from_reader(part.body.clone().reader()) {
				Ok(file) => incoming.push(IncomingInstance {
					dataset: file.into_inner(),
					data: Some(part.body),
				}),
				Err(err) => {
					warn!("Failed to read instance from multipart body: {err}");
					undecodable.push(FailedReference {
						sop_class_uid: None,
						sop_instance_uid: None,
						reason: FailureReason::ProcessingFailure,
						description: format!("unreadable DICOM part: {err}"),
					});
				}
			}
		} else if part
			.content_type
			.matches(&MediaType::application_dicom_json())
		{
			// A malformed metadata part fails the whole request before
			// anything is stored.
			match decode_payload(&part.body) {
				Ok(datasets) => incoming.extend(datasets.into_iter().map(|dataset| {
					IncomingInstance {
						dataset,
						data: None,
					}
				})),
				Err(err) => return codec_error_response(&err),
			}
		} else {
			undecodable.push(FailedReference {
				sop_class_uid: None,
				sop_instance_uid: None,
				reason: FailureReason::ProcessingFailure,
				description: format!(
					"unsupported part content type `{}`",
					part.content_type
				),
			});
		}
	}

	let mut results = state.stow.store(incoming, scope_study_uid).await;
	results.failed.extend(undecodable);

	let status = if results.is_empty() {
		StatusCode::BAD_REQUEST
	} else if results.is_full_success() {
		StatusCode::OK
	} else if results.is_partial_success() {
		StatusCode::ACCEPTED
	} else {
		StatusCode::CONFLICT
	};

	let dataset = encode_object(
		&InMemDicomObject::from(results),
		&EncodeOptions::default(),
	);
	json_response(status, &dataset)
}
