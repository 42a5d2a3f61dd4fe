use crate::api::wado::RetrieveError;
use crate::api::{json_array_response, multipart_response};
use crate::dicomweb::media_type::{parse_accept, MediaType};
use crate::AppState;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{error, instrument};

/// An absent or empty `Accept` header accepts everything.
fn accepts_multipart(headers: &HeaderMap) -> bool {
	let Some(accept) = headers
		.get(header::ACCEPT)
		.and_then(|value| value.to_str().ok())
	else {
		return true;
	};

	let accepted = parse_accept(accept);
	accepted.is_empty()
		|| accepted.iter().any(|media_type| {
			media_type.r#type() == "*"
				|| media_type.matches(&MediaType::multipart_related())
				|| (media_type.r#type() == "multipart" && media_type.subtype() == "*")
		})
}

fn not_acceptable() -> Response {
	(
		StatusCode::NOT_ACCEPTABLE,
		"only multipart/related responses are available for this resource",
	)
		.into_response()
}

fn retrieve_error_response(error: &RetrieveError) -> Response {
	let status = match error {
		RetrieveError::NotFound | RetrieveError::FrameOutOfRange { .. } => StatusCode::NOT_FOUND,
		RetrieveError::InvalidFrameList { .. } => StatusCode::BAD_REQUEST,
		RetrieveError::UnsupportedPixelData => StatusCode::NOT_ACCEPTABLE,
		RetrieveError::Storage(source) => {
			error!("storage failure during retrieve: {source}");
			StatusCode::INTERNAL_SERVER_ERROR
		}
	};
	(status, error.to_string()).into_response()
}

#[instrument(skip_all)]
pub(crate) async fn retrieve_study(
	state: &AppState,
	headers: &HeaderMap,
	study_uid: &str,
) -> Response {
	if !accepts_multipart(headers) {
		return not_acceptable();
	}
	match state.wado.retrieve_study(study_uid).await {
		Ok(multipart) => multipart_response(&multipart),
		Err(err) => retrieve_error_response(&err),
	}
}

#[instrument(skip_all)]
pub(crate) async fn retrieve_series(
	state: &AppState,
	headers: &HeaderMap,
	study_uid: &str,
	series_uid: &str,
) -> Response {
	if !accepts_multipart(headers) {
		return not_acceptable();
	}
	match state.wado.retrieve_series(study_uid, series_uid).await {
		Ok(multipart) => multipart_response(&multipart),
		Err(err) => retrieve_error_response(&err),
	}
}

#[instrument(skip_all)]
pub(crate) async fn retrieve_instance(
	state: &AppState,
	headers: &HeaderMap,
	study_uid: &str,
	series_uid: &str,
	instance_uid: &str,
) -> Response {
	if !accepts_multipart(headers) {
		return not_acceptable();
	}
	match state
		.wado
		.retrieve_instance(study_uid, series_uid, instance_uid)
		.await
	{
		Ok(multipart) => multipart_response(&multipart),
		Err(err) => retrieve_error_response(&err),
	}
}

#[instrument(skip_all)]
pub(crate) async fn metadata(
	state: &AppState,
	study_uid: &str,
	series_uid: Option<&str>,
) -> Response {
	match state.wado.metadata(study_uid, series_uid).await {
		Ok(items) => json_array_response(items),
		Err(err) => retrieve_error_response(&err),
	}
}

#[instrument(skip_all)]
pub(crate) async fn retrieve_frames(
	state: &AppState,
	headers: &HeaderMap,
	study_uid: &str,
	series_uid: &str,
	instance_uid: &str,
	raw_frame_list: &str,
) -> Response {
	if !accepts_multipart(headers) {
		return not_acceptable();
	}
	match state
		.wado
		.retrieve_frames(study_uid, series_uid, instance_uid, raw_frame_list)
		.await
	{
		Ok(multipart) => multipart_response(&multipart),
		Err(err) => retrieve_error_response(&err),
	}
}

#[instrument(skip_all)]
pub(crate) async fn delete_study(state: &AppState, study_uid: &str) -> Response {
	match state.wado.delete_study(study_uid).await {
		Ok(_) => StatusCode::NO_CONTENT.into_response(),
		Err(err) => retrieve_error_response(&err),
	}
}
