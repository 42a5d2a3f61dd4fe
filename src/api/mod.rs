use crate::dicomweb::router::{match_route, HandlerType};
use crate::dicomweb::{CodecError, MediaType};
use crate::AppState;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use axum_streams::StreamBodyAs;
use serde_json::Value as JsonValue;

pub mod capabilities;
pub mod qido;
pub mod stow;
pub mod ups;
pub mod wado;

/// The DICOMweb surface is a single fallback service: the URL grammar lives
/// in [`crate::dicomweb::router`] and every request goes through it.
pub fn routes() -> Router<AppState> {
	Router::new().fallback(dispatch)
}

async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
	let Some(matched) = match_route(
		&state.config.server.http.path_prefix,
		request.uri().path(),
		request.method(),
	) else {
		return StatusCode::NOT_FOUND.into_response();
	};

	let (parts, body) = request.into_parts();
	let body = match axum::body::to_bytes(body, state.config.server.http.max_upload_size).await {
		Ok(body) => body,
		Err(_) => {
			return (
				StatusCode::PAYLOAD_TOO_LARGE,
				"request body exceeds the configured size limit",
			)
				.into_response()
		}
	};

	let params = &matched.params;
	let study = || params.get("studyUID").cloned().unwrap_or_default();
	let series = || params.get("seriesUID").cloned().unwrap_or_default();
	let instance = || params.get("instanceUID").cloned().unwrap_or_default();
	let workitem = || params.get("workitemUID").cloned().unwrap_or_default();
	let aet = || params.get("aet").cloned().unwrap_or_default();

	match matched.handler {
		HandlerType::SearchStudies => qido::routes::search_studies(&state, &parts.uri).await,
		HandlerType::SearchSeriesInStudy => {
			qido::routes::search_series(&state, &study(), &parts.uri).await
		}
		HandlerType::SearchInstances => {
			qido::routes::search_instances(
				&state,
				&study(),
				params.get("seriesUID").map(String::as_str),
				&parts.uri,
			)
			.await
		}
		HandlerType::RetrieveStudy => {
			wado::routes::retrieve_study(&state, &parts.headers, &study()).await
		}
		HandlerType::RetrieveSeries => {
			wado::routes::retrieve_series(&state, &parts.headers, &study(), &series()).await
		}
		HandlerType::RetrieveInstance => {
			wado::routes::retrieve_instance(&state, &parts.headers, &study(), &series(), &instance())
				.await
		}
		HandlerType::RetrieveStudyMetadata => {
			wado::routes::metadata(&state, &study(), None).await
		}
		HandlerType::RetrieveSeriesMetadata => {
			wado::routes::metadata(&state, &study(), Some(series().as_str())).await
		}
		HandlerType::RetrieveFrames => {
			wado::routes::retrieve_frames(
				&state,
				&parts.headers,
				&study(),
				&series(),
				&instance(),
				params.get("frames").map(String::as_str).unwrap_or_default(),
			)
			.await
		}
		HandlerType::DeleteStudy => wado::routes::delete_study(&state, &study()).await,
		HandlerType::StoreInstances => {
			stow::routes::store_instances(
				&state,
				params.get("studyUID").map(String::as_str),
				&parts.headers,
				&body,
			)
			.await
		}
		HandlerType::CreateWorkitem => ups::routes::create(&state, &parts.uri, &body).await,
		HandlerType::SearchWorkitems => ups::routes::search(&state, &parts.uri).await,
		HandlerType::RetrieveWorkitem => ups::routes::retrieve(&state, &workitem()).await,
		HandlerType::UpdateWorkitem => ups::routes::update(&state, &workitem(), &body).await,
		HandlerType::ChangeWorkitemState => {
			ups::routes::change_state(&state, &workitem(), &body).await
		}
		HandlerType::RequestWorkitemCancellation => {
			ups::routes::request_cancellation(&state, &workitem(), &body).await
		}
		HandlerType::Subscribe => ups::routes::subscribe(&state, &workitem(), &aet()).await,
		HandlerType::Unsubscribe => ups::routes::unsubscribe(&state, &workitem(), &aet()).await,
		HandlerType::Capabilities => capabilities::capabilities(&state),
	}
}

/// DICOM JSON array response; an empty result set is 204 No Content.
pub(crate) fn json_array_response(items: Vec<JsonValue>) -> Response {
	if items.is_empty() {
		return StatusCode::NO_CONTENT.into_response();
	}

	Response::builder()
		.status(StatusCode::OK)
		.header(
			header::CONTENT_TYPE,
			MediaType::application_dicom_json().to_string(),
		)
		.body(StreamBodyAs::json_array(futures::stream::iter(items)))
		.unwrap()
		.into_response()
}

/// Single DICOM JSON dataset response.
pub(crate) fn json_response(status: StatusCode, dataset: &JsonValue) -> Response {
	Response::builder()
		.status(status)
		.header(
			header::CONTENT_TYPE,
			MediaType::application_dicom_json().to_string(),
		)
		.body(Body::from(dataset.to_string()))
		.unwrap()
}

pub(crate) fn multipart_response(
	multipart: &crate::dicomweb::multipart::MultipartRelated,
) -> Response {
	Response::builder()
		.status(StatusCode::OK)
		.header(header::CONTENT_TYPE, multipart.content_type().to_string())
		.body(Body::from(multipart.encode()))
		.unwrap()
}

pub(crate) fn codec_error_response(error: &CodecError) -> Response {
	let status = match error {
		CodecError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
		_ => StatusCode::BAD_REQUEST,
	};
	(status, error.to_string()).into_response()
}
