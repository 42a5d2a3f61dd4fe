use crate::api::qido::{MatchCriteria, QueryParameters, SearchError};
use crate::api::json_array_response;
use crate::AppState;
use axum::extract::Query;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde_json::Value as JsonValue;
use tracing::instrument;

fn search_response(result: Result<Vec<JsonValue>, SearchError>) -> Response {
	match result {
		Ok(items) => json_array_response(items),
		Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
	}
}

fn parse_query(uri: &Uri) -> Result<(QueryParameters, MatchCriteria), Response> {
	let Query(parameters) = Query::<QueryParameters>::try_from_uri(uri)
		.map_err(|rejection| rejection.into_response())?;
	let Query(criteria) = Query::<MatchCriteria>::try_from_uri(uri)
		.map_err(|rejection| rejection.into_response())?;
	Ok((parameters, criteria))
}

#[instrument(skip_all)]
pub(crate) async fn search_studies(state: &AppState, uri: &Uri) -> Response {
	let (parameters, criteria) = match parse_query(uri) {
		Ok(query) => query,
		Err(rejection) => return rejection,
	};
	search_response(state.qido.search_studies(&parameters, &criteria).await)
}

#[instrument(skip_all)]
pub(crate) async fn search_series(state: &AppState, study_uid: &str, uri: &Uri) -> Response {
	let (parameters, criteria) = match parse_query(uri) {
		Ok(query) => query,
		Err(rejection) => return rejection,
	};
	search_response(
		state
			.qido
			.search_series(study_uid, &parameters, &criteria)
			.await,
	)
}

#[instrument(skip_all)]
pub(crate) async fn search_instances(
	state: &AppState,
	study_uid: &str,
	series_uid: Option<&str>,
	uri: &Uri,
) -> Response {
	let (parameters, criteria) = match parse_query(uri) {
		Ok(query) => query,
		Err(rejection) => return rejection,
	};
	search_response(
		state
			.qido
			.search_instances(study_uid, series_uid, &parameters, &criteria)
			.await,
	)
}
