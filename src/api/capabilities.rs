use crate::AppState;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Describes the transactions this origin server supports.
///
/// <https://dicom.nema.org/medical/dicom/current/output/html/part18.html#sect_8.9>
pub(crate) fn capabilities(state: &AppState) -> Response {
	let prefix = &state.config.server.http.path_prefix;

	Json(json!({
		"name": "DICOMWEB-RST",
		"version": env!("CARGO_PKG_VERSION"),
		"implementationClassUID": crate::IMPLEMENTATION_CLASS_UID,
		"implementationVersionName": crate::IMPLEMENTATION_VERSION_NAME,
		"transactions": {
			"search": [
				format!("{prefix}/studies"),
				format!("{prefix}/studies/{{study}}/series"),
				format!("{prefix}/studies/{{study}}/instances"),
				format!("{prefix}/studies/{{study}}/series/{{series}}/instances"),
			],
			"retrieve": [
				format!("{prefix}/studies/{{study}}"),
				format!("{prefix}/studies/{{study}}/metadata"),
				format!("{prefix}/studies/{{study}}/series/{{series}}"),
				format!("{prefix}/studies/{{study}}/series/{{series}}/metadata"),
				format!("{prefix}/studies/{{study}}/series/{{series}}/instances/{{instance}}"),
				format!("{prefix}/studies/{{study}}/series/{{series}}/instances/{{instance}}/frames/{{frames}}"),
			],
			"store": [
				format!("{prefix}/studies"),
				format!("{prefix}/studies/{{study}}/series"),
			],
			"worklist": [
				format!("{prefix}/workitems"),
				format!("{prefix}/workitems/{{workitem}}"),
				format!("{prefix}/workitems/{{workitem}}/state"),
				format!("{prefix}/workitems/{{workitem}}/cancelrequest"),
				format!("{prefix}/workitems/{{workitem}}/subscribers/{{aet}}"),
			],
		},
	}))
	.into_response()
}
