//! The DICOMweb URL grammar as a pure dispatch table.
//!
//! Matching is purely structural over (path prefix, path, method); request
//! headers and bodies are never consulted, so every route can be unit-tested
//! without constructing a full request.

use axum::http::Method;
use std::collections::HashMap;

/// One tag per supported transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum HandlerType {
	SearchStudies,
	StoreInstances,
	RetrieveStudy,
	DeleteStudy,
	RetrieveStudyMetadata,
	SearchSeriesInStudy,
	RetrieveSeries,
	RetrieveSeriesMetadata,
	SearchInstances,
	RetrieveInstance,
	RetrieveFrames,
	CreateWorkitem,
	SearchWorkitems,
	RetrieveWorkitem,
	UpdateWorkitem,
	ChangeWorkitemState,
	RequestWorkitemCancellation,
	Subscribe,
	Unsubscribe,
	Capabilities,
}

/// The outcome of a successful dispatch: an operation tag plus the resource
/// identifiers extracted from the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
	pub handler: HandlerType,
	pub params: HashMap<String, String>,
}

impl RouteMatch {
	fn new(handler: HandlerType, params: &[(&str, &str)]) -> Self {
		Self {
			handler,
			params: params
				.iter()
				.map(|&(key, value)| (key.to_owned(), value.to_owned()))
				.collect(),
		}
	}

	pub fn param(&self, key: &str) -> Option<&str> {
		self.params.get(key).map(String::as_str)
	}
}

/// Matches a request path against the DICOMweb URL grammar.
///
/// Returns `None` for an unknown path, a path outside the configured prefix,
/// or a method not supported on an otherwise-valid path. The caller maps the
/// absent result to a not-found response.
pub fn match_route(prefix: &str, path: &str, method: &Method) -> Option<RouteMatch> {
	let remainder = path.strip_prefix(prefix)?;
	let segments: Vec<&str> = remainder.split('/').filter(|s| !s.is_empty()).collect();

	let (get, post, delete) = (
		*method == Method::GET,
		*method == Method::POST,
		*method == Method::DELETE,
	);

	let matched = match segments.as_slice() {
		["studies"] if get => RouteMatch::new(HandlerType::SearchStudies, &[]),
		["studies"] if post => RouteMatch::new(HandlerType::StoreInstances, &[]),
		["studies", study] if get => {
			RouteMatch::new(HandlerType::RetrieveStudy, &[("studyUID", study)])
		}
		["studies", study] if delete => {
			RouteMatch::new(HandlerType::DeleteStudy, &[("studyUID", study)])
		}
		["studies", study, "metadata"] if get => {
			RouteMatch::new(HandlerType::RetrieveStudyMetadata, &[("studyUID", study)])
		}
		["studies", study, "series"] if get => {
			RouteMatch::new(HandlerType::SearchSeriesInStudy, &[("studyUID", study)])
		}
		["studies", study, "series"] if post => {
			RouteMatch::new(HandlerType::StoreInstances, &[("studyUID", study)])
		}
		["studies", study, "instances"] if get => {
			RouteMatch::new(HandlerType::SearchInstances, &[("studyUID", study)])
		}
		["studies", study, "series", series] if get => RouteMatch::new(
			HandlerType::RetrieveSeries,
			&[("studyUID", study), ("seriesUID", series)],
		),
		["studies", study, "series", series, "metadata"] if get => RouteMatch::new(
			HandlerType::RetrieveSeriesMetadata,
			&[("studyUID", study), ("seriesUID", series)],
		),
		["studies", study, "series", series, "instances"] if get => RouteMatch::new(
			HandlerType::SearchInstances,
			&[("studyUID", study), ("seriesUID", series)],
		),
		["studies", study, "series", series, "instances", instance] if get => RouteMatch::new(
			HandlerType::RetrieveInstance,
			&[
				("studyUID", study),
				("seriesUID", series),
				("instanceUID", instance),
			],
		),
		// The frame list is passed through as the raw comma-joined literal;
		// the retrieval handler validates it so that a malformed list still
		// routes but fails downstream with a typed error.
		["studies", study, "series", series, "instances", instance, "frames", frames] if get => {
			RouteMatch::new(
				HandlerType::RetrieveFrames,
				&[
					("studyUID", study),
					("seriesUID", series),
					("instanceUID", instance),
					("frames", frames),
				],
			)
		}
		["workitems"] if get => RouteMatch::new(HandlerType::SearchWorkitems, &[]),
		["workitems"] if post => RouteMatch::new(HandlerType::CreateWorkitem, &[]),
		["workitems", workitem] if get => {
			RouteMatch::new(HandlerType::RetrieveWorkitem, &[("workitemUID", workitem)])
		}
		["workitems", workitem] if post => {
			RouteMatch::new(HandlerType::UpdateWorkitem, &[("workitemUID", workitem)])
		}
		["workitems", workitem, "state"] if post => RouteMatch::new(
			HandlerType::ChangeWorkitemState,
			&[("workitemUID", workitem)],
		),
		["workitems", workitem, "cancelrequest"] if post => RouteMatch::new(
			HandlerType::RequestWorkitemCancellation,
			&[("workitemUID", workitem)],
		),
		["workitems", workitem, "subscribers", aet] if post => RouteMatch::new(
			HandlerType::Subscribe,
			&[("workitemUID", workitem), ("aet", aet)],
		),
		["workitems", workitem, "subscribers", aet] if delete => RouteMatch::new(
			HandlerType::Unsubscribe,
			&[("workitemUID", workitem), ("aet", aet)],
		),
		["capabilities"] if get => RouteMatch::new(HandlerType::Capabilities, &[]),
		_ => return None,
	};

	Some(matched)
}

#[cfg(test)]
mod tests {
	use super::*;

	const PREFIX: &str = "/dicom-web";

	fn get(path: &str) -> Option<RouteMatch> {
		match_route(PREFIX, path, &Method::GET)
	}

	#[test]
	fn matches_instance_retrieval_with_uids() {
		let matched = get("/dicom-web/studies/1.2.3/series/4.5.6/instances/7.8.9").unwrap();

		assert_eq!(matched.handler, HandlerType::RetrieveInstance);
		assert_eq!(matched.param("studyUID"), Some("1.2.3"));
		assert_eq!(matched.param("seriesUID"), Some("4.5.6"));
		assert_eq!(matched.param("instanceUID"), Some("7.8.9"));
	}

	#[test]
	fn matches_frames_with_raw_frame_list() {
		let matched =
			get("/dicom-web/studies/1.2.3/series/4.5.6/instances/7.8.9/frames/1,2,3").unwrap();

		assert_eq!(matched.handler, HandlerType::RetrieveFrames);
		assert_eq!(matched.param("frames"), Some("1,2,3"));
	}

	#[test]
	fn malformed_frame_list_still_routes() {
		let matched =
			get("/dicom-web/studies/1.2.3/series/4.5.6/instances/7.8.9/frames/not-a-number")
				.unwrap();

		assert_eq!(matched.handler, HandlerType::RetrieveFrames);
		assert_eq!(matched.param("frames"), Some("not-a-number"));
	}

	#[test]
	fn dispatches_on_method() {
		assert_eq!(
			match_route(PREFIX, "/dicom-web/studies", &Method::GET)
				.unwrap()
				.handler,
			HandlerType::SearchStudies
		);
		assert_eq!(
			match_route(PREFIX, "/dicom-web/studies", &Method::POST)
				.unwrap()
				.handler,
			HandlerType::StoreInstances
		);
		assert_eq!(
			match_route(PREFIX, "/dicom-web/studies/1.2.3", &Method::DELETE)
				.unwrap()
				.handler,
			HandlerType::DeleteStudy
		);
		assert!(match_route(PREFIX, "/dicom-web/studies", &Method::PUT).is_none());
	}

	#[test]
	fn matches_search_routes() {
		assert_eq!(
			get("/dicom-web/studies/1.2.3/series").unwrap().handler,
			HandlerType::SearchSeriesInStudy
		);
		assert_eq!(
			get("/dicom-web/studies/1.2.3/instances").unwrap().handler,
			HandlerType::SearchInstances
		);
		assert_eq!(
			get("/dicom-web/studies/1.2.3/series/4.5.6/instances")
				.unwrap()
				.handler,
			HandlerType::SearchInstances
		);
		assert_eq!(
			get("/dicom-web/studies/1.2.3/metadata").unwrap().handler,
			HandlerType::RetrieveStudyMetadata
		);
		assert_eq!(
			get("/dicom-web/studies/1.2.3/series/4.5.6/metadata")
				.unwrap()
				.handler,
			HandlerType::RetrieveSeriesMetadata
		);
	}

	#[test]
	fn matches_workitem_routes() {
		assert_eq!(
			match_route(PREFIX, "/dicom-web/workitems", &Method::POST)
				.unwrap()
				.handler,
			HandlerType::CreateWorkitem
		);
		assert_eq!(
			get("/dicom-web/workitems").unwrap().handler,
			HandlerType::SearchWorkitems
		);

		let matched = match_route(PREFIX, "/dicom-web/workitems/9.8.7/state", &Method::POST).unwrap();
		assert_eq!(matched.handler, HandlerType::ChangeWorkitemState);
		assert_eq!(matched.param("workitemUID"), Some("9.8.7"));

		assert_eq!(
			match_route(
				PREFIX,
				"/dicom-web/workitems/9.8.7/cancelrequest",
				&Method::POST
			)
			.unwrap()
			.handler,
			HandlerType::RequestWorkitemCancellation
		);

		let subscribe = match_route(
			PREFIX,
			"/dicom-web/workitems/9.8.7/subscribers/VIEWER",
			&Method::POST,
		)
		.unwrap();
		assert_eq!(subscribe.handler, HandlerType::Subscribe);
		assert_eq!(subscribe.param("aet"), Some("VIEWER"));

		assert_eq!(
			match_route(
				PREFIX,
				"/dicom-web/workitems/9.8.7/subscribers/VIEWER",
				&Method::DELETE
			)
			.unwrap()
			.handler,
			HandlerType::Unsubscribe
		);
	}

	#[test]
	fn rejects_unknown_paths_and_wrong_prefix() {
		assert!(get("/dicom-web/unknown").is_none());
		assert!(get("/dicom-web/studies/1.2.3/frames/1").is_none());
		assert!(get("/other/studies").is_none());
		assert!(get("/studies").is_none());
	}

	#[test]
	fn matches_capabilities() {
		assert_eq!(
			get("/dicom-web/capabilities").unwrap().handler,
			HandlerType::Capabilities
		);
		assert!(match_route(PREFIX, "/dicom-web/capabilities", &Method::POST).is_none());
	}
}
