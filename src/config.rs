use crate::types::UI;
use dicom::core::Tag;
use serde::{Deserialize, Deserializer};
use std::net::IpAddr;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
	pub telemetry: TelemetryConfig,
	pub server: ServerConfig,
	pub stow: StowConfig,
	pub json: JsonConfig,
}

impl AppConfig {
	/// Layered configuration: compiled-in defaults, an optional `config.toml`
	/// next to the binary and `DICOMWEB_RST__*` environment overrides.
	pub fn new() -> Result<Self, config::ConfigError> {
		use config::Config;
		let settings = Config::builder()
			.add_source(config::File::from_str(
				include_str!("defaults.toml"),
				config::FileFormat::Toml,
			))
			.add_source(config::File::with_name("config.toml").required(false))
			.add_source(config::Environment::with_prefix("DICOMWEB_RST").separator("__"))
			.build()?;

		settings.try_deserialize()
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
	/// Default logging level. Also configurable at runtime via RUST_LOG.
	#[serde(deserialize_with = "deserialize_level")]
	pub level: tracing::Level,
	/// Sentry DSN. An absent or empty value disables Sentry.
	#[serde(default)]
	pub sentry: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
	pub http: HttpServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
	/// The interface the DICOMweb server will be listening on.
	pub interface: IpAddr,
	/// The port for the DICOMweb server.
	pub port: u16,
	/// Path prefix below which the DICOMweb resources are published.
	pub path_prefix: String,
	/// Externally visible base URL, used to derive retrieve and bulk data
	/// URLs. No such URLs are generated when absent.
	#[serde(default)]
	pub public_base_url: Option<String>,
	/// Maximum accepted request body size in bytes.
	pub max_upload_size: usize,
	/// Request timeout in seconds.
	pub request_timeout: u64,
	/// Upper bound on concurrently processed requests. Requests beyond the
	/// bound wait for a free slot instead of queueing without limit.
	pub max_concurrent_requests: usize,
	pub graceful_shutdown: bool,
}

/// Duplicate handling for the store transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
	/// An already-stored SOP Instance UID is overwritten.
	Replace,
	/// An already-stored SOP Instance UID fails the incoming instance.
	Reject,
	/// An already-stored SOP Instance UID counts as stored without a rewrite.
	Accept,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StowConfig {
	pub duplicate_policy: DuplicatePolicy,
	pub validate_required_attributes: bool,
	pub validate_sop_classes: bool,
	/// SOP Class UIDs accepted when `validate_sop_classes` is enabled.
	pub allowed_sop_classes: Vec<UI>,
	pub validate_uid_format: bool,
	/// Extra required tags in `GGGGEEEE` notation.
	pub additional_required_tags: Vec<String>,
}

impl StowConfig {
	/// The configured additional required tags. Entries that do not parse as
	/// 8 hex digits are reported and skipped.
	pub fn additional_tags(&self) -> Vec<Tag> {
		self.additional_required_tags
			.iter()
			.filter_map(|key| match crate::dicomweb::json::parse_tag_key(key) {
				Ok(tag) => Some(tag),
				Err(_) => {
					warn!(
						key = key.as_str(),
						"Ignoring unparseable tag in additional_required_tags"
					);
					None
				}
			})
			.collect()
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonConfig {
	/// Binary values up to this many bytes are inlined as base64 in JSON
	/// metadata; larger ones are replaced by bulk data references.
	pub inline_binary_threshold: usize,
}

fn deserialize_level<'de, D>(deserializer: D) -> Result<tracing::Level, D::Error>
where
	D: Deserializer<'de>,
{
	let value = String::deserialize(deserializer)?;
	tracing::Level::from_str(&value).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_deserialize() {
		let config: AppConfig = config::Config::builder()
			.add_source(config::File::from_str(
				include_str!("defaults.toml"),
				config::FileFormat::Toml,
			))
			.build()
			.unwrap()
			.try_deserialize()
			.unwrap();

		assert_eq!(config.telemetry.level, tracing::Level::INFO);
		assert_eq!(config.server.http.path_prefix, "/dicom-web");
		assert_eq!(config.stow.duplicate_policy, DuplicatePolicy::Reject);
		assert!(config.server.http.max_concurrent_requests > 0);
	}

	#[test]
	fn unparseable_additional_tags_are_skipped() {
		let stow = StowConfig {
			duplicate_policy: DuplicatePolicy::Reject,
			validate_required_attributes: true,
			validate_sop_classes: false,
			allowed_sop_classes: Vec::new(),
			validate_uid_format: true,
			additional_required_tags: vec!["00080060".to_owned(), "garbage".to_owned()],
		};

		assert_eq!(stow.additional_tags(), vec![Tag(0x0008, 0x0060)]);
	}
}
