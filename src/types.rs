use uuid::Uuid;

/// UI (Unique Identifier) value representation.
pub type UI = String;

/// AE (Application Entity) value representation.
pub type AE = String;

/// Generates a unique identifier under the 2.25 root.
/// The UID is a randomly generated UUID represented as a single integer value.
pub fn generate_uid() -> UI {
	format!("2.25.{}", Uuid::new_v4().as_u128())
}

/// Checks the dotted-decimal UID grammar: at most 64 characters, non-empty
/// numeric components, no leading zeros except for the single digit 0.
pub fn is_valid_uid(uid: &str) -> bool {
	if uid.is_empty() || uid.len() > 64 {
		return false;
	}
	uid.split('.').all(|component| {
		!component.is_empty()
			&& component.bytes().all(|byte| byte.is_ascii_digit())
			&& (component == "0" || !component.starts_with('0'))
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn generated_uids_are_valid() {
		let uid = generate_uid();
		assert!(uid.starts_with("2.25."));
		assert!(is_valid_uid(&uid));
	}

	#[test]
	fn validates_uid_grammar() {
		assert!(is_valid_uid("1.2.840.10008.1.2.1"));
		assert!(is_valid_uid("0.0.1"));

		assert!(!is_valid_uid(""));
		assert!(!is_valid_uid("1..2"));
		assert!(!is_valid_uid("1.2a.3"));
		assert!(!is_valid_uid("1.02.3"));
		assert!(!is_valid_uid(&"1.2.".repeat(30)));
	}
}
