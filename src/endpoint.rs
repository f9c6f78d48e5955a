//! Derives a logical endpoint label from an RPC method path, e.g.
//! `/com.acme.proj.app.v1.GoodService/Hello` -> `com.acme.proj.app.v1`.

use crate::error::EndpointError;

pub trait EndpointParser: Send + Sync {
	fn parse(&self, full_method: &str) -> Result<String, EndpointError>;
}

/// The default parser, matching the reference gateway's path-splitting rule.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEndpointParser;

impl EndpointParser for DefaultEndpointParser {
	fn parse(&self, full_method: &str) -> Result<String, EndpointError> {
		parse_endpoint(full_method)
	}
}

/// Degenerate inputs shorter than two bytes pass through unchanged; anything
/// else must look like `/<dotted.prefix>.Service/Method`.
pub fn parse_endpoint(full_method: &str) -> Result<String, EndpointError> {
	if full_method.len() < 2 {
		return Ok(full_method.to_string());
	}
	if !full_method.starts_with('/') {
		return Err(EndpointError::InvalidPath);
	}
	let rest = &full_method[1..];
	let second_slash = rest.find('/').ok_or(EndpointError::MissingServiceSegment)?;
	let first_segment = &rest[..second_slash];
	let last_dot = first_segment.rfind('.').ok_or(EndpointError::NoDottedPrefix)?;
	Ok(first_segment[..last_dot].to_string())
}

#[cfg(test)]
mod tests {
	use super::*;
	use test_case::test_case;

	#[test_case("/com.veigit.dimpocp.fsosi.grpc.v1.Fsosi/ListFso", "com.veigit.dimpocp.fsosi.grpc.v1")]
	#[test_case("/a.B/M", "a")]
	#[test_case("/com.acme.proj.app.v1.GoodService/Hello", "com.acme.proj.app.v1")]
	fn parses_expected_label(path: &str, want: &str) {
		assert_eq!(parse_endpoint(path).unwrap(), want);
	}

	#[test]
	fn rejects_path_without_leading_slash() {
		assert!(matches!(
			parse_endpoint("com.a.B/M"),
			Err(EndpointError::InvalidPath)
		));
	}

	#[test]
	fn rejects_path_without_second_slash() {
		assert!(matches!(
			parse_endpoint("/com.a.B"),
			Err(EndpointError::MissingServiceSegment)
		));
	}

	#[test]
	fn rejects_first_segment_without_dot() {
		assert!(matches!(
			parse_endpoint("/X/M"),
			Err(EndpointError::NoDottedPrefix)
		));
	}

	#[test]
	fn degenerate_short_path_passes_through() {
		assert_eq!(parse_endpoint("/").unwrap(), "/");
		assert_eq!(parse_endpoint("").unwrap(), "");
	}

	#[test]
	fn default_parser_delegates() {
		let parser = DefaultEndpointParser;
		assert_eq!(
			parser.parse("/a.b.c.Svc/M").unwrap(),
			"a.b.c"
		);
	}
}
