//! Response envelope for the control surface.

use serde::{Deserialize, Serialize};

/// `{status, message, data}` wrapper returned by every control endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
	pub status: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
	#[serde(default = "Vec::new")]
	pub data: Vec<T>,
}

impl<T> ApiResponse<T> {
	pub fn ok(data: T) -> Self {
		Self {
			status: true,
			message: None,
			data: vec![data],
		}
	}

	pub fn message(status: bool, message: impl Into<String>) -> Self {
		Self {
			status,
			message: Some(message.into()),
			data: Vec::new(),
		}
	}

	pub fn with_message(mut self, message: impl Into<String>) -> Self {
		self.message = Some(message.into());
		self
	}
}

/// Identity returned by the ping endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
	pub name: String,
	pub endpoint: String,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn message_only_response_has_empty_data() {
		let response: ApiResponse<PingResponse> = ApiResponse::message(false, "engine busy");
		let value = serde_json::to_value(&response).unwrap();
		assert_eq!(value["status"], false);
		assert_eq!(value["message"], "engine busy");
		assert_eq!(value["data"].as_array().unwrap().len(), 0);
	}
}
