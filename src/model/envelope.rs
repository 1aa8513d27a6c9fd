use serde::Serialize;

/// The `{status, message, data}` body every successful response uses.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T> {
    pub status: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            status: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl Envelope<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status: true,
            message: message.into(),
            data: None,
        }
    }
}

/// Failure body. `error` carries the detail, when there is one worth showing.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub status: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_is_omitted_when_absent() {
        let json = serde_json::to_value(Envelope::message("Done")).unwrap();
        assert_eq!(json, serde_json::json!({ "status": true, "message": "Done" }));

        let json = serde_json::to_value(Envelope::ok("Found", vec![1, 2])).unwrap();
        assert_eq!(json["data"], serde_json::json!([1, 2]));
    }
}
