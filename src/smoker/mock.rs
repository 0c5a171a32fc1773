use super::SmokerError;
use crate::ids::Fingerprint;
use crate::server::Response;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// HTTP methods a mock can match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MockMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl MockMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MockMethod::Get => "GET",
            MockMethod::Post => "POST",
            MockMethod::Put => "PUT",
            MockMethod::Patch => "PATCH",
            MockMethod::Delete => "DELETE",
            MockMethod::Head => "HEAD",
        }
    }
}

impl fmt::Display for MockMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MockMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(MockMethod::Get),
            "POST" => Ok(MockMethod::Post),
            "PUT" => Ok(MockMethod::Put),
            "PATCH" => Ok(MockMethod::Patch),
            "DELETE" => Ok(MockMethod::Delete),
            "HEAD" => Ok(MockMethod::Head),
            other => Err(format!("unsupported mock method: {}", other)),
        }
    }
}

/// Which requests a mock answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockRequest {
    pub method: MockMethod,
    pub path: String,
}

/// Canned response. Missing fields fall back to `200`, no extra headers and
/// an empty body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl MockResponse {
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn to_response(&self) -> Response {
        let mut response = Response::new(self.status.unwrap_or(200));
        if let Some(headers) = &self.headers {
            for (name, value) in headers {
                response = response.with_header(name.clone(), value.clone());
            }
        }
        if let Some(body) = &self.body {
            response = response.with_body(body.clone());
        }
        response
    }
}

/// A request matcher with an optional canned response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mock {
    pub request: MockRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<MockResponse>,
}

impl Mock {
    pub fn new(method: MockMethod, path: impl Into<String>) -> Self {
        Self {
            request: MockRequest {
                method,
                path: path.into(),
            },
            response: None,
        }
    }

    pub fn with_response(mut self, response: MockResponse) -> Self {
        self.response = Some(response);
        self
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(self.request.method.as_str(), &self.request.path)
    }
}

/// Response served for a request: the mock's, or an empty `200`.
pub fn build_response(mock: Option<&Mock>) -> Response {
    match mock {
        Some(mock) => mock
            .response
            .as_ref()
            .map(MockResponse::to_response)
            .unwrap_or_default(),
        None => Response::default(),
    }
}

/// Read mocks from a JSON (`.json`) or YAML (anything else) file holding a list.
pub fn load_mock_file(path: &Path) -> Result<Vec<Mock>, SmokerError> {
    let mock_file_error = |reason: String| SmokerError::MockFile {
        path: path.to_path_buf(),
        reason,
    };

    let content = fs::read_to_string(path).map_err(|e| mock_file_error(e.to_string()))?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        serde_json::from_str(&content).map_err(|e| mock_file_error(e.to_string()))
    } else {
        serde_yaml::from_str(&content).map_err(|e| mock_file_error(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ResponseBody;
    use std::io::Write;

    #[test]
    fn test_mock_fingerprint_matches_request_fingerprint() {
        let mock = Mock::new(MockMethod::Post, "/test");
        assert_eq!(mock.fingerprint(), Fingerprint::compute("POST", "/test"));
    }

    #[test]
    fn test_method_parse() {
        assert_eq!("get".parse::<MockMethod>(), Ok(MockMethod::Get));
        assert_eq!("DELETE".parse::<MockMethod>(), Ok(MockMethod::Delete));
        assert!("OPTIONS".parse::<MockMethod>().is_err());
    }

    #[test]
    fn test_build_response_defaults() {
        let res = build_response(None);
        assert_eq!(res.status, 200);
        assert!(res.headers.is_empty());
        assert!(res.body.is_empty());

        let mock = Mock::new(MockMethod::Get, "/")
            .with_response(MockResponse::default().with_body("Oops"));
        let res = build_response(Some(&mock));
        assert_eq!(res.status, 200);
        assert!(matches!(res.body, ResponseBody::Full(ref b) if b.as_ref() == b"Oops"));
    }

    #[test]
    fn test_build_response_full() {
        let mock = Mock::new(MockMethod::Get, "/api/testing").with_response(
            MockResponse::default()
                .with_status(403)
                .with_header("Content-Type", "application/json")
                .with_header("X-Timing", "24"),
        );
        let res = build_response(Some(&mock));
        assert_eq!(res.status, 403);
        assert_eq!(res.header("content-type"), Some("application/json"));
        assert_eq!(res.header("x-timing"), Some("24"));
        assert!(res.body.is_empty());
    }

    #[test]
    fn test_serde_shape() {
        let json = r#"{"request":{"method":"PATCH","path":"/items/1"},"response":{"status":204}}"#;
        let mock: Mock = serde_json::from_str(json).unwrap();
        assert_eq!(mock.request.method, MockMethod::Patch);
        assert_eq!(mock.response.as_ref().and_then(|r| r.status), Some(204));
        assert_eq!(serde_json::to_string(&mock).unwrap(), json);
    }

    #[test]
    fn test_load_yaml_and_json_files() {
        let mut yaml = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            yaml,
            concat!(
                "- request:\n    method: GET\n    path: /\n",
                "- request:\n    method: POST\n    path: /test\n",
                "  response:\n    status: 201\n    body: created",
            )
        )
        .unwrap();
        let mocks = load_mock_file(yaml.path()).unwrap();
        assert_eq!(mocks.len(), 2);
        assert_eq!(
            mocks[1].response.as_ref().and_then(|r| r.body.as_deref()),
            Some("created")
        );

        let mut json = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(json, "{}", serde_json::to_string(&mocks).unwrap()).unwrap();
        assert_eq!(load_mock_file(json.path()).unwrap(), mocks);
    }

    #[test]
    fn test_load_rejects_bad_files() {
        let mut bad = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(bad, "[{{\"request\": {{\"method\": \"TRACE\", \"path\": \"/\"}}}}]").unwrap();
        assert!(matches!(
            load_mock_file(bad.path()),
            Err(SmokerError::MockFile { .. })
        ));
        assert!(load_mock_file(Path::new("/definitely/not/here.yaml")).is_err());
    }
}
