use serde::{Deserialize, Serialize};

use crate::errors::RelayError;

/// Longest identifier accepted from a client.
pub const MAX_IDENTIFIER_LEN: usize = 200;

/// Client-supplied identifier of one logical file upload.
///
/// Resumable clients derive it from the file size and name, so only
/// `[A-Za-z0-9._-]` is accepted; the identifier doubles as the committed
/// object's key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UploadIdentifier(String);

/// Shared shape check: `[A-Za-z0-9._-]`, bounded length, never a bare path segment.
fn check_segment(what: &str, raw: &str) -> Result<(), RelayError> {
    if raw.is_empty() {
        return Err(RelayError::bad_request(format!("{what} must not be empty")));
    }
    if raw.len() > MAX_IDENTIFIER_LEN {
        return Err(RelayError::bad_request(format!(
            "{what} exceeds {MAX_IDENTIFIER_LEN} characters"
        )));
    }
    if raw == "." || raw == ".." {
        return Err(RelayError::bad_request(format!(
            "{what} must not be a path segment"
        )));
    }
    if let Some(bad) = raw
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(RelayError::bad_request(format!(
            "{what} contains unsupported character {bad:?}"
        )));
    }
    Ok(())
}

impl UploadIdentifier {
    pub fn parse(raw: impl Into<String>) -> Result<Self, RelayError> {
        let raw = raw.into();
        check_segment("identifier", &raw)?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UploadIdentifier {
    type Error = RelayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<UploadIdentifier> for String {
    fn from(value: UploadIdentifier) -> Self {
        value.0
    }
}

impl std::fmt::Display for UploadIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier of one workflow run, as issued by the workflow engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// Wrap an id as issued by the workflow engine.
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    /// Validate a run id arriving from a client. Engine run ids are GUIDs,
    /// so the identifier charset covers them.
    pub fn parse(raw: impl Into<String>) -> Result<Self, RelayError> {
        let raw = raw.into();
        check_segment("run id", &raw)?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_resumable_style_identifiers() {
        let id = UploadIdentifier::parse("10485760-orders2024csv").unwrap();
        assert_eq!(id.as_str(), "10485760-orders2024csv");
    }

    #[test]
    fn rejects_path_like_identifiers() {
        assert!(UploadIdentifier::parse("").is_err());
        assert!(UploadIdentifier::parse("..").is_err());
        assert!(UploadIdentifier::parse("a/b").is_err());
        assert!(UploadIdentifier::parse("x".repeat(MAX_IDENTIFIER_LEN + 1)).is_err());
    }

    #[test]
    fn run_ids_from_clients_stay_one_segment() {
        let run = RunId::parse("5f2c1d7e-0a7b-4b8e-9c1e-2f3a4b5c6d7e").unwrap();
        assert_eq!(run.as_str(), "5f2c1d7e-0a7b-4b8e-9c1e-2f3a4b5c6d7e");

        for raw in ["", "..", "../pipelines/other/createRun?x=", "a/b", "run id"] {
            let err = RunId::parse(raw).unwrap_err();
            assert_eq!(err.code(), 400, "{raw:?} should be rejected");
        }
    }
}
