//! Gemini REST API payloads.

use serde::{Deserialize, Serialize};

/// Processing state of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    Processing,
    Active,
    Failed,
    #[default]
    #[serde(rename = "STATE_UNSPECIFIED", other)]
    Unspecified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatusError {
    #[serde(default)]
    pub message: String,
}

/// A file held by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    /// Opaque resource name, `files/...`
    pub name: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub state: FileState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FileStatusError>,
}

impl RemoteFile {
    /// Reason the service gave for a failed file, if any.
    pub fn failure_reason(&self) -> String {
        self.error
            .as_ref()
            .map(|e| e.message.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("{} entered state FAILED", self.name))
    }
}

/// Response body of a finalized upload.
#[derive(Debug, Deserialize)]
pub(crate) struct UploadResponse {
    pub file: RemoteFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub mime_type: String,
    pub file_uri: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(rename = "fileData", default, skip_serializing_if = "Option::is_none")]
    pub file_data: Option<FileData>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// `models/{model}:generateContent` request.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
}

impl GenerateContentRequest {
    /// A single user turn: the video reference followed by the prompt.
    pub fn for_file(file: &RemoteFile, prompt: &str) -> Self {
        let mime_type = if file.mime_type.is_empty() {
            "video/mp4".to_string()
        } else {
            file.mime_type.clone()
        };

        Self {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![
                    Part {
                        text: None,
                        file_data: Some(FileData {
                            mime_type,
                            file_uri: file.uri.clone(),
                        }),
                    },
                    Part {
                        text: Some(prompt.to_string()),
                        file_data: None,
                    },
                ],
            }],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
}

/// `models/{model}:generateContent` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

impl GenerateContentResponse {
    /// Concatenated text parts of the first candidate.
    ///
    /// `None` when there is no candidate, no part, or no text at all.
    pub fn text(&self) -> Option<String> {
        let parts = &self.candidates.first()?.content.as_ref()?.parts;
        let text: String = parts.iter().filter_map(|p| p.text.as_deref()).collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}
