//! Request bodies and query strings accepted by the API

use serde::Deserialize;

/// `?source=&path=` used by list, info and preview
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathQuery {
    pub source: Option<String>,
    #[serde(default)]
    pub path: String,
}

/// `?source=&path=&download=` for serving files
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServeQuery {
    pub source: Option<String>,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub download: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceQuery {
    pub source: Option<String>,
}

/// Target directory of a multipart upload
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadQuery {
    pub source: Option<String>,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub source: Option<String>,
    pub path: String,
    #[serde(default)]
    pub is_dir: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteRequest {
    pub source: Option<String>,
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    pub source: Option<String>,
    pub path: String,
    pub new_name: String,
}

/// Body of both copy and move
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub source_id: Option<String>,
    pub source_path: String,
    pub dest_id: Option<String>,
    pub destination: String,
}
