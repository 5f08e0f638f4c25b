use serde::{Deserialize, Serialize};

/// Header carrying the shared-secret hash (or, when set directly by the
/// server side of a call, the raw secret).
pub const AUTH_HEADER: &str = "Auth";
/// Header every response carries alongside its HTTP status code.
pub const STATUS_HEADER: &str = "Status";
pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_FAILURE: &str = "failure";

/// Upload handshake/negotiation payload, exchanged on the initial `POST`
/// and echoed back (with `TaskID` and `SliceCount` filled in) before the
/// client starts PUTting slices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadInfo {
    #[serde(rename = "Path")]
    pub path: String,
    #[serde(rename = "TaskID")]
    pub task_id: String,
    #[serde(rename = "SliceCount")]
    pub slice_count: u64,
    #[serde(rename = "TotalSize")]
    pub total_size: u64,
    #[serde(rename = "SliceSize")]
    pub slice_size: u64,
    #[serde(rename = "Hash")]
    pub hash: String,
    #[serde(rename = "Overwrite")]
    pub overwrite: bool,
}

/// A single row of a `list` response: one JSON object per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Size")]
    pub size: i64,
    #[serde(rename = "ModTime")]
    pub mod_time: i64,
}
