//! Records returned by the list endpoints.
//!
//! Only the commonly used fields are modelled; anything else the server sends
//! is ignored. Use [`Client::list_all`](crate::Client::list_all) with
//! `serde_json::Value` to get the raw records.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub active: bool,
    pub size_allowance: Option<u64>,
    pub current_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub id: String,
    pub name: String,
    pub active_state: Option<String>,
    pub current_workspace_id: Option<String>,
    pub current_workspace_name: Option<String>,
    pub model_url: Option<String>,
}

/// A list (dimension) defined in a model.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelList {
    pub id: String,
    pub name: String,
}

/// A file stored on the server, used as an import source or export target.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFile {
    pub id: String,
    pub name: String,
    pub chunk_count: Option<u32>,
    pub delimiter: Option<String>,
    pub encoding: Option<String>,
    pub format: Option<String>,
    pub header_row: Option<u32>,
    pub first_data_row: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Import {
    pub id: String,
    pub name: String,
    pub import_type: Option<String>,
    pub import_data_source_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Export {
    pub id: String,
    pub name: String,
    pub export_type: Option<String>,
    pub export_format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: String,
    pub name: String,
    pub action_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Process {
    pub id: String,
    pub name: String,
}

/// One run of an import, export, action or process.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: String,
    pub task_state: Option<String>,
    pub creation_time: Option<i64>,
}

/// One piece of a server file. Chunks are downloaded in list order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub name: String,
}

/// The kind of runnable object whose tasks are listed by [`Client::tasks`](crate::Client::tasks).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Import,
    Export,
    Action,
    Process,
}

impl TaskKind {
    pub(crate) fn path_segment(self) -> &'static str {
        match self {
            TaskKind::Import => "imports",
            TaskKind::Export => "exports",
            TaskKind::Action => "actions",
            TaskKind::Process => "processes",
        }
    }
}
