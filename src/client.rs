use anyhow::{Context, Result, anyhow, bail};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::config::load_config;
use crate::error::api_failure;
use crate::paging::{CancelFlag, PageOptions, PayloadKey, aggregate};
use crate::resources::{
    Action, Chunk, Export, Import, Model, ModelList, Process, ServerFile, Task, TaskKind, Workspace,
};
use crate::util::{default_file_name, model_path, split_key_basic, urljoin};

#[derive(Clone)]
pub struct ClientConfig {
    /// Base Integration API URL, typically `https://api.anaplan.com/2/0`.
    pub url: String,
    /// Authentication service URL, typically `https://auth.anaplan.com`.
    pub auth_url: String,
    /// Credentials.
    ///
    /// Supported formats:
    /// - Basic: `<USER>:<PASSWORD>`, exchanged for a token when the client is built
    /// - Token-only: `<AUTH_TOKEN>` (no colon), sent as is
    pub key: String,
    /// Whether to verify TLS certificates.
    pub verify: bool,
    /// Request timeout, including the token exchange done while building the client.
    pub timeout: Duration,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url)
            .field("auth_url", &self.auth_url)
            .field("key", &"<redacted>")
            .field("verify", &self.verify)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Clone)]
pub struct Client {
    url: String,
    token: String,

    timeout: Duration,
    page_options: PageOptions,
    progress: bool,
    cancel: Option<CancelFlag>,

    http: HttpClient,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("page_options", &self.page_options)
            .field("progress", &self.progress)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthReply {
    status: String,
    #[serde(default)]
    status_message: Option<String>,
    #[serde(default)]
    token_info: Option<TokenInfo>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenInfo {
    token_value: String,
}

impl Client {
    /// Creates a client using environment variables and/or `.anaplanrc`.
    ///
    /// This is equivalent to `Client::new(None, None, None)`.
    pub fn from_env() -> Result<Self> {
        Self::new(None, None, None)
    }

    /// Creates a client using (in order of precedence):
    /// - explicit `url`/`key` arguments
    /// - environment variables `ANAPLAN_URL` / `ANAPLAN_AUTH_URL` / `ANAPLAN_KEY`
    /// - config file from `ANAPLAN_RC` or `.anaplanrc`
    pub fn new(url: Option<String>, key: Option<String>, verify: Option<bool>) -> Result<Self> {
        let cfg = load_config(url, key, verify)?;
        Self::from_config(cfg)
    }

    /// Creates a client from a fully resolved configuration.
    ///
    /// A `user:password` key is exchanged for an auth token right away.
    pub fn from_config(cfg: ClientConfig) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("anaplan-rs/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("anaplan-rs")),
        );

        let mut builder = HttpClient::builder()
            .default_headers(default_headers)
            .timeout(cfg.timeout);

        if !cfg.verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder.build().context("failed to build HTTP client")?;

        let token = match split_key_basic(&cfg.key) {
            Some((user, password)) => authenticate(&http, &cfg.auth_url, &user, &password)?,
            None => cfg.key.trim().to_string(),
        };
        if token.is_empty() {
            bail!("Missing configuration: key is empty");
        }

        Ok(Self {
            url: cfg.url,
            token,
            timeout: cfg.timeout,
            page_options: PageOptions::default(),
            progress: true,
            cancel: None,
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.url
    }

    /// Overrides the per-request timeout for calls made after construction.
    /// The token exchange uses [`ClientConfig::timeout`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the `limit` used for every page request (default 1000).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_options.page_size = page_size;
        self
    }

    /// Caps the number of pages fetched per listing. `None` reads everything.
    pub fn with_max_pages(mut self, max_pages: Option<usize>) -> Self {
        self.page_options.max_pages = max_pages;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Listings check this flag between pages and fail with
    /// [`PagingError::Cancelled`](crate::PagingError::Cancelled) once it is set.
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Reads every page of a collection endpoint.
    ///
    /// `path` is relative to the base URL, `payload_key` names the array
    /// holding the records. `params` are sent with every page request.
    ///
    /// Paging failures can be inspected with
    /// `err.downcast_ref::<PagingError>()`.
    pub fn list_all<T: DeserializeOwned>(
        &self,
        path: &str,
        payload_key: &str,
        params: &[(String, String)],
    ) -> Result<Vec<T>> {
        let url = urljoin(&self.url, path);
        let items = aggregate(
            |query| self.get_json(&url, query),
            params,
            PayloadKey::Named(payload_key),
            self.page_options,
            self.cancel.as_ref(),
        )
        .with_context(|| format!("failed to list {} from {}", payload_key, url))?;

        info!(resource = payload_key, count = items.len(), "listing complete");
        Ok(items)
    }

    pub fn workspaces(&self) -> Result<Vec<Workspace>> {
        self.list_all("/workspaces", "workspaces", &[])
    }

    /// Lists models in one workspace, or every model the user can see.
    pub fn models(&self, workspace_id: Option<&str>) -> Result<Vec<Model>> {
        let path = match workspace_id {
            Some(ws) => format!("/workspaces/{}/models", ws),
            None => "/models".to_string(),
        };
        self.list_all(&path, "models", &[])
    }

    pub fn lists(&self, workspace_id: &str, model_id: &str) -> Result<Vec<ModelList>> {
        self.list_model_objects(workspace_id, model_id, "lists")
    }

    pub fn files(&self, workspace_id: &str, model_id: &str) -> Result<Vec<ServerFile>> {
        self.list_model_objects(workspace_id, model_id, "files")
    }

    pub fn imports(&self, workspace_id: &str, model_id: &str) -> Result<Vec<Import>> {
        self.list_model_objects(workspace_id, model_id, "imports")
    }

    pub fn exports(&self, workspace_id: &str, model_id: &str) -> Result<Vec<Export>> {
        self.list_model_objects(workspace_id, model_id, "exports")
    }

    pub fn actions(&self, workspace_id: &str, model_id: &str) -> Result<Vec<Action>> {
        self.list_model_objects(workspace_id, model_id, "actions")
    }

    pub fn processes(&self, workspace_id: &str, model_id: &str) -> Result<Vec<Process>> {
        self.list_model_objects(workspace_id, model_id, "processes")
    }

    /// Lists the runs of one import, export, action or process.
    pub fn tasks(
        &self,
        workspace_id: &str,
        model_id: &str,
        kind: TaskKind,
        object_id: &str,
    ) -> Result<Vec<Task>> {
        let path = format!(
            "{}/{}/{}/tasks",
            model_path(workspace_id, model_id),
            kind.path_segment(),
            object_id
        );
        self.list_all(&path, "tasks", &[])
    }

    pub fn chunks(&self, workspace_id: &str, model_id: &str, file_id: &str) -> Result<Vec<Chunk>> {
        let path = format!("{}/files/{}/chunks", model_path(workspace_id, model_id), file_id);
        self.list_all(&path, "chunks", &[])
    }

    /// Downloads a server file chunk by chunk into `target`.
    ///
    /// An empty `target` writes into the current directory, named after the
    /// server file.
    pub fn download_file(
        &self,
        workspace_id: &str,
        model_id: &str,
        file_id: &str,
        target: &Path,
    ) -> Result<PathBuf> {
        let target = if target.as_os_str().is_empty() {
            let name = self
                .files(workspace_id, model_id)?
                .into_iter()
                .find(|f| f.id == file_id)
                .map(|f| f.name);
            PathBuf::from(default_file_name(name.as_deref(), file_id))
        } else {
            target.to_path_buf()
        };

        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create directory {}", dir.display()))?;

        let chunks = self.chunks(workspace_id, model_id, file_id)?;
        debug!(file_id, chunks = chunks.len(), "downloading file");

        let pb = if self.progress {
            let pb = ProgressBar::new(chunks.len() as u64);
            pb.set_style(
                ProgressStyle::with_template(
                    "{spinner:.green} chunk {pos}/{len} {wide_bar} {elapsed_precise}",
                )
                .context("invalid progress bar template")?
                .progress_chars("=>-"),
            );
            Some(pb)
        } else {
            None
        };

        // Chunks land in a sibling temp file; `target` is only replaced once all succeeded.
        let mut out = NamedTempFile::new_in(&dir)
            .with_context(|| format!("failed to create temporary file in {}", dir.display()))?;

        let chunks_path = format!("{}/files/{}/chunks", model_path(workspace_id, model_id), file_id);
        let mut written: u64 = 0;
        for chunk in &chunks {
            let url = urljoin(&self.url, &format!("{}/{}", chunks_path, chunk.id));
            let resp = self
                .authorize(self.http.get(&url))
                .header(ACCEPT, "application/octet-stream")
                .send()
                .with_context(|| format!("could not connect to {}", url))?;

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().unwrap_or_default();
                return Err(api_failure(status, &url, &text));
            }

            let bytes = resp
                .bytes()
                .with_context(|| format!("failed to read chunk {} of file {}", chunk.id, file_id))?;
            out.write_all(&bytes)
                .with_context(|| format!("failed to write {}", target.display()))?;
            written += bytes.len() as u64;

            if let Some(pb) = &pb {
                pb.inc(1);
            }
        }

        out.flush()?;
        out.persist(&target)
            .map_err(|e| e.error)
            .with_context(|| format!("failed to write {}", target.display()))?;
        if let Some(pb) = &pb {
            pb.finish_and_clear();
        }

        info!(file_id, bytes = written, path = %target.display(), "download complete");
        Ok(target)
    }

    fn list_model_objects<T: DeserializeOwned>(
        &self,
        workspace_id: &str,
        model_id: &str,
        kind: &str,
    ) -> Result<Vec<T>> {
        let path = format!("{}/{}", model_path(workspace_id, model_id), kind);
        self.list_all(&path, kind, &[])
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        req.header(AUTHORIZATION, format!("AnaplanAuthToken {}", self.token))
            .timeout(self.timeout)
    }

    fn get_json(&self, url: &str, query: &[(String, String)]) -> Result<Value> {
        let resp = self
            .authorize(self.http.get(url))
            .header(ACCEPT, "application/json")
            .query(query)
            .send()
            .with_context(|| format!("could not connect to {}", url))?;
        read_json(resp, url)
    }
}

fn authenticate(http: &HttpClient, auth_url: &str, user: &str, password: &str) -> Result<String> {
    let url = urljoin(auth_url, "/token/authenticate");
    debug!(url = %url, user, "requesting auth token");

    let resp = http
        .post(&url)
        .basic_auth(user, Some(password))
        .send()
        .with_context(|| format!("could not connect to {}", url))?;
    let reply: AuthReply = read_json(resp, &url)?;

    if reply.status != "SUCCESS" {
        bail!(
            "authentication failed: {} {}",
            reply.status,
            reply.status_message.as_deref().unwrap_or("")
        );
    }

    reply
        .token_info
        .map(|t| t.token_value)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| anyhow!("authentication reply carried no token (url={})", url))
}

fn read_json<T: DeserializeOwned>(resp: Response, url: &str) -> Result<T> {
    let status = resp.status();
    let text = resp.text().unwrap_or_default();
    if !status.is_success() {
        return Err(api_failure(status, url, &text));
    }

    serde_json::from_str::<T>(&text)
        .with_context(|| format!("failed to parse API JSON (url={}, status={})", url, status))
}
