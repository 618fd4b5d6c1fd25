/// Splits a `user:password` key. Token-only keys (no colon, or an empty half) give `None`.
pub(crate) fn split_key_basic(key: &str) -> Option<(String, String)> {
    let (user, password) = key.split_once(':')?;
    let (user, password) = (user.trim(), password.trim());
    (!user.is_empty() && !password.is_empty()).then(|| (user.to_owned(), password.to_owned()))
}

/// Resolves an API path against a base URL; absolute URLs are returned as is.
pub(crate) fn urljoin(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_owned();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

pub(crate) fn model_path(workspace_id: &str, model_id: &str) -> String {
    format!("/workspaces/{}/models/{}", workspace_id, model_id)
}

/// Picks a local file name for a download when the caller passes an empty path.
pub(crate) fn default_file_name(file_name: Option<&str>, file_id: &str) -> String {
    file_name
        .map(|n| n.rsplit(['/', '\\']).next().unwrap_or(n).trim())
        .filter(|n| !n.is_empty())
        .unwrap_or(file_id)
        .to_string()
}
