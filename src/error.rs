use anyhow::anyhow;
use reqwest::StatusCode;

#[derive(Debug, serde::Deserialize)]
pub(crate) struct ApiStatus {
    #[serde(default)]
    pub(crate) code: Option<u16>,
    #[serde(default)]
    pub(crate) message: Option<String>,
}

// The Integration API nests the status; the authentication service answers
// {"status":"FAILURE_...","statusMessage":...} instead.
#[derive(Debug, serde::Deserialize)]
#[serde(untagged)]
pub(crate) enum StatusField {
    Detailed(ApiStatus),
    Code(String),
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct ApiErrorResponse {
    #[serde(default)]
    pub(crate) status: Option<StatusField>,
    #[serde(default, rename = "statusMessage")]
    pub(crate) status_message: Option<String>,
    #[serde(default)]
    pub(crate) message: Option<String>,
}

impl ApiErrorResponse {
    fn detailed(&self) -> Option<&ApiStatus> {
        match &self.status {
            Some(StatusField::Detailed(s)) => Some(s),
            _ => None,
        }
    }

    fn message(&self) -> &str {
        self.detailed()
            .and_then(|s| s.message.as_deref())
            .or(self.status_message.as_deref())
            .or(self.message.as_deref())
            .or(match &self.status {
                Some(StatusField::Code(code)) => Some(code.as_str()),
                _ => None,
            })
            .unwrap_or("")
    }
}

pub(crate) fn format_api_error(
    status: StatusCode,
    url: &str,
    e: &ApiErrorResponse,
) -> anyhow::Error {
    let message = e.message();
    let status_in_body = e
        .detailed()
        .and_then(|s| s.code)
        .unwrap_or(status.as_u16());

    if status == StatusCode::UNAUTHORIZED {
        return anyhow!(
            "Anaplan authentication failed (HTTP {}).\n- Auth tokens expire after 35 minutes; request a new one\n- If using `user:password` in .anaplanrc, check the credentials\n\nServer message: {}\nrequest: {}",
            status_in_body,
            message,
            url
        );
    }

    if status == StatusCode::FORBIDDEN {
        return anyhow!(
            "Anaplan denied access (HTTP {}).\n- The user needs workspace administrator rights or model access for this resource\n\nServer message: {}\nrequest: {}",
            status_in_body,
            message,
            url
        );
    }

    if status == StatusCode::NOT_FOUND {
        return anyhow!(
            "Anaplan resource not found (HTTP 404).\n- Check the workspace, model and object IDs\n- Recommended .anaplanrc url: https://api.anaplan.com/2/0\n\nServer message: {}\nrequest: {}",
            message,
            url
        );
    }

    anyhow!(
        "API request failed: HTTP {} for url ({})\n{}",
        status_in_body,
        url,
        message
    )
}

/// Builds the error for a non-2xx reply, using the structured body when it parses.
pub(crate) fn api_failure(status: StatusCode, url: &str, body: &str) -> anyhow::Error {
    match serde_json::from_str::<ApiErrorResponse>(body) {
        Ok(parsed) => format_api_error(status, url, &parsed),
        Err(_) => anyhow!("API request failed: HTTP {} for url ({})\n{}", status, url, body),
    }
}
