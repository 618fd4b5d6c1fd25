use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::ClientConfig;

pub(crate) const DEFAULT_URL: &str = "https://api.anaplan.com/2/0";
pub(crate) const DEFAULT_AUTH_URL: &str = "https://auth.anaplan.com";
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct RcConfig {
    url: Option<String>,
    auth_url: Option<String>,
    key: Option<String>,
    verify: Option<bool>,
}

pub(crate) fn load_config(
    url: Option<String>,
    key: Option<String>,
    verify: Option<bool>,
) -> Result<ClientConfig> {
    let mut url = url.or_else(|| std::env::var("ANAPLAN_URL").ok());
    let mut auth_url = std::env::var("ANAPLAN_AUTH_URL").ok();
    let mut key = key.or_else(|| std::env::var("ANAPLAN_KEY").ok());

    let rc_candidates = rc_candidates();
    let mut file_verify: Option<bool> = None;

    if url.is_none() || auth_url.is_none() || key.is_none() || verify.is_none() {
        for rc_path in &rc_candidates {
            if rc_path.exists() {
                let cfg = read_rc(rc_path).with_context(|| {
                    format!("failed to read configuration file {}", rc_path.display())
                })?;

                if url.is_none() {
                    url = cfg.url;
                }
                if auth_url.is_none() {
                    auth_url = cfg.auth_url;
                }
                if key.is_none() {
                    key = cfg.key;
                }
                file_verify = cfg.verify;
                break;
            }
        }
    }

    let key = match key {
        Some(v) => v,
        None => {
            if !rc_candidates.is_empty() {
                bail!(
                    "Missing configuration: key (set ANAPLAN_KEY or put `key:` in one of: {})",
                    rc_candidates
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
            bail!("Missing configuration: key (set ANAPLAN_KEY or create .anaplanrc)");
        }
    };

    Ok(ClientConfig {
        url: url.unwrap_or_else(|| DEFAULT_URL.to_string()),
        auth_url: auth_url.unwrap_or_else(|| DEFAULT_AUTH_URL.to_string()),
        key,
        verify: verify.or(file_verify).unwrap_or(true),
        timeout: DEFAULT_TIMEOUT,
    })
}

fn read_rc(path: &Path) -> Result<RcConfig> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_rc(&text))
}

fn parse_rc(text: &str) -> RcConfig {
    let mut cfg = RcConfig::default();

    // `key:` may be on one line with the value on the next.
    let mut pending_key: Option<&str> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(pk) = pending_key.take() {
            if !line.contains(':') || !is_known_field(line) {
                cfg.set(pk, strip_quotes(line));
                continue;
            }
        }

        if let Some((k, v)) = line.split_once(':') {
            let k = k.trim();
            let v = strip_quotes(v.trim());
            match k {
                "url" | "auth_url" | "key" => {
                    if v.is_empty() {
                        pending_key = Some(k);
                    } else {
                        cfg.set(k, v);
                    }
                }
                "verify" => {
                    if !v.is_empty() {
                        cfg.verify = Some(v != "0" && !v.eq_ignore_ascii_case("false"));
                    }
                }
                _ => {}
            }
        }
    }

    cfg
}

impl RcConfig {
    fn set(&mut self, field: &str, value: &str) {
        match field {
            "url" => self.url = Some(value.to_string()),
            "auth_url" => self.auth_url = Some(value.to_string()),
            "key" => self.key = Some(value.to_string()),
            _ => {}
        }
    }
}

// Values such as URLs and `user:password` keys contain colons themselves, so a
// continuation line is only treated as a new entry when it starts with a field name.
fn is_known_field(line: &str) -> bool {
    line.split_once(':')
        .map(|(k, _)| matches!(k.trim(), "url" | "auth_url" | "key" | "verify"))
        .unwrap_or(false)
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    if (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
        || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn rc_candidates() -> Vec<PathBuf> {
    // 1) ANAPLAN_RC (explicit)
    // 2) ./.anaplanrc
    // 3) ~/.anaplanrc
    if let Ok(p) = std::env::var("ANAPLAN_RC") {
        return vec![PathBuf::from(p)];
    }

    let mut v = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        v.push(cwd.join(".anaplanrc"));
    }
    if let Some(home) = dirs::home_dir() {
        v.push(home.join(".anaplanrc"));
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_inline_values() {
        let cfg = parse_rc(
            "# workspace admin\nurl: https://api.anaplan.com/2/0\nkey: 'alice@example.com:s3cret'\nverify: 0\n",
        );
        assert_eq!(cfg.url.as_deref(), Some("https://api.anaplan.com/2/0"));
        assert_eq!(cfg.key.as_deref(), Some("alice@example.com:s3cret"));
        assert_eq!(cfg.verify, Some(false));
        assert_eq!(cfg.auth_url, None);
    }

    #[test]
    fn value_may_follow_on_next_line() {
        let cfg = parse_rc("key:\n  \"AbCdEf==\"\nauth_url:\nhttps://auth.example.test\n");
        assert_eq!(cfg.key.as_deref(), Some("AbCdEf=="));
        assert_eq!(cfg.auth_url.as_deref(), Some("https://auth.example.test"));
    }

    #[test]
    fn dangling_field_does_not_swallow_next_entry() {
        let cfg = parse_rc("key:\nurl: https://h/2/0\n");
        assert_eq!(cfg.key, None);
        assert_eq!(cfg.url.as_deref(), Some("https://h/2/0"));
    }

    #[test]
    fn verify_defaults_to_unset() {
        let cfg = parse_rc("key: token\nverify:\n");
        assert_eq!(cfg.verify, None);
        assert_eq!(parse_rc("verify: false").verify, Some(false));
        assert_eq!(parse_rc("verify: 1").verify, Some(true));
    }
}
