use std::{fs, path::Path};

use anyhow::Context;
use chrono::DateTime;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Prefix of the cookie that carries the portal session.
pub const SESSION_COOKIE_PREFIX: &str = "MOJ";

/// One entry of the cookie persistence file, as written by the login window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    /// Seconds since the epoch, absent for session cookies.
    #[serde(default)]
    pub expiry: Option<i64>,
}

impl StoredCookie {
    /// `Set-Cookie` style representation accepted by `reqwest::cookie::Jar`.
    pub fn to_set_cookie(&self) -> String {
        let mut header = format!(
            "{}={}; Domain={}; Path={}",
            self.name, self.value, self.domain, self.path
        );
        if self.secure {
            header.push_str("; Secure");
        }
        if self.http_only {
            header.push_str("; HttpOnly");
        }
        if let Some(expires) = self.expiry.and_then(|secs| DateTime::from_timestamp(secs, 0)) {
            header.push_str(&format!(
                "; Expires={}",
                expires.format("%a, %d %b %Y %H:%M:%S GMT")
            ));
        }
        header
    }

    /// URL the cookie is registered against when seeding the jar.
    pub fn origin(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!(
            "{scheme}://{}{}",
            self.domain.trim_start_matches('.'),
            self.path
        )
    }

    pub fn is_session_cookie(&self) -> bool {
        self.name.starts_with(SESSION_COOKIE_PREFIX)
    }
}

/// Reads the cookie file. A missing or empty file is an empty jar.
pub fn load_cookie_file(path: &Path) -> anyhow::Result<Vec<StoredCookie>> {
    if !path.exists() {
        debug!("cookie file {} does not exist", path.display());
        return Ok(vec![]);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read cookie file {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(vec![]);
    }
    let cookies = serde_json::from_str(&contents)
        .with_context(|| format!("cookie file {} is not a JSON cookie array", path.display()))?;
    Ok(cookies)
}

pub fn save_cookie_file(path: &Path, cookies: &[StoredCookie]) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(cookies)?;
    fs::write(path, json).with_context(|| format!("failed to write cookie file {}", path.display()))
}

/// Truncates the cookie file to an empty array. Used on logout.
pub fn clear_cookie_file(path: &Path) -> anyhow::Result<()> {
    save_cookie_file(path, &[])
}

/// Value of the session cookie, if the jar holds one.
pub fn find_session_token(cookies: &[StoredCookie]) -> Option<String> {
    let token = cookies
        .iter()
        .find(|cookie| cookie.is_session_cookie())
        .map(|cookie| cookie.value.clone());
    if token.is_none() && !cookies.is_empty() {
        warn!(
            "{} cookies loaded but none starts with {SESSION_COOKIE_PREFIX}",
            cookies.len()
        );
    }
    token
}
