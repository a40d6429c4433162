//! # Session: the identity a job runs as.
//!
//! A [`Session`] is resolved once per online job by [`checkin`]:
//!
//! ```text
//! GET identity page ──► redirected? ──yes──► TaskError::Authentication
//!        │
//!        no ──► parse <input id="user" data-name=.. value=..> and /people/<symbol>
//!           ──► read secret cookies for the site domain
//!           ──► GET user-info JSON (uid, anti-CSRF secret)
//!           ──► Session
//! ```
//!
//! The same shape doubles as the stored account snapshot; delegated (other
//! user) accounts carry no secrets and `is_delegated = true`.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, SubsecRound, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::config::Endpoints;
use crate::core::Fetcher;
use crate::error::TaskError;
use crate::net::{CookieJar, FetchRequest};

static USER_INPUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<input\b[^>]*\bid\s*=\s*"user"[^>]*>"#).expect("valid regex"));
static ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([\w-]+)\s*=\s*"([^"]*)""#).expect("valid regex"));
static PEOPLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"/people/([^/"'?#\s]+)"#).expect("valid regex"));

/// Current time at the millisecond precision the account record keeps.
fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Authenticated identity plus the secrets needed for API calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: u64,
    pub username: String,
    pub user_symbol: String,
    #[serde(rename = "cookies", default, deserialize_with = "null_as_empty")]
    pub secrets: BTreeMap<String, String>,
    #[serde(default)]
    pub user_info: Value,
    #[serde(rename = "updated", with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "isOther", default)]
    pub is_delegated: bool,
}

fn null_as_empty<'de, D>(de: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<BTreeMap<String, String>>::deserialize(de)?.unwrap_or_default())
}

impl Session {
    /// Account snapshot for another user, built from their public profile.
    pub fn delegated(user_info: Value) -> Result<Self, TaskError> {
        Ok(Self {
            user_id: user_id_of(&user_info)?,
            username: str_field(&user_info, "name"),
            user_symbol: str_field(&user_info, "uid"),
            secrets: BTreeMap::new(),
            user_info,
            created_at: now_millis(),
            is_delegated: true,
        })
    }

    /// Looks up a secret, empty if absent.
    pub fn secret(&self, name: &str) -> &str {
        self.secrets.get(name).map_or("", String::as_str)
    }
}

fn str_field(info: &Value, field: &str) -> String {
    info.get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Extracts the numeric id of a user-info payload (`"id"` as number or string).
pub fn user_id_of(info: &Value) -> Result<u64, TaskError> {
    match info.get("id") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| TaskError::malformed("user info without a numeric id"))
}

/// Fetches the public profile of `user` (id or symbol).
pub async fn fetch_user_info(
    fetcher: &Fetcher,
    endpoints: &Endpoints,
    secrets: &BTreeMap<String, String>,
    user: &str,
) -> Result<Value, TaskError> {
    let csrf = secrets
        .get(&endpoints.csrf_secret)
        .map_or("", String::as_str);
    let request = FetchRequest::get(endpoints.user_info(user, csrf))
        .with_header("X-Override-Referer", endpoints.user_info_referer.as_str());
    fetcher.fetch(request).await?.error_for_status()?.json()
}

/// Identity fields scraped from the identity page.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Identity {
    uid: String,
    username: String,
    symbol: String,
}

fn parse_identity(html: &str) -> Result<Identity, TaskError> {
    let tag = USER_INPUT_RE
        .find(html)
        .ok_or_else(|| TaskError::malformed("identity page lacks the user field"))?
        .as_str();
    let mut uid = None;
    let mut username = None;
    for cap in ATTR_RE.captures_iter(tag) {
        match &cap[1] {
            "value" => uid = Some(cap[2].to_string()),
            "data-name" => username = Some(cap[2].to_string()),
            _ => {}
        }
    }
    let symbol = PEOPLE_RE
        .captures(html)
        .map(|c| c[1].to_string())
        .ok_or_else(|| TaskError::malformed("identity page lacks a homepage link"))?;

    Ok(Identity {
        uid: uid.ok_or_else(|| TaskError::malformed("user field has no value"))?,
        username: username.unwrap_or_default(),
        symbol,
    })
}

/// Resolves the acting user's [`Session`].
///
/// A redirect from the identity page means the browser is not logged in; the
/// error carries the URL the site redirected to.
pub async fn checkin(
    fetcher: &Fetcher,
    cookies: &dyn CookieJar,
    endpoints: &Endpoints,
) -> Result<Session, TaskError> {
    let response = fetcher.get(endpoints.identity_url.as_str()).await?;
    if response.redirected {
        return Err(TaskError::Authentication {
            reason: format!("redirected to {}", response.url),
        });
    }
    let response = response.error_for_status()?;
    let identity = parse_identity(&response.body)?;

    let mut secrets: BTreeMap<String, String> = endpoints
        .secret_names
        .iter()
        .map(|n| (n.clone(), String::new()))
        .collect();
    for cookie in cookies.cookies(&endpoints.cookie_domain).await? {
        if let Some(slot) = secrets.get_mut(&cookie.name) {
            *slot = cookie.value;
        }
    }

    let user_info = fetch_user_info(fetcher, endpoints, &secrets, &identity.uid).await?;
    let user_id = identity
        .uid
        .parse()
        .map_err(|_| TaskError::malformed(format!("non-numeric user id {:?}", identity.uid)))?;

    Ok(Session {
        user_id,
        username: identity.username,
        user_symbol: identity.symbol,
        secrets,
        user_info,
        created_at: now_millis(),
        is_delegated: false,
    })
}
