use std::collections::BTreeMap;
use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use log::debug;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RunConfig;

pub const NS_MAIN: i32 = 0;
pub const NS_CATEGORY: i32 = 14;

const QUERY_LIMIT: &str = "500";

/// A member of a category as listed by the wiki.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageRef {
    pub title: String,
    pub namespace: i32,
}

/// Wikitext of a page together with the revision it was read from.
#[derive(Debug, Clone)]
pub struct RemotePage {
    pub title: String,
    pub namespace: i32,
    pub page_id: i64,
    pub revision_id: i64,
    pub timestamp: String,
    /// Server time of the fetch, sent back as `starttimestamp` on save.
    pub fetched_at: Option<String>,
    pub content: String,
}

pub trait WikiReadApi {
    fn get_wanted_categories(&mut self) -> Result<Vec<String>>;
    fn get_category_members(&mut self, category: &str) -> Result<Vec<PageRef>>;
    fn get_page_content(&mut self, title: &str) -> Result<RemotePage>;
    /// Every prefix the wiki accepts for the category namespace.
    fn get_category_namespace_names(&mut self) -> Result<Vec<String>>;
    fn request_count(&self) -> usize;
}

pub trait WikiWriteApi: WikiReadApi {
    fn login(&mut self, username: &str, password: &str) -> Result<()>;
    /// Save `content` over `page`. An edit conflict is an error, never retried here.
    fn edit_page(&mut self, page: &RemotePage, content: &str, summary: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_run_config(run: &RunConfig) -> Self {
        Self {
            api_url: run.api_url.clone(),
            user_agent: run.user_agent.clone(),
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("WIKI_RATE_LIMIT_READ", 300),
            rate_limit_write_ms: env_value_u64("WIKI_RATE_LIMIT_WRITE", 1_000),
            max_retries: env_value_usize("WIKI_HTTP_RETRIES", 2),
            max_write_retries: env_value_usize("WIKI_HTTP_WRITE_RETRIES", 0),
            retry_delay_ms: env_value_u64("WIKI_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Read,
    Write,
}

pub struct MediaWikiClient {
    client: Client,
    api_url: Url,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
    csrf_token: Option<String>,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        let api_url = Url::parse(&config.api_url)
            .with_context(|| format!("invalid wiki API URL: {}", config.api_url))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            api_url,
            config,
            last_request_at: None,
            request_count: 0,
            csrf_token: None,
        })
    }

    fn get(&mut self, params: &[(&str, String)]) -> Result<Value> {
        self.request_json(params, false, RequestKind::Read)
    }

    fn post(&mut self, params: &[(&str, String)], kind: RequestKind) -> Result<Value> {
        self.request_json(params, true, kind)
    }

    fn request_json(
        &mut self,
        params: &[(&str, String)],
        as_form: bool,
        kind: RequestKind,
    ) -> Result<Value> {
        let max_retries = match kind {
            RequestKind::Read => self.config.max_retries,
            RequestKind::Write => self.config.max_write_retries,
        };
        let mut pairs = Vec::with_capacity(params.len() + 2);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        for (key, value) in params {
            pairs.push(((*key).to_string(), value.clone()));
        }

        for attempt in 0..=max_retries {
            self.apply_rate_limit(kind);
            let request: RequestBuilder = if as_form {
                self.client.post(self.api_url.clone()).form(&pairs)
            } else {
                self.client.get(self.api_url.clone()).query(&pairs)
            };
            let response = request
                .header("User-Agent", self.config.user_agent.clone())
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt, kind);
                            continue;
                        }
                        bail!("MediaWiki API request failed with HTTP {status}");
                    }

                    let payload: Value = response
                        .json()
                        .context("failed to decode MediaWiki API JSON response")?;
                    check_api_error(&payload)?;
                    return Ok(payload);
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt, kind);
                        continue;
                    }
                    return Err(error).context("failed to call MediaWiki API");
                }
            }
        }

        bail!("MediaWiki API request exhausted retry budget")
    }

    fn apply_rate_limit(&mut self, kind: RequestKind) {
        let delay = match kind {
            RequestKind::Read => Duration::from_millis(self.config.rate_limit_read_ms),
            RequestKind::Write => Duration::from_millis(self.config.rate_limit_write_ms),
        };
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize, kind: RequestKind) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        let multiplier = if kind == RequestKind::Write { 2u64 } else { 1u64 };
        let delay = base.saturating_mul(multiplier).saturating_add(jitter);
        debug!("retrying MediaWiki request in {delay}ms (attempt {})", attempt + 1);
        sleep(Duration::from_millis(delay));
    }

    fn ensure_csrf_token(&mut self) -> Result<String> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let response = self.get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
        ])?;
        let parsed: TokenQueryResponse =
            serde_json::from_value(response).context("failed to decode csrf token response")?;
        let token = parsed
            .query
            .tokens
            .and_then(|tokens| tokens.csrftoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki csrf token"))?;
        self.csrf_token = Some(token.clone());
        Ok(token)
    }
}

impl WikiReadApi for MediaWikiClient {
    fn get_wanted_categories(&mut self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut offset: Option<u64> = None;

        loop {
            let mut params = vec![
                ("action", "query".to_string()),
                ("list", "querypage".to_string()),
                ("qppage", "Wantedcategories".to_string()),
                ("qplimit", QUERY_LIMIT.to_string()),
            ];
            if let Some(offset) = offset {
                params.push(("qpoffset", offset.to_string()));
            }

            let response = self.get(&params)?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .context("failed to decode querypage API response")?;
            if let Some(querypage) = parsed.query.querypage {
                for item in querypage.results {
                    names.push(strip_namespace_prefix(&item.title).to_string());
                }
            }

            offset = parsed.continuation.and_then(|cont| cont.qpoffset);
            if offset.is_none() {
                break;
            }
        }

        Ok(names)
    }

    fn get_category_members(&mut self, category: &str) -> Result<Vec<PageRef>> {
        let mut members = Vec::new();
        let mut continue_token: Option<String> = None;
        let category_title = format!("Category:{category}");

        loop {
            let mut params = vec![
                ("action", "query".to_string()),
                ("list", "categorymembers".to_string()),
                ("cmtitle", category_title.clone()),
                ("cmprop", "ids|title|type".to_string()),
                ("cmlimit", QUERY_LIMIT.to_string()),
            ];
            if let Some(token) = &continue_token {
                params.push(("cmcontinue", token.clone()));
            }

            let response = self.get(&params)?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .context("failed to decode categorymembers API response")?;
            for item in parsed.query.categorymembers {
                members.push(PageRef {
                    title: item.title,
                    namespace: item.ns,
                });
            }

            continue_token = parsed.continuation.and_then(|cont| cont.cmcontinue);
            if continue_token.is_none() {
                break;
            }
        }

        Ok(members)
    }

    fn get_page_content(&mut self, title: &str) -> Result<RemotePage> {
        let response = self.get(&[
            ("action", "query".to_string()),
            ("titles", title.to_string()),
            ("prop", "revisions".to_string()),
            ("rvprop", "content|timestamp|ids".to_string()),
            ("rvslots", "main".to_string()),
            ("curtimestamp", "1".to_string()),
        ])?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .context("failed to decode page content API response")?;

        let page = parsed
            .query
            .pages
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("page not returned by API: {title}"))?;
        if page.missing.unwrap_or(false) {
            bail!("page does not exist: {title}");
        }
        let page_id = page
            .pageid
            .ok_or_else(|| anyhow::anyhow!("page id missing for {title}"))?;
        let revision = page
            .revisions
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("no revision returned for {title}"))?;
        let content = revision
            .slots
            .and_then(|slots| slots.main)
            .map(|slot| slot.content)
            .ok_or_else(|| anyhow::anyhow!("main slot content missing for {title}"))?;

        Ok(RemotePage {
            title: page.title,
            namespace: page.ns,
            page_id,
            revision_id: revision.revid,
            timestamp: revision.timestamp,
            fetched_at: parsed.curtimestamp,
            content,
        })
    }

    fn get_category_namespace_names(&mut self) -> Result<Vec<String>> {
        let response = self.get(&[
            ("action", "query".to_string()),
            ("meta", "siteinfo".to_string()),
            ("siprop", "namespaces|namespacealiases".to_string()),
        ])?;
        let parsed: SiteInfoResponse =
            serde_json::from_value(response).context("failed to decode siteinfo response")?;

        let mut names = Vec::new();
        let mut push = |name: &str| {
            let name = name.trim();
            if !name.is_empty() && !names.iter().any(|known: &String| known == name) {
                names.push(name.to_string());
            }
        };
        for namespace in parsed.query.namespaces.values() {
            if namespace.id != NS_CATEGORY {
                continue;
            }
            push(&namespace.name);
            if let Some(canonical) = &namespace.canonical {
                push(canonical);
            }
        }
        for alias in &parsed.query.namespacealiases {
            if alias.id == NS_CATEGORY {
                push(&alias.alias);
            }
        }
        Ok(names)
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

impl WikiWriteApi for MediaWikiClient {
    fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let token_response = self.get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
            ("type", "login".to_string()),
        ])?;
        let token_payload: TokenQueryResponse = serde_json::from_value(token_response)
            .context("failed to decode login token response")?;
        let login_token = token_payload
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki login token"))?;

        let login_response = self.post(
            &[
                ("action", "login".to_string()),
                ("lgname", username.to_string()),
                ("lgpassword", password.to_string()),
                ("lgtoken", login_token),
            ],
            RequestKind::Write,
        )?;
        let login_payload: LoginResponse =
            serde_json::from_value(login_response).context("failed to decode login response")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => {
                self.csrf_token = None;
                Ok(())
            }
            other => bail!(
                "MediaWiki login failed: {}",
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string())
            ),
        }
    }

    fn edit_page(&mut self, page: &RemotePage, content: &str, summary: &str) -> Result<()> {
        let token = self.ensure_csrf_token()?;
        let params = edit_params(page, content, summary, token);
        let response = self.post(&params, RequestKind::Write)?;
        let edit_payload: EditResponse =
            serde_json::from_value(response).context("failed to decode edit response")?;
        let edit = edit_payload
            .edit
            .ok_or_else(|| anyhow::anyhow!("missing edit payload in API response"))?;
        if edit.result.as_deref() != Some("Success") {
            bail!(
                "MediaWiki edit failed for {}: {}",
                page.title,
                edit.result.unwrap_or_else(|| "unknown".to_string())
            );
        }
        Ok(())
    }
}

/// Parameters for `action=edit`. `text` is always sent, even when empty,
/// so a page that held nothing but the link can still be saved.
fn edit_params(
    page: &RemotePage,
    content: &str,
    summary: &str,
    token: String,
) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("action", "edit".to_string()),
        ("title", page.title.clone()),
        ("text", content.to_string()),
        ("summary", summary.to_string()),
        ("minor", "1".to_string()),
        ("bot", "1".to_string()),
        ("nocreate", "1".to_string()),
        ("basetimestamp", page.timestamp.clone()),
    ];
    if let Some(fetched_at) = &page.fetched_at {
        params.push(("starttimestamp", fetched_at.clone()));
    }
    params.push(("token", token));
    params
}

/// `Category:Foo` -> `Foo`; titles from querypage always carry the prefix.
pub fn strip_namespace_prefix(title: &str) -> &str {
    match title.split_once(':') {
        Some((_, rest)) => rest,
        None => title,
    }
}

fn check_api_error(payload: &Value) -> Result<()> {
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        bail!("MediaWiki API error [{code}]: {info}");
    }
    Ok(())
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
    #[serde(default, rename = "continue")]
    continuation: Option<ContinuationPayload>,
    curtimestamp: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    querypage: Option<QueryPagePayload>,
    #[serde(default)]
    categorymembers: Vec<CategoryMemberItem>,
    #[serde(default)]
    pages: Vec<PageQueryItem>,
}

#[derive(Debug, Deserialize, Default)]
struct ContinuationPayload {
    qpoffset: Option<u64>,
    cmcontinue: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPagePayload {
    #[serde(default)]
    results: Vec<QueryPageItem>,
}

#[derive(Debug, Deserialize)]
struct QueryPageItem {
    title: String,
}

#[derive(Debug, Deserialize)]
struct CategoryMemberItem {
    ns: i32,
    title: String,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    pageid: Option<i64>,
    ns: i32,
    title: String,
    missing: Option<bool>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    revid: i64,
    timestamp: String,
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct SiteInfoResponse {
    #[serde(default)]
    query: SiteInfoPayload,
}

#[derive(Debug, Deserialize, Default)]
struct SiteInfoPayload {
    #[serde(default)]
    namespaces: BTreeMap<String, NamespaceItem>,
    #[serde(default)]
    namespacealiases: Vec<NamespaceAliasItem>,
}

#[derive(Debug, Deserialize)]
struct NamespaceItem {
    id: i32,
    #[serde(default)]
    name: String,
    canonical: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamespaceAliasItem {
    id: i32,
    alias: String,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
}
