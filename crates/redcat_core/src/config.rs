use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use reqwest::Url;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SITE: &str = "ar.wikipedia.org";
pub const DEFAULT_API_PATH: &str = "/w/api.php";
pub const DEFAULT_USER_AGENT: &str = "redcat/0.1";
pub const DEFAULT_THRESHOLD: usize = 10;
pub const DEFAULT_CONFIG_FILENAME: &str = "redcat.toml";
pub const DEFAULT_LOG_FILE: &str = "remove_red_categories.log";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CleanerConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub cleanup: CleanupSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub site: Option<String>,
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub category_aliases: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CleanupSection {
    pub threshold: Option<usize>,
    pub log_file: Option<PathBuf>,
}

/// Values supplied on the command line. They win over env and the config file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub dry_run: bool,
    pub threshold: Option<usize>,
    pub log_file: Option<PathBuf>,
    pub only_categories: Vec<String>,
}

/// Everything one run needs, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub site: String,
    pub api_url: String,
    pub user_agent: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub threshold: usize,
    pub dry_run: bool,
    pub category_aliases: Vec<String>,
    pub only_categories: Vec<String>,
    pub log_file: Option<PathBuf>,
}

impl RunConfig {
    /// Resolve from process env: flag > env > config file > default.
    pub fn resolve(config: &CleanerConfig, cli: &CliOverrides) -> Result<Self> {
        Self::resolve_with(config, cli, |key| env::var(key).ok())
    }

    fn resolve_with<F>(config: &CleanerConfig, cli: &CliOverrides, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let site = env_value("WIKI_SITE")
            .or_else(|| config.wiki.site.clone())
            .unwrap_or_else(|| DEFAULT_SITE.to_string());
        let api_url = match env_value("WIKI_API_URL").or_else(|| config.wiki.api_url.clone()) {
            Some(url) => url,
            None => derive_api_url(&site)?,
        };
        Url::parse(&api_url).with_context(|| format!("invalid wiki API URL: {api_url}"))?;

        let user_agent = env_value("WIKI_USER_AGENT")
            .or_else(|| config.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

        let threshold = match cli.threshold {
            Some(value) => value,
            None => match env_value("MAX_ARTICLES_CHECK") {
                Some(raw) => raw
                    .parse::<usize>()
                    .with_context(|| format!("MAX_ARTICLES_CHECK is not a number: {raw}"))?,
                None => config.cleanup.threshold.unwrap_or(DEFAULT_THRESHOLD),
            },
        };
        if threshold == 0 {
            bail!("threshold must be at least 1");
        }

        let log_file = cli
            .log_file
            .clone()
            .or_else(|| env_value("REDCAT_LOG_FILE").map(PathBuf::from))
            .or_else(|| config.cleanup.log_file.clone())
            .or_else(|| Some(PathBuf::from(DEFAULT_LOG_FILE)));

        let mut category_aliases = Vec::new();
        for alias in &config.wiki.category_aliases {
            let alias = alias.trim();
            if alias.is_empty() {
                bail!("category alias cannot be empty");
            }
            category_aliases.push(alias.to_string());
        }

        Ok(Self {
            site,
            api_url,
            user_agent,
            username: env_value("WIKI_USERNAME"),
            password: env_value("WIKI_PASSWORD"),
            threshold,
            dry_run: cli.dry_run,
            category_aliases,
            only_categories: cli.only_categories.clone(),
            log_file,
        })
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some((username.as_str(), password.as_str())),
            _ => None,
        }
    }

    /// Live runs must be able to log in; dry runs may stay anonymous.
    pub fn ensure_can_write(&self) -> Result<()> {
        if !self.dry_run && self.credentials().is_none() {
            bail!("WIKI_USERNAME and WIKI_PASSWORD are required unless --dry-run is given");
        }
        Ok(())
    }
}

/// Load and parse a CleanerConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<CleanerConfig> {
    if !config_path.exists() {
        return Ok(CleanerConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: CleanerConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Turn a bare host (`ar.wikipedia.org`) or a base URL into an `api.php` URL.
pub fn derive_api_url(site: &str) -> Result<String> {
    let trimmed = site.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        bail!("wiki site cannot be empty");
    }
    if trimmed.ends_with("api.php") {
        return Ok(trimmed.to_string());
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return Ok(format!("{trimmed}{DEFAULT_API_PATH}"));
    }
    Ok(format!("https://{trimmed}{DEFAULT_API_PATH}"))
}
