use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use similar::TextDiff;

use crate::config::RunConfig;
use crate::matcher::{CANONICAL_CATEGORY_PREFIX, CategoryMatcher};
use crate::mediawiki::{
    MediaWikiClient, MediaWikiClientConfig, NS_MAIN, RemotePage, WikiReadApi, WikiWriteApi,
};

const RULE: &str = "============================================================";

/// Edit summary naming the removed category.
pub fn edit_summary(category: &str) -> String {
    format!("Removing non-existent category: [[Category:{category}]]")
}

/// Cooperative stop flag, checked between members and between categories.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryStatus {
    /// Every member was visited.
    Done,
    /// The miss counter reached the threshold; the category is assumed template-driven.
    TemplateSkip,
    /// The member list could not be fetched.
    Error,
    /// The run was stopped while this category was in progress.
    Interrupted,
}

impl CategoryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::TemplateSkip => "template_skip",
            Self::Error => "error",
            Self::Interrupted => "interrupted",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryReport {
    pub name: String,
    pub status: CategoryStatus,
    pub edits: usize,
    pub checked: usize,
    pub misses: usize,
    pub skipped_namespace: usize,
    pub page_errors: usize,
    pub save_failures: usize,
    pub detail: Option<String>,
}

impl CategoryReport {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CategoryStatus::Done,
            edits: 0,
            checked: 0,
            misses: 0,
            skipped_namespace: 0,
            page_errors: 0,
            save_failures: 0,
            detail: None,
        }
    }

    pub fn skipped_as_template(&self) -> bool {
        self.status == CategoryStatus::TemplateSkip
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub dry_run: bool,
    pub categories_total: usize,
    pub categories_cleaned: usize,
    pub categories_no_action: usize,
    pub categories_template_skipped: usize,
    pub categories_errored: usize,
    pub edits: usize,
    pub pages_checked: usize,
    pub pages_skipped_namespace: usize,
    pub page_errors: usize,
    pub save_failures: usize,
    pub interrupted: bool,
    pub request_count: usize,
    pub categories: Vec<CategoryReport>,
}

impl RunReport {
    fn record(&mut self, category: CategoryReport) {
        match category.status {
            CategoryStatus::Done if category.edits > 0 => self.categories_cleaned += 1,
            CategoryStatus::Done => self.categories_no_action += 1,
            CategoryStatus::TemplateSkip => self.categories_template_skipped += 1,
            CategoryStatus::Error => self.categories_errored += 1,
            CategoryStatus::Interrupted => self.interrupted = true,
        }
        self.edits += category.edits;
        self.pages_checked += category.checked;
        self.pages_skipped_namespace += category.skipped_namespace;
        self.page_errors += category.page_errors;
        self.save_failures += category.save_failures;
        self.categories.push(category);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// Dry run: nothing was written, but the edit counts as made.
    Simulated,
    Failed(String),
}

impl SaveOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

#[derive(Debug, Clone)]
pub struct PassOptions<'a> {
    pub threshold: usize,
    pub dry_run: bool,
    pub aliases: &'a [String],
    pub cancel: &'a CancellationToken,
}

/// Connect to the configured wiki and clean every wanted category.
pub fn run(config: &RunConfig, cancel: &CancellationToken) -> Result<RunReport> {
    config.ensure_can_write()?;
    let mut client = MediaWikiClient::new(MediaWikiClientConfig::from_run_config(config))?;
    run_with_api(config, &mut client, cancel)
}

pub fn run_with_api<A: WikiWriteApi>(
    config: &RunConfig,
    api: &mut A,
    cancel: &CancellationToken,
) -> Result<RunReport> {
    info!("{RULE}");
    info!("Red category cleanup started on {}", config.site);
    info!("{RULE}");
    if config.dry_run {
        info!("*** DRY RUN MODE - no edits will be saved ***");
    }

    match config.credentials() {
        Some((username, password)) => {
            info!("Logging in as {username}...");
            api.login(username, password).context("wiki login failed")?;
            info!("Login successful");
        }
        None => warn!("No credentials provided, running without authentication"),
    }

    let aliases = resolve_category_aliases(api, &config.category_aliases);
    debug!("category prefixes: {}", aliases.join(", "));

    info!("Fetching wanted categories...");
    let mut wanted = api
        .get_wanted_categories()
        .context("failed to fetch wanted categories")?;
    info!("Found {} wanted categories", wanted.len());
    if !config.only_categories.is_empty() {
        wanted.retain(|name| config.only_categories.iter().any(|only| only == name));
        info!("Restricted to {} requested categories", wanted.len());
    }

    let mut report = RunReport {
        dry_run: config.dry_run,
        categories_total: wanted.len(),
        ..RunReport::default()
    };
    let options = PassOptions {
        threshold: config.threshold,
        dry_run: config.dry_run,
        aliases: &aliases,
        cancel,
    };

    for (index, category) in wanted.iter().enumerate() {
        if cancel.is_cancelled() {
            warn!("Stop requested, {} categories left unvisited", wanted.len() - index);
            report.interrupted = true;
            break;
        }
        info!("");
        info!("Processing category {}/{}", index + 1, wanted.len());
        let result = process_category(api, category, &options);
        let stop = result.status == CategoryStatus::Interrupted;
        report.record(result);
        if stop {
            break;
        }
    }

    report.request_count = api.request_count();
    log_run_summary(&report);
    Ok(report)
}

/// Walk the members of one wanted category in wiki order, removing literal
/// links until the members run out or `threshold` consecutive misses say the
/// category comes from a template.
pub fn process_category<A: WikiWriteApi>(
    api: &mut A,
    category: &str,
    options: &PassOptions<'_>,
) -> CategoryReport {
    let mut report = CategoryReport::new(category);
    info!("{RULE}");
    info!("Processing category: {category}");
    info!("{RULE}");

    let matcher = match CategoryMatcher::new(category, options.aliases) {
        Ok(matcher) => matcher,
        Err(error) => {
            warn!("Cannot build matcher for '{category}': {error:#}");
            report.status = CategoryStatus::Error;
            report.detail = Some(format!("{error:#}"));
            log_category_summary(&report);
            return report;
        }
    };

    let members = match api.get_category_members(category) {
        Ok(members) => members,
        Err(error) => {
            warn!("Failed to get members of category '{category}': {error:#}");
            report.status = CategoryStatus::Error;
            report.detail = Some(format!("{error:#}"));
            log_category_summary(&report);
            return report;
        }
    };
    if members.is_empty() {
        info!("No members found for category '{category}'");
        log_category_summary(&report);
        return report;
    }
    info!("Found {} members", members.len());

    let summary = edit_summary(category);
    let mut misses = 0usize;
    for (index, member) in members.iter().enumerate() {
        if options.cancel.is_cancelled() {
            warn!("Stop requested, leaving '{category}' unfinished");
            report.status = CategoryStatus::Interrupted;
            break;
        }
        if member.namespace != NS_MAIN {
            debug!("Skipping non-article page: {}", member.title);
            report.skipped_namespace += 1;
            continue;
        }

        info!("[{}/{}] Checking: {}", index + 1, members.len(), member.title);
        report.checked += 1;
        let page = match api.get_page_content(&member.title) {
            Ok(page) => page,
            Err(error) => {
                warn!("  -> Failed to fetch text of '{}': {error:#}", member.title);
                report.page_errors += 1;
                continue;
            }
        };

        let occurrences = matcher.count(&page.content);
        if occurrences == 0 {
            misses += 1;
            report.misses = misses;
            info!("  -> Category not found in text ({misses}/{})", options.threshold);
            if misses == options.threshold {
                info!(
                    "  -> Not found in {} consecutive articles, likely included via template; skipping category",
                    options.threshold
                );
                report.status = CategoryStatus::TemplateSkip;
                break;
            }
            continue;
        }

        info!("  -> Category found in text ({occurrences} occurrence(s))");
        let (new_text, _) = matcher.remove(&page.content);
        match save_page(api, &page, &new_text, &summary, options.dry_run) {
            SaveOutcome::Saved => {
                info!("  -> Category removed from {}", page.title);
                misses = 0;
                report.misses = 0;
                report.edits += 1;
            }
            SaveOutcome::Simulated => {
                misses = 0;
                report.misses = 0;
                report.edits += 1;
            }
            SaveOutcome::Failed(reason) => {
                warn!("  -> Failed to save {}: {reason}", page.title);
                report.save_failures += 1;
            }
        }
    }

    log_category_summary(&report);
    report
}

/// Write `new_text` over `page` once. Dry runs only log what would change.
pub fn save_page<A: WikiWriteApi>(
    api: &mut A,
    page: &RemotePage,
    new_text: &str,
    summary: &str,
    dry_run: bool,
) -> SaveOutcome {
    if dry_run {
        info!("  -> [DRY RUN] Would remove category from: {}", page.title);
        debug!("{}", render_diff(&page.title, &page.content, new_text));
        return SaveOutcome::Simulated;
    }
    match api.edit_page(page, new_text, summary) {
        Ok(()) => SaveOutcome::Saved,
        Err(error) => SaveOutcome::Failed(format!("{error:#}")),
    }
}

fn resolve_category_aliases<A: WikiReadApi>(api: &mut A, configured: &[String]) -> Vec<String> {
    let mut aliases = vec![CANONICAL_CATEGORY_PREFIX.to_string()];
    match api.get_category_namespace_names() {
        Ok(names) => aliases.extend(names),
        Err(error) => warn!("Could not load category namespace aliases, using configured ones: {error:#}"),
    }
    aliases.extend(configured.iter().cloned());

    let mut unique: Vec<String> = Vec::with_capacity(aliases.len());
    for alias in aliases {
        if !unique.iter().any(|known| known.eq_ignore_ascii_case(&alias)) {
            unique.push(alias);
        }
    }
    unique
}

fn render_diff(title: &str, old: &str, new: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    diff.unified_diff()
        .context_radius(1)
        .header(title, title)
        .to_string()
}

fn log_category_summary(report: &CategoryReport) {
    info!(
        "Category '{}' finished: status={} edits={} checked={} misses={} skipped_namespace={} page_errors={} save_failures={}",
        report.name,
        report.status.as_str(),
        report.edits,
        report.checked,
        report.misses,
        report.skipped_namespace,
        report.page_errors,
        report.save_failures
    );
    if let Some(detail) = &report.detail {
        info!("  detail: {detail}");
    }
}

fn log_run_summary(report: &RunReport) {
    info!("");
    info!("{RULE}");
    info!("Summary{}", if report.dry_run { " (dry run)" } else { "" });
    info!("{RULE}");
    info!("Wanted categories: {}", report.categories_total);
    info!("Categories cleaned: {}", report.categories_cleaned);
    info!("Categories with no action needed: {}", report.categories_no_action);
    info!("Categories skipped (template-based): {}", report.categories_template_skipped);
    info!("Categories skipped (error): {}", report.categories_errored);
    info!("Total edits made: {}", report.edits);
    info!("Pages checked: {}", report.pages_checked);
    info!("Page fetch errors: {}", report.page_errors);
    info!("Failed saves: {}", report.save_failures);
    if report.interrupted {
        info!("Run was interrupted; summary is partial");
    }
    for category in &report.categories {
        if category.status != CategoryStatus::Done {
            info!("  [{}] {}", category.status.as_str(), category.name);
        }
    }
    info!("{RULE}");
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use anyhow::bail;

    use super::*;
    use crate::mediawiki::PageRef;

    #[derive(Default)]
    struct MockApi {
        wanted: Vec<String>,
        wanted_fails: bool,
        members: BTreeMap<String, Vec<PageRef>>,
        failing_members: BTreeSet<String>,
        contents: BTreeMap<String, String>,
        failing_fetches: BTreeSet<String>,
        failing_saves: BTreeSet<String>,
        namespace_names: Vec<String>,
        reject_login: bool,
        logged_in: bool,
        fetched: Vec<String>,
        saved: Vec<(String, String, String)>,
        request_count: usize,
    }

    impl MockApi {
        fn with_category(mut self, category: &str, pages: &[(&str, &str)]) -> Self {
            self.wanted.push(category.to_string());
            let refs = pages
                .iter()
                .map(|(title, _)| PageRef {
                    title: (*title).to_string(),
                    namespace: NS_MAIN,
                })
                .collect();
            self.members.insert(category.to_string(), refs);
            for (title, content) in pages {
                self.contents.insert((*title).to_string(), (*content).to_string());
            }
            self
        }
    }

    impl WikiReadApi for MockApi {
        fn get_wanted_categories(&mut self) -> anyhow::Result<Vec<String>> {
            self.request_count += 1;
            if self.wanted_fails {
                bail!("HTTP 503");
            }
            Ok(self.wanted.clone())
        }

        fn get_category_members(&mut self, category: &str) -> anyhow::Result<Vec<PageRef>> {
            self.request_count += 1;
            if self.failing_members.contains(category) {
                bail!("categorymembers timed out");
            }
            Ok(self.members.get(category).cloned().unwrap_or_default())
        }

        fn get_page_content(&mut self, title: &str) -> anyhow::Result<RemotePage> {
            self.request_count += 1;
            self.fetched.push(title.to_string());
            if self.failing_fetches.contains(title) {
                bail!("connection reset");
            }
            let content = self
                .contents
                .get(title)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("page does not exist: {title}"))?;
            Ok(RemotePage {
                title: title.to_string(),
                namespace: NS_MAIN,
                page_id: 1,
                revision_id: 2,
                timestamp: "2026-10-01T00:00:00Z".to_string(),
                fetched_at: Some("2026-10-19T00:00:00Z".to_string()),
                content,
            })
        }

        fn get_category_namespace_names(&mut self) -> anyhow::Result<Vec<String>> {
            self.request_count += 1;
            Ok(self.namespace_names.clone())
        }

        fn request_count(&self) -> usize {
            self.request_count
        }
    }

    impl WikiWriteApi for MockApi {
        fn login(&mut self, _username: &str, _password: &str) -> anyhow::Result<()> {
            self.request_count += 1;
            if self.reject_login {
                bail!("MediaWiki login failed: WrongPass");
            }
            self.logged_in = true;
            Ok(())
        }

        fn edit_page(
            &mut self,
            page: &RemotePage,
            content: &str,
            summary: &str,
        ) -> anyhow::Result<()> {
            self.request_count += 1;
            if self.failing_saves.contains(&page.title) {
                bail!("MediaWiki API error [editconflict]: Edit conflict.");
            }
            self.saved
                .push((page.title.clone(), content.to_string(), summary.to_string()));
            self.contents.insert(page.title.clone(), content.to_string());
            Ok(())
        }
    }

    fn run_config(dry_run: bool, threshold: usize) -> RunConfig {
        RunConfig {
            site: "test.wikipedia.org".to_string(),
            api_url: "https://test.wikipedia.org/w/api.php".to_string(),
            user_agent: "redcat-test".to_string(),
            username: Some("Bot".to_string()),
            password: Some("secret".to_string()),
            threshold,
            dry_run,
            category_aliases: Vec::new(),
            only_categories: Vec::new(),
            log_file: None,
        }
    }

    fn pass<'a>(
        threshold: usize,
        dry_run: bool,
        aliases: &'a [String],
        cancel: &'a CancellationToken,
    ) -> PassOptions<'a> {
        PassOptions {
            threshold,
            dry_run,
            aliases,
            cancel,
        }
    }

    const NO_CATEGORY: &str = "No category here";

    #[test]
    fn template_category_stops_at_threshold_without_visiting_rest() {
        let mut pages = (1..=10)
            .map(|index| (format!("Article {index}"), NO_CATEGORY.to_string()))
            .collect::<Vec<_>>();
        pages.push(("Article 11".to_string(), "Body\n[[Category:X]]".to_string()));
        pages.push(("Article 12".to_string(), NO_CATEGORY.to_string()));
        let borrowed = pages
            .iter()
            .map(|(title, text)| (title.as_str(), text.as_str()))
            .collect::<Vec<_>>();
        let mut api = MockApi::default().with_category("X", &borrowed);
        let cancel = CancellationToken::new();

        let report = process_category(&mut api, "X", &pass(10, false, &[], &cancel));

        assert_eq!(report.status, CategoryStatus::TemplateSkip);
        assert!(report.skipped_as_template());
        assert_eq!(report.edits, 0);
        assert_eq!(report.checked, 10);
        assert_eq!(report.misses, 10);
        assert_eq!(api.fetched.len(), 10);
        assert!(!api.fetched.contains(&"Article 11".to_string()));
        assert!(api.saved.is_empty());
    }

    #[test]
    fn literal_category_is_removed_from_every_member() {
        let mut api = MockApi::default().with_category(
            "Y",
            &[
                ("One", "a\n[[Category:Y]]\nb"),
                ("Two", "[[Category:Y|key]]\nrest"),
                ("Three", "text [[Category:Y]]"),
            ],
        );
        let cancel = CancellationToken::new();

        let report = process_category(&mut api, "Y", &pass(10, false, &[], &cancel));

        assert_eq!(report.status, CategoryStatus::Done);
        assert_eq!(report.edits, 3);
        assert_eq!(report.misses, 0);
        assert_eq!(api.saved.len(), 3);
        assert_eq!(api.contents.get("One").map(String::as_str), Some("a\nb"));
        assert_eq!(api.contents.get("Two").map(String::as_str), Some("rest"));
        assert_eq!(
            api.saved[0].2,
            "Removing non-existent category: [[Category:Y]]"
        );
    }

    #[test]
    fn successful_removal_resets_miss_counter() {
        let mut pages = Vec::new();
        for index in 0..5 {
            pages.push((format!("Before {index}"), NO_CATEGORY.to_string()));
        }
        pages.push((
            "Has it".to_string(),
            "Text [[Category:Test Category]] more".to_string(),
        ));
        for index in 0..5 {
            pages.push((format!("After {index}"), NO_CATEGORY.to_string()));
        }
        let borrowed = pages
            .iter()
            .map(|(title, text)| (title.as_str(), text.as_str()))
            .collect::<Vec<_>>();
        let mut api = MockApi::default().with_category("Test Category", &borrowed);
        let cancel = CancellationToken::new();

        let report = process_category(&mut api, "Test Category", &pass(6, true, &[], &cancel));

        assert_eq!(report.status, CategoryStatus::Done);
        assert_eq!(report.edits, 1);
        assert_eq!(report.misses, 5);
        assert_eq!(report.checked, 11);
    }

    #[test]
    fn dry_run_never_writes_but_counts_edits() {
        let mut api = MockApi::default().with_category(
            "Y",
            &[("One", "a\n[[Category:Y]]"), ("Two", "[[Category:Y]]")],
        );
        let cancel = CancellationToken::new();

        let report = process_category(&mut api, "Y", &pass(10, true, &[], &cancel));

        assert_eq!(report.edits, 2);
        assert!(api.saved.is_empty());
        assert_eq!(api.contents.get("One").map(String::as_str), Some("a\n[[Category:Y]]"));
    }

    #[test]
    fn failed_save_neither_counts_nor_resets() {
        let mut api = MockApi::default().with_category(
            "Z",
            &[
                ("Miss 1", NO_CATEGORY),
                ("Conflict", "[[Category:Z]]"),
                ("Miss 2", NO_CATEGORY),
                ("Never", "[[Category:Z]]"),
            ],
        );
        api.failing_saves.insert("Conflict".to_string());
        let cancel = CancellationToken::new();

        let report = process_category(&mut api, "Z", &pass(2, false, &[], &cancel));

        assert_eq!(report.status, CategoryStatus::TemplateSkip);
        assert_eq!(report.save_failures, 1);
        assert_eq!(report.edits, 0);
        assert!(!api.fetched.contains(&"Never".to_string()));
    }

    #[test]
    fn fetch_errors_and_other_namespaces_do_not_count_as_misses() {
        let mut api = MockApi::default().with_category(
            "W",
            &[("Broken", NO_CATEGORY), ("Miss", NO_CATEGORY), ("Hit", "[[Category:W]]")],
        );
        api.failing_fetches.insert("Broken".to_string());
        api.members.get_mut("W").expect("members").insert(
            0,
            PageRef {
                title: "User:Sandbox".to_string(),
                namespace: 2,
            },
        );
        let cancel = CancellationToken::new();

        let report = process_category(&mut api, "W", &pass(2, false, &[], &cancel));

        assert_eq!(report.status, CategoryStatus::Done);
        assert_eq!(report.skipped_namespace, 1);
        assert_eq!(report.page_errors, 1);
        assert_eq!(report.edits, 1);
        assert!(!api.fetched.contains(&"User:Sandbox".to_string()));
    }

    #[test]
    fn localized_prefix_is_removed_with_aliases() {
        let mut api = MockApi::default()
            .with_category("تصنيف اختبار", &[("مقالة", "مقالة\n[[تصنيف:تصنيف اختبار]]\nنص")]);
        let aliases = vec!["Category".to_string(), "تصنيف".to_string()];
        let cancel = CancellationToken::new();

        let report = process_category(&mut api, "تصنيف اختبار", &pass(10, false, &aliases, &cancel));

        assert_eq!(report.edits, 1);
        assert_eq!(api.contents.get("مقالة").map(String::as_str), Some("مقالة\nنص"));
    }

    #[test]
    fn member_list_failure_marks_category_errored() {
        let mut api = MockApi::default().with_category("Broken", &[("A", NO_CATEGORY)]);
        api.failing_members.insert("Broken".to_string());
        let cancel = CancellationToken::new();

        let report = process_category(&mut api, "Broken", &pass(10, false, &[], &cancel));

        assert_eq!(report.status, CategoryStatus::Error);
        assert!(report.detail.as_deref().unwrap_or_default().contains("timed out"));
        assert!(api.fetched.is_empty());
    }

    #[test]
    fn run_aggregates_outcomes_and_continues_after_category_errors() {
        let mut api = MockApi::default()
            .with_category("Broken", &[("A", NO_CATEGORY)])
            .with_category("Clean", &[("B", "[[Category:Clean]]")])
            .with_category("Nothing", &[])
            .with_category("Templated", &[("C", NO_CATEGORY), ("D", NO_CATEGORY)]);
        api.failing_members.insert("Broken".to_string());
        api.namespace_names = vec!["تصنيف".to_string(), "Category".to_string()];

        let report = run_with_api(&run_config(false, 2), &mut api, &CancellationToken::new())
            .expect("run");

        assert!(api.logged_in);
        assert_eq!(report.categories_total, 4);
        assert_eq!(report.categories_errored, 1);
        assert_eq!(report.categories_cleaned, 1);
        assert_eq!(report.categories_no_action, 1);
        assert_eq!(report.categories_template_skipped, 1);
        assert_eq!(report.edits, 1);
        assert!(!report.interrupted);
        assert_eq!(report.request_count, api.request_count);
        let statuses = report
            .categories
            .iter()
            .map(|category| category.status)
            .collect::<Vec<_>>();
        assert_eq!(
            statuses,
            vec![
                CategoryStatus::Error,
                CategoryStatus::Done,
                CategoryStatus::Done,
                CategoryStatus::TemplateSkip
            ]
        );
    }

    #[test]
    fn wanted_list_failure_is_fatal() {
        let mut api = MockApi {
            wanted_fails: true,
            ..MockApi::default()
        };
        let error = run_with_api(&run_config(false, 10), &mut api, &CancellationToken::new())
            .expect_err("must fail");
        assert!(format!("{error:#}").contains("wanted categories"));
    }

    #[test]
    fn rejected_login_is_fatal_before_any_edit() {
        let mut api = MockApi {
            reject_login: true,
            ..MockApi::default()
        }
        .with_category("Y", &[("One", "[[Category:Y]]")]);
        let error = run_with_api(&run_config(false, 10), &mut api, &CancellationToken::new())
            .expect_err("must fail");
        assert!(format!("{error:#}").contains("login"));
        assert!(api.saved.is_empty());
    }

    #[test]
    fn cancelled_run_returns_partial_report() {
        let mut api = MockApi::default()
            .with_category("Y", &[("One", "[[Category:Y]]")])
            .with_category("Z", &[("Two", "[[Category:Z]]")]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = run_with_api(&run_config(false, 10), &mut api, &cancel).expect("run");

        assert!(report.interrupted);
        assert!(report.categories.is_empty());
        assert!(api.saved.is_empty());
    }

    #[test]
    fn cancellation_mid_category_marks_it_interrupted() {
        let mut api = MockApi::default().with_category("Y", &[("One", "[[Category:Y]]")]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = process_category(&mut api, "Y", &pass(10, false, &[], &cancel));

        assert_eq!(report.status, CategoryStatus::Interrupted);
        assert!(api.fetched.is_empty());
    }

    #[test]
    fn only_categories_filter_keeps_wiki_order() {
        let mut api = MockApi::default()
            .with_category("A", &[("One", "[[Category:A]]")])
            .with_category("B", &[("Two", "[[Category:B]]")])
            .with_category("C", &[("Three", "[[Category:C]]")]);
        let mut config = run_config(true, 10);
        config.only_categories = vec!["C".to_string(), "A".to_string()];

        let report = run_with_api(&config, &mut api, &CancellationToken::new()).expect("run");

        let names = report
            .categories
            .iter()
            .map(|category| category.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["A", "C"]);
        assert_eq!(report.edits, 2);
        assert!(api.saved.is_empty());
    }

    #[test]
    fn anonymous_dry_run_skips_login() {
        let mut api = MockApi::default().with_category("Y", &[("One", "[[Category:Y]]")]);
        let mut config = run_config(true, 10);
        config.username = None;
        config.password = None;

        let report = run_with_api(&config, &mut api, &CancellationToken::new()).expect("run");

        assert!(!api.logged_in);
        assert_eq!(report.edits, 1);
        assert!(report.dry_run);
    }

    #[test]
    fn save_outcome_success_flags() {
        assert!(SaveOutcome::Saved.is_success());
        assert!(SaveOutcome::Simulated.is_success());
        assert!(!SaveOutcome::Failed("conflict".to_string()).is_success());
    }

    #[test]
    fn aliases_are_deduplicated_in_order() {
        let mut api = MockApi {
            namespace_names: vec!["تصنيف".to_string(), "category".to_string()],
            ..MockApi::default()
        };
        let aliases = resolve_category_aliases(&mut api, &["تصنيف".to_string(), "Cat".to_string()]);
        assert_eq!(aliases, vec!["Category", "تصنيف", "Cat"]);
    }

    #[test]
    fn dry_run_diff_shows_removed_line() {
        let diff = render_diff("Page", "a\n[[Category:Y]]\nb\n", "a\nb\n");
        assert!(diff.contains("-[[Category:Y]]"));
    }
}
