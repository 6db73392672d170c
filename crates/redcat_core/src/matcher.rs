//! Locating and removing literal `[[Category:Name]]` links in wikitext.
//!
//! Only links written in the page source are seen here. Categories added by
//! a transcluded template never appear in the text, which is what the
//! member pass relies on to detect template inclusion.

use anyhow::{Context, Result};
use regex::Regex;

/// Canonical prefix, always accepted next to any localized alias.
pub const CANONICAL_CATEGORY_PREFIX: &str = "Category";

#[derive(Debug, Clone)]
pub struct CategoryMatcher {
    category: String,
    pattern: Regex,
}

impl CategoryMatcher {
    /// Build a matcher for `category` accepting `Category:` plus every alias given.
    pub fn new(category: &str, aliases: &[String]) -> Result<Self> {
        let pattern = build_pattern(category, aliases);
        let pattern = Regex::new(&pattern)
            .with_context(|| format!("failed to compile category pattern for {category}"))?;
        Ok(Self {
            category: category.to_string(),
            pattern,
        })
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn find(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }

    /// Number of literal links to the category in `text`.
    pub fn count(&self, text: &str) -> usize {
        self.pattern.find_iter(text).count()
    }

    /// Remove every literal link to the category. A line left holding only
    /// whitespace is dropped together with its line break.
    pub fn remove(&self, text: &str) -> (String, bool) {
        if !self.find(text) {
            return (text.to_string(), false);
        }

        let mut output = String::with_capacity(text.len());
        let mut dropped_last_line = false;
        for line in text.split_inclusive('\n') {
            dropped_last_line = false;
            if !self.pattern.is_match(line) {
                output.push_str(line);
                continue;
            }
            // Stripping can splice the surrounding text into a fresh link.
            let mut stripped = line.to_string();
            while self.pattern.is_match(&stripped) {
                stripped = self.pattern.replace_all(&stripped, "").into_owned();
            }
            if stripped.trim().is_empty() {
                dropped_last_line = !line.ends_with('\n');
                continue;
            }
            output.push_str(&stripped);
        }

        // The final line had no terminator: drop the break that introduced it.
        if dropped_last_line {
            if output.ends_with("\r\n") {
                output.truncate(output.len() - 2);
            } else if output.ends_with('\n') {
                output.truncate(output.len() - 1);
            }
        }

        (output, true)
    }
}

/// Whether `text` holds a literal `[[Category:category_name]]` link.
pub fn find_category_token(text: &str, category_name: &str) -> bool {
    CategoryMatcher::new(category_name, &[])
        .map(|matcher| matcher.find(text))
        .unwrap_or(false)
}

/// Remove every literal link to `category_name`; the flag reports whether anything changed.
pub fn remove_category_token(text: &str, category_name: &str) -> (String, bool) {
    match CategoryMatcher::new(category_name, &[]) {
        Ok(matcher) => matcher.remove(text),
        Err(_) => (text.to_string(), false),
    }
}

fn build_pattern(category: &str, aliases: &[String]) -> String {
    let mut prefixes = vec![regex::escape(CANONICAL_CATEGORY_PREFIX)];
    for alias in aliases {
        let alias = alias.trim();
        if alias.is_empty() {
            continue;
        }
        let escaped = name_pattern(alias);
        if !prefixes.contains(&escaped) {
            prefixes.push(escaped);
        }
    }

    format!(
        r"\[\[[ \t]*(?i:{prefixes})[ \t]*:[ \t_]*{name}[ \t_]*(?:\|[^\]\n]*)?\]\]",
        prefixes = prefixes.join("|"),
        name = first_letter_pattern(category),
    )
}

/// Name with MediaWiki title rules: first letter case-folded, `_` and spaces alike.
fn first_letter_pattern(name: &str) -> String {
    let name = name.trim_matches(|ch: char| ch == ' ' || ch == '_');
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };

    let lower = first.to_lowercase().collect::<String>();
    let upper = first.to_uppercase().collect::<String>();
    let head = if lower == upper {
        name_pattern(&first.to_string())
    } else {
        format!("(?:{}|{})", regex::escape(&upper), regex::escape(&lower))
    };
    format!("{head}{}", name_pattern(chars.as_str()))
}

fn name_pattern(value: &str) -> String {
    let mut out = String::with_capacity(value.len() * 2);
    let mut in_separator = false;
    for ch in value.chars() {
        if ch == ' ' || ch == '_' {
            if !in_separator {
                out.push_str("[ _]+");
                in_separator = true;
            }
            continue;
        }
        in_separator = false;
        out.push_str(&regex::escape(&ch.to_string()));
    }
    out
}
