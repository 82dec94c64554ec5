//! Bounded depth-first crawl of the vendor web front-end.
//!
//! The front-end ships its model table inside a JavaScript bundle whose name
//! changes with every deploy, so the bundle is found by walking same-origin
//! links from the site root until a page contains a `models: [...]` literal.

use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use url::Url;

use super::lenient;

/// Extensions worth following; everything else is an asset we cannot parse.
const FOLLOW_EXTENSIONS: &[&str] = &[".js", ".css", ".html", ".htm", ".json"];

/// Pages that may be fetched but whose links are never extracted.
const LEAF_EXTENSIONS: &[&str] = &[".json", ".css", ".png", ".jpg", ".jpeg", ".gif", ".svg"];

/// Crawl bounds.
#[derive(Debug, Clone, Copy)]
pub struct CrawlLimits {
    pub max_depth: usize,
    pub max_pages: usize,
}

/// One crawl run. The stop flag is shared so a caller can cancel it.
pub struct Crawler {
    client: reqwest::Client,
    root: Url,
    limits: CrawlLimits,
    stop: Arc<AtomicBool>,
}

impl Crawler {
    pub fn new(client: reqwest::Client, root: Url, limits: CrawlLimits) -> Self {
        Self {
            client,
            root,
            limits,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle that stops the crawl at its next step when set.
    #[cfg(test)]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Walk from the root until the first non-empty models literal is found.
    ///
    /// Returns the raw model objects, or `None` when the bounds are exhausted
    /// or the crawl was stopped.
    pub async fn run(&self) -> Option<Vec<Value>> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut stack: Vec<(Url, usize)> = vec![(self.root.clone(), 0)];
        let mut fetched = 0usize;

        while let Some((url, depth)) = stack.pop() {
            if self.stop.load(Ordering::Acquire) {
                tracing::debug!("Crawl stopped");
                return None;
            }
            if !visited.insert(url.as_str().to_string()) {
                continue;
            }
            if fetched >= self.limits.max_pages {
                tracing::debug!(pages = fetched, "Crawl page budget exhausted");
                return None;
            }

            fetched += 1;
            let Some(content) = self.fetch(&url).await else {
                continue;
            };

            if let Some(models) = lenient::find_models_literal(&content)
                .and_then(lenient::parse_models_literal)
            {
                self.stop.store(true, Ordering::Release);
                tracing::info!(url = %url, count = models.len(), "Found models literal");
                return Some(models);
            }

            if depth >= self.limits.max_depth {
                continue;
            }

            // Reverse so the first link on the page is visited first
            let links = extract_links(&content, &url);
            for link in links.into_iter().rev() {
                if !visited.contains(link.as_str()) {
                    stack.push((link, depth + 1));
                }
            }
        }

        None
    }

    async fn fetch(&self, url: &Url) -> Option<String> {
        let response = self
            .client
            .get(url.clone())
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match response {
            Ok(r) => r.text().await.ok(),
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Crawl fetch failed");
                None
            }
        }
    }
}

struct LinkPatterns {
    href: Regex,
    script_src: Regex,
    imports: Vec<Regex>,
    array: Regex,
    array_path: Regex,
    invalid: Vec<Regex>,
}

fn link_patterns() -> Option<&'static LinkPatterns> {
    static PATTERNS: OnceLock<Option<LinkPatterns>> = OnceLock::new();
    PATTERNS.get_or_init(|| build_patterns().ok()).as_ref()
}

fn build_patterns() -> Result<LinkPatterns, regex::Error> {
    let compile = |patterns: &[&str]| -> Result<Vec<Regex>, regex::Error> {
        patterns.iter().map(|p| Regex::new(p)).collect()
    };

    Ok(LinkPatterns {
        href: Regex::new(r#"href\s*=\s*["']([^"']+)["']"#)?,
        script_src: Regex::new(r#"<script[^>]*\bsrc\s*=\s*["']([^"']+)["']"#)?,
        imports: compile(&[
            r#"import\s*[^"']*["']([^"']+)["']"#,
            r#"from\s+["']([^"']+)["']"#,
            r#"import\s*\(["']([^"']+)["']\)"#,
            r#"require\s*\(["']([^"']+)["']\)"#,
            r#"(?:url|src|href)\s*:\s*["']([^"']+)["']"#,
            r#"@import\s+["']([^"']+)["']"#,
            r#"url\(["']?([^"'()]+)["']?\)"#,
        ])?,
        array: Regex::new(r"\[([\s\S]*?)\]")?,
        array_path: Regex::new(r#"["']([^"']+?\.[a-zA-Z0-9]+)["']"#)?,
        invalid: compile(&[
            r"\$\{.*?\}",
            r"\{.*?\}",
            r"^\(.*?\)",
            r"^\).*?",
            r"^[\s.,]+$",
            r"^[a-z]+=",
            r"^\w+\(",
        ])?,
    })
}

/// Extract same-origin links worth following from a fetched page.
///
/// Links come from `href` attributes, `<script src>` tags and, for JavaScript
/// pages, import-like string literals. Order of first appearance is kept.
pub fn extract_links(content: &str, page: &Url) -> Vec<Url> {
    let Some(patterns) = link_patterns() else {
        return Vec::new();
    };
    let path = page.path().to_ascii_lowercase();
    if content.is_empty() || LEAF_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return Vec::new();
    }

    let mut candidates: Vec<&str> = Vec::new();
    for re in [&patterns.href, &patterns.script_src] {
        candidates.extend(re.captures_iter(content).filter_map(|c| c.get(1)).map(|m| m.as_str()));
    }

    if path.ends_with(".js") {
        for re in &patterns.imports {
            candidates
                .extend(re.captures_iter(content).filter_map(|c| c.get(1)).map(|m| m.as_str()));
        }
        for array in patterns.array.captures_iter(content).filter_map(|c| c.get(1)) {
            candidates.extend(
                patterns
                    .array_path
                    .captures_iter(array.as_str())
                    .filter_map(|c| c.get(1))
                    .map(|m| m.as_str())
                    .filter(|p| {
                        !["http:", "https:", "data:", "blob:"]
                            .iter()
                            .any(|scheme| p.starts_with(scheme))
                    }),
            );
        }
    }

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|raw| is_followable(raw, &patterns.invalid))
        .filter_map(clean_path)
        .filter_map(|p| page.join(&p).ok())
        .filter(|u| u.host_str() == page.host_str())
        .filter(|u| seen.insert(u.as_str().to_string()))
        .collect()
}

fn is_followable(path: &str, invalid: &[Regex]) -> bool {
    !path.trim().is_empty() && !invalid.iter().any(|re| re.is_match(path))
}

/// Normalize a raw path and keep it only if it names a followable resource.
fn clean_path(raw: &str) -> Option<String> {
    let mut path: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '(' && *c != ')')
        .collect();
    if let Some(comma) = path.find(',') {
        path.truncate(comma);
    }

    let path = path
        .strip_prefix("./")
        .or_else(|| path.strip_prefix('/'))
        .unwrap_or(&path)
        .to_string();

    // Query strings and fragments do not count towards the extension
    let bare = path.split(['?', '#']).next().unwrap_or_default();
    FOLLOW_EXTENSIONS
        .iter()
        .any(|ext| bare.ends_with(ext))
        .then_some(path)
}
