//! Thin page-discovery boundary: turns the yearbook root page and one
//! period page into candidate (url, filename, title) tuples. Deliberately
//! naive anchor scanning tailored to the site structure; the crawl core
//! treats the output as opaque and tolerates empty results.

use crate::harvest::fetch::{FetchError, HttpClient};
use crate::harvest::util::filename_from_url;
use anyhow::Result;
use reqwest::Url;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

/// A downloadable file link discovered on a period page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub url: String,
    pub filename: String,
    pub title: String,
}

/// One period (year) and the page listing its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodPage {
    pub period: String,
    pub url: String,
}

struct Anchor {
    href: String,
    text: String,
}

/// Pull `<a href=...>text</a>` pairs out of raw HTML with plain string
/// scanning. Handles quoted and bare attribute values; nested tags inside
/// the anchor body are stripped.
fn extract_anchors(html: &str) -> Vec<Anchor> {
    let lower = html.to_ascii_lowercase();
    let mut out = Vec::new();
    let mut pos = 0usize;

    while let Some(rel) = lower[pos..].find("<a") {
        let start = pos + rel;
        let after = start + 2;
        // Require `<a ` or `<a>`, not `<abbr` etc.
        match lower.as_bytes().get(after) {
            Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r') | Some(b'>') => {}
            _ => {
                pos = after;
                continue;
            }
        }
        let Some(tag_end_rel) = lower[start..].find('>') else {
            break;
        };
        let tag_end = start + tag_end_rel;
        let tag = &html[start..tag_end];

        let Some(close_rel) = lower[tag_end..].find("</a>") else {
            break;
        };
        let body = &html[tag_end + 1..tag_end + close_rel];
        pos = tag_end + close_rel + 4;

        let Some(href) = attr_value(tag, "href") else {
            continue;
        };
        out.push(Anchor {
            href,
            text: strip_tags(body),
        });
    }
    out
}

fn attr_value(tag: &str, name: &str) -> Option<String> {
    let lower = tag.to_ascii_lowercase();
    let mut search_from = 0usize;
    loop {
        let idx = lower[search_from..].find(name)? + search_from;
        // Must be a standalone attribute name followed by `=`.
        let before_ok = idx == 0
            || lower.as_bytes()[idx - 1].is_ascii_whitespace();
        let rest = lower[idx + name.len()..].trim_start();
        if !before_ok || !rest.starts_with('=') {
            search_from = idx + name.len();
            continue;
        }
        let value_start = tag.len() - rest.len() + 1;
        let value = tag[value_start..].trim_start();
        return Some(match value.chars().next() {
            Some(q @ ('"' | '\'')) => {
                let inner = &value[1..];
                inner[..inner.find(q).unwrap_or(inner.len())].to_string()
            }
            _ => value
                .split(|c: char| c.is_ascii_whitespace())
                .next()
                .unwrap_or("")
                .to_string(),
        })
        .filter(|v| !v.is_empty());
    }
}

fn strip_tags(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut in_tag = false;
    for ch in body.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Year from an href shaped like `.../yearbook/YYYY` or
/// `.../yearbook/YYYY-YYYY` (first year wins).
fn period_from_href(href: &str) -> Option<i32> {
    let path = href.split(['?', '#']).next().unwrap_or(href);
    let mut segments = path.split('/').filter(|s| !s.is_empty()).peekable();
    while let Some(segment) = segments.next() {
        if !segment.eq_ignore_ascii_case("yearbook") {
            continue;
        }
        let candidate = segments.peek()?;
        let digits: String = candidate.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.len() != 4 {
            return None;
        }
        let tail = &candidate[4..];
        if !(tail.is_empty() || tail.starts_with('-')) {
            return None;
        }
        return digits.parse().ok();
    }
    None
}

/// Year from anchor text shaped like "Yearbook YYYY" or
/// "Yearbook YYYY to YYYY".
fn period_from_text(text: &str) -> Option<i32> {
    let lower = text.to_ascii_lowercase();
    let idx = lower.find("yearbook")?;
    let rest = text[idx + "yearbook".len()..].trim_start();
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() == 4 { digits.parse().ok() } else { None }
}

fn within_range(year: i32, start: Option<i32>, end: Option<i32>) -> bool {
    start.is_none_or(|s| year >= s) && end.is_none_or(|e| year <= e)
}

/// Parse period links out of the root page HTML. Href patterns win over
/// text patterns for the same year. Newest first.
pub fn periods_from_html(
    html: &str,
    base: &Url,
    start: Option<i32>,
    end: Option<i32>,
) -> Vec<PeriodPage> {
    let mut by_year: BTreeMap<i32, PeriodPage> = BTreeMap::new();
    for anchor in extract_anchors(html) {
        let Ok(absolute) = base.join(&anchor.href) else {
            continue;
        };
        if let Some(year) = period_from_href(&anchor.href) {
            by_year.insert(
                year,
                PeriodPage {
                    period: year.to_string(),
                    url: absolute.to_string(),
                },
            );
        } else if let Some(year) = period_from_text(&anchor.text) {
            by_year.entry(year).or_insert(PeriodPage {
                period: year.to_string(),
                url: absolute.to_string(),
            });
        }
    }
    by_year
        .into_values()
        .rev()
        .filter(|p| {
            p.period
                .parse::<i32>()
                .is_ok_and(|y| within_range(y, start, end))
        })
        .collect()
}

/// Parse downloadable-file links out of a period page. Filters by allowed
/// extension, drops titles containing an excluded keyword, deduplicates by
/// URL preserving page order.
pub fn candidates_from_html(
    html: &str,
    base: &Url,
    allowed_extensions: &[String],
    excluded_keywords: &[String],
) -> Vec<Candidate> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();

    for anchor in extract_anchors(html) {
        let path = anchor
            .href
            .split(['?', '#'])
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();
        if !allowed_extensions
            .iter()
            .any(|ext| path.ends_with(&ext.to_ascii_lowercase()))
        {
            continue;
        }

        let title_lower = anchor.text.to_ascii_lowercase();
        if excluded_keywords
            .iter()
            .any(|kw| !kw.is_empty() && title_lower.contains(&kw.to_ascii_lowercase()))
        {
            debug!("skipping excluded title: {}", anchor.text);
            continue;
        }

        let Ok(absolute) = base.join(&anchor.href) else {
            continue;
        };
        let url = absolute.to_string();
        if !seen.insert(url.clone()) {
            continue;
        }
        out.push(Candidate {
            filename: filename_from_url(&url),
            url,
            title: anchor.text,
        });
    }
    out
}

/// Fetch the root page and list every period in range, newest first.
pub fn discover_periods(
    client: &HttpClient,
    root_url: &str,
    start: Option<i32>,
    end: Option<i32>,
) -> Result<Vec<PeriodPage>, FetchError> {
    let base = Url::parse(root_url).map_err(|err| FetchError::Permanent {
        url: root_url.to_string(),
        detail: format!("invalid root url: {err}"),
    })?;
    let html = client.get_text(root_url)?;
    let periods = periods_from_html(&html, &base, start, end);
    info!("found {} period page(s) at {root_url}", periods.len());
    Ok(periods)
}

/// Fetch one period page and list its file candidates.
pub fn discover_candidates(
    client: &HttpClient,
    page_url: &str,
    allowed_extensions: &[String],
    excluded_keywords: &[String],
) -> Result<Vec<Candidate>, FetchError> {
    let base = Url::parse(page_url).map_err(|err| FetchError::Permanent {
        url: page_url.to_string(),
        detail: format!("invalid page url: {err}"),
    })?;
    let html = client.get_text(page_url)?;
    Ok(candidates_from_html(
        &html,
        &base,
        allowed_extensions,
        excluded_keywords,
    ))
}
