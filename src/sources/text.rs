// src/sources/text.rs
//! String and scoring helpers shared by the provider adapters.

use once_cell::sync::OnceCell;
use regex::Regex;

fn re_tags() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?is)</?[a-z][^>]*>").expect("valid tag regex"))
}

fn re_ws() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace regex"))
}

/// `https://www.example.com/feed/` -> `example.com/feed`
pub fn strip_url(url: &str) -> String {
    let mut out = url.trim();
    for prefix in ["https://", "http://", "www."] {
        out = out.strip_prefix(prefix).unwrap_or(out);
    }
    out.strip_suffix('/').unwrap_or(out).to_string()
}

/// Host without a leading `www.`; `None` when the URL does not parse.
pub fn strip_url_host(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(host.strip_prefix("www.").unwrap_or(host).to_string())
}

pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Truncate to `max` chars; the flag reports whether anything was cut.
pub fn limit_string_length(s: &str, max: usize) -> (String, bool) {
    if s.chars().count() > max {
        (s.chars().take(max).collect(), true)
    } else {
        (s.to_string(), false)
    }
}

/// Drop markup and decode entities. Inner whitespace is preserved.
pub fn extract_text_from_html(html: &str) -> String {
    let stripped = re_tags().replace_all(html, "");
    html_escape::decode_html_entities(&stripped).trim().to_string()
}

/// Single-line title capped at `max_len` chars, ellipsis included.
pub fn one_line_title(text: &str, max_len: usize) -> String {
    let collapsed = re_ws().replace_all(text, " ");
    let line = collapsed.trim();
    if line.chars().count() > max_len {
        let mut out: String = line.chars().take(max_len.saturating_sub(1)).collect();
        out.push('…');
        out
    } else {
        line.to_string()
    }
}

/// Plain-text summary of a feed description, for items without a title.
pub fn shorten_description(description: &str, max_len: usize) -> String {
    if description.is_empty() {
        return String::new();
    }
    let (bounded, _) = limit_string_length(description, 1000);
    let flat = bounded.replace('\n', " ");
    let without_tags = re_tags().replace_all(&flat, "");
    let collapsed = re_ws().replace_all(&without_tags, " ");
    let text = html_escape::decode_html_entities(collapsed.trim()).into_owned();
    let (mut out, limited) = limit_string_length(&text, max_len);
    if limited {
        out.push('…');
    }
    out
}

// ------------------------------------------------------------
// Engagement normalization
// ------------------------------------------------------------

pub fn capped_ratio(value: f64, max: f64) -> f64 {
    (value / max).min(1.0)
}

/// `limit * ln(1 + kx) / (1 + ln(1 + kx))`; rises monotonically towards `limit`.
pub fn log_asymptote(x: f64, limit: f64, k: f64) -> f64 {
    let ln = (1.0 + k * x.max(0.0)).ln();
    limit * ln / (1.0 + ln)
}

/// Binary-search the growth rate `k` so that `log_asymptote(x, limit, k) ≈ target`.
/// Returns `None` for inputs no `k` can satisfy.
pub fn fit_growth_rate(x: f64, target: f64, limit: f64, steps: usize) -> Option<f64> {
    if x <= 0.0 || target <= 0.0 || target >= limit {
        return None;
    }
    let (mut low, mut high) = (1e-9_f64, 10.0_f64);
    for _ in 0..steps {
        let mid = (low + high) / 2.0;
        let value = log_asymptote(x, limit, mid);
        if (value - target).abs() < 1e-9 {
            return Some(mid);
        }
        if value < target {
            low = mid;
        } else {
            high = mid;
        }
    }
    Some((low + high) / 2.0)
}

/// Map a raw count onto `[0, 1)` so that `max_score` lands near 0.8 and outliers
/// still grow with diminishing returns.
pub fn norm_social_score(score: f64, max_score: f64) -> f64 {
    if score <= 0.0 {
        return 0.0;
    }
    match fit_growth_rate(max_score, 0.8, 1.0, 50) {
        Some(k) => log_asymptote(score, 1.0, k),
        None => capped_ratio(score, max_score),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_url_removes_scheme_www_and_trailing_slash() {
        assert_eq!(strip_url("https://www.example.com/feed/"), "example.com/feed");
        assert_eq!(strip_url("http://lobste.rs"), "lobste.rs");
        assert_eq!(strip_url("mastodon.social"), "mastodon.social");
    }

    #[test]
    fn strip_url_host_drops_www() {
        assert_eq!(strip_url_host("https://www.reddit.com/r/rust").as_deref(), Some("reddit.com"));
        assert_eq!(strip_url_host("not a url"), None);
    }

    #[test]
    fn html_is_flattened_and_entities_decoded() {
        let out = extract_text_from_html("<p>Tom &amp; <a href=\"x\">Jerry</a></p>");
        assert_eq!(out, "Tom & Jerry");
        // A bare comparison is not a tag.
        assert_eq!(extract_text_from_html("a < b"), "a < b");
    }

    #[test]
    fn one_line_title_collapses_and_truncates() {
        assert_eq!(one_line_title("  hello \n  world ", 50), "hello world");
        assert_eq!(one_line_title("abcdefghij", 5), "abcd…");
    }

    #[test]
    fn shorten_description_strips_markup() {
        let out = shorten_description("<p>Line one\nline <em>two</em></p>", 12);
        assert_eq!(out, "Line one lin…");
    }

    #[test]
    fn log_asymptote_starts_at_zero_and_stays_below_limit() {
        assert_eq!(log_asymptote(0.0, 1.0, 0.5), 0.0);
        assert_eq!(log_asymptote(-5.0, 1.0, 0.5), 0.0);
        let v = log_asymptote(10.0, 1.0, 0.5);
        assert!((v - 0.642).abs() < 0.01, "{v}");
        assert!(log_asymptote(1e12, 1.0, 0.5) < 1.0);
    }

    #[test]
    fn fitted_rate_hits_target() {
        let k = fit_growth_rate(20_000.0, 0.8, 1.0, 50).unwrap();
        assert!((log_asymptote(20_000.0, 1.0, k) - 0.8).abs() < 1e-3);
        assert!(fit_growth_rate(0.0, 0.8, 1.0, 50).is_none());
        assert!(fit_growth_rate(10.0, 1.2, 1.0, 50).is_none());
    }

    #[test]
    fn norm_social_score_maps_max_near_point_eight() {
        assert_eq!(norm_social_score(0.0, 1000.0), 0.0);
        let at_max = norm_social_score(1000.0, 1000.0);
        assert!((at_max - 0.8).abs() < 1e-3, "{at_max}");
        assert!(norm_social_score(10_000.0, 1000.0) > at_max);
        assert!(norm_social_score(10_000.0, 1000.0) < 1.0);
    }

    #[test]
    fn capitalize_handles_empty() {
        assert_eq!(capitalize("hottest"), "Hottest");
        assert_eq!(capitalize(""), "");
    }
}
