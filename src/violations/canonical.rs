use std::fmt;

use reqwest::Url;
use tracing::warn;

/// Normalized URL used as the cache key for a page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalUrl(String);

impl CanonicalUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Map any URL string onto its canonical form. Never fails: unparseable input
/// comes back trimmed and lower-cased.
///
/// Scheme is forced to `https`, leading `www.` labels are dropped, trailing slashes
/// are stripped (empty path becomes `/`), query pairs are sorted by key then
/// value, and the fragment is discarded.
pub fn canonicalize(url: &str) -> CanonicalUrl {
    let cleaned = url.trim().to_lowercase();
    match try_canonicalize(&cleaned) {
        Ok(canonical) => CanonicalUrl(canonical),
        Err(e) => {
            warn!(url = %cleaned, error = %e, "URL canonicalization failed, using input as key");
            CanonicalUrl(cleaned)
        }
    }
}

fn try_canonicalize(cleaned: &str) -> anyhow::Result<String> {
    let with_scheme = if cleaned.contains("://") {
        cleaned.to_string()
    } else {
        format!("https://{}", cleaned)
    };
    let parsed = Url::parse(&with_scheme)?;

    let host = parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| anyhow::anyhow!("URL has no host"))?;
    let mut host = host;
    while let Some(rest) = host.strip_prefix("www.") {
        host = rest;
    }

    // 443 is implied once the scheme is https.
    let authority = match parsed.port().filter(|p| *p != 443) {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    let trimmed = parsed.path().trim_end_matches('/');
    let path = if trimmed.is_empty() { "/" } else { trimmed };

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();

    let mut out = Url::parse(&format!("https://{}{}", authority, path))?;
    if !pairs.is_empty() {
        out.query_pairs_mut().extend_pairs(pairs);
    }

    Ok(out.to_string().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_www_and_trailing_slash_collapse() {
        assert_eq!(canonicalize("http://www.a.com/"), canonicalize("https://a.com"));
        assert_eq!(canonicalize("https://a.com").as_str(), "https://a.com/");
    }

    #[test]
    fn test_repeated_www_labels_are_all_dropped() {
        assert_eq!(canonicalize("https://www.www.a.com").as_str(), "https://a.com/");
        assert_eq!(canonicalize("www.www.www.a.com/x"), canonicalize("a.com/x"));
    }

    #[test]
    fn test_query_order_is_irrelevant() {
        assert_eq!(
            canonicalize("https://a.com?x=1&y=2"),
            canonicalize("https://a.com?y=2&x=1")
        );
        assert_eq!(
            canonicalize("https://a.com/p?b=2&a=9&a=1").as_str(),
            "https://a.com/p?a=1&a=9&b=2"
        );
    }

    #[test]
    fn test_fragment_is_dropped() {
        assert_eq!(
            canonicalize("https://a.com/docs/#section-2").as_str(),
            "https://a.com/docs"
        );
    }

    #[test]
    fn test_case_and_whitespace_are_normalized() {
        assert_eq!(
            canonicalize("  HTTPS://WWW.Example.COM/About/  ").as_str(),
            "https://example.com/about"
        );
    }

    #[test]
    fn test_missing_scheme_defaults_to_https() {
        assert_eq!(canonicalize("example.com/page").as_str(), "https://example.com/page");
    }

    #[test]
    fn test_non_default_port_is_kept() {
        assert_eq!(
            canonicalize("http://localhost:8080/app/").as_str(),
            "https://localhost:8080/app"
        );
        assert_eq!(canonicalize("http://a.com:443/"), canonicalize("https://a.com"));
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        let samples = [
            "http://www.a.com/",
            "https://a.com?y=2&x=1#frag",
            "HTTP://Shop.Example.com/caf\u{e9}/?q=a b&z=%2F",
            "example.com//nested//",
            "http://a.com:443/x",
            "https://www.www.a.com",
            "not a url at all",
            "",
        ];
        for sample in samples {
            let once = canonicalize(sample);
            let twice = canonicalize(once.as_str());
            assert_eq!(once, twice, "not idempotent for {:?}", sample);
        }
    }

    #[test]
    fn test_unparseable_input_falls_back_to_cleaned_string() {
        assert_eq!(canonicalize("  Not A URL  ").as_str(), "not a url");
    }
}
