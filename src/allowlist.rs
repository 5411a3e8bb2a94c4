use std::collections::HashSet;

use url::Url;

pub const DEFAULT_ALLOWED_DOMAINS: [&str; 6] = [
    "twitter.com",
    "x.com",
    "instagram.com",
    "tiktok.com",
    "youtube.com",
    "youtu.be",
];

/// Set of video platform domains requests may point at. A host matches a
/// domain when it is the domain itself or any subdomain of it.
#[derive(Debug, Clone)]
pub struct Allowlist {
    domains: HashSet<String>,
}

impl Allowlist {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains = domains
            .into_iter()
            .filter_map(|domain| normalize_host(domain.as_ref()))
            .collect();
        Self { domains }
    }

    pub fn is_allowed(&self, input: &str) -> bool {
        let Ok(parsed) = Url::parse(input.trim()) else {
            return false;
        };

        if !matches!(parsed.scheme(), "http" | "https") {
            return false;
        }

        let Some(host) = parsed.host_str().and_then(normalize_host) else {
            return false;
        };

        self.matches_host(&host)
    }

    fn matches_host(&self, host: &str) -> bool {
        if self.domains.contains(host) {
            return true;
        }

        // walk parent domains: a.b.c -> b.c -> c
        let mut rest = host;
        while let Some((_, parent)) = rest.split_once('.') {
            if self.domains.contains(parent) {
                return true;
            }
            rest = parent;
        }

        false
    }

    pub fn domains(&self) -> Vec<&str> {
        let mut domains = self.domains.iter().map(String::as_str).collect::<Vec<_>>();
        domains.sort_unstable();
        domains
    }
}

impl Default for Allowlist {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_DOMAINS)
    }
}

fn normalize_host(value: &str) -> Option<String> {
    let host = value.trim().trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() { None } else { Some(host) }
}
