use url::Url;

use crate::{Error, Result};

/// Domains the agent must never navigate to on the model's behalf.
pub const BLOCKED_DOMAINS: &[&str] = &[
    "maliciousbook.com",
    "evilvideos.com",
    "darkwebforum.com",
    "shadytok.com",
    "suspiciouspins.com",
    "ilanbigio.com",
];

/// Host-based URL blocklist. A host matches a domain when it equals it or is
/// one of its subdomains.
#[derive(Debug, Clone)]
pub struct Blocklist {
    domains: Vec<String>,
}

impl Default for Blocklist {
    fn default() -> Self {
        Self {
            domains: BLOCKED_DOMAINS.iter().map(|d| d.to_string()).collect(),
        }
    }
}

impl Blocklist {
    /// Built-in domains plus `extra`.
    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::default();
        for domain in extra {
            let domain = domain.as_ref().trim().trim_start_matches('.').to_lowercase();
            if !domain.is_empty() && !list.domains.contains(&domain) {
                list.domains.push(domain);
            }
        }
        list
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    /// Unparseable URLs and URLs without a host are not blocklisted.
    pub fn is_blocklisted(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let host = host.to_lowercase();
        self.domains
            .iter()
            .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
    }

    pub fn check(&self, url: &str) -> Result<()> {
        if self.is_blocklisted(url) {
            return Err(Error::Blocklisted(url.to_string()));
        }
        Ok(())
    }
}
