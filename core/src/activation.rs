//! Activation events: deep links that carry the host into the authenticator.
//!
//! Only links of the form `onecard://auth/...` are meaningful to the bridge.
//! The filter is fixed at compile time.
//!
//! Links are split leniently, the way the Android `Uri` does: the scheme is the text before the
//! first `:`, taken as written, and the host is the authority after `//` without its user info
//! and port. A link does not need to be a well-formed URI to be routed.

use std::fmt;
use std::str::FromStr;

/// Scheme an activation link must carry.
pub const ELIGIBLE_SCHEME: &str = "onecard";

/// Host an activation link must carry.
pub const ELIGIBLE_HOST: &str = "auth";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Activation link has no scheme")]
    MissingScheme,

    #[error("Activation link {scheme}://{host} is not routed by this bridge")]
    Ineligible { scheme: String, host: String },
}

/// An eligible activation link.
///
/// `raw` is kept exactly as received, so the consumer sees the same string the host was given.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ActivationEvent {
    scheme: String,
    host: String,
    raw: String,
}

impl ActivationEvent {
    /// Parses the raw link, then checks it against the eligibility filter.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let (scheme, rest) = split_scheme(raw).ok_or(Error::MissingScheme)?;
        let host = authority_host(rest);

        if scheme != ELIGIBLE_SCHEME || host != ELIGIBLE_HOST {
            return Err(Error::Ineligible {
                scheme: scheme.to_owned(),
                host: host.to_owned(),
            });
        }

        Ok(Self {
            scheme: scheme.to_owned(),
            host: host.to_owned(),
            raw: raw.to_owned(),
        })
    }

    /// Checks whether the link would be routed, without keeping it.
    pub fn is_eligible(raw: &str) -> bool {
        Self::parse(raw).is_ok()
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// The link as it was received.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn into_raw(self) -> String {
        self.raw
    }
}

/// Splits `scheme:rest`. The separator must come before any `/`, `?` or `#`.
fn split_scheme(raw: &str) -> Option<(&str, &str)> {
    let end = raw.find(|c| matches!(c, ':' | '/' | '?' | '#'))?;
    if !raw[end..].starts_with(':') || end == 0 {
        return None;
    }

    Some((&raw[..end], &raw[end + 1..]))
}

/// Host of a hierarchical part, or an empty string if there is no authority.
fn authority_host(rest: &str) -> &str {
    let Some(rest) = rest.strip_prefix("//") else {
        return "";
    };

    let end = rest
        .find(|c| matches!(c, '/' | '?' | '#'))
        .unwrap_or(rest.len());
    let authority = &rest[..end];
    let host = match authority.rfind('@') {
        Some(at) => &authority[at + 1..],
        None => authority,
    };

    match host.rfind(':') {
        // A colon inside an IPv6 literal is not a port separator.
        Some(colon) if !host[colon..].contains(']') => &host[..colon],
        _ => host,
    }
}

impl FromStr for ActivationEvent {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ActivationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
