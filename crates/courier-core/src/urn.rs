//! Contact identifiers in `scheme:path[?query][#display]` form, loosely
//! following RFC 2141.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrnError {
    #[error("invalid scheme: {0}")]
    InvalidScheme(String),
    #[error("invalid path for scheme {scheme}: {path}")]
    InvalidPath { scheme: String, path: String },
    #[error("malformed urn: {0}")]
    Malformed(String),
}

/// Recognized URN schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Tel,
    Twitter,
    TwitterId,
    Mailto,
    Ext,
    Facebook,
    Telegram,
    Whatsapp,
    Rocketchat,
    Webchat,
    Teams,
    Viber,
    Discord,
    Line,
    Jiochat,
    Wechat,
    Instagram,
    Vk,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Tel => "tel",
            Scheme::Twitter => "twitter",
            Scheme::TwitterId => "twitterid",
            Scheme::Mailto => "mailto",
            Scheme::Ext => "ext",
            Scheme::Facebook => "facebook",
            Scheme::Telegram => "telegram",
            Scheme::Whatsapp => "whatsapp",
            Scheme::Rocketchat => "rocketchat",
            Scheme::Webchat => "webchat",
            Scheme::Teams => "teams",
            Scheme::Viber => "viber",
            Scheme::Discord => "discord",
            Scheme::Line => "line",
            Scheme::Jiochat => "jiochat",
            Scheme::Wechat => "wechat",
            Scheme::Instagram => "instagram",
            Scheme::Vk => "vk",
        }
    }

    fn parse(s: &str) -> Result<Self, UrnError> {
        Ok(match s {
            "tel" => Scheme::Tel,
            "twitter" => Scheme::Twitter,
            "twitterid" => Scheme::TwitterId,
            "mailto" => Scheme::Mailto,
            "ext" => Scheme::Ext,
            "facebook" => Scheme::Facebook,
            "telegram" => Scheme::Telegram,
            "whatsapp" => Scheme::Whatsapp,
            "rocketchat" => Scheme::Rocketchat,
            "webchat" => Scheme::Webchat,
            "teams" => Scheme::Teams,
            "viber" => Scheme::Viber,
            "discord" => Scheme::Discord,
            "line" => Scheme::Line,
            "jiochat" => Scheme::Jiochat,
            "wechat" => Scheme::Wechat,
            "instagram" => Scheme::Instagram,
            "vk" => Scheme::Vk,
            other => return Err(UrnError::InvalidScheme(other.to_string())),
        })
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static TWITTER_HANDLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]{1,15}$").unwrap());
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());
static DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+$").unwrap());
static VIBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_=]{1,24}$").unwrap());
static FACEBOOK_REF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^ref:.+$").unwrap());

/// A contact identifier: `scheme:path[?query][#display]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Urn {
    scheme: Scheme,
    path: String,
    query: Option<String>,
    display: Option<String>,
}

impl Urn {
    /// Construct a URN from its parts without going through the string parser.
    pub fn new(
        scheme: Scheme,
        path: impl Into<String>,
        display: Option<String>,
    ) -> Result<Self, UrnError> {
        let path = path.into();
        if path.is_empty() {
            return Err(UrnError::InvalidPath {
                scheme: scheme.to_string(),
                path,
            });
        }
        Ok(Self {
            scheme,
            path,
            query: None,
            display,
        })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn display(&self) -> Option<&str> {
        self.display.as_deref()
    }

    /// `scheme:path` with no display segment — used as a backend lookup key.
    pub fn identity(&self) -> String {
        format!("{}:{}", self.scheme, self.path)
    }

    /// Parse a URN from its string form.
    pub fn parse(raw: &str) -> Result<Self, UrnError> {
        let scheme_sep = raw
            .find(':')
            .ok_or_else(|| UrnError::Malformed(raw.to_string()))?;
        let (scheme_str, rest) = raw.split_at(scheme_sep);
        let rest = &rest[1..];

        if scheme_str.is_empty() {
            return Err(UrnError::Malformed("empty scheme".into()));
        }
        let scheme = Scheme::parse(scheme_str)?;

        // fragment must come after query if both present
        let (before_fragment, display) = match rest.find('#') {
            Some(idx) => (&rest[..idx], Some(rest[idx + 1..].to_string())),
            None => (rest, None),
        };

        let (path, query) = match before_fragment.find('?') {
            Some(idx) => (
                before_fragment[..idx].to_string(),
                Some(before_fragment[idx + 1..].to_string()),
            ),
            None => (before_fragment.to_string(), None),
        };

        if path.is_empty() {
            return Err(UrnError::InvalidPath {
                scheme: scheme.to_string(),
                path,
            });
        }

        Ok(Self {
            scheme,
            path,
            query,
            display,
        })
    }

    /// Normalize the path/display for the scheme, optionally using a
    /// country code (ISO 3166-1 alpha-2) for `tel` numbers.
    pub fn normalize(&self, country: Option<&str>) -> Urn {
        let mut out = self.clone();
        match self.scheme {
            Scheme::Tel => {
                out.path = normalize_tel(&self.path, country);
            }
            Scheme::Twitter => {
                out.path = self.path.trim_start_matches('@').to_lowercase();
            }
            Scheme::TwitterId => {
                out.path = self.path.to_lowercase();
                out.display = out
                    .display
                    .map(|d| d.trim_start_matches('@').to_lowercase());
            }
            Scheme::Mailto => {
                out.path = self.path.to_lowercase();
            }
            Scheme::Ext => {
                // case preserved
            }
            _ => {
                out.path = self.path.trim().to_string();
            }
        }
        out
    }

    /// Validate the path/display against the scheme's expected shape.
    pub fn validate(&self) -> Result<(), UrnError> {
        let ok = match self.scheme {
            Scheme::Tel => phonenumber::parse(None, &self.path)
                .map(|n| phonenumber::is_valid(&n))
                .unwrap_or(false),
            Scheme::Twitter => TWITTER_HANDLE_RE.is_match(&self.path),
            Scheme::TwitterId => {
                DIGITS_RE.is_match(&self.path)
                    && self
                        .display
                        .as_deref()
                        .map(|d| TWITTER_HANDLE_RE.is_match(d))
                        .unwrap_or(true)
            }
            Scheme::Mailto => EMAIL_RE.is_match(&self.path),
            Scheme::Facebook => DIGITS_RE.is_match(&self.path) || FACEBOOK_REF_RE.is_match(&self.path),
            Scheme::Telegram | Scheme::Whatsapp => DIGITS_RE.is_match(&self.path),
            Scheme::Viber => VIBER_RE.is_match(&self.path),
            Scheme::Ext => true,
            _ => !self.path.trim().is_empty(),
        };
        if ok {
            Ok(())
        } else {
            Err(UrnError::InvalidPath {
                scheme: self.scheme.to_string(),
                path: self.path.clone(),
            })
        }
    }

    /// Human-friendly rendering: prefers the display segment, falls back to
    /// a scheme-aware rendering of the path.
    pub fn format(&self) -> String {
        if let Some(d) = &self.display {
            return d.clone();
        }
        match self.scheme {
            Scheme::Twitter | Scheme::TwitterId => format!("@{}", self.path),
            _ => self.path.clone(),
        }
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.path)?;
        if let Some(q) = &self.query {
            write!(f, "?{q}")?;
        }
        if let Some(d) = &self.display {
            write!(f, "#{d}")?;
        }
        Ok(())
    }
}

impl Serialize for Urn {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Urn {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Urn::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Strip non `[0-9a-z+]` characters, repair Excel-corrupted exports
/// (`E+11`/`E+12` scientific-notation suffixes), and attempt to parse with
/// the given country as an E.164 phone number. Falls back to a lowercased
/// copy of the input on parse failure, matching the tolerant behavior
/// providers that accept free-form `mobile=` query params rely on.
pub fn normalize_tel(raw: &str, country: Option<&str>) -> String {
    let upper = raw.to_ascii_uppercase();
    let mut cleaned: String = if upper.ends_with("E+11") || upper.ends_with("E+12") {
        // Excel turned a long phone number into scientific notation (e.g.
        // "2.54791E+11"); the exponent's 'E' is gone by the time the
        // digit-only filter below runs, so this check must run against the
        // raw input. The safest recovery is to drop everything but digits.
        raw.chars().filter(|c| c.is_ascii_digit()).collect()
    } else {
        raw.chars()
            .filter(|c| c.is_ascii_digit() || *c == '+' || c.is_ascii_lowercase())
            .collect()
    };

    if !cleaned.starts_with('+') && !cleaned.is_empty() {
        cleaned = format!("+{cleaned}");
    }

    let region = country.and_then(|c| c.parse::<phonenumber::country::Id>().ok());
    match phonenumber::parse(region, &cleaned) {
        Ok(n) if phonenumber::is_valid(&n) => {
            n.format().mode(phonenumber::Mode::E164).to_string()
        }
        _ => raw.to_lowercase(),
    }
}
