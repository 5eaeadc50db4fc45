//! Localized metric descriptions.
//!
//! The table is built once, on first use, and never mutated afterwards.
//! Lookups fall back from `language_REGION` to `language` to the default
//! locale and finally to an empty string.

use std::collections::HashMap;
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

/// Locale whose text is used when the requested one has none.
pub const DEFAULT_LOCALE: &str = "en_US";

lazy_static! {
    static ref LOCALE_TAG: Regex =
        Regex::new(r"^([A-Za-z]{2,3})(?:[-_]([A-Za-z]{2}|[0-9]{3}))?$").expect("locale pattern");
    static ref DESCRIPTIONS: HashMap<&'static str, HashMap<&'static str, &'static str>> = {
        let mut table = HashMap::new();
        table.insert(
            "en_US",
            HashMap::from([
                ("ActiveCount", "The number of connections currently handed out"),
                ("AverageBlockingTime", "The average time spent waiting for a connection"),
                ("CreatedCount", "The number of connections created"),
                ("DestroyedCount", "The number of connections destroyed"),
                ("MaxWaitTime", "The longest time spent waiting for a connection"),
                ("TimedOut", "The number of acquires that timed out"),
                ("TotalBlockingTime", "The total time spent waiting for connections"),
            ]),
        );
        table.insert(
            "de",
            HashMap::from([
                ("ActiveCount", "Anzahl der aktuell ausgegebenen Verbindungen"),
                ("AverageBlockingTime", "Durchschnittliche Wartezeit auf eine Verbindung"),
                ("CreatedCount", "Anzahl der erzeugten Verbindungen"),
                ("DestroyedCount", "Anzahl der geschlossenen Verbindungen"),
                ("MaxWaitTime", "Längste Wartezeit auf eine Verbindung"),
                ("TimedOut", "Anzahl der Anforderungen mit Zeitüberschreitung"),
                ("TotalBlockingTime", "Gesamte Wartezeit auf Verbindungen"),
            ]),
        );
        table
    };
}

/// A language with an optional region, e.g. `en_US` or `de`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locale {
    language: String,
    region: Option<String>,
}

impl Locale {
    #[must_use]
    pub fn new(language: &str, region: Option<&str>) -> Self {
        Self {
            language: language.to_ascii_lowercase(),
            region: region.map(str::to_ascii_uppercase),
        }
    }

    /// Parse `en`, `en_US` or `en-US`. Returns `None` for anything else.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        let caps = LOCALE_TAG.captures(tag.trim())?;
        let language = caps.get(1)?.as_str();
        Some(Self::new(language, caps.get(2).map(|m| m.as_str())))
    }

    /// The locale of [`DEFAULT_LOCALE`].
    #[must_use]
    pub fn default_locale() -> Self {
        Self::new("en", Some("US"))
    }

    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    #[must_use]
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }
}

impl Default for Locale {
    fn default() -> Self {
        Self::default_locale()
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.region {
            Some(region) => write!(f, "{}_{}", self.language, region),
            None => f.write_str(&self.language),
        }
    }
}

/// Look up the description of metric `name` for `locale`. Never fails.
#[must_use]
pub fn describe(name: &str, locale: &Locale) -> String {
    let exact = locale.to_string();
    [exact.as_str(), locale.language(), DEFAULT_LOCALE]
        .into_iter()
        .filter_map(|tag| DESCRIPTIONS.get(tag))
        .find_map(|texts| texts.get(name))
        .map(|text| (*text).to_string())
        .unwrap_or_default()
}

/// Locales with registered text, sorted.
#[must_use]
pub fn available_locales() -> Vec<&'static str> {
    let mut tags: Vec<&'static str> = DESCRIPTIONS.keys().copied().collect();
    tags.sort_unstable();
    tags
}
