//! Series identifiers and the entitlement keys that unlock them.
//!
//! Series are known by a number (`2`) in the catalog, but store products and
//! entitlements have been named both ways over time: `series_2_monthly`,
//! `series_b_access`. [`SeriesAliases`] is the single table that relates the
//! two spellings.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

const PREFIX: &str = "series_";

static PRODUCT_SERIES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[^a-z0-9])series_([0-9]+|[a-z])(?:[^a-z0-9]|$)").expect("static pattern is valid")
});

/// Numeric series ids and their letter codes (`1 <=> a`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesAliases {
    by_number: BTreeMap<String, String>,
}

impl Default for SeriesAliases {
    fn default() -> Self {
        let by_number = (b'a'..=b'z').enumerate().map(|(i, letter)| ((i + 1).to_string(), (letter as char).to_string()));
        Self { by_number: by_number.collect() }
    }
}

impl SeriesAliases {
    /// The built-in table, with `overrides` (number to code) taking precedence.
    pub fn with_overrides(overrides: &BTreeMap<String, String>) -> Self {
        let mut aliases = Self::default();
        for (number, code) in overrides {
            let number = normalize(number);
            let code = normalize(code);
            if number.is_empty() || code.is_empty() {
                tracing::warn!(number = %number, code = %code, "Ignoring empty series alias");
                continue;
            }
            // A code now belongs to exactly one number.
            aliases.by_number.retain(|_, existing| *existing != code);
            aliases.by_number.insert(number, code);
        }
        aliases
    }

    fn code_for(&self, number: &str) -> Option<&str> {
        self.by_number.get(number).map(String::as_str)
    }

    fn number_for(&self, code: &str) -> Option<&str> {
        self.by_number.iter().find(|(_, c)| c.as_str() == code).map(|(n, _)| n.as_str())
    }

    /// Key fragments that identify `series_id`: its numeric and letter-coded
    /// spellings, e.g. `["series_1", "series_a"]`.
    pub fn fragments(&self, series_id: &str) -> Vec<String> {
        let id = normalize(series_id);
        if id.is_empty() {
            return Vec::new();
        }
        let alias = match self.code_for(&id) {
            Some(code) => Some(code),
            None => self.number_for(&id),
        };
        std::iter::once(id.as_str()).chain(alias).map(|part| format!("{PREFIX}{part}")).collect()
    }

    /// The first active key that grants `series_id`.
    pub fn matching_key<'a>(&self, series_id: &str, keys: impl IntoIterator<Item = &'a String>) -> Option<&'a String> {
        let fragments = self.fragments(series_id);
        keys.into_iter().find(|key| {
            let key = key.to_ascii_lowercase();
            fragments.iter().any(|fragment| contains_bounded(&key, fragment))
        })
    }

    /// The numeric series id a store product unlocks, for upsell routing.
    ///
    /// ```
    /// use lectern_entitlement::SeriesAliases;
    ///
    /// let aliases = SeriesAliases::default();
    /// assert_eq!(aliases.series_id_from_product("series_2_monthly").as_deref(), Some("2"));
    /// assert_eq!(aliases.series_id_from_product("com.app.series_b").as_deref(), Some("2"));
    /// assert_eq!(aliases.series_id_from_product("tip_jar"), None);
    /// ```
    pub fn series_id_from_product(&self, product_id: &str) -> Option<String> {
        let captured = PRODUCT_SERIES.captures(product_id)?.get(1)?.as_str().to_ascii_lowercase();
        if captured.bytes().all(|b| b.is_ascii_digit()) {
            return Some(captured.trim_start_matches('0').to_string()).filter(|id| !id.is_empty());
        }
        Some(self.number_for(&captured).map_or(captured.clone(), str::to_string))
    }
}

/// Lowercase, trimmed, without any `series_` prefix.
fn normalize(series_id: &str) -> String {
    let id = series_id.trim().to_ascii_lowercase();
    match id.strip_prefix(PREFIX) {
        Some(rest) => rest.to_string(),
        None => id,
    }
}

/// `haystack` contains `fragment` with no letter or digit directly on either
/// side, so `series_1` is found in `series_1_monthly` but not in `series_10`.
fn contains_bounded(haystack: &str, fragment: &str) -> bool {
    haystack.match_indices(fragment).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + fragment.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn keys(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[rstest]
    #[case("1", &["series_a_access"], true)]
    #[case("1", &["series_1"], true)]
    #[case("1", &["series_1_monthly"], true)]
    #[case("1", &["premium:series_1"], true)]
    #[case("1", &["SERIES_A"], true)]
    #[case("series_2", &["series_b_yearly"], true)]
    #[case("b", &["series_2"], true)]
    #[case("1", &["series_10"], false)]
    #[case("1", &["series_ab"], false)]
    #[case("1", &["myseries_1"], false)]
    #[case("1", &[], false)]
    #[case("3", &["series_1", "series_2"], false)]
    fn delimiter_aware_matching(#[case] series: &str, #[case] active: &[&str], #[case] granted: bool) {
        let aliases = SeriesAliases::default();
        let active = keys(active);
        assert_eq!(aliases.matching_key(series, &active).is_some(), granted);
    }

    #[test]
    fn fragments_cover_both_spellings() {
        let aliases = SeriesAliases::default();
        assert_eq!(aliases.fragments("1"), vec!["series_1", "series_a"]);
        assert_eq!(aliases.fragments(" A "), vec!["series_a", "series_1"]);
        assert_eq!(aliases.fragments("99"), vec!["series_99"]);
        assert!(aliases.fragments("  ").is_empty());
    }

    #[test]
    fn overrides_replace_built_in_codes() {
        let overrides = BTreeMap::from([("27".to_string(), "a".to_string())]);
        let aliases = SeriesAliases::with_overrides(&overrides);
        assert_eq!(aliases.fragments("27"), vec!["series_27", "series_a"]);
        assert_eq!(aliases.fragments("1"), vec!["series_1"]);
    }

    #[rstest]
    #[case("series_2_monthly", Some("2"))]
    #[case("SERIES_12", Some("12"))]
    #[case("app.series_c.annual", Some("3"))]
    #[case("series_zz", None)]
    #[case("bundle", None)]
    fn product_to_series(#[case] product: &str, #[case] expected: Option<&str>) {
        assert_eq!(SeriesAliases::default().series_id_from_product(product).as_deref(), expected);
    }
}
