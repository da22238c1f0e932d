use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::QueryError;

/// How graph context is gathered for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphStrategy {
    /// Entity-focused traversal from entities named in the query.
    Local,
    /// SIMILAR-edge navigation from the fused chunks.
    Global,
    /// Local and global together, local first.
    Hybrid,
    /// Pick local or global from the query text.
    #[default]
    Auto,
}

/// A strategy after `Auto` has been decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolvedStrategy {
    Local,
    Global,
    Hybrid,
}

impl GraphStrategy {
    pub fn resolve(self, query: &str) -> ResolvedStrategy {
        match self {
            GraphStrategy::Local => ResolvedStrategy::Local,
            GraphStrategy::Global => ResolvedStrategy::Global,
            GraphStrategy::Hybrid => ResolvedStrategy::Hybrid,
            GraphStrategy::Auto => detect_strategy(query),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GraphStrategy::Local => "local",
            GraphStrategy::Global => "global",
            GraphStrategy::Hybrid => "hybrid",
            GraphStrategy::Auto => "auto",
        }
    }
}

impl ResolvedStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolvedStrategy::Local => "local",
            ResolvedStrategy::Global => "global",
            ResolvedStrategy::Hybrid => "hybrid",
        }
    }

    pub fn includes_local(&self) -> bool {
        matches!(self, ResolvedStrategy::Local | ResolvedStrategy::Hybrid)
    }

    pub fn includes_global(&self) -> bool {
        matches!(self, ResolvedStrategy::Global | ResolvedStrategy::Hybrid)
    }
}

impl fmt::Display for GraphStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ResolvedStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GraphStrategy {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(GraphStrategy::Local),
            "global" => Ok(GraphStrategy::Global),
            "hybrid" => Ok(GraphStrategy::Hybrid),
            "auto" => Ok(GraphStrategy::Auto),
            other => Err(QueryError::Configuration(format!(
                "unknown graph strategy '{other}' (expected local, global, hybrid or auto)"
            ))),
        }
    }
}

// Upper-case tokens such as PPHN, NICU, RDS.
static ABBREVIATION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b[A-Z]{2,6}\b").ok());

// Only a leading boundary so Turkish suffixes still match ("dozu", "tanısı").
static SPECIFIC_PHRASING: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:dose|dosage|treatment for|treatment of|side effects? of|diagnosis of|tedavi|doz|yan etki|tanı)",
    )
    .ok()
});

static BROAD_PHRASING: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:overview|types of|common|summary|genel|türleri|çeşitleri|özet)").ok()
});

const SHORT_QUERY_WORDS: usize = 4;

fn is_match(pattern: &LazyLock<Option<Regex>>, text: &str) -> bool {
    pattern.as_ref().is_some_and(|re| re.is_match(text))
}

/// Approximate classifier behind `GraphStrategy::Auto`.
///
/// Checked in order: abbreviations or specific-entity phrasing select local,
/// broad phrasing selects global, a short noun phrase selects local, and
/// everything else falls back to global.
pub fn detect_strategy(query: &str) -> ResolvedStrategy {
    let query = query.trim();

    if is_match(&ABBREVIATION, query) || is_match(&SPECIFIC_PHRASING, query) {
        return ResolvedStrategy::Local;
    }

    if is_match(&BROAD_PHRASING, query) {
        return ResolvedStrategy::Global;
    }

    let words = query.split_whitespace().count();
    if words > 0 && words <= SHORT_QUERY_WORDS && !query.contains('?') {
        return ResolvedStrategy::Local;
    }

    ResolvedStrategy::Global
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abbreviations_select_local() {
        assert_eq!(
            detect_strategy("How is PPHN managed in the first week of life?"),
            ResolvedStrategy::Local
        );
        assert_eq!(detect_strategy("NICU admission criteria for preterm infants?"), ResolvedStrategy::Local);
    }

    #[test]
    fn specific_phrasing_selects_local() {
        assert_eq!(
            detect_strategy("What is the recommended ampicillin dose for neonates?"),
            ResolvedStrategy::Local
        );
        assert_eq!(
            detect_strategy("what are the side effects of caffeine citrate in newborns?"),
            ResolvedStrategy::Local
        );
        assert_eq!(
            detect_strategy("yenidoğan sepsisinde ampisilin dozu nedir?"),
            ResolvedStrategy::Local
        );
    }

    #[test]
    fn broad_phrasing_selects_global() {
        assert_eq!(
            detect_strategy("give me an overview of neonatal respiratory disorders"),
            ResolvedStrategy::Global
        );
        assert_eq!(
            detect_strategy("what are the common complications of prematurity?"),
            ResolvedStrategy::Global
        );
        assert_eq!(
            detect_strategy("yenidoğan enfeksiyon türleri nelerdir?"),
            ResolvedStrategy::Global
        );
    }

    #[test]
    fn short_noun_phrase_selects_local() {
        assert_eq!(detect_strategy("neonatal jaundice phototherapy"), ResolvedStrategy::Local);
        assert_eq!(detect_strategy("jaundice?"), ResolvedStrategy::Global);
    }

    #[test]
    fn long_questions_fall_back_to_global() {
        assert_eq!(
            detect_strategy("how should a newborn with poor feeding and lethargy be evaluated?"),
            ResolvedStrategy::Global
        );
        assert_eq!(detect_strategy("   "), ResolvedStrategy::Global);
    }

    #[test]
    fn explicit_strategies_bypass_detection() {
        let query = "overview of neonatal sepsis";
        assert_eq!(GraphStrategy::Local.resolve(query), ResolvedStrategy::Local);
        assert_eq!(GraphStrategy::Hybrid.resolve(query), ResolvedStrategy::Hybrid);
        assert_eq!(GraphStrategy::Auto.resolve(query), ResolvedStrategy::Global);
    }

    #[test]
    fn parses_from_config_strings() {
        assert_eq!("Hybrid".parse::<GraphStrategy>().unwrap(), GraphStrategy::Hybrid);
        assert_eq!(" auto ".parse::<GraphStrategy>().unwrap(), GraphStrategy::Auto);
        assert!("entity".parse::<GraphStrategy>().is_err());
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&ResolvedStrategy::Global).unwrap();
        assert_eq!(json, r#""global""#);
        let parsed: GraphStrategy = serde_json::from_str(r#""local""#).unwrap();
        assert_eq!(parsed, GraphStrategy::Local);
    }
}
