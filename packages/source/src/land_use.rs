//! Land-use categorization.
//!
//! Maps free-text land-use descriptions ("SFR", "2 FAMILY DWELLING",
//! "VACANT COMMERCIAL LAND") onto the closed [`LandUseCategory`] set. Rules
//! are data: an ordered list of `(category, patterns)` pairs evaluated top
//! to bottom, case-insensitively, first match wins. Text that matches
//! nothing is [`LandUseCategory::Other`].
//!
//! Order matters. Mixed-use and vacant come first because their
//! descriptions usually also mention a residential or commercial use
//! ("VACANT RESIDENTIAL LOT", "MIXED USE RETAIL/APARTMENTS").

use parcel_map_parcel_models::LandUseCategory;
use regex::Regex;
use serde::Deserialize;

/// One categorization rule as written in a source definition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LandUseRule {
    /// Category assigned when any pattern matches.
    pub category: LandUseCategory,
    /// Regular expressions, matched case-insensitively anywhere in the text.
    pub patterns: Vec<String>,
}

/// The built-in rule table, in evaluation order.
const DEFAULT_RULES: &[(LandUseCategory, &[&str])] = &[
    (
        LandUseCategory::MixedUse,
        &[
            r"mixed[\s_-]*use",
            r"\bcommercial\s*/\s*residential\b",
            r"\bresidential\s*/\s*commercial\b",
            r"\bstore\s*(?:&|and|w/)\s*(?:apt|apartment|dwelling)",
        ],
    ),
    (
        LandUseCategory::Vacant,
        &[r"\bvacant\b", r"\bundeveloped\b", r"\bunimproved\b", r"\bbare land\b"],
    ),
    (
        LandUseCategory::Hotel,
        &[r"\bhotels?\b", r"\bmotels?\b", r"\blodging\b", r"\binns?\b"],
    ),
    (
        LandUseCategory::Government,
        &[
            r"\bgovernment\b",
            r"\bmunicipal\b",
            r"\bfederal\b",
            r"\bcounty\b",
            r"\bpublic\b",
            r"\bschools?\b",
            r"\bcourthouse\b",
            r"\bfire station\b",
            r"\bpolice\b",
        ],
    ),
    (
        LandUseCategory::Industrial,
        &[
            r"\bindustrial\b",
            r"\bwarehouse",
            r"\bmanufactur",
            r"\bfactory\b",
            r"\bdistribution\b",
            r"\butility\b",
        ],
    ),
    (
        LandUseCategory::Office,
        &[r"\boffices?\b", r"\bprofessional\b", r"\bmedical\b", r"\bbank\b"],
    ),
    (
        LandUseCategory::Retail,
        &[
            r"\bretail\b",
            r"\bstores?\b",
            r"\bshop",
            r"\brestaurant\b",
            r"\bsupermarket\b",
            r"\bcommercial\b",
        ],
    ),
    (
        LandUseCategory::MultiFamily,
        &[
            r"\bmulti[\s_-]*family\b",
            r"\bapartments?\b",
            r"\bapts?\b",
            r"\bcondo",
            r"\bduplex\b",
            r"\btriplex\b",
            r"\b(?:two|three|four|[2-9])[\s-]*(?:family|fam|unit)",
        ],
    ),
    (
        LandUseCategory::SingleFamily,
        &[
            r"\bsingle[\s_-]*family\b",
            r"\bsfr\b",
            r"\b(?:one|1)[\s-]*(?:family|fam)\b",
            r"\btownhouse\b",
            r"\bdetached\b",
            r"\bresidential\b",
            r"\bdwelling\b",
        ],
    ),
];

/// Returns the built-in rule table.
#[must_use]
pub fn default_rules() -> Vec<LandUseRule> {
    DEFAULT_RULES
        .iter()
        .map(|(category, patterns)| LandUseRule {
            category: *category,
            patterns: patterns.iter().map(ToString::to_string).collect(),
        })
        .collect()
}

/// A compiled, ordered rule table.
#[derive(Debug, Clone)]
pub struct LandUseClassifier {
    rules: Vec<(LandUseCategory, Vec<Regex>)>,
}

impl LandUseClassifier {
    /// Compiles `rules`. An empty table compiles the built-in defaults.
    ///
    /// # Errors
    ///
    /// Returns [`regex::Error`] if any pattern is invalid.
    pub fn new(rules: &[LandUseRule]) -> Result<Self, regex::Error> {
        if rules.is_empty() {
            return Self::new(&default_rules());
        }
        let rules = rules
            .iter()
            .map(|rule| {
                let compiled = rule
                    .patterns
                    .iter()
                    .map(|p| Regex::new(&format!("(?i){p}")))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((rule.category, compiled))
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { rules })
    }

    /// Categorizes a land-use description.
    #[must_use]
    pub fn classify(&self, raw: &str) -> LandUseCategory {
        let raw = raw.trim();
        if raw.is_empty() {
            return LandUseCategory::Other;
        }
        self.rules
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|p| p.is_match(raw)))
            .map_or(LandUseCategory::Other, |(category, _)| *category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(raw: &str) -> LandUseCategory {
        LandUseClassifier::new(&[]).unwrap().classify(raw)
    }

    #[test]
    fn classifies_common_descriptions() {
        assert_eq!(classify("SFR"), LandUseCategory::SingleFamily);
        assert_eq!(classify("Single Family Residential"), LandUseCategory::SingleFamily);
        assert_eq!(classify("2 FAMILY DWELLING"), LandUseCategory::MultiFamily);
        assert_eq!(classify("Apartments 5+ units"), LandUseCategory::MultiFamily);
        assert_eq!(classify("Retail Store"), LandUseCategory::Retail);
        assert_eq!(classify("OFFICE BUILDING"), LandUseCategory::Office);
        assert_eq!(classify("Light Industrial"), LandUseCategory::Industrial);
        assert_eq!(classify("Motel"), LandUseCategory::Hotel);
        assert_eq!(classify("Municipal Building"), LandUseCategory::Government);
    }

    #[test]
    fn earlier_rules_win() {
        assert_eq!(classify("VACANT RESIDENTIAL LOT"), LandUseCategory::Vacant);
        assert_eq!(
            classify("MIXED USE RETAIL/APARTMENTS"),
            LandUseCategory::MixedUse
        );
        assert_eq!(classify("Commercial/Residential"), LandUseCategory::MixedUse);
    }

    #[test]
    fn unrecognized_text_is_other() {
        assert_eq!(classify("Cemetery"), LandUseCategory::Other);
        assert_eq!(classify(""), LandUseCategory::Other);
        assert_eq!(classify("   "), LandUseCategory::Other);
    }

    #[test]
    fn classification_is_deterministic() {
        let classifier = LandUseClassifier::new(&[]).unwrap();
        for raw in ["SFR", "Cemetery", "Hotel", "Duplex"] {
            assert_eq!(classifier.classify(raw), classifier.classify(raw));
        }
    }

    #[test]
    fn custom_rules_replace_defaults() {
        let rules = vec![LandUseRule {
            category: LandUseCategory::Retail,
            patterns: vec!["^R".to_string()],
        }];
        let classifier = LandUseClassifier::new(&rules).unwrap();
        assert_eq!(classifier.classify("r-2"), LandUseCategory::Retail);
        assert_eq!(classifier.classify("SFR"), LandUseCategory::Other);
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let rules = vec![LandUseRule {
            category: LandUseCategory::Retail,
            patterns: vec!["(unclosed".to_string()],
        }];
        assert!(LandUseClassifier::new(&rules).is_err());
    }
}
