use crate::schema::normalize_column_name;
use strsim::jaro_winkler;

/// Scores within this distance of the best score count as a tie.
pub const TIE_EPSILON: f64 = 1e-9;

/// Score for a mention that equals one underscore-separated part of a name
/// ("sales" against `sales_2023`).
const PART_MATCH_SCORE: f64 = 0.9;

/// Common abbreviations, matched in both directions against whole mentions and
/// against single name parts.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("department", "dept"),
    ("quantity", "qty"),
    ("amount", "amt"),
    ("employee", "emp"),
    ("number", "num"),
    ("percentage", "pct"),
    ("average", "avg"),
    ("identifier", "id"),
    ("description", "desc"),
    ("category", "cat"),
];

/// Outcome of matching one question mention against the column names.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnMatch {
    /// Exactly one column has the best score above the threshold.
    Unique { column: String, score: f64 },
    /// Several columns share the best score above the threshold.
    Ambiguous { candidates: Vec<String>, score: f64 },
    NoMatch,
}

impl ColumnMatch {
    pub fn score(&self) -> f64 {
        match self {
            ColumnMatch::Unique { score, .. } | ColumnMatch::Ambiguous { score, .. } => *score,
            ColumnMatch::NoMatch => 0.0,
        }
    }

    pub fn is_match(&self) -> bool {
        !matches!(self, ColumnMatch::NoMatch)
    }
}

/// Fuzzy matcher for question words against normalized column names
pub struct FuzzyMatcher {
    /// Similarity threshold (0.0-1.0) a column must reach to be a candidate
    pub similarity_threshold: f64,
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self {
            similarity_threshold: crate::config::DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

impl FuzzyMatcher {
    pub fn new(threshold: f64) -> Self {
        Self {
            similarity_threshold: threshold,
        }
    }

    /// Bring a mention into the same shape as a normalized column name.
    pub fn normalize_string(&self, s: &str) -> String {
        normalize_column_name(s)
    }

    /// Similarity between a mention and a normalized column name, 0.0 to 1.0.
    ///
    /// The mention is expanded into its singular, plural and abbreviated forms
    /// and the best form wins:
    /// - equal to the name, or to the name without underscores: 1.0
    /// - equal to one underscore-separated part of the name: 0.9
    /// - otherwise Jaro-Winkler similarity
    pub fn similarity(&self, mention: &str, column: &str) -> f64 {
        let mention = self.normalize_string(mention);
        let compact_column = column.replace('_', "");
        let parts: Vec<&str> = column.split('_').filter(|p| !p.is_empty()).collect();

        variants(&mention)
            .iter()
            .map(|variant| {
                if variant == column || variant.replace('_', "") == compact_column {
                    1.0
                } else if parts.len() > 1 && parts.iter().any(|p| p == variant) {
                    PART_MATCH_SCORE
                } else {
                    jaro_winkler(variant, column)
                }
            })
            .fold(0.0, f64::max)
    }

    /// Check if a mention is similar enough to a column to be considered a match
    pub fn is_match(&self, mention: &str, column: &str) -> bool {
        self.similarity(mention, column) >= self.similarity_threshold
    }

    /// Find the best column for a mention. Ties at the best score are never
    /// broken; they are reported as ambiguous.
    pub fn match_columns<'a, I>(&self, mention: &str, columns: I) -> ColumnMatch
    where
        I: IntoIterator<Item = &'a str>,
    {
        let scored: Vec<(&str, f64)> = columns
            .into_iter()
            .map(|c| (c, self.similarity(mention, c)))
            .filter(|(_, score)| *score >= self.similarity_threshold)
            .collect();

        let best = scored.iter().map(|(_, s)| *s).fold(f64::NEG_INFINITY, f64::max);
        let mut winners: Vec<String> = scored
            .iter()
            .filter(|(_, s)| (best - s).abs() <= TIE_EPSILON)
            .map(|(c, _)| c.to_string())
            .collect();

        match winners.len() {
            0 => ColumnMatch::NoMatch,
            1 => ColumnMatch::Unique {
                column: winners.remove(0),
                score: best,
            },
            _ => ColumnMatch::Ambiguous {
                candidates: winners,
                score: best,
            },
        }
    }
}

/// The mention itself plus its singular/plural forms, each also with
/// abbreviations expanded or contracted part by part.
fn variants(mention: &str) -> Vec<String> {
    let mut forms = vec![mention.to_string()];
    for form in [singular(mention), plural(mention)].into_iter().flatten() {
        if !forms.contains(&form) {
            forms.push(form);
        }
    }

    let mut out = forms.clone();
    for form in &forms {
        let swapped: Vec<String> = form
            .split('_')
            .map(|part| abbreviation_of(part).unwrap_or(part).to_string())
            .collect();
        let swapped = swapped.join("_");
        if !out.contains(&swapped) {
            out.push(swapped);
        }
    }
    out
}

fn abbreviation_of(word: &str) -> Option<&'static str> {
    ABBREVIATIONS.iter().find_map(|(long, short)| {
        if word == *long {
            Some(*short)
        } else if word == *short {
            Some(*long)
        } else {
            None
        }
    })
}

fn singular(word: &str) -> Option<String> {
    if word.len() <= 3 {
        return None;
    }
    if let Some(stem) = word.strip_suffix("ies") {
        return Some(format!("{}y", stem));
    }
    for suffix in ["sses", "xes", "ches", "shes"] {
        if word.ends_with(suffix) {
            return Some(word[..word.len() - 2].to_string());
        }
    }
    if word.ends_with('s') && !word.ends_with("ss") {
        return Some(word[..word.len() - 1].to_string());
    }
    None
}

fn plural(word: &str) -> Option<String> {
    if word.is_empty() || word.ends_with('s') || word.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if let Some(stem) = word.strip_suffix('y') {
        if !stem.ends_with(|c: char| "aeiou".contains(c)) {
            return Some(format!("{}ies", stem));
        }
    }
    Some(format!("{}s", word))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_and_compact_names() {
        let matcher = FuzzyMatcher::default();
        assert_eq!(matcher.similarity("age", "age"), 1.0);
        assert_eq!(matcher.similarity("Annual Income", "annual_income"), 1.0);
        assert_eq!(matcher.similarity("annualincome", "annual_income"), 1.0);
    }

    #[test]
    fn test_synonyms() {
        let matcher = FuzzyMatcher::default();
        assert_eq!(matcher.similarity("ages", "age"), 1.0);
        assert_eq!(matcher.similarity("department", "dept"), 1.0);
        assert_eq!(matcher.similarity("departments", "dept"), 1.0);
        assert_eq!(matcher.similarity("salary", "salaries"), 1.0);
    }

    #[test]
    fn test_is_match() {
        let matcher = FuzzyMatcher::new(0.85);
        assert!(matcher.is_match("salry", "salary"));
        assert!(!matcher.is_match("employees", "dept"));
        assert!(!matcher.is_match("average", "age"));
    }

    #[test]
    fn test_ties_are_ambiguous() {
        let matcher = FuzzyMatcher::default();
        let outcome = matcher.match_columns("sales", ["sales_2023", "sales_2024", "region"]);
        match outcome {
            ColumnMatch::Ambiguous { candidates, score } => {
                assert_eq!(candidates, vec!["sales_2023", "sales_2024"]);
                assert!(score >= PART_MATCH_SCORE);
            }
            other => panic!("expected ambiguity, got {:?}", other),
        }
    }

    #[test]
    fn test_higher_score_wins() {
        let matcher = FuzzyMatcher::default();
        let outcome = matcher.match_columns("sales_2023", ["sales_2023", "sales_2024"]);
        assert!(matches!(outcome, ColumnMatch::Unique { ref column, .. } if column == "sales_2023"));
        assert_eq!(matcher.match_columns("salary", ["dept", "age"]), ColumnMatch::NoMatch);
    }
}
