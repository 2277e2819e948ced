//! Rule-based interpreter
//!
//! Works on the lowercased token stream of the question:
//! 1. classify the query kind through `KIND_RULES` (first rule that fires wins)
//! 2. pull out comparison phrases ("under 30", "since 2021-01-01")
//! 3. pull out category values that appear in the data ("IT", "New York")
//! 4. match the remaining content words (and word pairs) against column names
//! 5. bind predicates, the aggregation and the group column
//!
//! A word that directly follows an aggregation keyword, a plot keyword or a
//! grouping keyword names a required column: if it matches nothing the
//! question fails with `ColumnNotFound`. A word that matches several columns
//! equally well always fails with `AmbiguousColumnReference`.

use super::QueryInterpreter;
use crate::config::EngineConfig;
use crate::error::{QueryError, Result};
use crate::fuzzy_matcher::{ColumnMatch, FuzzyMatcher, TIE_EPSILON};
use crate::intent::{
    Aggregation, ChartKind, IntentSource, Interpretation, Literal, Operator, Predicate,
    QueryIntent, QueryKind,
};
use crate::schema::{parse_datetime_str, parse_numeric_str, ColumnType, TableSchema};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::debug;

lazy_static! {
    static ref THOUSANDS: Regex = Regex::new(r"(\d),(\d{3})").unwrap();
    static ref TOKEN: Regex =
        Regex::new(r"-\d[a-z0-9]*(?:[._/:\-][a-z0-9]+)*%?|[a-z0-9]+(?:[._/:\-][a-z0-9]+)*%?").unwrap();
    static ref YEAR: Regex = Regex::new(r"^(19|20)\d{2}$").unwrap();

    /// Every word that takes part in a keyword, phrase or trigger. These are
    /// never matched against column names.
    static ref KEYWORD_WORDS: HashSet<&'static str> = {
        let mut words = HashSet::new();
        let phrases = KIND_RULES
            .iter()
            .flat_map(|rule| rule.keywords.iter().copied())
            .chain(AGGREGATION_KEYWORDS.iter().map(|(k, _)| *k))
            .chain(COMPARISON_PHRASES.iter().map(|(k, _)| *k))
            .chain(DATE_PHRASES.iter().map(|(k, _)| *k))
            .chain(GROUP_TRIGGERS.iter().copied())
            .chain(PLOT_TRIGGERS.iter().copied())
            .chain(CHART_WORDS.iter().map(|(k, _)| *k));
        for phrase in phrases {
            words.extend(phrase.split(' '));
        }
        words
    };
}

struct KindRule {
    kind: QueryKind,
    keywords: &'static [&'static str],
}

/// Kind classification, highest priority first.
const KIND_RULES: &[KindRule] = &[
    KindRule {
        kind: QueryKind::Correlation,
        keywords: &[
            "correlation",
            "correlations",
            "correlate",
            "correlated",
            "relationship",
            "related",
        ],
    },
    KindRule {
        kind: QueryKind::Visualization,
        keywords: &[
            "chart",
            "plot",
            "graph",
            "histogram",
            "scatter",
            "pie",
            "heatmap",
            "visualize",
            "visualise",
        ],
    },
    KindRule {
        kind: QueryKind::Comparison,
        keywords: &["compare", "comparison", "across", "between", "by", "versus", "vs"],
    },
    KindRule {
        kind: QueryKind::Filter,
        keywords: &[
            "under",
            "above",
            "below",
            "over",
            "at least",
            "at most",
            "greater than",
            "less than",
            "more than",
            "fewer than",
            "equal to",
            "equals",
            "is",
            "where",
            "before",
            "after",
            "since",
            "until",
        ],
    },
    KindRule {
        kind: QueryKind::Summary,
        keywords: &[
            "average",
            "mean",
            "total",
            "sum",
            "count",
            "minimum",
            "maximum",
            "how many",
            "number of",
            "unique",
            "distinct",
        ],
    },
];

/// "is" directly after one of these is part of a question, not a filter.
const INTERROGATIVES: &[&str] = &["what", "which", "who", "how", "where", "when"];

const AGGREGATION_KEYWORDS: &[(&str, Aggregation)] = &[
    ("how many", Aggregation::Count),
    ("number of", Aggregation::Count),
    ("count", Aggregation::Count),
    ("average", Aggregation::Mean),
    ("mean", Aggregation::Mean),
    ("avg", Aggregation::Mean),
    ("total", Aggregation::Sum),
    ("sum", Aggregation::Sum),
    ("minimum", Aggregation::Min),
    ("min", Aggregation::Min),
    ("lowest", Aggregation::Min),
    ("smallest", Aggregation::Min),
    ("maximum", Aggregation::Max),
    ("max", Aggregation::Max),
    ("highest", Aggregation::Max),
    ("largest", Aggregation::Max),
    ("unique", Aggregation::DistinctCount),
    ("distinct", Aggregation::DistinctCount),
];

/// Longest phrases first so "no less than" is not read as "less than".
const COMPARISON_PHRASES: &[(&str, Operator)] = &[
    ("no less than", Operator::Gte),
    ("no more than", Operator::Lte),
    ("greater than", Operator::Gt),
    ("more than", Operator::Gt),
    ("less than", Operator::Lt),
    ("fewer than", Operator::Lt),
    ("at least", Operator::Gte),
    ("at most", Operator::Lte),
    ("equal to", Operator::Eq),
    ("equals", Operator::Eq),
    ("under", Operator::Lt),
    ("below", Operator::Lt),
    ("over", Operator::Gt),
    ("above", Operator::Gt),
];

/// Phrases that only take a date (or a bare year).
const DATE_PHRASES: &[(&str, Operator)] = &[
    ("before", Operator::Lt),
    ("after", Operator::Gt),
    ("since", Operator::Gte),
    ("until", Operator::Lte),
];

const GROUP_TRIGGERS: &[&str] = &["by", "per", "across", "each"];

const PLOT_TRIGGERS: &[&str] = &[
    "plot",
    "chart",
    "graph",
    "histogram",
    "visualize",
    "visualise",
    "distribution",
];

const CHART_WORDS: &[(&str, ChartKind)] = &[
    ("pie", ChartKind::Pie),
    ("histogram", ChartKind::Histogram),
    ("scatter", ChartKind::Scatter),
    ("heatmap", ChartKind::Heatmap),
    ("line", ChartKind::Line),
    ("bar", ChartKind::Bar),
];

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "of", "in", "for", "to", "and", "or", "with", "what", "which", "who",
    "how", "where", "when", "is", "are", "was", "were", "be", "me", "show", "give", "tell",
    "list", "find", "display", "get", "all", "every", "do", "does", "did", "have", "has",
    "many", "much", "there", "their", "that", "this", "these", "those", "on", "at", "from",
    "as", "not", "no", "than", "please", "can", "you", "i", "my", "our", "whose", "value",
    "values", "data", "whats",
];

/// Binary labels too common in ordinary English to be read as data values.
const GENERIC_FLAGS: &[&str] = &["yes", "no", "y", "n", "true", "false", "t", "f", "1", "0", "1.0", "0.0"];
const POSITIVE_FLAGS: &[&str] = &["yes", "y", "true", "t", "1", "1.0", "active"];
const NEGATIVE_FLAGS: &[&str] = &["no", "n", "false", "f", "0", "0.0", "inactive"];

/// Lowercase the question, drop thousands separators and split it into
/// word-like tokens. Decimals, dates and snake_case names stay whole, and a
/// minus sign directly before a digit stays on the number.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut lowered = text
        .to_lowercase()
        .replace(|c: char| c == '\'' || c == '\u{2019}', "");
    while THOUSANDS.is_match(&lowered) {
        lowered = THOUSANDS.replace_all(&lowered, "${1}${2}").into_owned();
    }
    TOKEN
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

fn phrase_len_at(tokens: &[String], pos: usize, phrase: &str) -> Option<usize> {
    let words: Vec<&str> = phrase.split(' ').collect();
    let matches = words
        .iter()
        .enumerate()
        .all(|(k, word)| tokens.get(pos + k).map(|t| t == word).unwrap_or(false));
    matches.then_some(words.len())
}

fn phrase_positions(tokens: &[String], phrase: &str) -> Vec<usize> {
    (0..tokens.len())
        .filter(|&pos| phrase_len_at(tokens, pos, phrase).is_some())
        .collect()
}

fn classify(tokens: &[String]) -> QueryKind {
    for rule in KIND_RULES {
        let fired = rule.keywords.iter().any(|keyword| {
            phrase_positions(tokens, keyword).into_iter().any(|pos| {
                let after_interrogative = pos > 0 && INTERROGATIVES.contains(&tokens[pos - 1].as_str());
                !(*keyword == "is" && after_interrogative)
            })
        });
        if fired {
            return rule.kind;
        }
    }
    QueryKind::Summary
}

fn is_literal(word: &str) -> bool {
    parse_numeric_str(word).is_some() || parse_datetime_str(word).is_some()
}

/// A word that may name a column regardless of the table.
fn is_content(word: &str) -> bool {
    !STOPWORDS.contains(&word) && !KEYWORD_WORDS.contains(word) && !is_literal(word)
}

/// Comparison phrase with its literal, e.g. "under 30".
#[derive(Debug)]
struct Phrase {
    start: usize,
    text: String,
    operator: Operator,
    literal: Literal,
    temporal: bool,
}

/// Category value found in the question, with every column that holds it.
#[derive(Debug)]
struct ValueHit {
    start: usize,
    text: String,
    /// (column, label as stored)
    columns: Vec<(String, String)>,
}

#[derive(Debug)]
struct Mention {
    start: usize,
    text: String,
    outcome: ColumnMatch,
}

#[derive(Debug, Clone)]
struct Resolved {
    start: usize,
    column: String,
}

fn extract_phrases(tokens: &[String], consumed: &mut [bool]) -> Vec<Phrase> {
    let candidates: Vec<(&str, Operator, bool)> = COMPARISON_PHRASES
        .iter()
        .map(|(p, op)| (*p, *op, false))
        .chain(DATE_PHRASES.iter().map(|(p, op)| (*p, *op, true)))
        .collect();

    let mut phrases = Vec::new();
    let mut pos = 0;
    while pos < tokens.len() {
        let found = candidates.iter().find_map(|(phrase, op, date_only)| {
            phrase_len_at(tokens, pos, phrase).map(|len| (len, *op, *date_only))
        });
        if let Some((len, op, date_only)) = found {
            let literal = tokens
                .get(pos + len)
                .and_then(|raw| phrase_literal(raw, op, date_only));
            if let Some((operator, literal, temporal)) = literal {
                consumed[pos..=pos + len].fill(true);
                phrases.push(Phrase {
                    start: pos,
                    text: tokens[pos..=pos + len].join(" "),
                    operator,
                    literal,
                    temporal,
                });
                pos += len + 1;
                continue;
            }
        }
        pos += 1;
    }
    phrases
}

/// Literal following a comparison phrase. A bare year after a date phrase
/// covers the whole year: "after 2023" means on or after 2024-01-01.
fn phrase_literal(raw: &str, op: Operator, date_only: bool) -> Option<(Operator, Literal, bool)> {
    if date_only && YEAR.is_match(raw) {
        let year: i32 = raw.parse().ok()?;
        let (operator, year) = match op {
            Operator::Gt => (Operator::Gte, year + 1),
            Operator::Lte => (Operator::Lt, year + 1),
            other => (other, year),
        };
        return Some((operator, Literal::Text(format!("{}-01-01", year)), true));
    }
    if parse_datetime_str(raw).is_some() {
        return Some((op, Literal::Text(raw.to_string()), true));
    }
    if date_only {
        return None;
    }
    parse_numeric_str(raw).map(|n| (op, Literal::Number(n), false))
}

/// Position of the first content word after a trigger that ends at `end`.
fn slot_after(content: &[bool], consumed: &[bool], end: usize) -> Option<usize> {
    let mut pos = end;
    while pos < content.len() && !consumed[pos] && !content[pos] {
        pos += 1;
    }
    (pos < content.len() && !consumed[pos]).then_some(pos)
}

#[derive(Debug, Default)]
struct AggregationHits {
    aggregation: Option<Aggregation>,
    /// End positions of the keywords that expect a column after them.
    trigger_ends: Vec<usize>,
    /// Every token position covered by a keyword that was kept.
    keyword_positions: HashSet<usize>,
}

/// Aggregation named in the question. A one-word keyword that is also the
/// exact name of a column ("total", "count") is read as the column whenever
/// another keyword carries the aggregation.
fn extract_aggregation(tokens: &[String], column_words: &HashSet<usize>) -> AggregationHits {
    let mut hits: Vec<(usize, usize, Aggregation)> = Vec::new();
    for (keyword, op) in AGGREGATION_KEYWORDS {
        for pos in phrase_positions(tokens, keyword) {
            let len = keyword.split(' ').count();
            hits.push((pos, pos + len, *op));
        }
    }
    hits.sort_by_key(|(pos, _, _)| *pos);

    let names_column = |(pos, end, _): &(usize, usize, Aggregation)| end - pos == 1 && column_words.contains(pos);
    if hits.iter().any(|hit| !names_column(hit)) {
        hits.retain(|hit| !names_column(hit));
    }

    let aggregation = if hits.iter().any(|(_, _, op)| *op == Aggregation::DistinctCount) {
        Some(Aggregation::DistinctCount)
    } else {
        hits.first().map(|(_, _, op)| *op)
    };
    AggregationHits {
        aggregation,
        trigger_ends: hits
            .iter()
            .filter(|(_, _, op)| *op != Aggregation::Count)
            .map(|(_, end, _)| *end)
            .collect(),
        keyword_positions: hits.iter().flat_map(|(pos, end, _)| *pos..*end).collect(),
    }
}

fn requested_chart(tokens: &[String]) -> Option<ChartKind> {
    tokens.iter().find_map(|token| {
        CHART_WORDS
            .iter()
            .find(|(word, _)| *word == token.as_str())
            .map(|(_, kind)| *kind)
    })
}

pub struct RuleBasedInterpreter {
    matcher: FuzzyMatcher,
}

impl Default for RuleBasedInterpreter {
    fn default() -> Self {
        Self::new(FuzzyMatcher::default())
    }
}

impl RuleBasedInterpreter {
    pub fn new(matcher: FuzzyMatcher) -> Self {
        Self { matcher }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(FuzzyMatcher::new(config.similarity_threshold))
    }

    /// Build an intent from the question. Deterministic for a fixed
    /// question and schema.
    pub fn interpret_question(&self, question: &str, schema: &TableSchema) -> Result<QueryIntent> {
        let tokens = tokenize(question);
        if tokens.is_empty() {
            return Err(QueryError::UnrecognizedQuery("the question is empty".to_string()));
        }

        let kind = classify(&tokens);
        let mut consumed = vec![false; tokens.len()];
        let phrases = extract_phrases(&tokens, &mut consumed);
        let values = self.extract_values(&tokens, schema, &mut consumed);

        let column_words: HashSet<usize> = (0..tokens.len())
            .filter(|&pos| {
                let word = &tokens[pos];
                !is_content(word) && !is_literal(word) && self.names_column(word, schema)
            })
            .collect();
        let hits = extract_aggregation(&tokens, &column_words);
        let mut aggregation = hits.aggregation;
        let content: Vec<bool> = tokens
            .iter()
            .enumerate()
            .map(|(pos, word)| {
                is_content(word) || (column_words.contains(&pos) && !hits.keyword_positions.contains(&pos))
            })
            .collect();
        let mentions = self.extract_mentions(&tokens, schema, &consumed, &content);

        let mut target_slots: HashSet<usize> = hits
            .trigger_ends
            .iter()
            .filter_map(|&end| slot_after(&content, &consumed, end))
            .collect();
        for trigger in PLOT_TRIGGERS {
            for pos in phrase_positions(&tokens, trigger) {
                target_slots.extend(slot_after(&content, &consumed, pos + 1));
            }
        }
        let group_slots: HashSet<usize> = GROUP_TRIGGERS
            .iter()
            .flat_map(|trigger| phrase_positions(&tokens, trigger))
            .filter_map(|pos| slot_after(&content, &consumed, pos + 1))
            .collect();

        let mut resolved: Vec<Resolved> = Vec::new();
        for mention in &mentions {
            match &mention.outcome {
                ColumnMatch::Unique { column, .. } => resolved.push(Resolved {
                    start: mention.start,
                    column: column.clone(),
                }),
                ColumnMatch::Ambiguous { candidates, .. } => {
                    return Err(QueryError::AmbiguousColumnReference {
                        reference: mention.text.clone(),
                        candidates: candidates.clone(),
                    });
                }
                ColumnMatch::NoMatch => {
                    if target_slots.contains(&mention.start) || group_slots.contains(&mention.start) {
                        return Err(QueryError::ColumnNotFound(mention.text.clone()));
                    }
                }
            }
        }

        let mut filters: Vec<Predicate> = Vec::new();
        let mut filter_columns: HashSet<String> = HashSet::new();

        let flag_positions = bind_flags(&tokens, &resolved, schema, &mut filters);

        for (column, labels) in bind_values(&values, &resolved)? {
            let value = if labels.len() == 1 {
                Literal::Text(labels[0].clone())
            } else {
                Literal::List(labels.into_iter().map(Literal::Text).collect())
            };
            let operator = if matches!(value, Literal::List(_)) {
                Operator::In
            } else {
                Operator::Eq
            };
            filter_columns.insert(column.clone());
            filters.push(Predicate { column, operator, value });
        }

        for phrase in &phrases {
            let wanted = if phrase.temporal {
                ColumnType::Datetime
            } else {
                ColumnType::Numeric
            };
            let column = bind_phrase_column(phrase, wanted, &resolved, schema)?;
            filter_columns.insert(column.clone());
            filters.push(Predicate {
                column,
                operator: phrase.operator,
                value: phrase.literal.clone(),
            });
        }

        let explicit_group = resolved
            .iter()
            .find(|r| group_slots.contains(&r.start))
            .map(|r| r.column.clone());
        let group_by = match explicit_group {
            Some(column) => Some(column),
            None if kind == QueryKind::Comparison => implicit_group(&resolved, &filters, schema),
            None => None,
        };

        // "average age and salary": a slot carries across an "and" list.
        let mut slotted: HashSet<usize> = HashSet::new();
        let mut previous_slotted = false;
        for r in &resolved {
            let listed = previous_slotted && r.start > 0 && tokens[r.start - 1] == "and";
            previous_slotted = target_slots.contains(&r.start) || listed;
            if previous_slotted {
                slotted.insert(r.start);
            }
        }
        // Once an aggregation has its column, other mentions only qualify it.
        let slot_bound = kind != QueryKind::Correlation && aggregation.is_some() && !slotted.is_empty();

        let mut targets: Vec<String> = Vec::new();
        for r in &resolved {
            if flag_positions.contains(&r.start) || group_by.as_deref() == Some(r.column.as_str()) {
                continue;
            }
            let in_slot = slotted.contains(&r.start);
            if !in_slot && (slot_bound || filter_columns.contains(&r.column)) {
                continue;
            }
            if !targets.contains(&r.column) {
                targets.push(r.column.clone());
            }
        }

        if kind == QueryKind::Correlation {
            targets.retain(|t| schema.column_type(t) == Some(ColumnType::Numeric));
            if targets.len() < 2 {
                targets.clear();
            }
            aggregation = None;
        } else if aggregation.is_none() && (kind == QueryKind::Comparison || group_by.is_some()) {
            let has_numeric = targets
                .iter()
                .any(|t| schema.column_type(t) == Some(ColumnType::Numeric));
            aggregation = Some(if has_numeric {
                Aggregation::Mean
            } else {
                Aggregation::Count
            });
        }

        if kind != QueryKind::Correlation && targets.is_empty() && filters.is_empty() && group_by.is_none() {
            return Err(QueryError::UnrecognizedQuery(format!(
                "no column of the table is mentioned in '{}'",
                question.trim()
            )));
        }

        let intent = QueryIntent {
            kind,
            target_columns: targets,
            filters,
            group_by,
            aggregation,
            requested_chart: requested_chart(&tokens),
        };
        debug!("Rule-based intent for '{}': {:?}", question.trim(), intent);
        Ok(intent)
    }

    fn names_column(&self, word: &str, schema: &TableSchema) -> bool {
        schema
            .columns
            .iter()
            .any(|c| self.matcher.similarity(word, &c.normalized_name) >= 1.0 - TIE_EPSILON)
    }

    fn extract_values(&self, tokens: &[String], schema: &TableSchema, consumed: &mut [bool]) -> Vec<ValueHit> {
        let mut labels: HashMap<String, Vec<(String, String)>> = HashMap::new();
        let mut longest = 1;
        for column in schema.columns.iter().filter(|c| c.inferred_type.is_categorical_like()) {
            for category in &column.categories {
                let words = tokenize(category);
                if words.is_empty() {
                    continue;
                }
                let key = words.join(" ");
                if column.inferred_type == ColumnType::Binary && GENERIC_FLAGS.contains(&key.as_str()) {
                    continue;
                }
                if words.len() == 1 && (STOPWORDS.contains(&key.as_str()) || KEYWORD_WORDS.contains(key.as_str()) || is_literal(&key)) {
                    continue;
                }
                longest = longest.max(words.len());
                let entry = labels.entry(key).or_default();
                if !entry.iter().any(|(c, _)| *c == column.normalized_name) {
                    entry.push((column.normalized_name.clone(), category.trim().to_string()));
                }
            }
        }

        let mut hits = Vec::new();
        let mut pos = 0;
        while pos < tokens.len() {
            if consumed[pos] || self.names_column(&tokens[pos], schema) {
                pos += 1;
                continue;
            }
            let hit = (1..=longest).rev().find_map(|len| {
                let end = pos + len;
                if end > tokens.len() || consumed[pos..end].iter().any(|c| *c) {
                    return None;
                }
                labels.get(&tokens[pos..end].join(" ")).map(|cols| (len, cols.clone()))
            });
            match hit {
                Some((len, columns)) => {
                    consumed[pos..pos + len].fill(true);
                    hits.push(ValueHit {
                        start: pos,
                        text: tokens[pos..pos + len].join(" "),
                        columns,
                    });
                    pos += len;
                }
                None => pos += 1,
            }
        }
        hits
    }

    /// Scan content words left to right. A word pair is preferred over the
    /// single word when it matches at least as well ("sales 2023").
    fn extract_mentions(
        &self,
        tokens: &[String],
        schema: &TableSchema,
        consumed: &[bool],
        content: &[bool],
    ) -> Vec<Mention> {
        let names: Vec<&str> = schema.columns.iter().map(|c| c.normalized_name.as_str()).collect();
        let mut mentions = Vec::new();
        let mut pos = 0;
        while pos < tokens.len() {
            if consumed[pos] || !content[pos] {
                pos += 1;
                continue;
            }
            let single = self.matcher.match_columns(&tokens[pos], names.iter().copied());
            let pair = tokens
                .get(pos + 1)
                .filter(|next| !consumed[pos + 1] && (content[pos + 1] || parse_numeric_str(next).is_some()))
                .map(|next| {
                    self.matcher
                        .match_columns(&format!("{}_{}", tokens[pos], next), names.iter().copied())
                })
                .filter(|m| m.is_match() && m.score() >= single.score());

            let (end, outcome) = match pair {
                Some(outcome) => (pos + 2, outcome),
                None => (pos + 1, single),
            };
            mentions.push(Mention {
                start: pos,
                text: tokens[pos..end].join(" "),
                outcome,
            });
            pos = end;
        }
        mentions
    }
}

/// "is active" / "are not active" on a binary column becomes an equality on
/// the column's positive or negative label. Returns the positions used.
fn bind_flags(
    tokens: &[String],
    resolved: &[Resolved],
    schema: &TableSchema,
    filters: &mut Vec<Predicate>,
) -> HashSet<usize> {
    let mut used = HashSet::new();
    for r in resolved {
        let column = match schema.column(&r.column) {
            Some(c) if c.inferred_type == ColumnType::Binary => c,
            _ => continue,
        };
        let negated = r.start >= 1 && tokens[r.start - 1] == "not";
        let verb = if negated { r.start.checked_sub(2) } else { r.start.checked_sub(1) };
        if !verb.map(|p| matches!(tokens[p].as_str(), "is" | "are")).unwrap_or(false) {
            continue;
        }
        let wanted = if negated { NEGATIVE_FLAGS } else { POSITIVE_FLAGS };
        let label = column
            .categories
            .iter()
            .find(|c| wanted.contains(&c.to_lowercase().as_str()));
        if let Some(label) = label {
            filters.push(Predicate {
                column: r.column.clone(),
                operator: Operator::Eq,
                value: Literal::Text(label.clone()),
            });
            used.insert(r.start);
        }
    }
    used
}

/// Group category values by the column they bind to. A value held by several
/// columns binds to the nearest preceding mention of one of them.
fn bind_values(values: &[ValueHit], resolved: &[Resolved]) -> Result<Vec<(String, Vec<String>)>> {
    let mut by_column: Vec<(String, Vec<String>)> = Vec::new();
    for hit in values {
        let (column, label) = if hit.columns.len() == 1 {
            hit.columns[0].clone()
        } else {
            resolved
                .iter()
                .filter(|r| r.start < hit.start)
                .filter_map(|r| hit.columns.iter().find(|(c, _)| *c == r.column).map(|m| (r.start, m)))
                .max_by_key(|(start, _)| *start)
                .map(|(_, m)| m.clone())
                .ok_or_else(|| QueryError::AmbiguousColumnReference {
                    reference: hit.text.clone(),
                    candidates: hit.columns.iter().map(|(c, _)| c.clone()).collect(),
                })?
        };

        match by_column.iter_mut().find(|(c, _)| *c == column) {
            Some((_, labels)) => {
                if !labels.contains(&label) {
                    labels.push(label);
                }
            }
            None => by_column.push((column, vec![label])),
        }
    }
    Ok(by_column)
}

/// Column a comparison phrase applies to: the nearest preceding mention of
/// the right type, then the nearest following one, then the only such column
/// in the table.
fn bind_phrase_column(
    phrase: &Phrase,
    wanted: ColumnType,
    resolved: &[Resolved],
    schema: &TableSchema,
) -> Result<String> {
    let typed: Vec<&Resolved> = resolved
        .iter()
        .filter(|r| schema.column_type(&r.column) == Some(wanted))
        .collect();

    if let Some(r) = typed.iter().filter(|r| r.start < phrase.start).max_by_key(|r| r.start) {
        return Ok(r.column.clone());
    }
    if let Some(r) = typed.iter().filter(|r| r.start > phrase.start).min_by_key(|r| r.start) {
        return Ok(r.column.clone());
    }

    let columns = schema.columns_of_type(wanted);
    match columns.as_slice() {
        [only] => Ok(only.normalized_name.clone()),
        [] => Err(QueryError::UnrecognizedQuery(format!(
            "there is no {} column for '{}'",
            wanted, phrase.text
        ))),
        many => Err(QueryError::AmbiguousColumnReference {
            reference: phrase.text.clone(),
            candidates: many.iter().map(|c| c.normalized_name.clone()).collect(),
        }),
    }
}

/// Group column of a comparison that names none explicitly: the first
/// mentioned categorical column, then any other non-numeric one, then the
/// column of a value list ("between IT and HR").
fn implicit_group(resolved: &[Resolved], filters: &[Predicate], schema: &TableSchema) -> Option<String> {
    let of_type = |pred: &dyn Fn(ColumnType) -> bool| {
        resolved
            .iter()
            .find(|r| schema.column_type(&r.column).map(pred).unwrap_or(false))
            .map(|r| r.column.clone())
    };
    of_type(&|t: ColumnType| t.is_categorical_like())
        .or_else(|| of_type(&|t: ColumnType| t != ColumnType::Numeric))
        .or_else(|| {
            filters
                .iter()
                .find(|p| p.operator == Operator::In)
                .map(|p| p.column.clone())
        })
}

#[async_trait]
impl QueryInterpreter for RuleBasedInterpreter {
    fn name(&self) -> &'static str {
        "rules"
    }

    async fn interpret(&self, question: &str, schema: &TableSchema) -> Result<Interpretation> {
        let intent = self.interpret_question(question, schema)?;
        Ok(Interpretation {
            intent,
            source: IntentSource::Rules,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaInferencer;
    use crate::table::RawTable;
    use serde_json::json;

    fn schema(records: serde_json::Value) -> TableSchema {
        let raw = RawTable::from_json_rows(records.as_array().unwrap()).unwrap();
        SchemaInferencer::default().infer(&raw).unwrap()
    }

    fn employees() -> TableSchema {
        schema(json!([
            {"age": 25, "dept": "IT"},
            {"age": 35, "dept": "HR"},
            {"age": 45, "dept": "IT"},
        ]))
    }

    fn interpret(question: &str, schema: &TableSchema) -> Result<QueryIntent> {
        RuleBasedInterpreter::default().interpret_question(question, schema)
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("What's the total of Sales_2023, over 1,500.50?"),
            vec!["whats", "the", "total", "of", "sales_2023", "over", "1500.50"]
        );
        assert_eq!(tokenize("hired since 2021-03-01"), vec!["hired", "since", "2021-03-01"]);
        assert_eq!(tokenize("temp below -10 or -1,200.5"), vec!["temp", "below", "-10", "or", "-1200.5"]);
        assert_eq!(tokenize("covid-19 cases"), vec!["covid-19", "cases"]);
    }

    #[test]
    fn test_negative_literal_keeps_its_sign() {
        let s = schema(json!([{"temp": -20}, {"temp": 5}, {"temp": 15}]));
        let intent = interpret("how many rows with temp below -10", &s).unwrap();
        assert_eq!(
            intent.filters,
            vec![Predicate {
                column: "temp".to_string(),
                operator: Operator::Lt,
                value: Literal::Number(-10.0),
            }]
        );
    }

    #[test]
    fn test_keyword_named_columns() {
        let s = schema(json!([
            {"total": 10, "value": 1.5, "dept": "IT"},
            {"total": 20, "value": 2.5, "dept": "HR"},
        ]));

        let intent = interpret("what is the average total", &s).unwrap();
        assert_eq!(intent.target_columns, vec!["total"]);
        assert_eq!(intent.aggregation, Some(Aggregation::Mean));

        let intent = interpret("what is the maximum total", &s).unwrap();
        assert_eq!(intent.target_columns, vec!["total"]);
        assert_eq!(intent.aggregation, Some(Aggregation::Max));

        let intent = interpret("sum of value", &s).unwrap();
        assert_eq!(intent.target_columns, vec!["value"]);
        assert_eq!(intent.aggregation, Some(Aggregation::Sum));
    }

    #[test]
    fn test_aggregation_targets_only_its_columns() {
        let s = schema(json!([
            {"employee_id": 1, "age": 25, "salary": 1000},
            {"employee_id": 2, "age": 35, "salary": 2000},
            {"employee_id": 3, "age": 45, "salary": 1500},
        ]));

        let intent = interpret("what is the average age of employees", &s).unwrap();
        assert_eq!(intent.target_columns, vec!["age"]);

        let intent = interpret("average age and salary of employees", &s).unwrap();
        assert_eq!(intent.target_columns, vec!["age", "salary"]);
    }

    #[test]
    fn test_kind_priority() {
        let t = |q: &str| classify(&tokenize(q));
        assert_eq!(t("plot average age by dept"), QueryKind::Visualization);
        assert_eq!(t("compare average age by dept"), QueryKind::Comparison);
        assert_eq!(t("employees under 30"), QueryKind::Filter);
        assert_eq!(t("what is the average age"), QueryKind::Summary);
        assert_eq!(t("is there a relationship between age and salary"), QueryKind::Correlation);
        assert_eq!(t("age"), QueryKind::Summary);
    }

    #[test]
    fn test_average_age() {
        let intent = interpret("What is the average age?", &employees()).unwrap();
        assert_eq!(intent.kind, QueryKind::Summary);
        assert_eq!(intent.target_columns, vec!["age"]);
        assert_eq!(intent.aggregation, Some(Aggregation::Mean));
        assert!(intent.filters.is_empty());
    }

    #[test]
    fn test_count_with_category_value() {
        let intent = interpret("how many employees in IT", &employees()).unwrap();
        assert_eq!(intent.aggregation, Some(Aggregation::Count));
        assert_eq!(
            intent.filters,
            vec![Predicate {
                column: "dept".to_string(),
                operator: Operator::Eq,
                value: Literal::Text("IT".to_string()),
            }]
        );
    }

    #[test]
    fn test_comparison_by_group() {
        let intent = interpret("compare average age by dept", &employees()).unwrap();
        assert_eq!(intent.kind, QueryKind::Comparison);
        assert_eq!(intent.target_columns, vec!["age"]);
        assert_eq!(intent.group_by.as_deref(), Some("dept"));
        assert_eq!(intent.aggregation, Some(Aggregation::Mean));
    }

    #[test]
    fn test_numeric_phrase_binds_the_only_numeric_column() {
        let intent = interpret("employees under 30 in IT", &employees()).unwrap();
        assert_eq!(intent.kind, QueryKind::Filter);
        assert!(intent.target_columns.is_empty());
        assert!(intent.filters.contains(&Predicate {
            column: "age".to_string(),
            operator: Operator::Lt,
            value: Literal::Number(30.0),
        }));
        assert_eq!(intent.filters.len(), 2);
    }

    #[test]
    fn test_phrase_boundaries() {
        let s = employees();
        let op = |q: &str| interpret(q, &s).unwrap().filters[0].operator;
        assert_eq!(op("age at least 30"), Operator::Gte);
        assert_eq!(op("age no more than 30"), Operator::Lte);
        assert_eq!(op("age over 30"), Operator::Gt);
        assert_eq!(op("age equal to 35"), Operator::Eq);
    }

    #[test]
    fn test_numeric_phrase_prefers_preceding_column() {
        let s = schema(json!([
            {"age": 25, "salary": 1000, "dept": "IT"},
            {"age": 35, "salary": 2000, "dept": "HR"},
        ]));
        let intent = interpret("show dept with salary above 1,500 and age under 30", &s).unwrap();
        assert_eq!(intent.filters[0].column, "salary");
        assert_eq!(intent.filters[0].value, Literal::Number(1500.0));
        assert_eq!(intent.filters[1].column, "age");

        let err = interpret("employees under 30", &s).unwrap_err();
        assert!(matches!(err, QueryError::AmbiguousColumnReference { .. }));
    }

    #[test]
    fn test_repeated_values_become_a_set() {
        let s = schema(json!([
            {"age": 25, "dept": "IT"},
            {"age": 35, "dept": "HR"},
            {"age": 45, "dept": "Ops"},
        ]));
        let intent = interpret("average age in IT and HR", &s).unwrap();
        assert_eq!(intent.filters[0].operator, Operator::In);
        assert_eq!(
            intent.filters[0].value,
            Literal::List(vec![
                Literal::Text("IT".to_string()),
                Literal::Text("HR".to_string())
            ])
        );
    }

    #[test]
    fn test_tied_columns_are_ambiguous() {
        let s = schema(json!([
            {"sales_2023": 10, "sales_2024": 12},
            {"sales_2023": 20, "sales_2024": 22},
        ]));
        match interpret("show sales", &s) {
            Err(QueryError::AmbiguousColumnReference { reference, candidates }) => {
                assert_eq!(reference, "sales");
                assert_eq!(candidates, vec!["sales_2023", "sales_2024"]);
            }
            other => panic!("expected ambiguity, got {:?}", other),
        }
        let intent = interpret("total sales 2024", &s).unwrap();
        assert_eq!(intent.target_columns, vec!["sales_2024"]);
    }

    #[test]
    fn test_missing_required_column() {
        let err = interpret("what is the average salary", &employees()).unwrap_err();
        assert!(matches!(err, QueryError::ColumnNotFound(ref t) if t == "salary"));

        let err = interpret("compare age by region", &employees()).unwrap_err();
        assert!(matches!(err, QueryError::ColumnNotFound(ref t) if t == "region"));
    }

    #[test]
    fn test_unrecognized() {
        assert!(matches!(
            interpret("hello there", &employees()),
            Err(QueryError::UnrecognizedQuery(_))
        ));
        assert!(matches!(interpret("?!", &employees()), Err(QueryError::UnrecognizedQuery(_))));
    }

    #[test]
    fn test_correlation_needs_no_columns() {
        let intent = interpret("show the correlation", &employees()).unwrap();
        assert_eq!(intent.kind, QueryKind::Correlation);
        assert!(intent.target_columns.is_empty());
        assert_eq!(intent.aggregation, None);
    }

    #[test]
    fn test_binary_flag_and_dates() {
        let s = schema(json!([
            {"name": "a", "active": "Yes", "hired": "2020-02-01"},
            {"name": "b", "active": "No", "hired": "2022-07-15"},
        ]));
        let intent = interpret("how many employees are active", &s).unwrap();
        assert_eq!(
            intent.filters,
            vec![Predicate {
                column: "active".to_string(),
                operator: Operator::Eq,
                value: Literal::Text("Yes".to_string()),
            }]
        );

        let intent = interpret("employees hired after 2021", &s).unwrap();
        assert_eq!(intent.filters[0].column, "hired");
        assert_eq!(intent.filters[0].operator, Operator::Gte);
        assert_eq!(intent.filters[0].value, Literal::Text("2022-01-01".to_string()));
    }

    #[test]
    fn test_requested_chart() {
        let intent = interpret("pie chart of dept", &employees()).unwrap();
        assert_eq!(intent.kind, QueryKind::Visualization);
        assert_eq!(intent.requested_chart, Some(ChartKind::Pie));
        assert_eq!(intent.target_columns, vec!["dept"]);
    }
}
