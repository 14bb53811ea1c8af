//! Territory normalization and resolution.
//!
//! Sources spell the same neighborhood in many ways ("la Vila de Gràcia",
//! "Vila de Gracia", "VILA DE GRÀCIA"). Names are first folded into a canonical
//! key and then resolved against the dimension snapshot, in order:
//!
//! 1. exact match on the dimension's canonical-key index
//! 2. the versioned alias table
//! 3. fuzzy similarity over every canonical key, accepted only above the configured
//!    threshold and only when no runner-up lies within the ambiguity margin
//!
//! Anything else is returned as [`Resolution::Unresolved`]; callers count it and
//! move on.

mod aliases;

pub use aliases::AliasTable;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::domain::{NeighborhoodDimension, NeighborhoodId};

/// Determiners that some sources prepend and others drop ("el Raval" / "Raval")
const LEADING_ARTICLES: &[&str] = &["el", "la", "els", "les", "l", "los", "las", "lo"];

/// Spanish-language conjunction folded onto its Catalan form
const CONJUNCTION_FOLDS: &[(&str, &str)] = &[("y", "i")];

/// Fold a free-text territory name into its canonical comparison key.
///
/// Removes diacritics, folds case, turns punctuation into separators, collapses
/// whitespace, folds conjunction variants and strips leading determiners.
pub fn normalize(raw: &str) -> String {
    let folded: String = raw
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        // Catalan punt volat ("l·l") joins letters
        .filter(|c| *c != '·')
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let mut tokens: Vec<&str> = folded
        .split_whitespace()
        .map(|t| {
            CONJUNCTION_FOLDS
                .iter()
                .find(|(from, _)| *from == t)
                .map(|(_, to)| *to)
                .unwrap_or(t)
        })
        .collect();

    while tokens.len() > 1 && LEADING_ARTICLES.contains(&tokens[0]) {
        tokens.remove(0);
    }

    tokens.join(" ")
}

/// Fuzzy-matching parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FuzzyConfig {
    /// Minimum Jaro-Winkler similarity for a fuzzy match
    pub threshold: f64,
    /// A runner-up scoring within this margin of the best makes the match ambiguous
    pub margin: f64,
}

/// Why a name could not be resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Unresolved {
    Empty,
    NoMatch {
        best_score: Option<f64>,
    },
    Ambiguous {
        first: NeighborhoodId,
        second: NeighborhoodId,
        best_score: f64,
        runner_up_score: f64,
    },
}

/// Outcome of resolving one territory reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Resolution {
    Exact { id: NeighborhoodId },
    Alias { id: NeighborhoodId },
    Fuzzy { id: NeighborhoodId, score: f64 },
    /// Identifier taken verbatim from a code column of the raw extract
    Code { id: NeighborhoodId },
    Unresolved(Unresolved),
}

impl Resolution {
    pub fn id(&self) -> Option<NeighborhoodId> {
        match self {
            Resolution::Exact { id }
            | Resolution::Alias { id }
            | Resolution::Fuzzy { id, .. }
            | Resolution::Code { id } => Some(*id),
            Resolution::Unresolved(_) => None,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Resolution::Exact { .. } => "exact",
            Resolution::Alias { .. } => "alias",
            Resolution::Fuzzy { .. } => "fuzzy",
            Resolution::Code { .. } => "code",
            Resolution::Unresolved(_) => "unresolved",
        }
    }
}

/// Resolve a canonical key against the dimension snapshot and alias table
pub fn resolve(
    canonical_key: &str,
    dimension: &NeighborhoodDimension,
    aliases: &AliasTable,
    fuzzy: FuzzyConfig,
) -> Resolution {
    if canonical_key.is_empty() {
        return Resolution::Unresolved(Unresolved::Empty);
    }

    if let Some(id) = dimension.id_for_key(canonical_key) {
        return Resolution::Exact { id };
    }

    if let Some(id) = aliases.get(canonical_key) {
        return Resolution::Alias { id };
    }

    let mut best: Option<(NeighborhoodId, f64)> = None;
    let mut runner_up: Option<(NeighborhoodId, f64)> = None;
    for (key, id) in dimension.keys() {
        let score = strsim::jaro_winkler(canonical_key, key);
        match best {
            Some((_, best_score)) if score <= best_score => {
                if runner_up.map_or(true, |(_, s)| score > s) {
                    runner_up = Some((id, score));
                }
            }
            _ => {
                runner_up = best;
                best = Some((id, score));
            }
        }
    }

    let Some((best_id, best_score)) = best else {
        return Resolution::Unresolved(Unresolved::NoMatch { best_score: None });
    };

    if best_score < fuzzy.threshold {
        return Resolution::Unresolved(Unresolved::NoMatch {
            best_score: Some(best_score),
        });
    }

    if let Some((second_id, second_score)) = runner_up {
        if best_score - second_score <= fuzzy.margin {
            return Resolution::Unresolved(Unresolved::Ambiguous {
                first: best_id,
                second: second_id,
                best_score,
                runner_up_score: second_score,
            });
        }
    }

    Resolution::Fuzzy {
        id: best_id,
        score: best_score,
    }
}

/// Per-run resolver that memoizes resolutions by canonical key.
///
/// The cache lives as long as the resolver, which lives as long as one run.
pub struct TerritoryResolver<'a> {
    dimension: &'a NeighborhoodDimension,
    aliases: &'a AliasTable,
    fuzzy: FuzzyConfig,
    cache: HashMap<String, Resolution>,
}

impl<'a> TerritoryResolver<'a> {
    pub fn new(
        dimension: &'a NeighborhoodDimension,
        aliases: &'a AliasTable,
        fuzzy: FuzzyConfig,
    ) -> Self {
        Self {
            dimension,
            aliases,
            fuzzy,
            cache: HashMap::new(),
        }
    }

    /// Resolve an already-normalized key
    pub fn resolve(&mut self, canonical_key: &str) -> Resolution {
        if let Some(hit) = self.cache.get(canonical_key) {
            return hit.clone();
        }
        let resolution = resolve(canonical_key, self.dimension, self.aliases, self.fuzzy);
        debug!(
            key = canonical_key,
            method = resolution.method(),
            "territory resolved"
        );
        self.cache
            .insert(canonical_key.to_string(), resolution.clone());
        resolution
    }

    /// Normalize and resolve a raw name; a missing name is unresolved
    pub fn resolve_name(&mut self, raw_name: Option<&str>) -> Resolution {
        match raw_name {
            Some(name) => {
                let key = normalize(name);
                self.resolve(&key)
            }
            None => Resolution::Unresolved(Unresolved::Empty),
        }
    }
}
