//! Alias generation for catalog entries.
//!
//! Each entry answers to a set of user-facing aliases produced by a fixed
//! sequence of strategies. Duplicates (by normalized form) are removed with
//! first-seen-wins, and the set is capped at the configured maximum.
//!
//! Regional prefixes (APAC, EU, US) are kept in generated aliases: stripping
//! them would make the same alias point at different regional catalog
//! entries.

use once_cell::sync::Lazy;
use regex::Regex;

use super::normalizer::normalize_model_name;
use super::types::ModelEntry;

/// Claude model variants recognized by the Claude strategy.
const CLAUDE_VARIANTS: [&str; 3] = ["Haiku", "Sonnet", "Opus"];

/// Regional prefixes that are retained in aliases.
const REGIONAL_PREFIXES: [&str; 3] = ["APAC", "EU", "US"];

/// Provider prefixes that are stripped from aliases.
const PROVIDER_PREFIXES: [&str; 7] = [
    "Anthropic",
    "Amazon",
    "Meta",
    "Cohere",
    "AI21",
    "Mistral",
    "Stability",
];

static VERSION_PAIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)[.\s]+(\d+)").expect("static regex"));
static VERSION_SINGLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d+)\b").expect("static regex"));
static NAME_NUMBER_GAP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Za-z]+)\s+(\d+)").expect("static regex"));
static ADJACENT_DIGITS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d)\s+(\d)\b").expect("static regex"));

/// One alias generation strategy. Applied in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasStrategy {
    /// Claude-family names: variant + version reordering.
    Claude,
    /// Other versioned names: spacing and version-format variants.
    Versioned,
    /// Provider/regional-prefixed names: provider prefix removal.
    Prefixed,
}

impl AliasStrategy {
    /// The fixed strategy order.
    pub fn all() -> [AliasStrategy; 3] {
        [Self::Claude, Self::Versioned, Self::Prefixed]
    }

    /// Whether this strategy applies to the entry at all.
    pub fn applies_to(&self, entry: &ModelEntry) -> bool {
        let name = &entry.canonical_name;
        match self {
            Self::Claude => name.to_lowercase().contains("claude"),
            Self::Versioned => {
                !name.to_lowercase().contains("claude") && name.chars().any(|c| c.is_ascii_digit())
            }
            Self::Prefixed => {
                let prefixes = REGIONAL_PREFIXES.iter().chain(PROVIDER_PREFIXES.iter());
                for prefix in prefixes {
                    if starts_with_prefix(name, prefix) {
                        return true;
                    }
                }
                false
            }
        }
    }

    /// Produce this strategy's aliases for the entry. May be empty.
    pub fn generate(&self, entry: &ModelEntry) -> Vec<String> {
        if !self.applies_to(entry) {
            return Vec::new();
        }
        let name = &entry.canonical_name;
        match self {
            Self::Claude => generate_claude(name),
            Self::Versioned => generate_versioned(name),
            Self::Prefixed => generate_prefixed(name),
        }
    }
}

fn generate_claude(name: &str) -> Vec<String> {
    let Some(variant) = extract_variant(name) else {
        return Vec::new();
    };
    let Some(version) = extract_version(name) else {
        return Vec::new();
    };

    vec![
        format!("Claude {version} {variant}"),
        format!("Claude{version} {variant}"),
    ]
}

fn generate_versioned(name: &str) -> Vec<String> {
    let mut aliases = Vec::new();

    // "Llama 3 8B" -> "Llama3 8B" (first name/number gap only)
    let no_space = NAME_NUMBER_GAP.replace(name, "$1$2").into_owned();
    if no_space != name {
        aliases.push(no_space);
    }

    aliases.push(name.to_string());

    // "Mistral 7 1" -> "Mistral 7.1" (first digit pair only)
    let dotted = ADJACENT_DIGITS.replace(name, "$1.$2").into_owned();
    if dotted != name {
        aliases.push(dotted);
    }

    aliases
}

fn generate_prefixed(name: &str) -> Vec<String> {
    // Keep a leading regional prefix, strip provider prefixes after it.
    let (regional, remainder) = split_regional_prefix(name);
    let stripped = strip_provider_prefixes(remainder);

    if stripped == remainder {
        return Vec::new();
    }

    let alias = match regional {
        Some(regional) => format!("{regional} {stripped}"),
        None => stripped.to_string(),
    };
    vec![alias]
}

fn extract_variant(name: &str) -> Option<&'static str> {
    let lower = name.to_lowercase();
    CLAUDE_VARIANTS
        .iter()
        .find(|variant| lower.contains(&variant.to_lowercase()))
        .copied()
}

fn extract_version(name: &str) -> Option<String> {
    if let Some(captures) = VERSION_PAIR.captures(name) {
        return Some(format!("{}.{}", &captures[1], &captures[2]));
    }
    VERSION_SINGLE
        .captures(name)
        .map(|captures| captures[1].to_string())
}

fn starts_with_prefix(name: &str, prefix: &str) -> bool {
    let Some(rest) = name
        .get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .map(|_| &name[prefix.len()..])
    else {
        return false;
    };
    rest.starts_with(' ')
}

fn split_regional_prefix(name: &str) -> (Option<&str>, &str) {
    for prefix in REGIONAL_PREFIXES {
        if starts_with_prefix(name, prefix) {
            return (
                Some(&name[..prefix.len()]),
                name[prefix.len()..].trim_start(),
            );
        }
    }
    (None, name)
}

fn strip_provider_prefixes(name: &str) -> &str {
    let mut current = name;
    loop {
        let mut stripped = false;
        for prefix in PROVIDER_PREFIXES {
            if starts_with_prefix(current, prefix) {
                current = current[prefix.len()..].trim_start();
                stripped = true;
            }
        }
        if !stripped {
            return current;
        }
    }
}

/// Generate the full alias set for an entry: all strategies in order,
/// deduplicated by normalized form (first seen wins), capped.
pub fn generate_aliases(entry: &ModelEntry, max_aliases: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut aliases = Vec::new();

    for strategy in AliasStrategy::all() {
        for alias in strategy.generate(entry) {
            let normalized = normalize_model_name(&alias);
            if normalized.is_empty() || normalized == normalize_model_name(&entry.canonical_name) {
                continue;
            }
            if seen.insert(normalized) {
                aliases.push(alias);
                if aliases.len() >= max_aliases {
                    return aliases;
                }
            }
        }
    }

    aliases
}
