//! WordlistStore: canonical disallowed terms and their phonetic aliases.
//!
//! The table is immutable once built. A reload parses and validates a complete new
//! table and swaps it in atomically; a failed reload leaves the previous table active.
//!
//! Accepted documents:
//!
//! ```json
//! { "main": ["canonical", ...], "mappings": { "canonical": ["alias", ...] } }
//! { "toxic_words": ["canonical", ...], "phonetic_mapping": { "alias": "canonical" } }
//! ["canonical", ...]
//! ```

use crate::error::{GuardError, GuardResult};
use crate::swap::SwapCell;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

static SINGLE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\w+$").expect("single token pattern is valid"));

/// Case-fold, trim and collapse runs of three or more identical characters to one
/// ("baaaangsat" -> "bangsat"). Applied identically to wordlist entries and transcripts.
pub fn normalize(text: &str) -> String {
    let lowered = text.trim().to_lowercase();
    let chars: Vec<char> = lowered.chars().collect();
    let mut out = String::with_capacity(lowered.len());

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let mut j = i + 1;
        while j < chars.len() && chars[j] == c {
            j += 1;
        }
        let run = j - i;
        if run >= 3 {
            out.push(c);
        } else {
            out.extend(std::iter::repeat(c).take(run));
        }
        i = j;
    }

    out
}

/// One canonical disallowed term and the aliases that correct to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WordTerm {
    pub canonical: String,
    pub aliases: BTreeSet<String>,
}

#[derive(Debug, Deserialize)]
struct MappedDocument {
    main: Vec<String>,
    #[serde(default)]
    mappings: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct LegacyDocument {
    toxic_words: Vec<String>,
    #[serde(default)]
    phonetic_mapping: BTreeMap<String, String>,
}

/// Validated, compiled wordlist.
#[derive(Debug, Clone, Default)]
pub struct WordlistTable {
    terms: Vec<WordTerm>,
    canonicals: HashMap<String, usize>,
    aliases: HashMap<String, String>,
    /// Whole-word alternation over every canonical term, longest first.
    pattern: Option<Regex>,
}

impl WordlistTable {
    /// Parse and validate a raw wordlist document.
    pub fn parse(raw: &str) -> GuardResult<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| GuardError::config(format!("wordlist is not valid JSON: {}", e)))?;

        match &value {
            serde_json::Value::Object(map) if map.contains_key("main") => {
                let doc: MappedDocument = serde_json::from_value(value)
                    .map_err(|e| GuardError::config(format!("malformed wordlist: {}", e)))?;
                Self::build(doc.main, doc.mappings)
            }
            serde_json::Value::Object(map) if map.contains_key("toxic_words") => {
                let doc: LegacyDocument = serde_json::from_value(value)
                    .map_err(|e| GuardError::config(format!("malformed legacy wordlist: {}", e)))?;
                let mut mappings: BTreeMap<String, Vec<String>> = BTreeMap::new();
                for (alias, canonical) in doc.phonetic_mapping {
                    mappings.entry(canonical).or_default().push(alias);
                }
                Self::build(doc.toxic_words, mappings)
            }
            serde_json::Value::Array(_) => {
                let main: Vec<String> = serde_json::from_value(value)
                    .map_err(|e| GuardError::config(format!("malformed wordlist: {}", e)))?;
                Self::build(main, BTreeMap::new())
            }
            _ => Err(GuardError::config(
                "wordlist must be an object with `main` (or legacy `toxic_words`) or a list of terms",
            )),
        }
    }

    /// Build a table from canonical terms and a canonical -> aliases mapping.
    ///
    /// Blank entries are skipped and duplicate canonicals collapse. A mapping key that
    /// is not a canonical term, an alias shared by two canonicals, an alias equal to
    /// another canonical, or a multi-word alias is rejected.
    pub fn build<I, S>(main: I, mappings: BTreeMap<String, Vec<String>>) -> GuardResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut terms: Vec<WordTerm> = Vec::new();
        let mut canonicals: HashMap<String, usize> = HashMap::new();

        for raw in main {
            let canonical = normalize(raw.as_ref());
            if canonical.is_empty() || canonicals.contains_key(&canonical) {
                continue;
            }
            canonicals.insert(canonical.clone(), terms.len());
            terms.push(WordTerm {
                canonical,
                aliases: BTreeSet::new(),
            });
        }

        let mut aliases: HashMap<String, String> = HashMap::new();
        for (key, list) in mappings {
            let canonical = normalize(&key);
            let Some(&idx) = canonicals.get(&canonical) else {
                return Err(GuardError::config(format!(
                    "mapping key `{}` is not listed as a canonical term",
                    key
                )));
            };

            for raw_alias in list {
                let alias = normalize(&raw_alias);
                if alias.is_empty() || alias == canonical {
                    continue;
                }
                if !SINGLE_TOKEN.is_match(&alias) {
                    return Err(GuardError::config(format!(
                        "alias `{}` for `{}` must be a single word",
                        raw_alias, canonical
                    )));
                }
                if canonicals.contains_key(&alias) {
                    return Err(GuardError::config(format!(
                        "alias `{}` for `{}` is itself a canonical term",
                        alias, canonical
                    )));
                }
                match aliases.get(&alias) {
                    Some(existing) if *existing != canonical => {
                        return Err(GuardError::config(format!(
                            "alias `{}` maps to both `{}` and `{}`",
                            alias, existing, canonical
                        )));
                    }
                    Some(_) => {}
                    None => {
                        aliases.insert(alias.clone(), canonical.clone());
                    }
                }
                terms[idx].aliases.insert(alias);
            }
        }

        let pattern = Self::compile(&terms)?;
        Ok(Self {
            terms,
            canonicals,
            aliases,
            pattern,
        })
    }

    fn compile(terms: &[WordTerm]) -> GuardResult<Option<Regex>> {
        if terms.is_empty() {
            return Ok(None);
        }
        let mut ordered: Vec<&str> = terms.iter().map(|t| t.canonical.as_str()).collect();
        ordered.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let alternation = ordered
            .iter()
            .map(|c| regex::escape(c))
            .collect::<Vec<_>>()
            .join("|");
        Ok(Some(Regex::new(&format!(r"(?i)\b(?:{})\b", alternation))?))
    }

    /// Canonical term for a token that is either a canonical itself or a registered alias.
    pub fn lookup(&self, token: &str) -> Option<&str> {
        let token = normalize(token);
        if let Some(canonical) = self.aliases.get(&token) {
            return Some(canonical.as_str());
        }
        self.canonicals
            .get(&token)
            .map(|&idx| self.terms[idx].canonical.as_str())
    }

    /// Canonical for an already-normalized alias token.
    pub(crate) fn alias_target(&self, normalized_token: &str) -> Option<&str> {
        self.aliases.get(normalized_token).map(String::as_str)
    }

    pub(crate) fn pattern(&self) -> Option<&Regex> {
        self.pattern.as_ref()
    }

    pub fn terms(&self) -> &[WordTerm] {
        &self.terms
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }
}

/// Shared, hot-swappable wordlist.
#[derive(Debug, Default)]
pub struct WordlistStore {
    table: SwapCell<WordlistTable>,
}

impl WordlistStore {
    pub fn new(table: WordlistTable) -> Self {
        Self {
            table: SwapCell::new(table),
        }
    }

    /// Parse a raw document without touching any store.
    pub fn load(raw: &str) -> GuardResult<WordlistTable> {
        WordlistTable::parse(raw)
    }

    /// Open from disk. A missing file yields an empty store.
    pub fn open(path: &Path) -> GuardResult<Self> {
        if !path.exists() {
            warn!("[WORDLIST] {:?} not found; starting with an empty wordlist", path);
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let table = WordlistTable::parse(&raw)?;
        info!(
            terms = table.len(),
            aliases = table.alias_count(),
            "[WORDLIST] loaded {:?}",
            path
        );
        Ok(Self::new(table))
    }

    pub fn lookup(&self, token: &str) -> Option<String> {
        self.table.load().lookup(token).map(str::to_string)
    }

    pub fn snapshot(&self) -> Arc<WordlistTable> {
        self.table.load()
    }

    /// Atomically replace the active table.
    pub fn swap(&self, table: WordlistTable) {
        self.table.store(table);
    }

    /// Parse, validate and swap. Returns the number of canonical terms now active.
    pub fn reload(&self, raw: &str) -> GuardResult<usize> {
        let table = WordlistTable::parse(raw)?;
        let terms = table.len();
        self.swap(table);
        info!(terms, "[WORDLIST] reloaded");
        Ok(terms)
    }

    pub fn reload_from_path(&self, path: &Path) -> GuardResult<usize> {
        let raw = std::fs::read_to_string(path)?;
        self.reload(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "main": ["anjing", "bangsat", "Kontol"],
        "mappings": { "anjing": ["anjeng", "anjir"], "kontol": ["kntl"] }
    }"#;

    #[test]
    fn normalize_collapses_long_runs_only() {
        assert_eq!(normalize("  BAAAANGSAT "), "bangsat");
        assert_eq!(normalize("good"), "good");
        assert_eq!(normalize("aaa"), "a");
    }

    #[test]
    fn parses_mapped_document() {
        let table = WordlistTable::parse(SAMPLE).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.alias_count(), 3);
        assert_eq!(table.lookup("ANJENG"), Some("anjing"));
        assert_eq!(table.lookup("kontol"), Some("kontol"));
        assert_eq!(table.lookup("kontrol"), None);
    }

    #[test]
    fn parses_legacy_document() {
        let raw = r#"{ "toxic_words": ["anjing"], "phonetic_mapping": { "anjeng": "anjing" } }"#;
        let table = WordlistTable::parse(raw).unwrap();
        assert_eq!(table.lookup("anjeng"), Some("anjing"));
    }

    #[test]
    fn parses_plain_list_and_skips_blanks() {
        let table = WordlistTable::parse(r#"["anjing", " ", "ANJING"]"#).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn rejects_alias_with_two_canonicals() {
        let raw = r#"{ "main": ["a1", "b1"], "mappings": { "a1": ["x"], "b1": ["x"] } }"#;
        let err = WordlistTable::parse(raw).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("maps to both"));
    }

    #[test]
    fn rejects_alias_that_is_a_canonical() {
        let raw = r#"{ "main": ["a1", "b1"], "mappings": { "a1": ["b1"] } }"#;
        assert!(WordlistTable::parse(raw).is_err());
    }

    #[test]
    fn rejects_unknown_mapping_key_and_multiword_alias() {
        let unknown = r#"{ "main": ["a1"], "mappings": { "zz": ["x"] } }"#;
        assert!(WordlistTable::parse(unknown).is_err());

        let multi = r#"{ "main": ["a1"], "mappings": { "a1": ["two words"] } }"#;
        assert!(WordlistTable::parse(multi).is_err());
    }

    #[test]
    fn rejects_malformed_structure() {
        assert!(WordlistTable::parse("{ not json").is_err());
        assert!(WordlistTable::parse(r#"{ "words": [] }"#).is_err());
        assert!(WordlistTable::parse(r#"{ "main": "anjing" }"#).is_err());
    }

    #[test]
    fn failed_reload_keeps_previous_table() {
        let store = WordlistStore::new(WordlistTable::parse(SAMPLE).unwrap());
        let bad = r#"{ "main": ["a1", "b1"], "mappings": { "a1": ["x"], "b1": ["x"] } }"#;
        assert!(store.reload(bad).is_err());
        assert_eq!(store.lookup("anjir").as_deref(), Some("anjing"));

        assert_eq!(store.reload(r#"["tai"]"#).unwrap(), 1);
        assert_eq!(store.lookup("anjir"), None);
        assert_eq!(store.lookup("tai").as_deref(), Some("tai"));
    }

    #[test]
    fn open_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = WordlistStore::open(&dir.path().join("absent.json")).unwrap();
        assert!(store.snapshot().is_empty());
    }
}
