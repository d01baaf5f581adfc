//! Agent registry and capability-based selection.
//!
//! Each task description is tokenized (lowercase alphanumeric runs, minus a
//! short stop-word list) and scored against every capability tag:
//!
//! | match                                             | score |
//! |---------------------------------------------------|-------|
//! | tag named by a `capabilities`/`capability` hint   | 5     |
//! | token equals tag                                  | 3     |
//! | token and tag share a stem                        | 1     |
//!
//! Only the best match per tag counts. Agents scoring at least
//! `min_relevance` are returned best-first (ties keep registration order),
//! capped at `max_candidates`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use squadron_core::AgentDescriptor;

use crate::error::OrchestratorError;
use crate::task::TaskTarget;

const HINT_SCORE: u32 = 5;
const EXACT_SCORE: u32 = 3;
const STEM_SCORE: u32 = 1;

/// Shortest word that may match as a prefix of a longer one.
const MIN_PREFIX_LEN: usize = 4;
/// Shortest shared prefix counted as a common stem.
const MIN_STEM_LEN: usize = 5;

static TOKEN_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new("[a-z0-9]+").ok());

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "i", "in", "into", "is", "it",
    "me", "my", "of", "on", "or", "our", "please", "the", "this", "that", "to", "we", "with",
];

/// Split text into lowercase match tokens, in order, without duplicates.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let Some(re) = TOKEN_RE.as_ref() else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    re.find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|t| !STOP_WORDS.contains(t))
        .filter(|t| seen.insert(*t))
        .map(str::to_string)
        .collect()
}

/// Whether two words share a stem ("finance" / "financial", "audit" / "auditor").
pub fn stem_match(a: &str, b: &str) -> bool {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short.len() >= MIN_PREFIX_LEN && long.starts_with(short) {
        return true;
    }
    let common = short
        .bytes()
        .zip(long.bytes())
        .take_while(|(x, y)| x == y)
        .count();
    common >= MIN_STEM_LEN && common * 4 >= short.len() * 3
}

/// Capability hints from the task context: `capabilities` (array) or `capability` (string).
fn context_hints(context: &HashMap<String, Value>) -> HashSet<String> {
    let mut hints = HashSet::new();
    if let Some(Value::Array(items)) = context.get("capabilities") {
        hints.extend(
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_lowercase()),
        );
    }
    if let Some(Value::String(one)) = context.get("capability") {
        hints.insert(one.trim().to_lowercase());
    }
    hints
}

/// Registered descriptors plus a tag index.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    agents: Vec<Arc<AgentDescriptor>>,
    by_name: HashMap<String, usize>,
    /// tag -> indices of agents declaring it, in registration order.
    tag_index: BTreeMap<String, Vec<usize>>,
    max_candidates: usize,
    min_relevance: u32,
}

impl AgentRegistry {
    pub fn new(max_candidates: usize, min_relevance: u32) -> Self {
        Self {
            agents: Vec::new(),
            by_name: HashMap::new(),
            tag_index: BTreeMap::new(),
            max_candidates: max_candidates.max(1),
            min_relevance: min_relevance.max(1),
        }
    }

    pub fn register(
        &mut self,
        descriptor: AgentDescriptor,
    ) -> Result<Arc<AgentDescriptor>, OrchestratorError> {
        let name = descriptor.name.trim().to_string();
        if name.is_empty() {
            return Err(OrchestratorError::InvalidDescriptor {
                reason: "agent name must not be empty".to_string(),
            });
        }
        if self.by_name.contains_key(&name) {
            return Err(OrchestratorError::DuplicateAgent { name });
        }

        let index = self.agents.len();
        for tag in descriptor.normalized_capabilities() {
            self.tag_index.entry(tag).or_default().push(index);
        }
        let descriptor = Arc::new(AgentDescriptor { name: name.clone(), ..descriptor });
        self.agents.push(Arc::clone(&descriptor));
        self.by_name.insert(name, index);
        Ok(descriptor)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn descriptors(&self) -> &[Arc<AgentDescriptor>] {
        &self.agents
    }

    /// Resolve a task target to an ordered, non-empty list of registration
    /// indices.
    pub fn select_indices(
        &self,
        target: &TaskTarget,
        context: &HashMap<String, Value>,
    ) -> Result<Vec<usize>, OrchestratorError> {
        match target {
            TaskTarget::Agents(names) => {
                if names.is_empty() {
                    return Err(OrchestratorError::NoMatchingAgent {
                        description: "empty agent list".to_string(),
                    });
                }
                names
                    .iter()
                    .map(|name| {
                        self.by_name
                            .get(name.trim())
                            .copied()
                            .ok_or_else(|| OrchestratorError::UnknownAgent { name: name.clone() })
                    })
                    .collect()
            }
            TaskTarget::Description(text) => {
                let ranked = self.rank(text, context);
                if ranked.is_empty() {
                    return Err(OrchestratorError::NoMatchingAgent {
                        description: text.clone(),
                    });
                }
                Ok(ranked.into_iter().map(|(index, _)| index).collect())
            }
        }
    }

    /// Qualifying `(agent index, score)` pairs, best first.
    pub fn rank(&self, description: &str, context: &HashMap<String, Value>) -> Vec<(usize, u32)> {
        let tokens = tokenize(description);
        let hints = context_hints(context);
        let mut scores = vec![0u32; self.agents.len()];

        for (tag, holders) in &self.tag_index {
            let best = if hints.contains(tag) {
                HINT_SCORE
            } else if tokens.iter().any(|t| t == tag) {
                EXACT_SCORE
            } else if tokens.iter().any(|t| stem_match(t, tag)) {
                STEM_SCORE
            } else {
                continue;
            };
            for &index in holders {
                scores[index] += best;
            }
        }

        let mut ranked: Vec<(usize, u32)> = scores
            .into_iter()
            .enumerate()
            .filter(|&(_, score)| score >= self.min_relevance)
            .collect();
        // Stable: equal scores keep registration order.
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(self.max_candidates);

        debug!(
            description,
            tokens = ?tokens,
            selected = ?ranked
                .iter()
                .map(|&(i, s)| format!("{}={s}", self.agents[i].name))
                .collect::<Vec<_>>(),
            "Ranked agents"
        );
        ranked
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> AgentRegistry {
        let mut r = AgentRegistry::new(5, 1);
        r.register(AgentDescriptor::new("counsel").with_capabilities(["legal", "contracts"]))
            .unwrap();
        r.register(AgentDescriptor::new("auditor").with_capabilities(["finance", "audit"]))
            .unwrap();
        r.register(AgentDescriptor::new("promoter").with_capabilities(["marketing"]))
            .unwrap();
        r
    }

    fn pick<'a>(
        r: &'a AgentRegistry,
        target: &TaskTarget,
        context: &HashMap<String, Value>,
    ) -> Result<Vec<&'a str>, OrchestratorError> {
        let indices = r.select_indices(target, context)?;
        Ok(indices.into_iter().map(|i| r.descriptors()[i].name.as_str()).collect())
    }

    #[test]
    fn tokenizer_drops_stop_words_and_duplicates() {
        assert_eq!(
            tokenize("Please review the Q3 financial-audit, and the audit!"),
            vec!["review", "q3", "financial", "audit"]
        );
    }

    #[test]
    fn stems() {
        assert!(stem_match("financial", "finance"));
        assert!(stem_match("audit", "auditor"));
        assert!(stem_match("market", "marketing"));
        assert!(!stem_match("legal", "financial"));
        assert!(!stem_match("art", "article"));
        assert!(!stem_match("contract", "control"));
    }

    #[test]
    fn description_selects_by_stem_and_exact_match() {
        let r = registry();
        let selected = pick(&r, &TaskTarget::from("financial audit"), &HashMap::new()).unwrap();
        assert_eq!(selected, vec!["auditor"]);
    }

    #[test]
    fn higher_scores_rank_first_and_ties_keep_order() {
        let mut r = registry();
        r.register(AgentDescriptor::new("analyst").with_capabilities(["finance"]))
            .unwrap();
        let ranked = r.rank("finance audit and legal review", &HashMap::new());
        // auditor: finance(3) + audit(3); counsel: legal(3); analyst: finance(3)
        assert_eq!(ranked, vec![(1, 6), (0, 3), (3, 3)]);
    }

    #[test]
    fn context_hint_outweighs_description() {
        let r = registry();
        let context = HashMap::from([("capability".to_string(), json!("Marketing"))]);
        let selected = pick(&r, &TaskTarget::from("legal memo"), &context).unwrap();
        assert_eq!(selected, vec!["promoter", "counsel"]);

        let context = HashMap::from([("capabilities".to_string(), json!(["contracts", 7]))]);
        let ranked = r.rank("", &context);
        assert_eq!(ranked, vec![(0, 5)]);
    }

    #[test]
    fn candidates_are_capped() {
        let mut r = AgentRegistry::new(2, 1);
        for i in 0..4 {
            r.register(AgentDescriptor::new(format!("w{i}")).with_capabilities(["writing"]))
                .unwrap();
        }
        let selected = pick(&r, &TaskTarget::from("writing task"), &HashMap::new()).unwrap();
        assert_eq!(selected, vec!["w0", "w1"]);
    }

    #[test]
    fn no_match_is_an_error() {
        let err = pick(&registry(), &TaskTarget::from("bake a cake"), &HashMap::new()).unwrap_err();
        assert!(matches!(err, OrchestratorError::NoMatchingAgent { .. }));
    }

    #[test]
    fn explicit_list_is_verbatim_and_validated() {
        let r = registry();
        let target = TaskTarget::agents(["promoter", "counsel"]);
        let selected = pick(&r, &target, &HashMap::new()).unwrap();
        assert_eq!(selected, vec!["promoter", "counsel"]);

        let target = TaskTarget::agents(["counsel", "ghost"]);
        let err = pick(&r, &target, &HashMap::new()).unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownAgent { name } if name == "ghost"));

        assert!(pick(&r, &TaskTarget::agents(Vec::<String>::new()), &HashMap::new()).is_err());
    }

    #[test]
    fn duplicate_and_empty_names_rejected() {
        let mut r = registry();
        assert!(matches!(
            r.register(AgentDescriptor::new("auditor")),
            Err(OrchestratorError::DuplicateAgent { .. })
        ));
        assert!(matches!(
            r.register(AgentDescriptor::new("  ")),
            Err(OrchestratorError::InvalidDescriptor { .. })
        ));
        assert_eq!(r.len(), 3);
    }
}
