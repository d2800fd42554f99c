//! The memory pipeline: candidate extraction, CREATE/MERGE/SKIP dedup
//! arbitration, and merge execution.
//!
//! Three entry points funnel through the same dedup path: automatic
//! extraction from compacted transcripts, explicit saves from the
//! `memory_remember` tool, and recall (which only reads, but shares the
//! embedding plumbing). The pipeline degrades rather than fails: embedding
//! errors skip the vector pre-filter, LLM errors default to CREATE, and
//! extraction problems never surface past a warning.

use std::sync::Arc;

use serde::Deserialize;

use pigo_core::{ChatClient, Ctx, Error, Message};

use crate::store::{Category, Memory, MemoryStore};

const EXTRACTION_PROMPT: &str = r#"You extract long-term memories from a conversation transcript.

Return a JSON array (possibly empty) of candidate memories. Each candidate:
{"category": "...", "abstract": "...", "overview": "...", "content": "..."}

Categories:
- profile: stable facts about the user (name, role, environment)
- preferences: how the user likes things done
- entities: projects, repositories, services, people the user works with
- events: things that happened in this session worth recalling later
- cases: problems encountered and how they were resolved
- patterns: recurring habits or conventions observed across work

Rules:
1. abstract is ONE sentence; overview is 2-4 sentences; content is complete.
2. Only extract durable information. Greetings, one-off file listings, and
   routine tool chatter are not memories.
3. Return [] when nothing qualifies.
4. Return ONLY the JSON array, no commentary."#;

const DECISION_PROMPT: &str = r#"You deduplicate a candidate memory against similar existing memories.

Decide one of:
- "create": the candidate is genuinely new information
- "merge": the candidate refines or extends one existing memory
- "skip": the candidate adds nothing over what is stored

Respond with ONLY a JSON object:
{"decision": "create" | "merge" | "skip", "reason": "...", "merge_target": "<id, required for merge>"}"#;

const NEAR_DUPLICATE_PROMPT: &str = r#"You check whether a candidate memory describes the same occurrence as an existing memory.

These are historical records: they are never merged. Decide one of:
- "create": a distinct occurrence, keep both
- "skip": the same occurrence already recorded

Respond with ONLY a JSON object:
{"decision": "create" | "skip", "reason": "..."}"#;

const MERGE_PROMPT: &str = r#"Merge two memories about the same subject into one.

Keep every specific detail (names, paths, versions, outcomes); prefer the
newer information where they disagree. Respond with ONLY a JSON object:
{"abstract": "one sentence", "overview": "2-4 sentences", "content": "full merged content"}"#;

/// A memory proposed by extraction or by the `memory_remember` tool. The
/// category arrives as free text and is validated against the closed set.
#[derive(Debug, Clone, Deserialize)]
pub struct Candidate {
    pub category: String,
    #[serde(rename = "abstract")]
    pub abstract_: String,
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub content: String,
}

/// What the dedup path did with a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Created(String),
    Merged(String),
    Skipped,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Created(id) => write!(f, "created memory {}", id),
            Outcome::Merged(id) => write!(f, "merged into memory {}", id),
            Outcome::Skipped => write!(f, "skipped (already known)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Cosine similarity floor for the dedup pre-filter (typical 0.75-0.9).
    pub similarity_threshold: f32,
    /// Default result count for recall.
    pub default_top_k: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.82,
            default_top_k: 5,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DecisionReply {
    decision: String,
    #[serde(default)]
    #[allow(dead_code)]
    reason: String,
    #[serde(default)]
    merge_target: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MergeReply {
    #[serde(rename = "abstract")]
    abstract_: String,
    overview: String,
    content: String,
}

pub struct MemoryPipeline {
    store: Arc<MemoryStore>,
    client: Arc<dyn ChatClient>,
    config: MemoryConfig,
}

impl MemoryPipeline {
    pub fn new(store: Arc<MemoryStore>, client: Arc<dyn ChatClient>, config: MemoryConfig) -> Self {
        Self {
            store,
            client,
            config,
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Extract candidates from a compacted transcript and run each through
    /// dedup. Never fails: every problem is logged and skipped so compaction
    /// proceeds regardless.
    pub async fn extract_from_transcript(&self, ctx: &Ctx, transcript: &str) {
        if transcript.trim().is_empty() {
            return;
        }

        let messages = vec![
            Message::system(EXTRACTION_PROMPT),
            Message::user(transcript.to_string()),
        ];

        let reply = match self.client.chat(ctx, &messages, &[]).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "Memory extraction call failed, skipping");
                return;
            }
        };

        let candidates: Vec<Candidate> = match serde_json::from_str(strip_fences(&reply.content)) {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(error = %e, "Memory extraction returned invalid JSON, skipping");
                return;
            }
        };

        for candidate in candidates {
            match self.process_candidate(ctx, candidate).await {
                Ok(outcome) => tracing::debug!(outcome = %outcome, "Extracted memory processed"),
                Err(e) => tracing::warn!(error = %e, "Memory candidate failed, skipping"),
            }
        }

        if let Err(e) = self.store.save() {
            tracing::warn!(error = %e, "Failed to persist memory store after extraction");
        }
    }

    /// Explicit save: the candidate came from the model via `memory_remember`.
    pub async fn remember(&self, ctx: &Ctx, candidate: Candidate) -> Result<Outcome, Error> {
        let outcome = self.process_candidate(ctx, candidate).await?;
        self.store.save()?;
        Ok(outcome)
    }

    /// Recall: vector search first, keyword fallback when embedding fails or
    /// returns nothing. Every hit's `active_count` is bumped and persisted.
    pub async fn recall(
        &self,
        ctx: &Ctx,
        query: &str,
        top_k: Option<usize>,
        category: Option<Category>,
    ) -> Result<Vec<Memory>, Error> {
        let top_k = top_k.unwrap_or(self.config.default_top_k);

        let mut hits: Vec<Memory> = match self.client.embed(ctx, query).await {
            Ok(vector) => self
                .store
                .search_by_vector(&vector, top_k, category)
                .into_iter()
                .map(|(m, _)| m)
                .collect(),
            Err(e) => {
                tracing::debug!(error = %e, "Embedding failed, falling back to keyword recall");
                Vec::new()
            }
        };

        if hits.is_empty() {
            hits = self.store.search_by_keyword(query, top_k);
            if let Some(category) = category {
                hits.retain(|m| m.category == category);
            }
        }

        for memory in &hits {
            if let Err(e) = self.store.increment_active(&memory.id) {
                tracing::warn!(id = %memory.id, error = %e, "Failed to bump active count");
            }
        }
        if !hits.is_empty() {
            self.store.save()?;
        }

        Ok(hits)
    }

    /// The shared dedup path. Candidates with a category outside the closed
    /// set are dropped silently (Skipped).
    async fn process_candidate(&self, ctx: &Ctx, candidate: Candidate) -> Result<Outcome, Error> {
        let Some(category) = Category::parse(&candidate.category) else {
            tracing::debug!(category = %candidate.category, "Dropping candidate with unknown category");
            return Ok(Outcome::Skipped);
        };

        let embed_text = format!("{} {}", candidate.abstract_, candidate.overview);
        let vector = match self.client.embed(ctx, &embed_text).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!(error = %e, "Embedding failed, dedup proceeds without pre-filter");
                None
            }
        };

        // Pre-filter. When embedding failed the vector filter is skipped,
        // but the LLM still arbitrates: keyword matches stand in as the
        // similar set.
        let similar: Vec<(Memory, f32)> = match &vector {
            Some(v) => self
                .store
                .find_similar(v, self.config.similarity_threshold, Some(category)),
            None => self
                .store
                .search_by_keyword(&candidate.abstract_, 5)
                .into_iter()
                .filter(|m| m.category == category)
                .map(|m| (m, 0.0))
                .collect(),
        };

        if similar.is_empty() {
            return self.create(candidate, category, vector);
        }

        if category.is_append_only() {
            // History never merges; the only question is whether this is a
            // repeat of a recorded occurrence.
            let decision = self
                .ask_decision(ctx, NEAR_DUPLICATE_PROMPT, &candidate, &similar)
                .await;
            return match decision.as_deref() {
                Some("skip") => Ok(Outcome::Skipped),
                _ => self.create(candidate, category, vector),
            };
        }

        if category == Category::Profile {
            let (target, _) = similar[0].clone();
            return self.merge(ctx, target, candidate, vector).await;
        }

        let (decision, merge_target) = match self
            .ask_full_decision(ctx, &candidate, &similar)
            .await
        {
            Some(reply) => reply,
            None => (String::from("create"), None),
        };

        match decision.as_str() {
            "skip" => Ok(Outcome::Skipped),
            "merge" => {
                let target = merge_target
                    .and_then(|id| self.store.get(&id))
                    .or_else(|| similar.first().map(|(m, _)| m.clone()));
                match target {
                    Some(target) => self.merge(ctx, target, candidate, vector).await,
                    None => self.create(candidate, category, vector),
                }
            }
            _ => self.create(candidate, category, vector),
        }
    }

    fn create(
        &self,
        candidate: Candidate,
        category: Category,
        vector: Option<Vec<f32>>,
    ) -> Result<Outcome, Error> {
        let memory = Memory::new(
            category,
            candidate.abstract_,
            candidate.overview,
            candidate.content,
        )
        .with_vector(vector);
        let id = self.store.add(memory)?;
        Ok(Outcome::Created(id))
    }

    /// Merge execution: ask the model for the combined memory and overwrite
    /// the target in place. Failure leaves the store untouched.
    async fn merge(
        &self,
        ctx: &Ctx,
        target: Memory,
        candidate: Candidate,
        vector: Option<Vec<f32>>,
    ) -> Result<Outcome, Error> {
        let prompt = format!(
            "Existing memory:\nabstract: {}\noverview: {}\ncontent: {}\n\n\
             New memory:\nabstract: {}\noverview: {}\ncontent: {}",
            target.abstract_,
            target.overview,
            target.content,
            candidate.abstract_,
            candidate.overview,
            candidate.content,
        );
        let messages = vec![Message::system(MERGE_PROMPT), Message::user(prompt)];

        let merged: MergeReply = match self.client.chat(ctx, &messages, &[]).await {
            Ok(reply) => match serde_json::from_str(strip_fences(&reply.content)) {
                Ok(merged) => merged,
                Err(e) => {
                    tracing::warn!(error = %e, "Merge reply unparseable, leaving target unchanged");
                    return Ok(Outcome::Skipped);
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Merge call failed, leaving target unchanged");
                return Ok(Outcome::Skipped);
            }
        };

        let mut updated = target;
        updated.abstract_ = merged.abstract_;
        updated.overview = merged.overview;
        updated.content = merged.content;
        if vector.is_some() {
            updated.vector = vector;
        }
        let id = updated.id.clone();
        self.store.update(updated)?;
        Ok(Outcome::Merged(id))
    }

    async fn ask_full_decision(
        &self,
        ctx: &Ctx,
        candidate: &Candidate,
        similar: &[(Memory, f32)],
    ) -> Option<(String, Option<String>)> {
        let reply = self
            .ask(ctx, DECISION_PROMPT, candidate, similar)
            .await?;
        Some((reply.decision.to_lowercase(), reply.merge_target))
    }

    async fn ask_decision(
        &self,
        ctx: &Ctx,
        prompt: &str,
        candidate: &Candidate,
        similar: &[(Memory, f32)],
    ) -> Option<String> {
        self.ask(ctx, prompt, candidate, similar)
            .await
            .map(|r| r.decision.to_lowercase())
    }

    async fn ask(
        &self,
        ctx: &Ctx,
        prompt: &str,
        candidate: &Candidate,
        similar: &[(Memory, f32)],
    ) -> Option<DecisionReply> {
        let mut user = format!(
            "Candidate:\nabstract: {}\noverview: {}\ncontent: {}\n\nSimilar memories:\n",
            candidate.abstract_, candidate.overview, candidate.content
        );
        for (memory, score) in similar.iter().take(5) {
            user.push_str(&format!(
                "- id: {} (similarity {:.2})\n  abstract: {}\n  overview: {}\n",
                memory.id, score, memory.abstract_, memory.overview
            ));
        }

        let messages = vec![Message::system(prompt), Message::user(user)];
        match self.client.chat(ctx, &messages, &[]).await {
            Ok(reply) => match serde_json::from_str(strip_fences(&reply.content)) {
                Ok(decision) => Some(decision),
                Err(e) => {
                    tracing::debug!(error = %e, "Dedup decision unparseable, defaulting to create");
                    None
                }
            },
            Err(e) => {
                tracing::debug!(error = %e, "Dedup decision call failed, defaulting to create");
                None
            }
        }
    }
}

/// Tolerate models that wrap JSON in markdown fences.
fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}
