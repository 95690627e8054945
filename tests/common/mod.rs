//! Fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use ragchat::blob::FsBlobStore;
use ragchat::chat::{ChatEngine, ChatServices, ChatSettings};
use ragchat_core::chunk::Chunker;
use ragchat_core::embedding::Embedder;
use ragchat_core::error::Permanent;
use ragchat_core::models::ExtractedPage;
use ragchat_core::provider::ProviderKind;
use ragchat_core::services::{BlobStore, LlmEndpoint, ManagedSearch, SearchHit, TextExtractor};
use ragchat_core::store::memory::{InMemoryConversationStore, InMemoryDocumentStore};
use ragchat::ingest::Pipeline;

pub const DIMS: usize = 8;

// ============ Extraction ============

/// Returns canned text per location; unknown locations fail permanently.
#[derive(Default)]
pub struct FakeExtractor {
    texts: Mutex<HashMap<String, String>>,
}

impl FakeExtractor {
    pub fn with(location: &str, text: &str) -> Self {
        let fake = Self::default();
        fake.set(location, text);
        fake
    }

    pub fn set(&self, location: &str, text: &str) {
        self.texts
            .lock()
            .unwrap()
            .insert(location.to_string(), text.to_string());
    }
}

#[async_trait]
impl TextExtractor for FakeExtractor {
    async fn extract(&self, location: &str) -> Result<Vec<ExtractedPage>> {
        match self.texts.lock().unwrap().get(location) {
            Some(text) => Ok(vec![ExtractedPage {
                text: text.clone(),
                page: Some(1),
            }]),
            None => Err(Permanent(format!("no such document: {}", location)).into()),
        }
    }
}

// ============ Embedding ============

/// Bag-of-words hashing embedder. Records every text it embeds.
pub struct FakeEmbedder {
    dims: usize,
    /// Dimension of the vectors actually returned.
    emit_dims: usize,
    pub seen: Mutex<Vec<String>>,
    pub calls: AtomicUsize,
}

impl FakeEmbedder {
    pub fn new() -> Self {
        Self::emitting(DIMS)
    }

    /// Claims `DIMS` but returns vectors of `emit_dims`.
    pub fn emitting(emit_dims: usize) -> Self {
        Self {
            dims: DIMS,
            emit_dims,
            seen: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn last_seen(&self) -> Option<String> {
        self.seen.lock().unwrap().last().cloned()
    }
}

pub fn bag_of_words(text: &str, dims: usize) -> Vec<f32> {
    let mut v = vec![0.0; dims];
    for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
        let bucket = word
            .to_lowercase()
            .bytes()
            .fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize))
            % dims;
        v[bucket] += 1.0;
    }
    v[0] += 0.01;
    v
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn model_name(&self) -> &str {
        "fake-bow"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().extend(texts.iter().cloned());
        Ok(texts.iter().map(|t| bag_of_words(t, self.emit_dims)).collect())
    }
}

// ============ LLM ============

/// Answers condense prompts with `condensed` and answer prompts with
/// `answer`, in the response envelope of the requested model.
pub struct FakeLlm {
    pub condensed: Mutex<String>,
    pub answer: Mutex<String>,
    pub fail: AtomicBool,
    pub delay: Duration,
    pub prompts: Mutex<Vec<(String, String)>>,
}

impl FakeLlm {
    pub fn new(answer: &str) -> Self {
        Self {
            condensed: Mutex::new("How long is the warranty?".to_string()),
            answer: Mutex::new(answer.to_string()),
            fail: AtomicBool::new(false),
            delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_answer(&self, answer: &str) {
        *self.answer.lock().unwrap() = answer.to_string();
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompt(&self, i: usize) -> String {
        self.prompts.lock().unwrap()[i].1.clone()
    }
}

fn is_condense_prompt(prompt: &str) -> bool {
    prompt.contains("Standalone Question:") || prompt.contains("Answer only with the new question")
}

#[async_trait]
impl LlmEndpoint for FakeLlm {
    async fn invoke(&self, model_id: &str, body: &Value) -> Result<Value> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            bail!("ThrottlingException: rate exceeded");
        }
        let prompt = body
            .get("prompt")
            .or_else(|| body.get("inputText"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.prompts
            .lock()
            .unwrap()
            .push((model_id.to_string(), prompt.clone()));

        let text = if is_condense_prompt(&prompt) {
            self.condensed.lock().unwrap().clone()
        } else {
            self.answer.lock().unwrap().clone()
        };
        Ok(match model_id {
            "amazon.titan-tg1-large" => json!({"results": [{"outputText": text}]}),
            "ai21.j2-ultra" => json!({"completions": [{"data": {"text": text}}]}),
            _ => json!({"completion": format!(" {}", text)}),
        })
    }
}

// ============ Managed search ============

pub struct FakeSearch {
    pub hits: Vec<SearchHit>,
    pub tokens: Mutex<Vec<Option<String>>>,
}

impl FakeSearch {
    pub fn new(sources: &[&str]) -> Self {
        Self {
            hits: sources
                .iter()
                .enumerate()
                .map(|(i, s)| SearchHit {
                    document_id: s.to_string(),
                    passage_text: format!("passage {} from {}", i, s),
                    score: 1.0,
                })
                .collect(),
            tokens: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ManagedSearch for FakeSearch {
    async fn retrieve(
        &self,
        _query: &str,
        user_context: Option<&str>,
        page_size: usize,
    ) -> Result<Vec<SearchHit>> {
        self.tokens
            .lock()
            .unwrap()
            .push(user_context.map(str::to_string));
        Ok(self.hits.iter().take(page_size).cloned().collect())
    }
}

// ============ Assembly ============

pub struct Harness {
    pub blobs: Arc<FsBlobStore>,
    pub extractor: Arc<FakeExtractor>,
    pub embedder: Arc<FakeEmbedder>,
    pub documents: Arc<InMemoryDocumentStore>,
    pub conversations: Arc<InMemoryConversationStore>,
    pub llm: Arc<FakeLlm>,
}

impl Harness {
    pub fn new(root: &std::path::Path, llm: FakeLlm) -> Self {
        Self {
            blobs: Arc::new(FsBlobStore::new(root)),
            extractor: Arc::new(FakeExtractor::default()),
            embedder: Arc::new(FakeEmbedder::new()),
            documents: Arc::new(InMemoryDocumentStore::new()),
            conversations: Arc::new(InMemoryConversationStore::new()),
            llm: Arc::new(llm),
        }
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(
            self.blobs.clone(),
            self.extractor.clone(),
            self.embedder.clone(),
            self.documents.clone(),
            Chunker::new(512, 100).unwrap(),
        )
    }

    pub fn settings(&self) -> ChatSettings {
        ChatSettings {
            default_provider: ProviderKind::Claude,
            bot_name: "Guru".to_string(),
            max_history: 20,
            max_sources: 3,
            top_k: 4,
            managed_retrieval: false,
            presign_expiry: Duration::from_secs(30000),
            index_dims: Some(DIMS),
        }
    }

    pub fn engine(&self, settings: ChatSettings, search: Option<Arc<dyn ManagedSearch>>) -> ChatEngine {
        let blobs: Arc<dyn BlobStore> = self.blobs.clone();
        ChatEngine::new(
            settings,
            ChatServices {
                conversations: self.conversations.clone(),
                documents: self.documents.clone(),
                blobs,
                llm: self.llm.clone(),
                embedder: Some(self.embedder.clone()),
                search,
            },
        )
    }
}

/// Brochure text about warranties and pricing, one paragraph each.
pub fn brochure_text() -> String {
    [
        "The Acme X200 comes with a two year limited warranty covering parts and labour.",
        "Pricing starts at 499 dollars for the base model and 699 for the pro model.",
        "Support is available by phone and email on business days.",
    ]
    .join("\n\n")
}
