//! Shared test doubles: scripted backends, a counting loader and a
//! topic-axis embedder.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use mdsa_conductor::backend::{
    BackendLoader, BackendSpec, EmbeddingError, EmbeddingProvider, GenerationBackend,
    GenerationError, GenerationOutput, GenerationParams, LoadError,
};
use mdsa_conductor::lifecycle::QuantizationLevel;

/// One scripted generation outcome
#[derive(Clone, Debug)]
pub enum Step {
    /// Reply immediately
    Reply(String),
    /// Never complete; the pipeline's timeout must fire
    Hang,
    /// Backend-side error
    Fail(String),
}

/// Backend that plays a script; the last step repeats
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(script: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn replying(text: &str) -> Arc<Self> {
        Self::new([Step::Reply(text.to_string())])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        let mut script = self.script.lock();
        if script.len() > 1 {
            script.pop_front().unwrap_or(Step::Hang)
        } else {
            script.front().cloned().unwrap_or(Step::Hang)
        }
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        _prompt: &str,
        _params: &GenerationParams,
    ) -> Result<GenerationOutput, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next_step() {
            Step::Reply(text) => Ok(GenerationOutput::text(text)),
            Step::Fail(reason) => Err(GenerationError::Backend(reason)),
            Step::Hang => std::future::pending().await,
        }
    }
}

/// Loader handing out pre-built backends, counting loads per id
#[derive(Default)]
pub struct MockLoader {
    backends: HashMap<String, Arc<ScriptedBackend>>,
    load_delay: Duration,
    failures: Mutex<HashMap<String, usize>>,
    loads: Mutex<HashMap<String, usize>>,
    unloads: AtomicUsize,
}

impl MockLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend_id: &str, backend: Arc<ScriptedBackend>) -> Self {
        self.backends.insert(backend_id.to_string(), backend);
        self
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Fail the next `count` loads of `backend_id`
    pub fn with_load_failures(self, backend_id: &str, count: usize) -> Self {
        self.failures.lock().insert(backend_id.to_string(), count);
        self
    }

    pub fn loads_of(&self, backend_id: &str) -> usize {
        self.loads.lock().get(backend_id).copied().unwrap_or(0)
    }

    pub fn total_loads(&self) -> usize {
        self.loads.lock().values().sum()
    }

    pub fn unloads(&self) -> usize {
        self.unloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendLoader for MockLoader {
    async fn load(
        &self,
        spec: &BackendSpec,
        _level: QuantizationLevel,
    ) -> Result<Arc<dyn GenerationBackend>, LoadError> {
        *self.loads.lock().entry(spec.backend_id.clone()).or_default() += 1;
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        let fail = self
            .failures
            .lock()
            .get_mut(&spec.backend_id)
            .is_some_and(|left| {
                let fail = *left > 0;
                *left = left.saturating_sub(1);
                fail
            });
        if fail {
            return Err(LoadError::Unreachable("model server not ready".to_string()));
        }
        let backend = self
            .backends
            .get(&spec.backend_id)
            .cloned()
            .unwrap_or_else(|| ScriptedBackend::replying("ok"));
        Ok(backend)
    }

    async fn unload(&self, _spec: &BackendSpec, _level: QuantizationLevel) -> Result<(), LoadError> {
        self.unloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Embeds text onto fixed topic axes; text with no topic words lands on
/// the last axis, orthogonal to every topic
pub struct TopicEmbedder {
    topics: Vec<Vec<&'static str>>,
}

impl TopicEmbedder {
    pub fn new(topics: Vec<Vec<&'static str>>) -> Self {
        Self { topics }
    }

    pub fn axis(&self, index: usize) -> Vec<f32> {
        let mut vector = vec![0.0; self.topics.len() + 1];
        vector[index] = 1.0;
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for TopicEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let text = text.to_lowercase();
        let mut vector: Vec<f32> = self
            .topics
            .iter()
            .map(|words| {
                if words.iter().any(|w| text.contains(w)) {
                    1.0
                } else {
                    0.0
                }
            })
            .collect();
        let off_topic = if vector.iter().all(|v| *v == 0.0) { 1.0 } else { 0.0 };
        vector.push(off_topic);
        Ok(vector)
    }
}

/// Install a test subscriber honoring `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
