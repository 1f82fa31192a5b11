//! GuardBuilder - Guard の構築とワイヤリング
//!
//! # ポイント
//! - ports（store / clock / id / events）をここで束ねる
//! - 起動時検証（Fail-fast）: config の validate と、期待される task_type
//!   に明示的な policy があるかのチェック

use std::sync::Arc;

use crate::app::guard::Guard;
use crate::config::{ConfigError, GuardConfig};
use crate::impls::TracingEventSink;
use crate::ports::{Clock, EventSink, IdGenerator, SystemClock, TtlStore, UlidGenerator};

/// GuardBuilder は Guard を構築
///
/// # 使用例
/// ```ignore
/// let guard = GuardBuilder::new()
///     .with_store(Arc::new(InMemoryTtlStore::default()))
///     .with_config(config)
///     .expect_policies(&["video_analysis"])
///     .build()?;
/// ```
///
/// `expect_policies` lists task types whose policy must be stated in the
/// config. A missing one fails `build()` instead of silently running under
/// the default policy.
pub struct GuardBuilder {
    store: Option<Arc<dyn TtlStore>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    events: Option<Arc<dyn EventSink>>,
    config: GuardConfig,
    expected_policies: Option<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no TTL store configured")]
    MissingStore,

    #[error("Missing policies for task types: {0:?}. These task types were expected to have an explicit policy.")]
    MissingPolicies(Vec<String>),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl GuardBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            clock: None,
            ids: None,
            events: None,
            config: GuardConfig::default(),
            expected_policies: None,
        }
    }

    pub fn with_store<S: TtlStore + 'static>(mut self, store: Arc<S>) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults to [`SystemClock`].
    pub fn with_clock<C: Clock + 'static>(mut self, clock: Arc<C>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to a [`UlidGenerator`] on the guard's clock.
    pub fn with_id_generator<G: IdGenerator + 'static>(mut self, ids: Arc<G>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Defaults to [`TracingEventSink`].
    pub fn with_event_sink<E: EventSink + 'static>(mut self, events: Arc<E>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_config(mut self, config: GuardConfig) -> Self {
        self.config = config;
        self
    }

    pub fn expect_policies(mut self, task_types: &[&str]) -> Self {
        self.expected_policies = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn build(self) -> Result<Guard, BuildError> {
        self.config.validate()?;

        if let Some(expected) = &self.expected_policies {
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| !self.config.has_explicit_policy(t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingPolicies(missing));
            }
        }

        let store = self.store.ok_or(BuildError::MissingStore)?;
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())) as Arc<dyn IdGenerator>);
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(TracingEventSink) as Arc<dyn EventSink>);

        Ok(Guard::new(store, clock, ids, events, self.config))
    }
}

impl Default for GuardBuilder {
    fn default() -> Self {
        Self::new()
    }
}
