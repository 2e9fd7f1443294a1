//! Action handlers and the exchange/action lookup table.
//!
//! Handlers come from two places:
//! - handler manifests discovered on disk by [`load_actions`]
//! - in-code handlers registered on the subscription manager
//!
//! Both end up in an [`ActionTable`], which is immutable once registration
//! completes.

mod manifest;
mod registry;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::broker::Message;
use crate::mail::MailData;

pub use manifest::ManifestAction;
pub use registry::{load_actions, HANDLER_FILE_SUFFIX};

/// Produces the mail for one message.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn run(&self, message: &Message) -> anyhow::Result<MailData>;
}

/// Adapter turning an async closure into an [`ActionHandler`].
pub struct FnAction<F>(F);

#[async_trait]
impl<F, Fut> ActionHandler for FnAction<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<MailData>> + Send + 'static,
{
    async fn run(&self, message: &Message) -> anyhow::Result<MailData> {
        (self.0)(message.clone()).await
    }
}

/// Wrap an async closure as a shareable handler.
///
/// ```rust,ignore
/// let handler = action_fn(|message| async move {
///     Ok(MailData::to("ops@example.com").template_data(message.params))
/// });
/// ```
pub fn action_fn<F, Fut>(f: F) -> Arc<dyn ActionHandler>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<MailData>> + Send + 'static,
{
    Arc::new(FnAction(f))
}

/// Exchange name -> action name -> handler.
#[derive(Clone, Default)]
pub struct ActionTable {
    exchanges: HashMap<String, HashMap<String, Arc<dyn ActionHandler>>>,
}

impl ActionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `exchange/action`, replacing any previous binding.
    pub fn insert(
        &mut self,
        exchange: impl Into<String>,
        action: impl Into<String>,
        handler: Arc<dyn ActionHandler>,
    ) {
        self.exchanges
            .entry(exchange.into())
            .or_default()
            .insert(action.into(), handler);
    }

    pub fn get(&self, exchange: &str, action: &str) -> Option<Arc<dyn ActionHandler>> {
        self.exchanges.get(exchange)?.get(action).cloned()
    }

    /// Exchange names, sorted.
    pub fn exchanges(&self) -> Vec<String> {
        let mut names: Vec<String> = self.exchanges.keys().cloned().collect();
        names.sort();
        names
    }

    /// Action names bound on `exchange`, sorted.
    pub fn actions(&self, exchange: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .exchanges
            .get(exchange)
            .map(|actions| actions.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Copy every binding of `other` into this table; `other` wins on conflict.
    pub fn merge(&mut self, other: &ActionTable) {
        for (exchange, actions) in &other.exchanges {
            for (action, handler) in actions {
                self.insert(exchange.clone(), action.clone(), handler.clone());
            }
        }
    }

    /// Total number of bound actions.
    pub fn len(&self) -> usize {
        self.exchanges.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ActionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for exchange in self.exchanges() {
            map.entry(&exchange, &self.actions(&exchange));
        }
        map.finish()
    }
}
