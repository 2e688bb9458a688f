use std::sync::Arc;

use anyhow::Result;

use crate::cache::Cache;
use crate::config::Config;
use crate::notify::MailQueue;
use crate::retriever::Retriever;
use crate::store::Store;

/// Explicit dependency bundle, constructed once at startup and passed into
/// the Listener and Scheduler as a parameter.
///
/// Every component it owns is threaded through function parameters rather
/// than looked up from global state, which also means a handler can be
/// exercised in a test against whatever `Daemon` it's handed.
#[derive(Clone)]
pub struct Daemon {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub cache: Arc<Cache>,
    pub retriever: Arc<Retriever>,
    pub mail_queue: Arc<MailQueue>,
}

impl Daemon {
    pub async fn new(config: Config) -> Result<Self> {
        let store = Arc::new(Store::connect(&config.database_url()).await?);
        let cache = Arc::new(Cache::new(store.clone()));
        let retriever = Arc::new(Retriever::new(config.community.clone()));
        let mail_queue = Arc::new(MailQueue::new());

        Ok(Daemon {
            config: Arc::new(config),
            store,
            cache,
            retriever,
            mail_queue,
        })
    }
}
