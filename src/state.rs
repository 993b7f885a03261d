use crate::billing::{BillingProvider, MemorySubscriptionStore, PriceTable, SubscriptionStore};
use crate::config::Config;
use crate::models::{Habit, Task};
use crate::storage::{AccountStore, KeyValueStore, KvRepository, Repository};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub accounts: Arc<AccountStore>,
    pub habits: Arc<dyn Repository<Habit>>,
    pub tasks: Arc<dyn Repository<Task>>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub billing: Arc<dyn BillingProvider>,
    pub prices: Arc<PriceTable>,
    /// Held across every load-modify-save cycle.
    pub writes: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn KeyValueStore>,
        billing: Arc<dyn BillingProvider>,
        prices: PriceTable,
    ) -> Self {
        Self {
            config: Arc::new(config),
            accounts: Arc::new(AccountStore::new(Arc::clone(&store))),
            habits: Arc::new(KvRepository::<Habit>::new(Arc::clone(&store))),
            tasks: Arc::new(KvRepository::<Task>::new(store)),
            subscriptions: Arc::new(MemorySubscriptionStore::default()),
            billing,
            prices: Arc::new(prices),
            writes: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_subscriptions(mut self, subscriptions: Arc<dyn SubscriptionStore>) -> Self {
        self.subscriptions = subscriptions;
        self
    }
}
