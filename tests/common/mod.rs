#![allow(dead_code)]

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;

use bank_ledger::config::TransferConfig;
use bank_ledger::history::HistoryService;
use bank_ledger::money::Currency;
use bank_ledger::transfer::{LimitPolicy, MemoryAuditSink, MemoryLedgerStore};
use bank_ledger::{
    Account, AccountId, AccountStatus, LedgerStore, MemoryDirectory, TransferCoordinator, UserId,
};

/// Coordinator wired to in-memory collaborators
pub struct Harness {
    pub store: Arc<MemoryLedgerStore>,
    pub directory: Arc<MemoryDirectory>,
    pub audit: Arc<MemoryAuditSink>,
    pub coordinator: Arc<TransferCoordinator>,
    pub history: HistoryService,
}

pub fn fast_config() -> TransferConfig {
    TransferConfig {
        max_conflict_retries: 3,
        retry_backoff_ms: 1,
        audit_timeout_ms: 100,
    }
}

pub fn generous_limits() -> LimitPolicy {
    LimitPolicy::new(dec!(100000), dec!(1000000), dec!(10000000))
}

impl Harness {
    pub fn new() -> Self {
        Self::with(generous_limits(), fast_config())
    }

    pub fn with(limits: LimitPolicy, config: TransferConfig) -> Self {
        let store = Arc::new(MemoryLedgerStore::new());
        let directory = Arc::new(MemoryDirectory::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let coordinator = Arc::new(TransferCoordinator::new(
            store.clone(),
            directory.clone(),
            audit.clone(),
            limits,
            config,
        ));
        let history = HistoryService::new(store.clone());
        Self {
            store,
            directory,
            audit,
            coordinator,
            history,
        }
    }

    pub async fn open(&self, owner: UserId, currency: &str, balance: Decimal) -> Account {
        let account = Account::open(owner, Currency::new(currency).unwrap(), balance);
        self.store.insert_account(account.clone()).await;
        account
    }

    pub async fn open_with_status(
        &self,
        owner: UserId,
        balance: Decimal,
        status: AccountStatus,
    ) -> Account {
        let account =
            Account::open(owner, Currency::new("USD").unwrap(), balance).with_status(status);
        self.store.insert_account(account.clone()).await;
        account
    }

    /// New user registered in the directory with a funded default USD account
    pub async fn customer(&self, email: &str, name: &str, balance: Decimal) -> (UserId, Account) {
        let user = Uuid::new_v4();
        let account = self.open(user, "USD", balance).await;
        self.directory
            .register(user, email, name, Some(account.id))
            .await;
        (user, account)
    }

    pub async fn balance(&self, id: AccountId) -> Decimal {
        self.store.get_account(id).await.unwrap().unwrap().balance
    }

    pub async fn available(&self, id: AccountId) -> Decimal {
        self.store
            .get_account(id)
            .await
            .unwrap()
            .unwrap()
            .available_balance
    }
}
