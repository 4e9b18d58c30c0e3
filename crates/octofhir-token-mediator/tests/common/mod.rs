//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use octofhir_token_mediator::prelude::*;
use octofhir_token_mediator::{ManualClock, TokenMediatorBuilder};
use serde_json::{Value, json};

pub const SECRET: &str = "integration-jwt-secret";
pub const PASSWORD: &str = "shared-password";

/// In-memory backing store.
///
/// Logins take `latency` (on the tokio clock) so concurrent callers overlap.
/// Issued credentials are numbered `tok1`, `tok2`, ... in issue order.
pub struct InMemoryStore {
    accounts: Mutex<HashMap<String, String>>,
    created: Mutex<Vec<AccountPayload>>,
    held: Mutex<HashSet<String>>,
    logins: AtomicUsize,
    creates: AtomicUsize,
    issued: AtomicUsize,
    fail_create: AtomicBool,
    unavailable: AtomicBool,
    latency: Duration,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Self::with_latency(Duration::from_millis(10))
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            accounts: Mutex::new(HashMap::new()),
            created: Mutex::new(Vec::new()),
            held: Mutex::new(HashSet::new()),
            logins: AtomicUsize::new(0),
            creates: AtomicUsize::new(0),
            issued: AtomicUsize::new(0),
            fail_create: AtomicBool::new(false),
            unavailable: AtomicBool::new(false),
            latency,
        })
    }

    /// Registers an existing account.
    pub fn seed(&self, identity: &str, password: &str) {
        self.accounts
            .lock()
            .unwrap()
            .insert(identity.to_string(), password.to_string());
    }

    /// Makes logins for `identity` hang forever.
    pub fn hold(&self, identity: &str) {
        self.held.lock().unwrap().insert(identity.to_string());
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> Vec<AccountPayload> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackingStore for InMemoryStore {
    async fn login(&self, credentials: &LoginCredentials) -> Result<Credential, BackingError> {
        self.logins.fetch_add(1, Ordering::SeqCst);

        let held = self.held.lock().unwrap().contains(&credentials.identity);
        if held {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(self.latency).await;

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackingError::unavailable("store offline"));
        }

        let stored = self
            .accounts
            .lock()
            .unwrap()
            .get(&credentials.identity)
            .cloned();
        match stored {
            None => Err(BackingError::AccountNotFound),
            Some(password) if password != credentials.password => {
                Err(BackingError::InvalidCredentials)
            }
            Some(_) => {
                let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(Credential::new(format!("tok{n}")))
            }
        }
    }

    async fn create(&self, payload: &AccountPayload) -> Result<Value, BackingError> {
        let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.latency).await;

        if self.fail_create.load(Ordering::SeqCst) {
            return Err(BackingError::rejected("duplicate key"));
        }

        let identity = payload
            .get("email")
            .and_then(Value::as_str)
            .ok_or_else(|| BackingError::rejected("missing email"))?
            .to_string();
        let password = payload
            .get("password")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        self.accounts.lock().unwrap().insert(identity, password);
        self.created.lock().unwrap().push(payload.clone());
        Ok(json!({ "id": format!("acc-{n}") }))
    }
}

/// A config keyed by the `sub` claim.
pub fn config() -> MediatorConfig {
    MediatorConfig::new(SECRET, PASSWORD).with_identifier("sub")
}

/// A builder with a wall clock frozen at `now`.
pub fn builder_at(
    config: MediatorConfig,
    store: Arc<InMemoryStore>,
    now: i64,
) -> (TokenMediatorBuilder, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::at(now));
    let builder = TokenMediator::builder(config, store).clock(clock.clone());
    (builder, clock)
}

pub fn mediator_at(config: MediatorConfig, store: Arc<InMemoryStore>, now: i64) -> TokenMediator {
    let (builder, _) = builder_at(config, store, now);
    builder.build().unwrap()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
