//! Shared fixtures for Maplecart integration tests.
//!
//! Provides in-memory fakes for every external collaborator the commerce
//! core calls, plus builders that wire fully-functional services over the
//! in-memory repositories. Tests flip the `fail_*` switches to exercise the
//! partial-failure paths.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use maplecart_commerce::collaborators::{
    CatalogLookup, CollaboratorError, CredentialVerifier, ShippingQuoteRequest, ShippingQuoter,
    TaxLookup, TokenIssuer, UserDirectory, UserIdentity, VariantSnapshot,
};
use maplecart_commerce::db::{MemoryOrderRepository, MemorySessionRepository};
use maplecart_commerce::services::{LoginService, OrderService, SessionService};
use maplecart_core::{ItemId, ItemVariantId, Money, UserId};

/// Initialize tracing output for a test binary. Safe to call repeatedly.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Credential verifier over a fixed username/password table.
///
/// Unknown accounts and wrong passwords both come back as `Ok(None)`, the
/// same way a real verifier must answer to prevent account enumeration.
#[derive(Default)]
pub struct FixedCredentials {
    accounts: HashMap<String, (String, UserIdentity)>,
    pub fail: AtomicBool,
}

impl FixedCredentials {
    /// Build a verifier with one known account.
    #[must_use]
    pub fn with_account(username: &str, password: &str, user_id: UserId) -> Self {
        let mut accounts = HashMap::new();
        accounts.insert(
            username.to_owned(),
            (
                password.to_owned(),
                UserIdentity {
                    user_id,
                    username: username.to_owned(),
                },
            ),
        );
        Self {
            accounts,
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl CredentialVerifier for FixedCredentials {
    async fn verify(
        &self,
        username_or_email: &str,
        password: &str,
    ) -> Result<Option<UserIdentity>, CollaboratorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("verifier down".to_owned()));
        }
        Ok(self
            .accounts
            .get(username_or_email)
            .filter(|(stored, _)| stored == password)
            .map(|(_, identity)| identity.clone()))
    }
}

/// Token issuer that mints predictable tokens, with a failure switch.
#[derive(Default)]
pub struct StaticTokenIssuer {
    pub fail: AtomicBool,
}

#[async_trait]
impl TokenIssuer for StaticTokenIssuer {
    async fn issue(
        &self,
        identity: &UserIdentity,
        ttl: Duration,
    ) -> Result<String, CollaboratorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("issuer down".to_owned()));
        }
        Ok(format!(
            "token:{}:{}",
            identity.user_id,
            ttl.num_seconds()
        ))
    }
}

/// User directory that records the calls it receives.
#[derive(Default)]
pub struct RecordingDirectory {
    pub last_logins: Mutex<Vec<(UserId, DateTime<Utc>)>>,
    pub logouts: Mutex<Vec<UserId>>,
    pub fail_last_login: AtomicBool,
    pub fail_logout: AtomicBool,
}

#[async_trait]
impl UserDirectory for RecordingDirectory {
    async fn update_last_login(
        &self,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<(), CollaboratorError> {
        if self.fail_last_login.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("directory down".to_owned()));
        }
        self.last_logins.lock().await.push((user_id, at));
        Ok(())
    }

    async fn mark_logged_out(
        &self,
        user_id: UserId,
        _at: DateTime<Utc>,
    ) -> Result<(), CollaboratorError> {
        if self.fail_logout.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("directory down".to_owned()));
        }
        self.logouts.lock().await.push(user_id);
        Ok(())
    }
}

/// Catalog over a fixed variant table.
#[derive(Default)]
pub struct StaticCatalog {
    variants: HashMap<(i32, i32), VariantSnapshot>,
}

impl StaticCatalog {
    /// Add a variant with the given price and stock.
    #[must_use]
    pub fn with_variant(
        mut self,
        item_id: i32,
        variant_id: i32,
        unit_price: Decimal,
        stock: u32,
        name_en: &str,
        name_fr: &str,
    ) -> Self {
        self.variants.insert(
            (item_id, variant_id),
            VariantSnapshot {
                unit_price: Money::new(unit_price),
                stock,
                name_en: name_en.to_owned(),
                name_fr: name_fr.to_owned(),
                variant_name_en: "Standard".to_owned(),
                variant_name_fr: "Standard".to_owned(),
            },
        );
        self
    }
}

#[async_trait]
impl CatalogLookup for StaticCatalog {
    async fn get_item_variant(
        &self,
        item_id: ItemId,
        variant_id: ItemVariantId,
    ) -> Result<Option<VariantSnapshot>, CollaboratorError> {
        Ok(self
            .variants
            .get(&(item_id.as_i32(), variant_id.as_i32()))
            .cloned())
    }
}

/// Tax table keyed by country and optional province.
///
/// Resolution tries (country, province) first, then (country, None); a miss
/// on both means no rate is configured.
#[derive(Default)]
pub struct StaticTaxTable {
    rates: HashMap<(String, Option<String>), Decimal>,
}

impl StaticTaxTable {
    /// Add a rate for a destination.
    #[must_use]
    pub fn with_rate(mut self, country: &str, province: Option<&str>, rate: Decimal) -> Self {
        self.rates
            .insert((country.to_owned(), province.map(str::to_owned)), rate);
        self
    }
}

#[async_trait]
impl TaxLookup for StaticTaxTable {
    async fn applicable_rate(
        &self,
        country_code: &str,
        province_code: Option<&str>,
    ) -> Result<Option<Decimal>, CollaboratorError> {
        let by_province = self
            .rates
            .get(&(country_code.to_owned(), province_code.map(str::to_owned)));
        let rate = match by_province {
            Some(rate) => Some(*rate),
            None => self.rates.get(&(country_code.to_owned(), None)).copied(),
        };
        Ok(rate)
    }
}

/// Shipping quoter that charges the same amount for every draft.
pub struct FlatRateShipping(pub Money);

#[async_trait]
impl ShippingQuoter for FlatRateShipping {
    async fn quote(&self, _request: &ShippingQuoteRequest) -> Result<Money, CollaboratorError> {
        Ok(self.0)
    }
}

/// Everything a login-flow test needs, with handles on the fakes.
pub struct AuthFixture {
    pub login: LoginService,
    pub sessions: SessionService,
    pub verifier: Arc<FixedCredentials>,
    pub tokens: Arc<StaticTokenIssuer>,
    pub directory: Arc<RecordingDirectory>,
}

/// Build a login service over in-memory storage with one known account.
#[must_use]
pub fn auth_fixture(username: &str, password: &str, user_id: UserId) -> AuthFixture {
    init_tracing();

    let verifier = Arc::new(FixedCredentials::with_account(username, password, user_id));
    let tokens = Arc::new(StaticTokenIssuer::default());
    let directory = Arc::new(RecordingDirectory::default());
    let sessions = SessionService::new(
        Arc::new(MemorySessionRepository::new()),
        Duration::hours(24),
    );
    let login = LoginService::new(
        Arc::clone(&verifier) as Arc<dyn CredentialVerifier>,
        Arc::clone(&tokens) as Arc<dyn TokenIssuer>,
        Arc::clone(&directory) as Arc<dyn UserDirectory>,
        sessions.clone(),
        Duration::hours(1),
    );

    AuthFixture {
        login,
        sessions,
        verifier,
        tokens,
        directory,
    }
}

/// Build an order service over in-memory storage with a small Canadian
/// catalog: 13% HST in Ontario, flat 5.00 shipping.
#[must_use]
pub fn order_fixture() -> OrderService {
    use rust_decimal_macros::dec;

    init_tracing();

    let catalog = StaticCatalog::default()
        .with_variant(1, 1, dec!(10.00), 100, "Maple syrup", "Sirop d'érable")
        .with_variant(2, 2, dec!(25.00), 50, "Wool toque", "Tuque de laine")
        .with_variant(3, 3, dec!(4.50), 2, "Butter tart", "Tarte au beurre");
    let tax = StaticTaxTable::default().with_rate("CA", Some("ON"), dec!(0.13));
    let shipping = FlatRateShipping(Money::new(dec!(5.00)));

    OrderService::new(
        Arc::new(MemoryOrderRepository::new()),
        Arc::new(catalog),
        Arc::new(tax),
        Arc::new(shipping),
    )
}
