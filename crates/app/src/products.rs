use std::{
    collections::HashMap,
    future::Future,
    hash::Hash,
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Deserialize;
use tracing::{debug, warn};

use orgsvc_clients::{ClientError, FakeStoreClient};
use orgsvc_core::types::{Product, ProductResponse, DEFAULT_CATEGORIES};
use orgsvc_core::{FieldViolation, ServiceError};

use crate::problem::ProblemResponse;
use crate::router::{AppState, Clock};

pub const SERVICE_NAME: &str = "product-service";

const DEFAULT_MIN_PRICE: f64 = 0.0;
const DEFAULT_MAX_PRICE: f64 = 10_000.0;

/// Entries older than `ttl` are treated as absent and evicted on read.
struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, (Instant, V)>>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some((stored_at, value)) if stored_at.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn insert(&self, key: K, value: V) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key, (Instant::now(), value));
    }
}

fn record(result: &'static str) {
    counter!("product_cache_requests_total", "result" => result).increment(1);
}

/// Read-through cache in front of the FakeStore catalogue. Upstream
/// failures degrade to default values instead of errors.
pub struct ProductService {
    client: FakeStoreClient,
    all: TtlCache<(), Vec<Product>>,
    by_id: TtlCache<i64, Product>,
    categories: TtlCache<(), Vec<String>>,
    by_category: TtlCache<String, Vec<Product>>,
    clock: Clock,
}

impl ProductService {
    pub fn new(client: FakeStoreClient, ttl: Duration, clock: Clock) -> Self {
        Self {
            client,
            all: TtlCache::new(ttl),
            by_id: TtlCache::new(ttl),
            categories: TtlCache::new(ttl),
            by_category: TtlCache::new(ttl),
            clock,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    async fn read_through<K, T, F, Fut>(
        &self,
        cache: &TtlCache<K, Vec<T>>,
        key: K,
        operation: &'static str,
        fetch: F,
        fallback: impl FnOnce() -> Vec<T>,
    ) -> ProductResponse<Vec<T>>
    where
        K: Eq + Hash,
        T: Clone,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>, ClientError>>,
    {
        if let Some(values) = cache.get(&key) {
            record("hit");
            debug!(stage = "products", operation, "served from cache");
            return ProductResponse::cached(values, self.now());
        }

        match fetch().await {
            Ok(values) => {
                record("miss");
                if !values.is_empty() {
                    cache.insert(key, values.clone());
                }
                ProductResponse::live(values, self.now())
            }
            Err(err) => {
                record("fallback");
                warn!(stage = "products", operation, error = %err, "catalogue unavailable, serving fallback");
                ProductResponse::fallback(
                    fallback(),
                    self.now(),
                    "Product catalogue is temporarily unavailable; showing default data",
                )
            }
        }
    }

    pub async fn all_products(&self) -> ProductResponse<Vec<Product>> {
        self.read_through(&self.all, (), "all_products", || self.client.products(), Vec::new)
            .await
    }

    pub async fn product(&self, id: i64) -> Result<ProductResponse<Product>, ServiceError> {
        if let Some(product) = self.by_id.get(&id) {
            record("hit");
            return Ok(ProductResponse::cached(product, self.now()));
        }

        match self.client.product(id).await {
            Ok(Some(product)) => {
                record("miss");
                self.by_id.insert(id, product.clone());
                Ok(ProductResponse::live(product, self.now()))
            }
            Ok(None) => Err(ServiceError::not_found("Product", id)),
            Err(err) if err.is_not_found() => Err(ServiceError::not_found("Product", id)),
            Err(err) => {
                record("fallback");
                warn!(stage = "products", product_id = id, error = %err, "catalogue unavailable, serving placeholder");
                Ok(ProductResponse::fallback(
                    Product::unavailable(id),
                    self.now(),
                    "Product details are temporarily unavailable",
                ))
            }
        }
    }

    pub async fn categories(&self) -> ProductResponse<Vec<String>> {
        self.read_through(
            &self.categories,
            (),
            "categories",
            || self.client.categories(),
            || DEFAULT_CATEGORIES.iter().map(|name| name.to_string()).collect(),
        )
        .await
    }

    pub async fn by_category(&self, category: &str) -> Result<ProductResponse<Vec<Product>>, ServiceError> {
        let category = category.trim();
        if category.is_empty() {
            return Err(ServiceError::invalid("category", "must not be blank"));
        }
        Ok(self
            .read_through(
                &self.by_category,
                category.to_string(),
                "by_category",
                || self.client.products_in_category(category),
                Vec::new,
            )
            .await)
    }

    pub async fn by_price(
        &self,
        min: Option<f64>,
        max: Option<f64>,
    ) -> Result<ProductResponse<Vec<Product>>, ServiceError> {
        let min = min.unwrap_or(DEFAULT_MIN_PRICE);
        let max = max.unwrap_or(DEFAULT_MAX_PRICE);
        let mut violations = Vec::new();
        if !min.is_finite() || min < 0.0 {
            violations.push(FieldViolation::new("minPrice", "must be zero or positive").rejecting(min.to_string()));
        }
        if !max.is_finite() || max < 0.0 {
            violations.push(FieldViolation::new("maxPrice", "must be zero or positive").rejecting(max.to_string()));
        }
        if violations.is_empty() && min > max {
            violations.push(
                FieldViolation::new("minPrice", "must not be greater than maxPrice").rejecting(min.to_string()),
            );
        }
        if !violations.is_empty() {
            return Err(ServiceError::validation(violations));
        }

        Ok(self.all_products().await.map(|products| {
            products
                .into_iter()
                .filter(|product| product.price_between(min, max))
                .collect()
        }))
    }

    pub async fn search(&self, keyword: Option<&str>) -> Result<ProductResponse<Vec<Product>>, ServiceError> {
        let Some(keyword) = keyword.map(str::trim).filter(|keyword| !keyword.is_empty()) else {
            return Err(ServiceError::invalid("keyword", "must not be blank"));
        };
        Ok(self.all_products().await.map(|products| {
            products
                .into_iter()
                .filter(|product| product.mentions(keyword))
                .collect()
        }))
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(all_products))
        .route("/categories", get(categories))
        .route("/category/:category", get(products_in_category))
        .route("/search", get(search_products))
        .route("/search/price", get(products_by_price))
        .route("/:id", get(product))
}

fn problem(err: ServiceError) -> ProblemResponse {
    ProblemResponse::from_service_error(SERVICE_NAME, err)
}

fn rejected(rejection: impl std::fmt::Display) -> ProblemResponse {
    ProblemResponse::rejected(SERVICE_NAME, rejection)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceQuery {
    min_price: Option<f64>,
    max_price: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct KeywordQuery {
    keyword: Option<String>,
}

async fn all_products(State(state): State<AppState>) -> Json<ProductResponse<Vec<Product>>> {
    Json(state.products().all_products().await)
}

async fn product(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<ProductResponse<Product>>, ProblemResponse> {
    let Path(id) = id.map_err(rejected)?;
    let product = state.products().product(id).await.map_err(problem)?;
    Ok(Json(product))
}

async fn categories(State(state): State<AppState>) -> Json<ProductResponse<Vec<String>>> {
    Json(state.products().categories().await)
}

async fn products_in_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> Result<Json<ProductResponse<Vec<Product>>>, ProblemResponse> {
    let products = state.products().by_category(&category).await.map_err(problem)?;
    Ok(Json(products))
}

async fn products_by_price(
    State(state): State<AppState>,
    query: Result<Query<PriceQuery>, QueryRejection>,
) -> Result<Json<ProductResponse<Vec<Product>>>, ProblemResponse> {
    let Query(query) = query.map_err(rejected)?;
    let products = state
        .products()
        .by_price(query.min_price, query.max_price)
        .await
        .map_err(problem)?;
    Ok(Json(products))
}

async fn search_products(
    State(state): State<AppState>,
    query: Result<Query<KeywordQuery>, QueryRejection>,
) -> Result<Json<ProductResponse<Vec<Product>>>, ProblemResponse> {
    let Query(query) = query.map_err(rejected)?;
    let products = state
        .products()
        .search(query.keyword.as_deref())
        .await
        .map_err(problem)?;
    Ok(Json(products))
}
