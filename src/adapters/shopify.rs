//! Shopify Admin REST adapter for paging through orders.
//!
//! Each call fetches a single page of `orders.json`, filtered with
//! `created_at_min` and authenticated with HTTP basic auth (private app
//! credentials). There is no retry here: a failed page fails the run and the
//! unchanged watermark makes the next run fetch the same window again.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::{OrderSource, SourceError};
use crate::domain::{Order, OrderPage, Watermark, ORDER_FIELDS};

/// Maximum page size accepted by the orders endpoint
pub const DEFAULT_PAGE_SIZE: u32 = 250;

/// Default per-request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Configuration for the Shopify client
#[derive(Clone)]
pub struct ShopifyConfig {
    /// Shop base URL, e.g. `https://my-shop.myshopify.com`
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub page_size: u32,
    pub timeout_secs: u64,
}

impl ShopifyConfig {
    /// Config for a shop addressed by its `.myshopify.com` alias
    pub fn for_shop(alias: &str, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            base_url: format!("https://{}.myshopify.com", alias),
            username: username.into(),
            password: password.into(),
            page_size: DEFAULT_PAGE_SIZE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl std::fmt::Debug for ShopifyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShopifyConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("page_size", &self.page_size)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Shopify Admin API client
#[derive(Clone)]
pub struct ShopifyClient {
    client: Client,
    config: ShopifyConfig,
    fields: String,
}

impl ShopifyClient {
    pub fn new(config: ShopifyConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            config,
            fields: ORDER_FIELDS.join(","),
        })
    }

    pub fn config(&self) -> &ShopifyConfig {
        &self.config
    }

    /// URL of the orders listing endpoint
    fn orders_url(&self) -> String {
        format!(
            "{}/admin/orders.json",
            self.config.base_url.trim_end_matches('/')
        )
    }

    /// Query parameters for one page
    fn page_query(&self, created_at_min: &Watermark, page: u32) -> Vec<(&'static str, String)> {
        vec![
            ("limit", self.config.page_size.to_string()),
            ("status", "any".to_string()),
            ("fields", self.fields.clone()),
            ("created_at_min", created_at_min.to_iso_string()),
            ("page", page.to_string()),
        ]
    }
}

#[async_trait]
impl OrderSource for ShopifyClient {
    fn name(&self) -> &str {
        "shopify"
    }

    async fn fetch_page(
        &self,
        created_at_min: &Watermark,
        page: u32,
    ) -> Result<Vec<Order>, SourceError> {
        debug!(page, %created_at_min, "Requesting order page");

        let response = self
            .client
            .get(self.orders_url())
            .basic_auth(&self.config.username, Some(&self.config.password))
            .query(&self.page_query(created_at_min, page))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(SourceError::Http { status, body });
        }

        let page_body: OrderPage = serde_json::from_str(&body)?;
        debug!(page, count = page_body.orders.len(), "Received order page");

        Ok(page_body.orders)
    }
}
