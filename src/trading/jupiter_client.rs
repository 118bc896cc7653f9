/// Jupiter Ultra API client
///
/// Ultra builds the full swap transaction server side: we fetch an order for
/// the taker wallet, sign it locally and hand it back for execution.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio::time::Duration;
use tracing::{debug, info, instrument};

use super::{OrderRequest, SwapOrder, SwapSubmission, SwapVenue};
use crate::core::TradingWallet;
use crate::util::retry::{is_transient, RetryPolicy};

/// Jupiter Ultra swap venue bound to one trading wallet
pub struct JupiterClient {
    /// HTTP client for API requests
    client: Client,
    /// Ultra API base URL
    api_url: String,
    /// Taker wallet; signs every order
    wallet: TradingWallet,
    /// Applied to order quotes only
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UltraOrderResponse {
    transaction: Option<String>,
    #[serde(default)]
    request_id: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    in_amount: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    out_amount: Option<u64>,
    error_message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UltraExecuteRequest<'a> {
    signed_transaction: &'a str,
    request_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UltraExecuteResponse {
    status: String,
    signature: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    slot: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    input_amount_result: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    output_amount_result: Option<u64>,
    error: Option<String>,
    code: Option<i64>,
}

/// Ultra returns amounts and slots either as JSON numbers or as strings
fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let value: Option<Value> = Option::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("not an unsigned amount: {}", n))),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
        Some(other) => Err(serde::de::Error::custom(format!("unexpected amount: {}", other))),
    }
}

impl JupiterClient {
    pub fn new(api_url: impl Into<String>, wallet: TradingWallet) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            wallet,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Query string for `/ultra/v1/order`
    pub fn order_params(&self, request: &OrderRequest) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("inputMint", request.input_mint.clone()),
            ("outputMint", request.output_mint.clone()),
            ("amount", request.amount.to_string()),
            ("taker", self.wallet.pubkey().to_string()),
        ];
        if let Some(bps) = request.slippage_bps {
            params.push(("slippageBps", bps.to_string()));
        }
        params
    }

    async fn fetch_order(&self, request: &OrderRequest) -> Result<UltraOrderResponse> {
        let url = format!("{}/ultra/v1/order", self.api_url);
        let response = self
            .client
            .get(&url)
            .query(&self.order_params(request))
            .send()
            .await
            .context("Failed to request order from Jupiter")?
            .error_for_status()
            .context("Jupiter order request rejected")?;

        response
            .json()
            .await
            .context("Failed to parse Jupiter order response")
    }
}

#[async_trait]
impl SwapVenue for JupiterClient {
    #[instrument(skip(self), fields(input = %request.input_mint, output = %request.output_mint))]
    async fn get_order(&self, request: &OrderRequest) -> Result<SwapOrder> {
        let order = self
            .retry
            .run("jupiter order", |_| self.fetch_order(request), is_transient)
            .await?;

        let Some(transaction) = order.transaction.filter(|tx| !tx.is_empty()) else {
            bail!(
                "Jupiter returned no transaction: {}",
                order.error_message.as_deref().unwrap_or("no reason given")
            );
        };

        debug!(
            request_id = %order.request_id,
            in_amount = ?order.in_amount,
            out_amount = ?order.out_amount,
            "📊 Order quoted"
        );

        Ok(SwapOrder {
            transaction,
            request_id: order.request_id,
            in_amount: order.in_amount,
            out_amount: order.out_amount,
        })
    }

    fn sign(&self, order: &SwapOrder) -> Result<String> {
        self.wallet.sign_transaction(&order.transaction)
    }

    #[instrument(skip(self, signed_transaction))]
    async fn submit(&self, signed_transaction: &str, request_id: &str) -> Result<SwapSubmission> {
        let url = format!("{}/ultra/v1/execute", self.api_url);
        let response = self
            .client
            .post(&url)
            .json(&UltraExecuteRequest {
                signed_transaction,
                request_id,
            })
            .send()
            .await
            .context("Failed to submit order to Jupiter")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Jupiter execute failed with status {}: {}", status, body);
        }

        let result: UltraExecuteResponse = response
            .json()
            .await
            .context("Failed to parse Jupiter execute response")?;

        info!(
            status = %result.status,
            signature = ?result.signature,
            slot = ?result.slot,
            "⚡ Order executed"
        );

        Ok(SwapSubmission {
            status: result.status,
            signature: result.signature,
            slot: result.slot,
            input_amount: result.input_amount_result,
            output_amount: result.output_amount_result,
            error: result.error,
            code: result.code,
        })
    }
}
