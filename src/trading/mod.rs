/// Swap execution collaborators
///
/// The gateway talks to a venue through three calls (order, sign, submit);
/// any failing step fails the whole order.

pub mod jupiter_client;

use anyhow::Result;
use async_trait::async_trait;

pub use jupiter_client::JupiterClient;

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub input_mint: String,
    pub output_mint: String,
    /// Base units of the input asset
    pub amount: u64,
    /// `None` lets the venue choose its own slippage
    pub slippage_bps: Option<u32>,
}

/// Unsigned transaction quoted by the venue
#[derive(Debug, Clone, PartialEq)]
pub struct SwapOrder {
    pub transaction: String,
    pub request_id: String,
    pub in_amount: Option<u64>,
    pub out_amount: Option<u64>,
}

/// Venue verdict on a submitted transaction
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SwapSubmission {
    pub status: String,
    pub signature: Option<String>,
    pub slot: Option<u64>,
    pub input_amount: Option<u64>,
    pub output_amount: Option<u64>,
    pub error: Option<String>,
    pub code: Option<i64>,
}

impl SwapSubmission {
    pub fn is_success(&self) -> bool {
        self.status == "Success"
    }
}

#[async_trait]
pub trait SwapVenue: Send + Sync {
    async fn get_order(&self, request: &OrderRequest) -> Result<SwapOrder>;

    /// Sign the order's transaction with the account key
    fn sign(&self, order: &SwapOrder) -> Result<String>;

    /// Submit once. Implementations must not retry this call.
    async fn submit(&self, signed_transaction: &str, request_id: &str) -> Result<SwapSubmission>;
}
