/// Trading wallet loaded from a base58 private key
///
/// Private keys never live in the config file. Each account names the
/// environment variable holding its key, which may come from a `.env` file.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::transaction::VersionedTransaction;
use tracing::debug;

pub struct TradingWallet {
    keypair: Keypair,
}

impl TradingWallet {
    /// Decode a 64-byte base58 secret key
    pub fn from_base58(private_key: &str) -> Result<Self> {
        let bytes = bs58::decode(private_key.trim())
            .into_vec()
            .context("Private key is not valid base58")?;
        if bytes.len() != 64 {
            bail!("Private key must decode to 64 bytes, got {}", bytes.len());
        }
        let keypair = Keypair::from_bytes(&bytes)
            .map_err(|e| anyhow::anyhow!("Invalid keypair bytes: {}", e))?;
        Ok(Self { keypair })
    }

    /// Load the key named by `env_var` and check it controls `expected_address`
    pub fn from_env(env_var: &str, expected_address: &str) -> Result<Self> {
        let private_key = std::env::var(env_var)
            .with_context(|| format!("Environment variable {} is not set", env_var))?;
        let wallet = Self::from_base58(&private_key)?;
        let pubkey = wallet.pubkey().to_string();
        if pubkey != expected_address {
            bail!(
                "Key in {} belongs to {}, but the account is configured for {}",
                env_var,
                pubkey,
                expected_address
            );
        }
        debug!(wallet = %pubkey, "🔑 Trading wallet loaded");
        Ok(wallet)
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    /// Sign a base64 versioned transaction at this wallet's signer slot
    pub fn sign_transaction(&self, transaction_base64: &str) -> Result<String> {
        let transaction_bytes = BASE64
            .decode(transaction_base64)
            .context("Failed to decode swap transaction")?;

        let mut transaction: VersionedTransaction = bincode::deserialize(&transaction_bytes)
            .context("Failed to deserialize transaction")?;

        let pubkey = self.pubkey();
        let required = transaction.message.header().num_required_signatures as usize;
        let slot = transaction
            .message
            .static_account_keys()
            .iter()
            .take(required)
            .position(|key| *key == pubkey)
            .with_context(|| format!("Wallet {} is not a required signer", pubkey))?;

        if transaction.signatures.len() < required {
            transaction
                .signatures
                .resize(required, solana_sdk::signature::Signature::default());
        }
        let message_bytes = transaction.message.serialize();
        transaction.signatures[slot] = self.keypair.sign_message(&message_bytes);

        let signed = bincode::serialize(&transaction).context("Failed to serialize signed transaction")?;
        Ok(BASE64.encode(signed))
    }
}
