//! Secondary (EVM) ledger client
//!
//! One HTTP provider is shared by the oracle reader, the receipt poller and
//! the relayer.

use crate::linker::{ReceiptSource, Relayer};
use crate::trust::{PlayerSummary, TrustOracle};
use crate::{Result, RuntimeError};
use async_trait::async_trait;
use ethers::contract::{abigen, ContractError};
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, BlockNumber, H256, U64};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

abigen!(
    AiOracle,
    r#"[
        function getSummary(bytes32 playerId, uint32 periodId) external view returns (int32, uint8, bytes16)
    ]"#
);

abigen!(
    AddressMapper,
    r#"[
        function setMyMapping(string flowAddrLowerNo0x)
    ]"#
);

type RelayClient = SignerMiddleware<Provider<Http>, LocalWallet>;

#[derive(Clone)]
pub struct EvmClient {
    provider: Provider<Http>,
    chain_id: u64,
}

impl EvmClient {
    pub fn connect(rpc_url: &str, chain_id: u64, timeout: Duration) -> Result<Self> {
        let url: reqwest::Url = rpc_url.parse().map_err(|e| {
            RuntimeError::InvalidConfiguration(format!("invalid rpc url {rpc_url}: {e}"))
        })?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RuntimeError::InvalidConfiguration(e.to_string()))?;

        Ok(Self {
            provider: Provider::new(Http::new_with_client(url, http)),
            chain_id,
        })
    }

    pub fn provider(&self) -> &Provider<Http> {
        &self.provider
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

#[async_trait]
impl ReceiptSource for EvmClient {
    async fn receipt_status(&self, tx_hash: H256) -> Result<Option<bool>> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| RuntimeError::UpstreamUnavailable(e.to_string()))?;

        Ok(receipt.map(|r| r.status == Some(U64::from(1))))
    }
}

/// Read-only view over the oracle contract
pub struct OracleClient {
    contract: AiOracle<Provider<Http>>,
}

impl OracleClient {
    pub fn new(evm: &EvmClient, address: Address) -> Self {
        Self {
            contract: AiOracle::new(address, Arc::new(evm.provider().clone())),
        }
    }
}

#[async_trait]
impl TrustOracle for OracleClient {
    async fn get_summary(
        &self,
        identity_key: [u8; 32],
        period_id: u32,
    ) -> Result<Option<PlayerSummary>> {
        match self.contract.get_summary(identity_key, period_id).call().await {
            Ok((delta_rating, cheat_flag, coach_id)) => Ok(Some(PlayerSummary {
                delta_rating,
                cheat_flag,
                coach_id,
            })),
            // The oracle reverts for identities it has never scored
            Err(ContractError::Revert(_)) => Ok(None),
            Err(e) => Err(RuntimeError::UpstreamUnavailable(e.to_string())),
        }
    }
}

/// Submits mapping writes from the custodial relayer account.
///
/// Submissions are serialized through one queue. Each one takes the pending
/// nonce of the account and is broadcast exactly once.
pub struct EvmRelayer {
    client: Arc<RelayClient>,
    mapper: AddressMapper<RelayClient>,
    address: Address,
    submit_queue: Mutex<()>,
}

impl EvmRelayer {
    pub fn new(evm: &EvmClient, private_key: &str, mapper_address: Address) -> Result<Self> {
        let wallet = private_key
            .trim()
            .parse::<LocalWallet>()
            .map_err(|e| RuntimeError::InvalidConfiguration(format!("invalid relayer key: {e}")))?
            .with_chain_id(evm.chain_id());
        let address = wallet.address();

        let client = Arc::new(SignerMiddleware::new(evm.provider().clone(), wallet));
        info!("Relayer account {:?} on chain {}", address, evm.chain_id());

        Ok(Self {
            mapper: AddressMapper::new(mapper_address, client.clone()),
            client,
            address,
            submit_queue: Mutex::new(()),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }
}

#[async_trait]
impl Relayer for EvmRelayer {
    async fn submit_mapping(&self, foreign_address: &str) -> Result<H256> {
        let _slot = self.submit_queue.lock().await;

        let nonce = self
            .client
            .get_transaction_count(self.address, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| RuntimeError::RelayFailed(format!("nonce lookup failed: {e}")))?;
        debug!("Submitting setMyMapping({}) with nonce {}", foreign_address, nonce);

        let call = self
            .mapper
            .set_my_mapping(foreign_address.to_string())
            .legacy()
            .nonce(nonce);
        let pending = call
            .send()
            .await
            .map_err(|e| RuntimeError::RelayFailed(e.to_string()))?;
        Ok(pending.tx_hash())
    }
}
