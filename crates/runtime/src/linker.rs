//! Binding foreign (primary ledger) addresses to secondary-ledger signers
//!
//! ```text
//! Unverified --valid signature--------> SignatureVerified
//! Unverified --bad signature / input--> Rejected*
//! SignatureVerified --submitted-------> Relayed(tx)
//! SignatureVerified --submit error----> RelayFailed*
//! Relayed --success receipt in time---> Confirmed*
//! Relayed --poll budget exhausted-----> TimedOut*
//! ```
//!
//! The recovered signer is not checked against any allow-list: whoever signs
//! the exact binding message for a foreign address may claim it. A corrupted
//! `r` or `s` usually still recovers, to an unrelated address; only that
//! address can then be bound, never the key that produced the original.

use crate::{metrics, Result, RuntimeError};
use async_trait::async_trait;
use ethers::types::{Address, Signature, H256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Submits the state-changing mapping write, paying its fees.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Relayer: Send + Sync {
    async fn submit_mapping(&self, foreign_address: &str) -> Result<H256>;
}

/// Public receipt lookup. `Ok(None)` means not mined yet, `Some(success)`
/// otherwise.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReceiptSource: Send + Sync {
    async fn receipt_status(&self, tx_hash: H256) -> Result<Option<bool>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRequest {
    pub foreign_address: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Unverified,
    SignatureVerified { signer: Address },
    Relayed { signer: Address, tx_hash: H256 },
    Confirmed { tx_hash: H256 },
    TimedOut { tx_hash: H256 },
    Rejected { reason: String },
    RelayFailed { details: String },
}

impl LinkState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LinkState::Confirmed { .. }
                | LinkState::TimedOut { .. }
                | LinkState::Rejected { .. }
                | LinkState::RelayFailed { .. }
        )
    }
}

/// Foreign addresses are 16 to 64 lowercase hex digits without a prefix.
pub fn validate_foreign_address(foreign_address: &str) -> Result<()> {
    let len = foreign_address.len();
    let well_formed = (16..=64).contains(&len)
        && foreign_address
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));

    if well_formed {
        Ok(())
    } else {
        Err(RuntimeError::Validation(
            "foreign address must be 16-64 lowercase hex characters".to_string(),
        ))
    }
}

pub fn binding_message(app_id: &str, foreign_address: &str) -> String {
    format!("{app_id} link:{foreign_address}")
}

/// Recover the EIP-191 personal-message signer of `message`.
pub fn recover_signer(message: &str, signature: &str) -> Result<Address> {
    let digits = signature.strip_prefix("0x").unwrap_or(signature);
    let mut bytes = hex::decode(digits)
        .map_err(|e| RuntimeError::Validation(format!("signature is not hex: {e}")))?;
    if bytes.len() != 65 {
        return Err(RuntimeError::Validation(format!(
            "signature must be 65 bytes, got {}",
            bytes.len()
        )));
    }

    match bytes[64] {
        0 | 1 => bytes[64] += 27,
        27 | 28 => {}
        v => {
            return Err(RuntimeError::Validation(format!(
                "invalid signature recovery id {v}"
            )))
        }
    }

    let signature = Signature::try_from(bytes.as_slice())
        .map_err(|e| RuntimeError::Validation(format!("malformed signature: {e}")))?;
    signature
        .recover(message)
        .map_err(|e| RuntimeError::Validation(format!("signature recovery failed: {e}")))
}

/// Parse a `0x`-prefixed 32-byte transaction hash.
pub fn parse_tx_hash(hash: &str) -> Result<H256> {
    let digits = hash
        .strip_prefix("0x")
        .filter(|d| d.len() == 64)
        .ok_or_else(|| RuntimeError::Validation("hash must be 0x followed by 64 hex digits".into()))?;

    let mut bytes = [0u8; 32];
    hex::decode_to_slice(digits, &mut bytes)
        .map_err(|e| RuntimeError::Validation(format!("hash is not hex: {e}")))?;
    Ok(H256::from(bytes))
}

pub struct IdentityLinker {
    app_id: String,
    relayer: Arc<dyn Relayer>,
    receipts: Arc<dyn ReceiptSource>,
    poll_interval: Duration,
    poll_attempts: u32,
}

impl IdentityLinker {
    pub fn new(
        app_id: impl Into<String>,
        relayer: Arc<dyn Relayer>,
        receipts: Arc<dyn ReceiptSource>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            relayer,
            receipts,
            poll_interval: Duration::from_secs(2),
            poll_attempts: 30,
        }
    }

    pub fn with_polling(mut self, interval: Duration, attempts: u32) -> Self {
        self.poll_interval = interval;
        self.poll_attempts = attempts;
        self
    }

    /// `Unverified` to `SignatureVerified` or `Rejected`. Input format is
    /// checked before any cryptographic work.
    pub fn verify(&self, request: &LinkRequest) -> LinkState {
        if let Err(e) = validate_foreign_address(&request.foreign_address) {
            return LinkState::Rejected {
                reason: e.to_string(),
            };
        }
        if request.signature.trim().is_empty() {
            return LinkState::Rejected {
                reason: "missing signature".to_string(),
            };
        }

        let message = binding_message(&self.app_id, &request.foreign_address);
        match recover_signer(&message, request.signature.trim()) {
            Ok(signer) => LinkState::SignatureVerified { signer },
            Err(e) => LinkState::Rejected {
                reason: e.to_string(),
            },
        }
    }

    /// Verify the request and relay the mapping write.
    ///
    /// Ends in `Relayed`, `Rejected` or `RelayFailed`.
    pub async fn link(&self, request: &LinkRequest) -> LinkState {
        metrics::LINK_REQUESTS_TOTAL.inc();

        let signer = match self.verify(request) {
            LinkState::SignatureVerified { signer } => signer,
            rejected => {
                warn!("Link for {} rejected: {:?}", request.foreign_address, rejected);
                return rejected;
            }
        };
        info!("Signature for {} recovered to {:?}", request.foreign_address, signer);

        match self.relayer.submit_mapping(&request.foreign_address).await {
            Ok(tx_hash) => {
                info!("Mapping for {} relayed in tx {:?}", request.foreign_address, tx_hash);
                LinkState::Relayed { signer, tx_hash }
            }
            Err(e) => {
                metrics::RELAY_FAILURES_TOTAL.inc();
                error!("Relay for {} failed: {}", request.foreign_address, e);
                LinkState::RelayFailed {
                    details: e.to_string(),
                }
            }
        }
    }

    /// Poll for a successful receipt at a fixed interval, a bounded number of
    /// times. Lookup errors count as "not mined yet".
    pub async fn wait_for_mined(&self, tx_hash: H256) -> bool {
        for attempt in 1..=self.poll_attempts {
            match self.receipts.receipt_status(tx_hash).await {
                Ok(Some(true)) => {
                    debug!("Tx {:?} mined after {} attempts", tx_hash, attempt);
                    return true;
                }
                Ok(_) => debug!("Tx {:?} not mined (attempt {})", tx_hash, attempt),
                Err(e) => debug!("Receipt lookup for {:?} failed: {}", tx_hash, e),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        false
    }

    /// `Relayed` to `Confirmed` or `TimedOut`
    pub async fn confirm(&self, tx_hash: H256) -> LinkState {
        if self.wait_for_mined(tx_hash).await {
            LinkState::Confirmed { tx_hash }
        } else {
            LinkState::TimedOut { tx_hash }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::signers::{LocalWallet, Signer};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    const USER_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    const FOREIGN: &str = "abc1230000000000";

    fn wallet() -> LocalWallet {
        USER_KEY.parse().unwrap()
    }

    async fn sign(message: &str) -> Vec<u8> {
        wallet().sign_message(message).await.unwrap().to_vec()
    }

    fn request(signature: &[u8]) -> LinkRequest {
        LinkRequest {
            foreign_address: FOREIGN.to_string(),
            signature: format!("0x{}", hex::encode(signature)),
        }
    }

    fn linker(relayer: MockRelayer, receipts: MockReceiptSource) -> IdentityLinker {
        IdentityLinker::new("Memoree", Arc::new(relayer), Arc::new(receipts))
    }

    fn tx_hash() -> H256 {
        H256::repeat_byte(0xab)
    }

    #[test]
    fn test_foreign_address_format() {
        assert!(validate_foreign_address("01cf0e2f2f715450").is_ok());
        assert!(validate_foreign_address(&"f".repeat(64)).is_ok());

        assert!(validate_foreign_address("abc123").is_err());
        assert!(validate_foreign_address(&"f".repeat(65)).is_err());
        assert!(validate_foreign_address("01CF0E2F2F715450").is_err());
        assert!(validate_foreign_address("0x01cf0e2f2f715450").is_err());
        assert!(validate_foreign_address("01cf0e2f2f71545g").is_err());
    }

    #[test]
    fn test_binding_message_template() {
        assert_eq!(binding_message("Memoree", FOREIGN), "Memoree link:abc1230000000000");
    }

    #[tokio::test]
    async fn test_signature_recovers_signer() {
        let message = binding_message("Memoree", FOREIGN);
        let signature = sign(&message).await;

        let recovered = recover_signer(&message, &format!("0x{}", hex::encode(&signature)));
        assert_eq!(recovered.unwrap(), wallet().address());

        // Prefix is optional
        let recovered = recover_signer(&message, &hex::encode(&signature));
        assert_eq!(recovered.unwrap(), wallet().address());
    }

    #[tokio::test]
    async fn test_flipped_recovery_bit_is_rejected_before_relay() {
        let mut signature = sign(&binding_message("Memoree", FOREIGN)).await;
        signature[64] ^= 0x01;

        let mut relayer = MockRelayer::new();
        relayer.expect_submit_mapping().times(0);
        let linker = linker(relayer, MockReceiptSource::new());

        let state = linker.link(&request(&signature)).await;
        assert!(matches!(state, LinkState::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_flipped_signature_bit_never_binds_original_signer() {
        for byte in [10, 40] {
            let mut signature = sign(&binding_message("Memoree", FOREIGN)).await;
            signature[byte] ^= 0x01;

            let mut relayer = MockRelayer::new();
            relayer
                .expect_submit_mapping()
                .times(0..=1)
                .returning(|_| Ok(tx_hash()));
            let linker = linker(relayer, MockReceiptSource::new());

            match linker.link(&request(&signature)).await {
                LinkState::Rejected { .. } => {}
                LinkState::Relayed { signer, .. } => assert_ne!(signer, wallet().address()),
                other => panic!("unexpected state: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_malformed_input_skips_crypto_and_relay() {
        let mut relayer = MockRelayer::new();
        relayer.expect_submit_mapping().times(0);
        let linker = linker(relayer, MockReceiptSource::new());

        let bad_address = LinkRequest {
            foreign_address: "ABC".to_string(),
            signature: "0x00".to_string(),
        };
        assert!(matches!(linker.link(&bad_address).await, LinkState::Rejected { .. }));

        let missing_signature = LinkRequest {
            foreign_address: FOREIGN.to_string(),
            signature: String::new(),
        };
        assert_eq!(
            linker.link(&missing_signature).await,
            LinkState::Rejected {
                reason: "missing signature".to_string()
            }
        );

        let short_signature = request(&[0u8; 64]);
        assert!(matches!(linker.link(&short_signature).await, LinkState::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_valid_request_is_relayed() {
        let signature = sign(&binding_message("Memoree", FOREIGN)).await;

        let mut relayer = MockRelayer::new();
        relayer
            .expect_submit_mapping()
            .withf(|foreign| foreign == FOREIGN)
            .times(1)
            .returning(|_| Ok(tx_hash()));
        let linker = linker(relayer, MockReceiptSource::new());

        let state = linker.link(&request(&signature)).await;
        assert_eq!(
            state,
            LinkState::Relayed {
                signer: wallet().address(),
                tx_hash: tx_hash(),
            }
        );
        assert!(!state.is_terminal());
    }

    #[tokio::test]
    async fn test_relay_error_is_relay_failed() {
        let signature = sign(&binding_message("Memoree", FOREIGN)).await;

        let mut relayer = MockRelayer::new();
        relayer
            .expect_submit_mapping()
            .times(1)
            .returning(|_| Err(RuntimeError::RelayFailed("insufficient funds for gas".into())));
        let linker = linker(relayer, MockReceiptSource::new());

        match linker.link(&request(&signature)).await {
            LinkState::RelayFailed { details } => assert!(details.contains("insufficient funds")),
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_is_bounded() {
        let mut receipts = MockReceiptSource::new();
        receipts.expect_receipt_status().times(30).returning(|_| Ok(None));
        let linker = linker(MockRelayer::new(), receipts);

        let started = Instant::now();
        assert!(!linker.wait_for_mined(tx_hash()).await);
        assert!(started.elapsed() >= Duration::from_secs(58));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_errors_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let mut receipts = MockReceiptSource::new();
        receipts.expect_receipt_status().returning(move |_| {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Err(RuntimeError::UpstreamUnavailable("rpc hiccup".into())),
                1 => Ok(Some(false)),
                2 => Ok(None),
                _ => Ok(Some(true)),
            }
        });
        let linker = linker(MockRelayer::new(), receipts);

        let started = Instant::now();
        assert_eq!(linker.confirm(tx_hash()).await, LinkState::Confirmed { tx_hash: tx_hash() });
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(started.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirm_times_out() {
        let mut receipts = MockReceiptSource::new();
        receipts.expect_receipt_status().times(3).returning(|_| Ok(None));
        let linker = linker(MockRelayer::new(), receipts)
            .with_polling(Duration::from_millis(500), 3);

        let state = linker.confirm(tx_hash()).await;
        assert_eq!(state, LinkState::TimedOut { tx_hash: tx_hash() });
        assert!(state.is_terminal());
    }

    #[test]
    fn test_parse_tx_hash() {
        let hash = format!("0x{}", "ab".repeat(32));
        assert_eq!(parse_tx_hash(&hash).unwrap(), tx_hash());

        assert!(parse_tx_hash(&"ab".repeat(32)).is_err());
        assert!(parse_tx_hash("0x1234").is_err());
        assert!(parse_tx_hash(&format!("0x{}", "zz".repeat(32))).is_err());
    }
}
