// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use crate::error::{GovernanceError, GovernanceResult};
use crate::types::EthLog;
use ethers::abi::Token;
use ethers::providers::{Http, JsonRpcClient, Middleware, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address as EthAddress, BlockNumber, Bytes, Filter, TransactionReceipt, TransactionRequest,
    TxHash, H256,
};
use ethers::utils::id;
use tap::TapFallible;

#[cfg(test)]
use crate::mock_provider::EthMockProvider;

/// Block metadata surfaced to callers: what the voting machine's timing
/// rules need and nothing more.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeaderInfo {
    pub number: u64,
    /// Unix seconds
    pub timestamp: u64,
    pub gas_limit: u64,
}

impl BlockHeaderInfo {
    /// The largest gas limit we dare use for a single transaction,
    /// leaving headroom below the block limit.
    pub fn max_gas_limit(&self) -> u64 {
        self.gas_limit.saturating_sub(100_000)
    }
}

/// Thin wrapper over an ethers provider: log queries, block metadata,
/// read calls and transaction submission. Gas estimation, nonce
/// management and retry policy live with the node and the embedder, not
/// here.
#[derive(Debug, Clone)]
pub struct EthClient<P> {
    provider: Provider<P>,
    /// Expected chain ID for validation
    expected_chain_id: Option<u64>,
}

impl EthClient<Http> {
    pub async fn connect(
        provider_url: &str,
        expected_chain_id: Option<u64>,
    ) -> anyhow::Result<Self> {
        let provider = Provider::<Http>::try_from(provider_url)?;
        let self_ = Self {
            provider,
            expected_chain_id,
        };
        self_.describe().await?;
        Ok(self_)
    }
}

#[cfg(test)]
impl EthClient<EthMockProvider> {
    pub fn new_mocked(provider: EthMockProvider) -> Self {
        Self {
            provider: Provider::new(provider),
            expected_chain_id: None,
        }
    }
}

impl<P> EthClient<P>
where
    P: JsonRpcClient + 'static,
{
    pub fn provider(&self) -> &Provider<P> {
        &self.provider
    }

    pub async fn get_chain_id(&self) -> GovernanceResult<u64> {
        let chain_id = self.provider.get_chainid().await?;
        Ok(chain_id.as_u64())
    }

    // Validate chain identifier and log connection info
    async fn describe(&self) -> anyhow::Result<()> {
        let chain_id = self.get_chain_id().await?;
        let block_number = self.provider.get_block_number().await?;

        if let Some(expected) = self.expected_chain_id {
            if chain_id != expected {
                return Err(anyhow::anyhow!(
                    "Chain ID mismatch: expected {}, got {}. This could indicate connecting to the wrong network!",
                    expected,
                    chain_id
                ));
            }
            tracing::info!(
                "EthClient connected to chain {} (verified), current block: {}",
                chain_id,
                block_number
            );
        } else {
            tracing::warn!(
                "EthClient connected to chain {} (NOT VERIFIED - no expected chain ID set), current block: {}",
                chain_id,
                block_number
            );
        }
        Ok(())
    }

    pub async fn get_latest_block_id(&self) -> GovernanceResult<u64> {
        let block_number = self.provider.get_block_number().await?;
        Ok(block_number.as_u64())
    }

    pub async fn get_block_header(
        &self,
        block: BlockNumber,
    ) -> GovernanceResult<BlockHeaderInfo> {
        let block = self
            .provider
            .get_block(block)
            .await?
            .ok_or_else(|| GovernanceError::ProviderError("block not found".into()))?;
        Ok(BlockHeaderInfo {
            number: block
                .number
                .ok_or_else(|| {
                    GovernanceError::ProviderError("provider returned a pending block".into())
                })?
                .as_u64(),
            timestamp: block.timestamp.as_u64(),
            gas_limit: block.gas_limit.as_u64(),
        })
    }

    /// The last mined block's timestamp; the reference clock for all
    /// quiet-ending and deadline arithmetic.
    pub async fn latest_block_timestamp(&self) -> GovernanceResult<u64> {
        Ok(self.get_block_header(BlockNumber::Latest).await?.timestamp)
    }

    // Note: query may fail if range is too big. Callsite is responsible
    // for chunking the query.
    pub async fn get_events_in_range(
        &self,
        address: EthAddress,
        topic0: Option<H256>,
        start_block: u64,
        end_block: u64,
    ) -> GovernanceResult<Vec<EthLog>> {
        let mut filter = Filter::new()
            .from_block(start_block)
            .to_block(end_block)
            .address(address);
        if let Some(topic) = topic0 {
            filter = filter.topic0(topic);
        }
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(GovernanceError::from)
            .tap_err(|e| {
                tracing::error!(
                    "get_events_in_range failed. Filter: {:?}. Error {:?}",
                    filter,
                    e
                )
            })?;

        // Safeguard check that all events are emitted from the requested
        // contract address
        if logs.iter().any(|log| log.address != address) {
            return Err(GovernanceError::ProviderError(format!(
                "Provider returns logs from different contract address (expected: {:?})",
                address
            )));
        }

        logs.into_iter()
            .map(|log| {
                Ok(EthLog {
                    block_number: log
                        .block_number
                        .ok_or(GovernanceError::ProviderError(
                            "Provider returns log without block_number".into(),
                        ))?
                        .as_u64(),
                    tx_hash: log.transaction_hash.ok_or(GovernanceError::ProviderError(
                        "Provider returns log without transaction_hash".into(),
                    ))?,
                    log,
                })
            })
            .collect()
    }

    /// Submit a state-mutating call through the node's account management.
    /// Returns as soon as the transaction hash is known.
    pub async fn submit_transaction(&self, tx: TransactionRequest) -> GovernanceResult<TxHash> {
        let tx_hash: TxHash = self
            .provider
            .request("eth_sendTransaction", [tx])
            .await
            .map_err(GovernanceError::from)
            .tap_err(|e| tracing::error!("eth_sendTransaction failed: {:?}", e))?;
        Ok(tx_hash)
    }

    pub async fn get_transaction_receipt(
        &self,
        tx_hash: TxHash,
    ) -> GovernanceResult<Option<TransactionReceipt>> {
        Ok(self.provider.get_transaction_receipt(tx_hash).await?)
    }

    /// Poll until the transaction is mined, then check its status.
    /// Pending-forever is the embedder's timeout problem; a provider error
    /// surfaces immediately and is not retried here.
    pub async fn wait_for_receipt(
        &self,
        tx_hash: TxHash,
        poll_interval: Duration,
    ) -> GovernanceResult<TransactionReceipt> {
        loop {
            match self.get_transaction_receipt(tx_hash).await? {
                Some(receipt) => {
                    if receipt.status == Some(0.into()) {
                        return Err(GovernanceError::TxFailed(format!(
                            "transaction {:?} reverted in block {:?}",
                            tx_hash, receipt.block_number
                        )));
                    }
                    return Ok(receipt);
                }
                None => tokio::time::sleep(poll_interval).await,
            }
        }
    }

    /// The `to` address of a mined transaction, for filtering aggregates
    /// by originating contract
    pub async fn get_transaction_to(
        &self,
        tx_hash: TxHash,
    ) -> GovernanceResult<Option<EthAddress>> {
        let tx = self
            .provider
            .get_transaction(tx_hash)
            .await?
            .ok_or(GovernanceError::TxNotFound)?;
        Ok(tx.to)
    }

    /// Read-only contract call
    pub async fn call(&self, to: EthAddress, data: Bytes) -> GovernanceResult<Bytes> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        Ok(self.provider.call(&tx, None).await?)
    }

    /// Read-only contract call with ABI-decoded outputs
    pub async fn call_decoded(
        &self,
        to: EthAddress,
        signature: &str,
        args: &[Token],
        outputs: &[ethers::abi::ParamType],
    ) -> GovernanceResult<Vec<Token>> {
        let out = self.call(to, encode_call(signature, args)).await?;
        ethers::abi::decode(outputs, &out).map_err(|e| {
            GovernanceError::AbiDecodeError(format!("decoding {} return: {}", signature, e))
        })
    }
}

/// ABI-encode a contract call: 4-byte selector of `signature` followed by
/// the encoded arguments.
pub fn encode_call(signature: &str, args: &[Token]) -> Bytes {
    let selector = id(signature);
    let mut data = selector.to_vec();
    data.extend(ethers::abi::encode(args));
    data.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use ethers::types::{Block, Log, U256, U64};
    use serde_json::json;

    #[tokio::test]
    async fn test_get_chain_id() {
        init_test_logging();
        let mock_provider = EthMockProvider::new();
        mock_provider
            .add_response("eth_chainId", (), U256::from(1u64))
            .unwrap();

        let client = EthClient::new_mocked(mock_provider);
        assert_eq!(client.get_chain_id().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_get_latest_block_id() {
        init_test_logging();
        let mock_provider = EthMockProvider::new();
        mock_provider
            .add_response("eth_blockNumber", (), U64::from(2000u64))
            .unwrap();

        let client = EthClient::new_mocked(mock_provider);
        assert_eq!(client.get_latest_block_id().await.unwrap(), 2000);
    }

    #[tokio::test]
    async fn test_get_block_header() {
        init_test_logging();
        let mock_provider = EthMockProvider::new();
        mock_provider
            .add_response::<_, Block<TxHash>, _>(
                "eth_getBlockByNumber",
                ("latest", false),
                Block::<TxHash> {
                    number: Some(U64::from(123u64)),
                    timestamp: U256::from(1_700_000_000u64),
                    gas_limit: U256::from(30_000_000u64),
                    ..Default::default()
                },
            )
            .unwrap();

        let client = EthClient::new_mocked(mock_provider);
        let header = client.get_block_header(BlockNumber::Latest).await.unwrap();
        assert_eq!(header.number, 123);
        assert_eq!(header.timestamp, 1_700_000_000);
        assert_eq!(header.max_gas_limit(), 29_900_000);
    }

    #[tokio::test]
    async fn test_get_events_in_range_rejects_foreign_logs() {
        init_test_logging();
        let mock_provider = EthMockProvider::new();
        let requested = EthAddress::repeat_byte(1);
        let foreign = EthAddress::repeat_byte(2);

        let log = Log {
            address: foreign,
            block_number: Some(U64::from(5u64)),
            transaction_hash: Some(TxHash::repeat_byte(9)),
            ..Default::default()
        };
        mock_provider
            .add_method_response("eth_getLogs", json!([log]))
            .unwrap();

        let client = EthClient::new_mocked(mock_provider);
        let err = client
            .get_events_in_range(requested, None, 0, 10)
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "provider_error");
    }

    #[tokio::test]
    async fn test_get_events_in_range_converts_logs() {
        init_test_logging();
        let mock_provider = EthMockProvider::new();
        let address = EthAddress::repeat_byte(1);
        let tx_hash = TxHash::repeat_byte(7);

        let log = Log {
            address,
            block_number: Some(U64::from(42u64)),
            transaction_hash: Some(tx_hash),
            ..Default::default()
        };
        mock_provider
            .add_method_response("eth_getLogs", json!([log]))
            .unwrap();

        let client = EthClient::new_mocked(mock_provider);
        let logs = client
            .get_events_in_range(address, None, 0, 100)
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].block_number, 42);
        assert_eq!(logs[0].tx_hash, tx_hash);
    }

    #[tokio::test]
    async fn test_wait_for_receipt_reports_revert() {
        init_test_logging();
        let mock_provider = EthMockProvider::new();
        let tx_hash = TxHash::repeat_byte(3);
        mock_provider
            .add_response::<[TxHash; 1], TransactionReceipt, TransactionReceipt>(
                "eth_getTransactionReceipt",
                [tx_hash],
                TransactionReceipt {
                    status: Some(0.into()),
                    block_number: Some(U64::from(10u64)),
                    ..Default::default()
                },
            )
            .unwrap();

        let client = EthClient::new_mocked(mock_provider);
        let err = client
            .wait_for_receipt(tx_hash, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "tx_failed");
    }

    #[test]
    fn test_encode_call_layout() {
        let data = encode_call(
            "state(bytes32)",
            &[Token::FixedBytes(vec![0xab; 32])],
        );
        // 4-byte selector + one 32-byte word
        assert_eq!(data.len(), 36);
        assert_eq!(&data[4..], [0xab; 32].as_slice());
    }
}
