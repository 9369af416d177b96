use std::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use bitcoin::{consensus::encode::deserialize_hex, BlockHash, Network, Transaction, Txid};
use reqwest::{
    header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE},
    Client,
};
use serde::{de, Deserialize, Serialize};
use serde_json::{json, value::Value};
use tokio::time::sleep;
use tracing::*;

use super::{
    error::{BitcoinRpcError, ClientError},
    traits::{Reader, Wallet},
    types::{
        EstimateSmartFee, GetBlockHeaderVerbose, GetBlockVerbose, GetMempoolEntry, GetTransaction,
        ListUnspent, RawTxVerbose,
    },
    ClientResult,
};

/// The default number of retries for a request.
const DEFAULT_MAX_RETRIES: u8 = 3;

/// The default delay between retries, in ms.
const DEFAULT_RETRY_INTERVAL_MS: u64 = 1_000;

/// Custom implementation to convert a value to a `Value` type.
pub fn to_value<T>(value: T) -> ClientResult<Value>
where
    T: Serialize,
{
    serde_json::to_value(value)
        .map_err(|e| ClientError::Param(format!("Error creating value: {}", e)))
}

/// An `async` client for interacting with a `bitcoind` instance.
#[derive(Debug)]
pub struct BitcoinClient {
    /// The URL of the `bitcoind` instance.
    url: String,
    /// The underlying `async` HTTP client.
    client: Client,
    /// The ID of the current request.
    id: AtomicUsize,
    max_retries: u8,
    retry_interval: Duration,
}

/// Response returned by the `bitcoind` RPC server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Response<R> {
    pub result: Option<R>,
    pub error: Option<BitcoinRpcError>,
    pub id: u64,
}

#[derive(Debug, Deserialize)]
struct BlockchainInfo {
    chain: String,
}

impl BitcoinClient {
    /// Creates a new [`BitcoinClient`] with the given URL, username, and password.
    pub fn new(url: String, username: String, password: String) -> ClientResult<Self> {
        if username.is_empty() || password.is_empty() {
            return Err(ClientError::MissingUserPassword);
        }

        let user_pw = general_purpose::STANDARD.encode(format!("{username}:{password}"));
        let authorization = format!("Basic {user_pw}")
            .parse()
            .map_err(|_| ClientError::Other("Error parsing header".to_string()))?;

        let content_type = "application/json"
            .parse()
            .map_err(|_| ClientError::Other("Error parsing header".to_string()))?;
        let headers =
            HeaderMap::from_iter([(AUTHORIZATION, authorization), (CONTENT_TYPE, content_type)]);

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ClientError::Other(format!("Could not create client: {e}")))?;

        let id = AtomicUsize::new(0);

        trace!(url = %url, "Created bitcoin client");

        Ok(Self {
            url,
            client,
            id,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_interval: Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS),
        })
    }

    /// Overrides the retry policy.  `None` keeps the default.
    pub fn with_retries(mut self, max_retries: Option<u8>, retry_interval_ms: Option<u64>) -> Self {
        if let Some(n) = max_retries {
            self.max_retries = n.max(1);
        }
        if let Some(ms) = retry_interval_ms {
            self.retry_interval = Duration::from_millis(ms);
        }
        self
    }

    fn next_id(&self) -> usize {
        self.id.fetch_add(1, Ordering::AcqRel)
    }

    async fn call<T: de::DeserializeOwned + fmt::Debug>(
        &self,
        method: &str,
        params: &[Value],
    ) -> ClientResult<T> {
        let mut retries = 0;
        loop {
            trace!(%method, ?params, %retries, "Calling bitcoin client");

            let id = self.next_id();

            let response = self
                .client
                .post(&self.url)
                .json(&json!({
                    "jsonrpc": "1.0",
                    "id": id,
                    "method": method,
                    "params": params
                }))
                .send()
                .await;
            match response {
                Ok(resp) => {
                    let data = resp
                        .json::<Response<T>>()
                        .await
                        .map_err(|e| ClientError::Parse(e.to_string()))?;
                    if let Some(err) = data.error {
                        return Err(ClientError::Server(err.code, err.message));
                    }
                    return data
                        .result
                        .ok_or_else(|| ClientError::Other("Empty data received".to_string()));
                }
                Err(err) => {
                    warn!(err = %err, %method, "Error calling bitcoin client");

                    if err.is_body() {
                        // Body error is unrecoverable
                        return Err(ClientError::Body(err.to_string()));
                    } else if err.is_status() {
                        // Status error is unrecoverable
                        let e = match err.status() {
                            Some(code) => ClientError::Status(code.to_string(), err.to_string()),
                            _ => ClientError::Other(err.to_string()),
                        };
                        return Err(e);
                    } else if err.is_decode() {
                        // Error decoding response, might be recoverable
                        let e = ClientError::MalformedResponse(err.to_string());
                        warn!(%e, "decoding error, retrying...");
                    } else if err.is_connect() {
                        // Connection error, might be recoverable
                        let e = ClientError::Connection(err.to_string());
                        warn!(%e, "connection error, retrying...");
                    } else if err.is_timeout() {
                        // Timeout error, might be recoverable
                        let e = ClientError::Timeout;
                        warn!(%e, "timeout error, retrying...");
                    } else if err.is_request() {
                        // General request error, might be recoverable
                        let e = ClientError::Request(err.to_string());
                        warn!(%e, "request error, retrying...");
                    } else if err.is_builder() {
                        // Request builder error is unrecoverable
                        return Err(ClientError::ReqBuilder(err.to_string()));
                    } else if err.is_redirect() {
                        // Redirect error is unrecoverable
                        return Err(ClientError::HttpRedirect(err.to_string()));
                    } else {
                        // Unknown error is unrecoverable
                        return Err(ClientError::Other("Unknown error".to_string()));
                    }
                }
            }
            retries += 1;
            if retries >= self.max_retries {
                return Err(ClientError::MaxRetriesExceeded(self.max_retries));
            }
            sleep(self.retry_interval).await;
        }
    }
}

#[async_trait]
impl Reader for BitcoinClient {
    async fn get_block_count(&self) -> ClientResult<u64> {
        self.call::<u64>("getblockcount", &[]).await
    }

    async fn get_block_hash(&self, height: u64) -> ClientResult<BlockHash> {
        self.call::<BlockHash>("getblockhash", &[to_value(height)?])
            .await
    }

    async fn get_block_header_verbose(
        &self,
        hash: &BlockHash,
    ) -> ClientResult<GetBlockHeaderVerbose> {
        self.call::<GetBlockHeaderVerbose>(
            "getblockheader",
            &[to_value(hash.to_string())?, to_value(true)?],
        )
        .await
    }

    async fn get_block_verbose(&self, hash: &BlockHash) -> ClientResult<GetBlockVerbose> {
        self.call::<GetBlockVerbose>("getblock", &[to_value(hash.to_string())?, to_value(2)?])
            .await
    }

    async fn get_raw_transaction(&self, txid: &Txid) -> ClientResult<Transaction> {
        let raw = self
            .call::<String>(
                "getrawtransaction",
                &[to_value(txid.to_string())?, to_value(false)?],
            )
            .await?;
        deserialize_hex::<Transaction>(&raw).map_err(|e| ClientError::Parse(e.to_string()))
    }

    async fn get_raw_transaction_verbose(&self, txid: &Txid) -> ClientResult<RawTxVerbose> {
        self.call::<RawTxVerbose>(
            "getrawtransaction",
            &[to_value(txid.to_string())?, to_value(true)?],
        )
        .await
    }

    async fn get_mempool_entry(&self, txid: &Txid) -> ClientResult<GetMempoolEntry> {
        self.call::<GetMempoolEntry>("getmempoolentry", &[to_value(txid.to_string())?])
            .await
    }

    async fn estimate_smart_fee(&self, conf_target: u16) -> ClientResult<EstimateSmartFee> {
        self.call::<EstimateSmartFee>(
            "estimatesmartfee",
            &[to_value(conf_target)?, to_value("ECONOMICAL")?],
        )
        .await
    }

    async fn network(&self) -> ClientResult<Network> {
        let chain = self
            .call::<BlockchainInfo>("getblockchaininfo", &[])
            .await?
            .chain;
        Network::from_core_arg(&chain).map_err(|e| ClientError::Parse(e.to_string()))
    }
}

#[async_trait]
impl Wallet for BitcoinClient {
    async fn get_transaction(&self, txid: &Txid) -> ClientResult<GetTransaction> {
        self.call::<GetTransaction>("gettransaction", &[to_value(txid.to_string())?])
            .await
    }

    async fn list_unspent(
        &self,
        min_conf: u64,
        max_conf: u64,
        addresses: &[String],
    ) -> ClientResult<Vec<ListUnspent>> {
        let resp = self
            .call::<Vec<ListUnspent>>(
                "listunspent",
                &[
                    to_value(min_conf)?,
                    to_value(max_conf)?,
                    to_value(addresses)?,
                ],
            )
            .await?;
        trace!(count = resp.len(), "Got UTXOs");
        Ok(resp)
    }
}
