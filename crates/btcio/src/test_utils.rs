use std::{
    collections::{HashMap, HashSet},
    str::FromStr,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use bitcoin::{
    absolute::LockTime,
    consensus::encode::serialize_hex,
    hashes::Hash,
    script::PushBytes,
    transaction::Version,
    Address, Amount, BlockHash, CompressedPublicKey, Network, OutPoint, ScriptBuf, Sequence,
    Transaction, TxIn, TxOut, Txid, Witness,
};
use parking_lot::Mutex;

use crate::{
    amount::sats_to_btc,
    fee::block_subsidy,
    params::ChainParams,
    rpc::{
        error::RPC_INVALID_ADDRESS_OR_KEY,
        traits::{Reader, Wallet},
        types::{
            EstimateSmartFee, GetBlockHeaderVerbose, GetBlockVerbose, GetMempoolEntry,
            GetTransaction, ListUnspent, RawTxVerbose, ScriptPubKey, VinVerbose, VoutVerbose,
        },
        ClientError, ClientResult,
    },
};

/// Compressed secp256k1 generator point.
pub const TEST_TSS_PUBKEY: &str =
    "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

/// Txid used by UTXO fixtures that don't care about it.
pub const DUMMY_TXID: &str = "6e6f71d281146c1fc5c755b35908ee449f26786c84e2ae18f98b268de40b7ec4";

/// UTXO fixture amounts in BTC, 22.44 in total.
pub const TEST_UTXO_AMOUNTS: [f64; 10] =
    [0.01, 0.12, 0.18, 0.24, 0.5, 1.26, 2.97, 3.28, 5.16, 8.72];

/// P2WPKH address of [`TEST_TSS_PUBKEY`].
pub fn test_tss_address(network: Network) -> Address {
    let pk = CompressedPublicKey::from_slice(&hex::decode(TEST_TSS_PUBKEY).unwrap()).unwrap();
    Address::p2wpkh(&pk, network)
}

pub fn test_chain_params(network: Network) -> ChainParams {
    ChainParams {
        chain_id: 8332,
        core_chain_id: 7000,
        network,
        tss_address: test_tss_address(network),
        tss_pubkey: TEST_TSS_PUBKEY.to_string(),
        confirmation_count: 1,
        big_value_sats: 200_000_000,
        big_value_confirmations: 6,
        gas_price_multiplier: 2.0,
    }
}

/// Builds a version 2 tx.  With no inputs a dummy one is added so the tx
/// isn't mistaken for a coinbase.
pub fn make_tx(inputs: &[(Txid, u32)], outputs: &[(ScriptBuf, u64)]) -> Transaction {
    let mut input: Vec<TxIn> = inputs
        .iter()
        .map(|(txid, vout)| TxIn {
            previous_output: OutPoint::new(*txid, *vout),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        })
        .collect();
    if input.is_empty() {
        input.push(TxIn {
            previous_output: OutPoint::new(Txid::from_byte_array([0xaa; 32]), 0),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        });
    }

    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input,
        output: outputs
            .iter()
            .map(|(script, sats)| TxOut {
                value: Amount::from_sat(*sats),
                script_pubkey: script.clone(),
            })
            .collect(),
    }
}

/// One confirmed fixture UTXO per [`TEST_UTXO_AMOUNTS`] entry, owned by
/// `owner`, in shuffled order.
pub fn test_utxos(owner: &str) -> Vec<ListUnspent> {
    let mut utxos: Vec<_> = TEST_UTXO_AMOUNTS
        .iter()
        .map(|amount| ListUnspent {
            txid: String::new(),
            vout: 0,
            address: owner.to_string(),
            amount: *amount,
            confirmations: 1,
            spendable: true,
            ..Default::default()
        })
        .collect();
    // the observer sorts them anyway
    utxos.rotate_left(3);
    utxos.swap(0, 7);
    utxos
}

/// Nonce-mark UTXO left by the outbound with `nonce`.
pub fn nonce_mark_utxo(owner: &str, nonce: u64, txid: &str) -> ListUnspent {
    ListUnspent {
        txid: txid.to_string(),
        vout: 0,
        address: owner.to_string(),
        amount: sats_to_btc(crate::params::nonce_mark_amount(nonce)),
        confirmations: 1,
        spendable: true,
        ..Default::default()
    }
}

/// Receiver of outbound fixtures, a mainnet P2WPKH address.
pub const TEST_RECEIVER: &str = "bc1qaxf82vyzy8y80v000e7t64gpten7gawewzu42y";

pub fn vout_verbose(n: u32, sats: u64, script: ScriptBuf) -> VoutVerbose {
    VoutVerbose {
        value: sats_to_btc(sats),
        n,
        script_pub_key: ScriptPubKey {
            hex: script.to_hex_string(),
            ..Default::default()
        },
    }
}

pub fn op_return_script(memo: &[u8]) -> ScriptBuf {
    let push: &PushBytes = memo.try_into().unwrap();
    ScriptBuf::new_op_return(push)
}

/// Input signed by the TSS key.
pub fn tss_vin(txid: &str, vout: u32) -> VinVerbose {
    VinVerbose {
        txid: txid.to_string(),
        vout,
        witness: vec!["30".repeat(71), TEST_TSS_PUBKEY.to_string()],
        ..Default::default()
    }
}

/// Deposit of `sats` to the TSS with `memo` in an OP_RETURN.  The funding tx
/// paying `sender` is registered on `client`.
pub fn deposit_tx(
    client: &TestBitcoinClient,
    txid: &str,
    sender: &Address,
    sats: u64,
    memo: &[u8],
) -> RawTxVerbose {
    let prev = make_tx(&[], &[(sender.script_pubkey(), 100_000)]);
    let vin = VinVerbose {
        txid: prev.compute_txid().to_string(),
        vout: 0,
        ..Default::default()
    };
    client.add_tx(prev);

    let tss = client.params().tss_address.script_pubkey();
    RawTxVerbose {
        txid: txid.to_string(),
        vin: vec![vin],
        vout: vec![
            vout_verbose(0, sats, tss),
            vout_verbose(1, 0, op_return_script(memo)),
        ],
        vsize: 150,
        weight: 600,
        ..Default::default()
    }
}

/// Well-formed outbound paying `amount_sats` to [`TEST_RECEIVER`], spending
/// the nonce-mark of `prev_txid` first when given.
pub fn outbound_tx(
    params: &ChainParams,
    txid: &str,
    nonce: u64,
    prev_txid: Option<&str>,
    amount_sats: u64,
) -> RawTxVerbose {
    let mut vin = Vec::new();
    if let Some(prev) = prev_txid {
        vin.push(tss_vin(prev, 0));
    }
    vin.push(tss_vin(DUMMY_TXID, 1));

    let tss = params.tss_address.script_pubkey();
    let receiver = Address::from_str(TEST_RECEIVER)
        .unwrap()
        .assume_checked()
        .script_pubkey();
    RawTxVerbose {
        txid: txid.to_string(),
        vin,
        vout: vec![
            vout_verbose(0, crate::params::nonce_mark_amount(nonce), tss.clone()),
            vout_verbose(1, amount_sats, receiver),
            vout_verbose(2, 1_000_000, tss),
        ],
        vsize: 250,
        weight: 1_000,
        ..Default::default()
    }
}

fn not_found(what: &str) -> ClientError {
    ClientError::Server(RPC_INVALID_ADDRESS_OR_KEY, format!("{what} not found"))
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[derive(Debug)]
struct ChainState {
    network: Network,
    blocks: Vec<GetBlockVerbose>,
    txs: HashMap<Txid, Transaction>,
    raw_txs: HashMap<Txid, RawTxVerbose>,
    wallet_txs: HashMap<Txid, GetTransaction>,
    mempool: HashMap<Txid, GetMempoolEntry>,
    unspent: Vec<ListUnspent>,
    smart_fee: EstimateSmartFee,
    failing: HashSet<&'static str>,
}

/// In-memory node serving the fixtures tests put in it.
///
/// Starts with a single genesis block holding only a coinbase.  Clones share
/// the same chain.
#[derive(Debug, Clone)]
pub struct TestBitcoinClient {
    state: Arc<Mutex<ChainState>>,
}

impl TestBitcoinClient {
    pub fn new(network: Network) -> Self {
        let client = Self {
            state: Arc::new(Mutex::new(ChainState {
                network,
                blocks: Vec::new(),
                txs: HashMap::new(),
                raw_txs: HashMap::new(),
                wallet_txs: HashMap::new(),
                mempool: HashMap::new(),
                unspent: Vec::new(),
                smart_fee: EstimateSmartFee {
                    feerate: Some(0.0001),
                    errors: None,
                    blocks: 1,
                },
                failing: HashSet::new(),
            })),
        };
        client.push_block_with_coinbase(block_subsidy(0, network), Vec::new());
        client
    }

    pub fn params(&self) -> ChainParams {
        test_chain_params(self.state.lock().network)
    }

    pub fn tip(&self) -> u64 {
        self.state.lock().blocks.len() as u64 - 1
    }

    /// Appends a block holding `txs` after a coinbase earning the bare
    /// subsidy.  Returns its height.
    pub fn push_block(&self, txs: Vec<RawTxVerbose>) -> u64 {
        let height = self.tip() + 1;
        let network = self.state.lock().network;
        self.push_block_with_coinbase(block_subsidy(height as i64, network), txs)
    }

    /// Appends a block with one tx of `tx_weight` paying `fees_sats` to the
    /// miner.
    pub fn push_fee_block(&self, tx_weight: i32, fees_sats: u64) -> u64 {
        let height = self.tip() + 1;
        let network = self.state.lock().network;
        let tx = RawTxVerbose {
            txid: format!("{height:064x}"),
            weight: tx_weight,
            vsize: tx_weight / 4,
            ..Default::default()
        };
        self.push_block_with_coinbase(block_subsidy(height as i64, network) + fees_sats, vec![tx])
    }

    /// Appends empty blocks until the tip is at `height`.
    pub fn mine_to(&self, height: u64) {
        while self.tip() < height {
            self.push_block(Vec::new());
        }
    }

    fn push_block_with_coinbase(&self, earned_sats: u64, txs: Vec<RawTxVerbose>) -> u64 {
        let mut state = self.state.lock();
        let height = state.blocks.len() as u64;

        let coinbase = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::from_bytes(height.to_le_bytes().to_vec()),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(earned_sats),
                script_pubkey: ScriptBuf::new(),
            }],
        };
        let coinbase = RawTxVerbose {
            hex: serialize_hex(&coinbase),
            txid: coinbase.compute_txid().to_string(),
            weight: 800,
            vsize: 200,
            ..Default::default()
        };

        let mut tx = vec![coinbase];
        tx.extend(txs);
        let weight = tx.iter().map(|t| t.weight).sum();

        state.blocks.push(GetBlockVerbose {
            hash: block_hash(height).to_string(),
            height: height as i64,
            time: unix_now(),
            weight,
            confirmations: 1,
            tx,
        });
        height
    }

    /// Sets the timestamp of the tip.
    pub fn set_tip_time(&self, time: i64) {
        if let Some(b) = self.state.lock().blocks.last_mut() {
            b.time = time;
        }
    }

    pub fn set_smart_fee(&self, fee: EstimateSmartFee) {
        self.state.lock().smart_fee = fee;
    }

    /// Makes `get_raw_transaction` know `tx`.
    pub fn add_tx(&self, tx: Transaction) {
        self.state.lock().txs.insert(tx.compute_txid(), tx);
    }

    pub fn add_raw_tx(&self, tx: RawTxVerbose) {
        let txid = Txid::from_str(&tx.txid).unwrap();
        self.state.lock().raw_txs.insert(txid, tx);
    }

    /// Makes the wallet know `tx`.
    pub fn set_wallet_tx(&self, tx: GetTransaction) {
        let txid = Txid::from_str(&tx.txid).unwrap();
        self.state.lock().wallet_txs.insert(txid, tx);
    }

    pub fn set_mempool_entry(&self, txid: Txid, entry: GetMempoolEntry) {
        self.state.lock().mempool.insert(txid, entry);
    }

    pub fn remove_mempool_entry(&self, txid: &Txid) {
        self.state.lock().mempool.remove(txid);
    }

    pub fn set_unspent(&self, utxos: Vec<ListUnspent>) {
        self.state.lock().unspent = utxos;
    }

    /// Makes the named method return a connection error until
    /// [`Self::recover`] is called.
    pub fn fail(&self, method: &'static str) {
        self.state.lock().failing.insert(method);
    }

    pub fn recover(&self, method: &'static str) {
        self.state.lock().failing.remove(method);
    }

    fn check(&self, method: &'static str) -> ClientResult<()> {
        if self.state.lock().failing.contains(method) {
            return Err(ClientError::Connection(format!("{method} failed")));
        }
        Ok(())
    }
}

fn block_hash(height: u64) -> BlockHash {
    BlockHash::hash(&height.to_le_bytes())
}

#[async_trait]
impl Reader for TestBitcoinClient {
    async fn get_block_count(&self) -> ClientResult<u64> {
        self.check("get_block_count")?;
        Ok(self.tip())
    }

    async fn get_block_hash(&self, height: u64) -> ClientResult<BlockHash> {
        self.check("get_block_hash")?;
        if height > self.tip() {
            return Err(ClientError::Server(-8, "Block height out of range".to_string()));
        }
        Ok(block_hash(height))
    }

    async fn get_block_header_verbose(
        &self,
        hash: &BlockHash,
    ) -> ClientResult<GetBlockHeaderVerbose> {
        self.check("get_block_header_verbose")?;
        let block = self.get_block_verbose(hash).await?;
        Ok(GetBlockHeaderVerbose {
            hash: block.hash,
            height: block.height,
            time: block.time,
            confirmations: self.tip() as i64 - block.height + 1,
            ..Default::default()
        })
    }

    async fn get_block_verbose(&self, hash: &BlockHash) -> ClientResult<GetBlockVerbose> {
        self.check("get_block_verbose")?;
        let state = self.state.lock();
        let hash = hash.to_string();
        state
            .blocks
            .iter()
            .find(|b| b.hash == hash)
            .cloned()
            .ok_or_else(|| not_found("block"))
    }

    async fn get_raw_transaction(&self, txid: &Txid) -> ClientResult<Transaction> {
        self.check("get_raw_transaction")?;
        self.state
            .lock()
            .txs
            .get(txid)
            .cloned()
            .ok_or_else(|| not_found("tx"))
    }

    async fn get_raw_transaction_verbose(&self, txid: &Txid) -> ClientResult<RawTxVerbose> {
        self.check("get_raw_transaction_verbose")?;
        self.state
            .lock()
            .raw_txs
            .get(txid)
            .cloned()
            .ok_or_else(|| not_found("tx"))
    }

    async fn get_mempool_entry(&self, txid: &Txid) -> ClientResult<GetMempoolEntry> {
        self.check("get_mempool_entry")?;
        self.state
            .lock()
            .mempool
            .get(txid)
            .cloned()
            .ok_or_else(|| not_found("mempool entry"))
    }

    async fn estimate_smart_fee(&self, _conf_target: u16) -> ClientResult<EstimateSmartFee> {
        self.check("estimate_smart_fee")?;
        Ok(self.state.lock().smart_fee.clone())
    }

    async fn network(&self) -> ClientResult<Network> {
        Ok(self.state.lock().network)
    }
}

#[async_trait]
impl Wallet for TestBitcoinClient {
    async fn get_transaction(&self, txid: &Txid) -> ClientResult<GetTransaction> {
        self.check("get_transaction")?;
        self.state
            .lock()
            .wallet_txs
            .get(txid)
            .cloned()
            .ok_or_else(|| not_found("wallet tx"))
    }

    async fn list_unspent(
        &self,
        min_conf: u64,
        max_conf: u64,
        addresses: &[String],
    ) -> ClientResult<Vec<ListUnspent>> {
        self.check("list_unspent")?;
        Ok(self
            .state
            .lock()
            .unspent
            .iter()
            .filter(|u| u.confirmations >= min_conf && u.confirmations <= max_conf)
            .filter(|u| addresses.is_empty() || addresses.contains(&u.address))
            .cloned()
            .collect())
    }
}
