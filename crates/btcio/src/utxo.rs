//! The TSS UTXO working set and input selection for outbounds.
//!
//! Selection must be reproducible: every signer runs it on the same sorted
//! set and has to end up with the same inputs in the same order.

use std::cmp::Ordering;

use thiserror::Error;
use tracing::*;

use crate::{
    amount::{get_satoshis, sats_to_btc, AmountError},
    fee::DEFAULT_DEPOSITOR_FEE,
    params::nonce_mark_amount,
    rpc::types::ListUnspent,
};

#[derive(Debug, Error)]
pub enum UtxoError {
    #[error("cannot find nonce-mark utxo with nonce {0}")]
    NonceMarkNotFound(u64),

    #[error("not enough btc in reserve - available : {0} , tx amount : {1}")]
    InsufficientFunds(f64, f64),

    #[error("invalid utxo amount: {0}")]
    Amount(#[from] AmountError),
}

pub type UtxoResult<T> = Result<T, UtxoError>;

/// A spendable output of the TSS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unspent {
    pub txid: String,
    pub vout: u32,
    pub address: String,
    pub amount_sats: u64,
    pub confirmations: u64,
}

impl TryFrom<ListUnspent> for Unspent {
    type Error = AmountError;

    fn try_from(u: ListUnspent) -> Result<Self, Self::Error> {
        Ok(Self {
            amount_sats: get_satoshis(u.amount)?,
            txid: u.txid,
            vout: u.vout,
            address: u.address,
            confirmations: u.confirmations,
        })
    }
}

/// Inputs picked for an outbound.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SelectedUtxos {
    /// Nonce-mark first when there is one.
    pub utxos: Vec<Unspent>,
    pub value_sats: u64,
    pub consolidated_utxos: u16,
    pub consolidated_value_sats: u64,
}

fn cmp_unspent(a: &Unspent, b: &Unspent) -> Ordering {
    a.amount_sats
        .cmp(&b.amount_sats)
        .then_with(|| a.txid.cmp(&b.txid))
        .then_with(|| a.vout.cmp(&b.vout))
}

/// Ascending by amount, then txid, then vout.
pub fn sort_utxos(utxos: &mut [Unspent]) {
    utxos.sort_by(cmp_unspent);
}

/// Drops outputs not worth spending, and unconfirmed outputs unless they
/// come from the TSS itself.
pub fn filter_spendable(
    utxos: Vec<Unspent>,
    is_tss_tx: impl Fn(&str) -> bool,
) -> Vec<Unspent> {
    utxos
        .into_iter()
        .filter(|u| u.amount_sats >= DEFAULT_DEPOSITOR_FEE)
        .filter(|u| u.confirmations > 0 || is_tss_tx(&u.txid))
        .collect()
}

/// Index of the nonce-mark left by the outbound `txid` for `nonce`.
pub fn find_nonce_mark(
    utxos: &[Unspent],
    tss_address: &str,
    nonce: u64,
    txid: &str,
) -> UtxoResult<usize> {
    let amount = nonce_mark_amount(nonce);
    let idx = utxos
        .iter()
        .position(|u| {
            u.address == tss_address && u.amount_sats == amount && u.txid == txid && u.vout == 0
        })
        .ok_or(UtxoError::NonceMarkNotFound(nonce))?;

    info!(%nonce, %txid, %amount, "found nonce-mark utxo");
    Ok(idx)
}

/// Picks inputs worth at least `amount_sats` out of the sorted `utxos`.
///
/// The smallest window of at most `max_inputs` consecutive outputs covering
/// the amount is taken, sliding towards bigger outputs once the cap is
/// reached.  The nonce-mark at `nonce_mark_idx` always ends up first.  Input
/// slots left over are then filled with the biggest remaining outputs,
/// skipping the `consolidation_rank - 1` biggest of them.
pub fn select_utxos(
    utxos: &[Unspent],
    nonce_mark_idx: Option<usize>,
    amount_sats: u64,
    max_inputs: u16,
    consolidation_rank: u16,
) -> UtxoResult<SelectedUtxos> {
    let mut slots = max_inputs;
    let mut total = 0u64;
    let (mut left, mut right) = (0, 0);
    while total < amount_sats && right < utxos.len() {
        if slots > 0 {
            total += utxos[right].amount_sats;
            right += 1;
            slots -= 1;
        } else {
            // add first, `left == right` when `max_inputs` is 0
            total += utxos[right].amount_sats;
            total -= utxos[left].amount_sats;
            left += 1;
            right += 1;
        }
    }

    let mut selected = utxos[left..right].to_vec();
    if let Some(idx) = nonce_mark_idx {
        if idx < left || idx >= right {
            total += utxos[idx].amount_sats;
            selected.insert(0, utxos[idx].clone());
        } else {
            selected[..=idx - left].rotate_right(1);
        }
    }

    if total < amount_sats {
        return Err(UtxoError::InsufficientFunds(
            sats_to_btc(total),
            sats_to_btc(amount_sats),
        ));
    }

    let mut rank = 0u16;
    let mut consolidated_utxos = 0u16;
    let mut consolidated_value_sats = 0u64;
    for i in (0..utxos.len()).rev() {
        if slots == 0 {
            break;
        }
        if Some(i) == nonce_mark_idx || (left..right).contains(&i) {
            continue;
        }
        rank += 1;
        if rank >= consolidation_rank {
            slots -= 1;
            consolidated_utxos += 1;
            total += utxos[i].amount_sats;
            consolidated_value_sats += utxos[i].amount_sats;
            selected.push(utxos[i].clone());
        }
    }

    Ok(SelectedUtxos {
        utxos: selected,
        value_sats: total,
        consolidated_utxos,
        consolidated_value_sats,
    })
}
