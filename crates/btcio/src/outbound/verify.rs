use btcobs_rpc_api::Cctx;

use super::{OutboundError, OutboundResult};
use crate::{
    codec::script::{decode_address, decode_tss_vout},
    params::{nonce_mark_amount, ChainParams, DUST_SATS},
    rpc::types::{RawTxVerbose, VinVerbose, VoutVerbose},
};

/// Every input must be a P2WPKH spend by the TSS key, and for `nonce > 0`
/// the first one must spend the nonce-mark of `prev_txid`, the outbound of
/// `nonce - 1`.
pub fn check_tss_vin(
    vins: &[VinVerbose],
    tss_pubkey: &str,
    nonce: u64,
    prev_txid: Option<&str>,
) -> OutboundResult<()> {
    if nonce > 0 && vins.len() <= 1 {
        return Err(OutboundError::TooFewVins);
    }

    for (i, vin) in vins.iter().enumerate() {
        if vin.witness.len() != 2 {
            return Err(OutboundError::WitnessItems(vin.witness.len()));
        }
        if vin.witness[1] != tss_pubkey {
            return Err(OutboundError::WitnessPubkey(
                vin.witness[1].clone(),
                tss_pubkey.to_string(),
            ));
        }

        if nonce > 0 && i == 0 {
            let prev = prev_txid.ok_or(OutboundError::PrevNonceUnknown(nonce - 1))?;
            if vin.txid != prev || vin.vout != 0 {
                return Err(OutboundError::InvalidNonceMarkInput(
                    vin.txid.clone(),
                    vin.vout,
                    prev.to_string(),
                ));
            }
        }
    }
    Ok(())
}

fn check_nonce_mark(receiver: &str, amount: u64, tss: &str, nonce: u64) -> OutboundResult<()> {
    if receiver != tss {
        return Err(OutboundError::NonceMarkAddress(receiver.to_string(), tss.to_string()));
    }
    let expected = nonce_mark_amount(nonce);
    if amount != expected {
        return Err(OutboundError::NonceMarkAmount(amount, expected));
    }
    Ok(())
}

fn check_change(receiver: &str, tss: &str) -> OutboundResult<()> {
    if receiver != tss {
        return Err(OutboundError::ChangeAddress(receiver.to_string(), tss.to_string()));
    }
    Ok(())
}

/// Outputs of a paying outbound: nonce-mark, payment, and optional change.
pub fn check_tss_vout(
    vouts: &[VoutVerbose],
    params: &ChainParams,
    receiver: &str,
    amount_sats: u64,
    nonce: u64,
) -> OutboundResult<()> {
    if vouts.len() != 2 && vouts.len() != 3 {
        return Err(OutboundError::VoutCount(vouts.len()));
    }

    let receiver_addr = decode_address(receiver, params.network)
        .map_err(|e| OutboundError::Receiver(receiver.to_string(), e))?;
    let receiver = receiver_addr.to_string();
    let tss = params.tss_address_str();

    for vout in vouts {
        let expected = if vout.n == 1 { &receiver_addr } else { &params.tss_address };
        let (to, amount) = decode_tss_vout(vout, expected, params.network)
            .map_err(|e| OutboundError::Vout(vout.n, e))?;

        match vout.n {
            0 => check_nonce_mark(&to, amount, &tss, nonce)?,
            1 => {
                if to != receiver {
                    return Err(OutboundError::PaymentAddress(to, receiver));
                }
                if amount != amount_sats {
                    return Err(OutboundError::PaymentAmount(amount, amount_sats));
                }
            }
            2 => check_change(&to, &tss)?,
            _ => {}
        }
    }
    Ok(())
}

/// Outputs of a cancelled outbound: nonce-mark and optional change, nothing
/// paid out.
pub fn check_tss_vout_cancelled(
    vouts: &[VoutVerbose],
    params: &ChainParams,
    nonce: u64,
) -> OutboundResult<()> {
    if vouts.len() != 1 && vouts.len() != 2 {
        return Err(OutboundError::VoutCount(vouts.len()));
    }

    let tss = params.tss_address_str();
    for vout in vouts {
        let (to, amount) = decode_tss_vout(vout, &params.tss_address, params.network)
            .map_err(|e| OutboundError::Vout(vout.n, e))?;
        match vout.n {
            0 => check_nonce_mark(&to, amount, &tss, nonce)?,
            1 => check_change(&to, &tss)?,
            _ => {}
        }
    }
    Ok(())
}

/// Full structural check of `raw` against `cctx`.
///
/// Restricted or dust instructions are cancelled and must not pay anything.
pub fn check_tss_outbound(
    raw: &RawTxVerbose,
    cctx: &Cctx,
    params: &ChainParams,
    prev_txid: Option<&str>,
    restricted: bool,
) -> OutboundResult<()> {
    let nonce = cctx.tss_nonce;

    check_tss_vin(&raw.vin, &params.tss_pubkey, nonce, prev_txid)
        .map_err(|e| OutboundError::InvalidVin(raw.txid.clone(), nonce, Box::new(e)))?;

    if restricted || cctx.amount_sats < DUST_SATS {
        check_tss_vout_cancelled(&raw.vout, params, nonce).map_err(|e| {
            OutboundError::InvalidVoutCancelled(raw.txid.clone(), nonce, Box::new(e))
        })?;
    } else {
        check_tss_vout(&raw.vout, params, &cctx.receiver, cctx.amount_sats, nonce)
            .map_err(|e| OutboundError::InvalidVout(raw.txid.clone(), nonce, Box::new(e)))?;
    }
    Ok(())
}
