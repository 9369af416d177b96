use bitcoin::Network;
use btcobs_rpc_api::{InboundVote, RevertOptions};

use crate::{
    codec::{
        memo::{decode_memo_bytes, InboundMemo, MemoError},
        memo_std::hex_address,
    },
    compliance::ComplianceChecker,
    params::DONATION_MESSAGE,
};

/// A deposit to the TSS address found on chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BtcInboundEvent {
    /// Owner of the first input, empty if its script is of no known kind.
    pub from_address: String,

    /// The TSS address.
    pub to_address: String,

    /// Deposited value net of the depositor fee.
    pub value_sats: u64,

    pub depositor_fee_sats: u64,

    pub memo_bytes: Vec<u8>,

    /// Set by [`Self::decode_memo_bytes`].
    pub memo: Option<InboundMemo>,

    pub block_number: u64,

    pub tx_hash: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InboundProcessability {
    Good,
    Donation,
    ComplianceViolation,
}

impl BtcInboundEvent {
    /// Decodes the memo bytes into [`Self::memo`].  Donations are left
    /// undecoded.
    pub fn decode_memo_bytes(&mut self, network: Network) -> Result<(), MemoError> {
        self.memo = decode_memo_bytes(&self.memo_bytes, network)?;
        Ok(())
    }

    pub fn is_donation(&self) -> bool {
        self.memo_bytes == DONATION_MESSAGE.as_bytes()
    }

    /// Addresses the compliance check looks at: both ends of the tx, and the
    /// receiver, revert and abort addresses of a standard memo.
    pub fn involved_addresses(&self) -> Vec<String> {
        let mut addrs = vec![self.from_address.clone(), self.to_address.clone()];
        if let Some(InboundMemo::Standard(m)) = &self.memo {
            addrs.push(hex_address(&m.receiver));
            addrs.push(m.revert_address.clone());
            addrs.push(m.abort_address_hex());
        }
        addrs
    }

    /// Restricted addresses win over donations.
    pub fn processability(&self, compliance: &dyn ComplianceChecker) -> InboundProcessability {
        if compliance.contains_restricted_address(&self.involved_addresses()) {
            return InboundProcessability::ComplianceViolation;
        }
        if self.is_donation() {
            return InboundProcessability::Donation;
        }
        InboundProcessability::Good
    }

    /// Builds the inbound vote.  Needs the memo decoded first.
    pub fn to_vote(&self, chain_id: i64, core_chain_id: i64) -> Option<InboundVote> {
        let memo = self.memo.as_ref()?;

        let (message, revert_options) = match memo {
            InboundMemo::Legacy { .. } => (self.memo_bytes.clone(), RevertOptions::default()),
            InboundMemo::Standard(m) => (
                m.payload.clone(),
                RevertOptions {
                    revert_address: m.revert_address.clone(),
                    call_on_revert: m.call_on_revert,
                    abort_address: m.abort_address_hex(),
                    revert_message: m.revert_message.clone(),
                },
            ),
        };

        Some(InboundVote {
            sender: self.from_address.clone(),
            sender_chain_id: chain_id,
            tx_origin: self.from_address.clone(),
            receiver: memo.receiver(),
            receiver_chain_id: core_chain_id,
            amount_sats: self.value_sats,
            message,
            inbound_hash: self.tx_hash.clone(),
            inbound_block_height: self.block_number,
            is_call: memo.is_call(),
            revert_options,
        })
    }
}
