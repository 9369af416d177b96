//! Memos carried in a taproot script-path spend.
//!
//! The tapscript revealed in the witness has the shape
//!
//! ```text
//! <32-byte pubkey> OP_CHECKSIG OP_FALSE OP_IF <push>... OP_ENDIF
//! ```
//!
//! and the memo is the concatenation of the pushes.

use bitcoin::{
    opcodes::all::{OP_CHECKSIG, OP_ENDIF, OP_IF},
    script::Instruction,
    Script, ScriptBuf,
};
use tracing::*;

use super::{CodecError, CodecResult};
use crate::rpc::types::VinVerbose;

/// Witness items starting with this byte in last position are annexes.
const ANNEX_TAG: u8 = 0x50;

/// Pulls the tapscript out of a script-path witness.
///
/// The script is the second to last item once the annex, if any, is dropped.
pub fn parse_script_from_witness(witness: &[String]) -> Option<ScriptBuf> {
    let last = witness.last()?;
    let last = match hex::decode(last) {
        Ok(b) => b,
        Err(e) => {
            debug!(%e, "witness item is not hex");
            return None;
        }
    };

    let mut len = witness.len();
    if len >= 2 && last.first() == Some(&ANNEX_TAG) {
        len -= 1;
    }
    if len < 2 {
        return None;
    }

    hex::decode(&witness[len - 2]).ok().map(ScriptBuf::from_bytes)
}

/// Extracts the memo from an inscription tapscript.
pub fn decode_inscription_script(script: &Script) -> CodecResult<Vec<u8>> {
    let mut ins = script.instructions();

    match ins.next().transpose()? {
        Some(Instruction::PushBytes(pk)) if pk.len() == 32 => {}
        _ => return Err(CodecError::PublicKeyNotFound),
    }
    match ins.next().transpose()? {
        Some(Instruction::Op(op)) if op == OP_CHECKSIG => {}
        _ => return Err(CodecError::CheckSigNotFound),
    }
    match ins.next().transpose()? {
        Some(Instruction::PushBytes(b)) if b.is_empty() => {}
        _ => return Err(CodecError::FalseNotFound),
    }
    match ins.next().transpose()? {
        Some(Instruction::Op(op)) if op == OP_IF => {}
        _ => return Err(CodecError::IfNotFound),
    }

    let mut memo = Vec::new();
    loop {
        match ins.next().transpose()? {
            Some(Instruction::Op(op)) if op == OP_ENDIF => return Ok(memo),
            Some(Instruction::Op(op)) => return Err(CodecError::NotDataPush(op.to_u8())),
            Some(Instruction::PushBytes(b)) if b.is_empty() => {
                return Err(CodecError::NotDataPush(0))
            }
            Some(Instruction::PushBytes(b)) => memo.extend_from_slice(b.as_bytes()),
            None => return Err(CodecError::ScriptEnded),
        }
    }
}

/// Memo from the first input carrying a well-formed inscription.
pub fn get_inscription_memo(vins: &[VinVerbose]) -> Option<Vec<u8>> {
    vins.iter().find_map(|vin| {
        let script = parse_script_from_witness(&vin.witness)?;
        match decode_inscription_script(&script) {
            Ok(memo) => Some(memo),
            Err(e) => {
                debug!(txid = %vin.txid, %e, "no inscription in input");
                None
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use bitcoin::{opcodes::all::OP_PUSHNUM_1, script::Builder};

    use super::*;

    const PUBKEY: [u8; 32] = [0x79; 32];

    fn inscription(chunks: &[&[u8]]) -> ScriptBuf {
        let mut b = Builder::new()
            .push_slice(PUBKEY)
            .push_opcode(OP_CHECKSIG)
            .push_int(0)
            .push_opcode(OP_IF);
        for c in chunks {
            let push: &bitcoin::script::PushBytes = (*c).try_into().unwrap();
            b = b.push_slice(push);
        }
        b.push_opcode(OP_ENDIF).into_script()
    }

    fn witness(script: &Script, annex: bool) -> Vec<String> {
        let mut w = vec!["aa".repeat(64), script.to_hex_string(), "c0".to_string() + &"11".repeat(32)];
        if annex {
            w.push("50ff".to_string());
        }
        w
    }

    #[test]
    fn test_decode_inscription() {
        let big = vec![0x42; 600];
        let script = inscription(&[b"hello ", &big]);
        let memo = decode_inscription_script(&script).unwrap();
        assert_eq!(&memo[..6], b"hello ");
        assert_eq!(memo.len(), 606);
    }

    #[test]
    fn test_decode_inscription_errors() {
        let s = Builder::new().push_slice([1u8; 20]).into_script();
        assert!(matches!(decode_inscription_script(&s), Err(CodecError::PublicKeyNotFound)));

        let s = Builder::new().push_slice(PUBKEY).push_opcode(OP_IF).into_script();
        assert!(matches!(decode_inscription_script(&s), Err(CodecError::CheckSigNotFound)));

        let s = Builder::new()
            .push_slice(PUBKEY)
            .push_opcode(OP_CHECKSIG)
            .push_opcode(OP_IF)
            .into_script();
        assert!(matches!(decode_inscription_script(&s), Err(CodecError::FalseNotFound)));

        let s = Builder::new()
            .push_slice(PUBKEY)
            .push_opcode(OP_CHECKSIG)
            .push_int(0)
            .push_opcode(OP_ENDIF)
            .into_script();
        assert!(matches!(decode_inscription_script(&s), Err(CodecError::IfNotFound)));

        let s = Builder::new()
            .push_slice(PUBKEY)
            .push_opcode(OP_CHECKSIG)
            .push_int(0)
            .push_opcode(OP_IF)
            .push_slice(b"data")
            .push_opcode(OP_PUSHNUM_1)
            .into_script();
        assert!(matches!(
            decode_inscription_script(&s),
            Err(CodecError::NotDataPush(0x51))
        ));

        let s = Builder::new()
            .push_slice(PUBKEY)
            .push_opcode(OP_CHECKSIG)
            .push_int(0)
            .push_opcode(OP_IF)
            .push_slice(b"data")
            .into_script();
        assert!(matches!(decode_inscription_script(&s), Err(CodecError::ScriptEnded)));
    }

    #[test]
    fn test_parse_witness() {
        let script = inscription(&[b"memo"]);
        assert_eq!(parse_script_from_witness(&witness(&script, false)), Some(script.clone()));
        assert_eq!(parse_script_from_witness(&witness(&script, true)), Some(script));

        assert_eq!(parse_script_from_witness(&[]), None);
        assert_eq!(parse_script_from_witness(&["aa".to_string()]), None);
        assert_eq!(parse_script_from_witness(&["aa".to_string(), "zz".to_string()]), None);
    }

    #[test]
    fn test_inscription_memo_from_inputs() {
        let keyspend = VinVerbose {
            witness: vec!["aa".repeat(64)],
            ..Default::default()
        };
        let script = inscription(&[b"memo"]);
        let scriptspend = VinVerbose {
            witness: witness(&script, false),
            ..Default::default()
        };

        assert_eq!(get_inscription_memo(&[keyspend.clone()]), None);
        assert_eq!(
            get_inscription_memo(&[keyspend, scriptspend]),
            Some(b"memo".to_vec())
        );
    }
}
