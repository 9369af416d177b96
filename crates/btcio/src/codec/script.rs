//! Output script classification and decoding.

use std::{fmt, str::FromStr};

use bitcoin::{Address, AddressType, Network, Script, ScriptBuf};

use super::{CodecError, CodecResult};
use crate::{amount::get_satoshis, rpc::types::VoutVerbose};

/// Output script families the observer can pay to and decode.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ScriptKind {
    P2tr,
    P2wsh,
    P2wpkh,
    P2sh,
    P2pkh,
}

impl ScriptKind {
    /// Whether `script` is exactly a script of this kind, length and opcodes
    /// included.
    pub fn matches(&self, script: &Script) -> bool {
        match self {
            ScriptKind::P2tr => script.is_p2tr(),
            ScriptKind::P2wsh => script.is_p2wsh(),
            ScriptKind::P2wpkh => script.is_p2wpkh(),
            ScriptKind::P2sh => script.is_p2sh(),
            ScriptKind::P2pkh => script.is_p2pkh(),
        }
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScriptKind::P2tr => "P2TR",
            ScriptKind::P2wsh => "P2WSH",
            ScriptKind::P2wpkh => "P2WPKH",
            ScriptKind::P2sh => "P2SH",
            ScriptKind::P2pkh => "P2PKH",
        };
        f.write_str(s)
    }
}

pub fn classify_script(script: &Script) -> Option<ScriptKind> {
    [
        ScriptKind::P2tr,
        ScriptKind::P2wsh,
        ScriptKind::P2wpkh,
        ScriptKind::P2sh,
        ScriptKind::P2pkh,
    ]
    .into_iter()
    .find(|kind| kind.matches(script))
}

pub fn classify_address(addr: &Address) -> Option<ScriptKind> {
    match addr.address_type()? {
        AddressType::P2tr => Some(ScriptKind::P2tr),
        AddressType::P2wsh => Some(ScriptKind::P2wsh),
        AddressType::P2wpkh => Some(ScriptKind::P2wpkh),
        AddressType::P2sh => Some(ScriptKind::P2sh),
        AddressType::P2pkh => Some(ScriptKind::P2pkh),
        _ => None,
    }
}

/// Parses an address and checks it belongs to `network`.
pub fn decode_address(addr: &str, network: Network) -> CodecResult<Address> {
    Address::from_str(addr)
        .and_then(|a| a.require_network(network))
        .map_err(|e| CodecError::InvalidAddress(addr.to_string(), e.to_string()))
}

fn decode_script_hex(script_hex: &str) -> CodecResult<ScriptBuf> {
    hex::decode(script_hex)
        .map(ScriptBuf::from_bytes)
        .map_err(|_| CodecError::ScriptHex(script_hex.to_string()))
}

/// Decodes a script of the given kind into its address.  A script of any
/// other kind, or a malformed one, is an error.
pub fn decode_script(kind: ScriptKind, script_hex: &str, network: Network) -> CodecResult<Address> {
    let script = decode_script_hex(script_hex)?;
    if !kind.matches(&script) {
        return Err(CodecError::InvalidScript(kind, script_hex.to_string()));
    }
    Address::from_script(&script, network)
        .map_err(|e| CodecError::AddressFromScript(script_hex.to_string(), e.to_string()))
}

/// Address paying to `script`, or an empty string if the script is of no
/// known kind.
pub fn decode_sender_from_script(script: &Script, network: Network) -> CodecResult<String> {
    if classify_script(script).is_none() {
        return Ok(String::new());
    }
    Address::from_script(script, network)
        .map(|a| a.to_string())
        .map_err(|e| CodecError::AddressFromScript(script.to_hex_string(), e.to_string()))
}

/// Decodes an output of a TSS outbound that is expected to pay `expected`.
///
/// The script is decoded as the kind of the expected address, so a
/// different kind fails instead of yielding another address.  Returns the
/// receiver and the amount in sats.
pub fn decode_tss_vout(
    vout: &VoutVerbose,
    expected: &Address,
    network: Network,
) -> CodecResult<(String, u64)> {
    let amount = get_satoshis(vout.value)?;

    let kind = classify_address(expected)
        .ok_or_else(|| CodecError::UnsupportedReceiver(expected.to_string()))?;
    let receiver = decode_script(kind, &vout.script_pub_key.hex, network)?;

    Ok((receiver.to_string(), amount))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::types::ScriptPubKey;

    const ADDRS: [(ScriptKind, &str); 5] = [
        (
            ScriptKind::P2tr,
            "bc1p4scddlkkuw9486579autxumxmkvuphm5pz4jvf7f6pdh50p2uzqstawjt9",
        ),
        (
            ScriptKind::P2wsh,
            "bc1qqv6pwn470vu0tssdfha4zdk89v3c8ch5lsnyy855k9hcrcv3evequdmjmc",
        ),
        (ScriptKind::P2wpkh, "bc1qaxf82vyzy8y80v000e7t64gpten7gawewzu42y"),
        (ScriptKind::P2sh, "327z4GyFM8Y8DiYfasGKQWhRK4MvyMSEgE"),
        (ScriptKind::P2pkh, "1FueivsE338W2LgifJ25HhTcVJ7CRT8kte"),
    ];

    fn script_hex(addr: &str) -> String {
        decode_address(addr, Network::Bitcoin)
            .unwrap()
            .script_pubkey()
            .to_hex_string()
    }

    #[test]
    fn test_decode_each_kind() {
        for (kind, addr) in ADDRS {
            let hex = script_hex(addr);
            let decoded = decode_script(kind, &hex, Network::Bitcoin).unwrap();
            assert_eq!(decoded.to_string(), addr);
            assert_eq!(classify_address(&decoded), Some(kind));
        }
    }

    #[test]
    fn test_decoders_are_exclusive() {
        for (kind, addr) in ADDRS {
            let hex = script_hex(addr);
            for (other, _) in ADDRS {
                if other == kind {
                    continue;
                }
                assert!(
                    matches!(
                        decode_script(other, &hex, Network::Bitcoin),
                        Err(CodecError::InvalidScript(k, _)) if k == other
                    ),
                    "{kind} script decoded as {other}"
                );
            }
        }
    }

    #[test]
    fn test_decode_malformed() {
        // P2WPKH with one byte chopped off
        let hex = script_hex("bc1qaxf82vyzy8y80v000e7t64gpten7gawewzu42y");
        let short = &hex[..hex.len() - 2];
        assert!(matches!(
            decode_script(ScriptKind::P2wpkh, short, Network::Bitcoin),
            Err(CodecError::InvalidScript(..))
        ));
        assert!(matches!(
            decode_script(ScriptKind::P2wpkh, "0014zz", Network::Bitcoin),
            Err(CodecError::ScriptHex(_))
        ));

        // P2PKH with OP_EQUALVERIFY swapped for OP_EQUAL
        let hex = script_hex("1FueivsE338W2LgifJ25HhTcVJ7CRT8kte");
        let bad = format!("{}87ac", &hex[..hex.len() - 4]);
        assert!(decode_script(ScriptKind::P2pkh, &bad, Network::Bitcoin).is_err());
    }

    #[test]
    fn test_decode_sender() {
        for (_, addr) in ADDRS {
            let script = decode_address(addr, Network::Bitcoin).unwrap().script_pubkey();
            assert_eq!(decode_sender_from_script(&script, Network::Bitcoin).unwrap(), addr);
        }

        // OP_RETURN is of no known kind
        let script = ScriptBuf::from_hex("6a0400010203").unwrap();
        assert_eq!(decode_sender_from_script(&script, Network::Bitcoin).unwrap(), "");
    }

    #[test]
    fn test_decode_tss_vout() {
        let expected = decode_address(ADDRS[2].1, Network::Bitcoin).unwrap();
        let vout = VoutVerbose {
            value: 0.0001,
            n: 1,
            script_pub_key: ScriptPubKey {
                hex: script_hex(ADDRS[2].1),
                ..Default::default()
            },
        };
        let (receiver, amount) = decode_tss_vout(&vout, &expected, Network::Bitcoin).unwrap();
        assert_eq!(receiver, ADDRS[2].1);
        assert_eq!(amount, 10_000);

        // paid to a P2TR while a P2WPKH was expected
        let mut wrong = vout.clone();
        wrong.script_pub_key.hex = script_hex(ADDRS[0].1);
        assert!(matches!(
            decode_tss_vout(&wrong, &expected, Network::Bitcoin),
            Err(CodecError::InvalidScript(ScriptKind::P2wpkh, _))
        ));

        let mut negative = vout;
        negative.value = -1.0;
        assert!(matches!(
            decode_tss_vout(&negative, &expected, Network::Bitcoin),
            Err(CodecError::Amount(_))
        ));
    }

    #[test]
    fn test_decode_tss_vout_unsupported_receiver() {
        let expected = decode_address("bc1zw508d6qejxtdg4y5r3zarvaryvaxxpcs", Network::Bitcoin)
            .unwrap();
        let vout = VoutVerbose {
            value: 0.0001,
            ..Default::default()
        };
        assert!(matches!(
            decode_tss_vout(&vout, &expected, Network::Bitcoin),
            Err(CodecError::UnsupportedReceiver(_))
        ));
    }

    #[test]
    fn test_decode_address_network() {
        assert!(decode_address(ADDRS[2].1, Network::Testnet).is_err());
        assert!(decode_address("0x2D07A9CBd57DCca3E2cF966C88Bc874445b6E3B6", Network::Bitcoin)
            .is_err());
    }
}
