//! The standard inbound memo.
//!
//! Layout: a 4-byte header followed by the fields announced in its data
//! flags.
//!
//! ```text
//! byte 0   'Z'
//! byte 1   version (high nibble) | encoding format (low nibble)
//! byte 2   operation code (high nibble) | reserved, zero (low nibble)
//! byte 3   data flags
//! ```
//!
//! Data flags, from the lowest bit: receiver, payload, revert address, abort
//! address, call-on-revert, revert message.  The top two bits are reserved.
//! Fields are laid out in that order.  Addresses on the destination side are
//! 20 raw bytes, everything else is length prefixed, with a 1-byte length in
//! the short compact format and a 2-byte little-endian length in the long
//! one.

use thiserror::Error;

const IDENTIFIER: u8 = b'Z';
pub const HEADER_SIZE: usize = 4;
const ADDRESS_LEN: usize = 20;

const FLAG_RECEIVER: u8 = 1 << 0;
const FLAG_PAYLOAD: u8 = 1 << 1;
const FLAG_REVERT_ADDRESS: u8 = 1 << 2;
const FLAG_ABORT_ADDRESS: u8 = 1 << 3;
const FLAG_CALL_ON_REVERT: u8 = 1 << 4;
const FLAG_REVERT_MESSAGE: u8 = 1 << 5;
const FLAGS_RESERVED: u8 = 0b1100_0000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StdMemoError {
    #[error("header size should be {HEADER_SIZE} bytes, got {0}")]
    HeaderSize(usize),

    #[error("invalid memo identifier: {0}")]
    InvalidIdentifier(u8),

    #[error("invalid memo version: {0}")]
    InvalidVersion(u8),

    #[error("invalid encoding format: {0}")]
    InvalidEncoding(u8),

    #[error("invalid operation code: {0}")]
    InvalidOpCode(u8),

    #[error("reserved control bits are not zero: {0}")]
    ReservedControlBits(u8),

    #[error("unsupported encoding format {0:?}")]
    UnsupportedEncoding(EncodingFormat),

    #[error("expected address, got {0} bytes")]
    ExpectedAddress(usize),

    #[error("expected {0} bytes to decode length")]
    ExpectedLength(usize),

    #[error("expected {0} bytes, got {1}")]
    ExpectedBytes(usize, usize),

    #[error("consumed bytes ({0}) != total bytes ({1})")]
    TrailingBytes(usize, usize),

    #[error("revert address is not valid utf-8")]
    RevertAddressUtf8,

    #[error("must set receiver address flag")]
    MissingReceiverFlag,

    #[error("receiver address is empty")]
    EmptyReceiver,

    #[error("payload is not allowed for deposit operation")]
    PayloadNotAllowed,

    #[error("revert address is empty")]
    EmptyRevertAddress,

    #[error("abort address is empty")]
    EmptyAbortAddress,

    #[error("reserved flags are not zero")]
    ReservedFlags,
}

impl StdMemoError {
    /// Header errors mean the bytes aren't a standard memo at all, rather
    /// than a broken one.
    pub fn is_header_error(&self) -> bool {
        matches!(
            self,
            Self::HeaderSize(_)
                | Self::InvalidIdentifier(_)
                | Self::InvalidVersion(_)
                | Self::InvalidEncoding(_)
                | Self::InvalidOpCode(_)
                | Self::ReservedControlBits(_)
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EncodingFormat {
    Abi,
    CompactShort,
    CompactLong,
}

impl TryFrom<u8> for EncodingFormat {
    type Error = StdMemoError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Abi),
            1 => Ok(Self::CompactShort),
            2 => Ok(Self::CompactLong),
            _ => Err(StdMemoError::InvalidEncoding(v)),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OpCode {
    Deposit,
    DepositAndCall,
    /// Call without moving funds.
    Call,
}

impl TryFrom<u8> for OpCode {
    type Error = StdMemoError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Deposit),
            1 => Ok(Self::DepositAndCall),
            2 => Ok(Self::Call),
            _ => Err(StdMemoError::InvalidOpCode(v)),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoHeader {
    pub encoding: EncodingFormat,
    pub op: OpCode,
    pub data_flags: u8,
}

impl MemoHeader {
    pub fn decode(data: &[u8]) -> Result<Self, StdMemoError> {
        if data.len() < HEADER_SIZE {
            return Err(StdMemoError::HeaderSize(data.len()));
        }
        if data[0] != IDENTIFIER {
            return Err(StdMemoError::InvalidIdentifier(data[0]));
        }

        let version = data[1] >> 4;
        if version != 0 {
            return Err(StdMemoError::InvalidVersion(version));
        }
        let encoding = EncodingFormat::try_from(data[1] & 0x0f)?;
        let op = OpCode::try_from(data[2] >> 4)?;
        let reserved = data[2] & 0x0f;
        if reserved != 0 {
            return Err(StdMemoError::ReservedControlBits(reserved));
        }

        Ok(Self {
            encoding,
            op,
            data_flags: data[3],
        })
    }

    fn has(&self, flag: u8) -> bool {
        self.data_flags & flag != 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StandardMemo {
    pub header: MemoHeader,
    pub receiver: [u8; ADDRESS_LEN],
    pub payload: Vec<u8>,
    /// Address on this chain refunds go to.  Empty if unset.
    pub revert_address: String,
    pub call_on_revert: bool,
    pub abort_address: Option<[u8; ADDRESS_LEN]>,
    pub revert_message: Vec<u8>,
}

impl StandardMemo {
    /// Decodes and validates a standard memo.
    pub fn decode(data: &[u8]) -> Result<Self, StdMemoError> {
        let header = MemoHeader::decode(data)?;

        let long = match header.encoding {
            EncodingFormat::CompactShort => false,
            EncodingFormat::CompactLong => true,
            EncodingFormat::Abi => return Err(StdMemoError::UnsupportedEncoding(header.encoding)),
        };
        let mut rd = CompactReader {
            data: &data[HEADER_SIZE..],
            pos: 0,
            long,
        };

        let mut memo = Self {
            header,
            receiver: [0; ADDRESS_LEN],
            payload: Vec::new(),
            revert_address: String::new(),
            call_on_revert: header.has(FLAG_CALL_ON_REVERT),
            abort_address: None,
            revert_message: Vec::new(),
        };

        if header.has(FLAG_RECEIVER) {
            memo.receiver = rd.read_address()?;
        }
        if header.has(FLAG_PAYLOAD) {
            memo.payload = rd.read_bytes()?;
        }
        if header.has(FLAG_REVERT_ADDRESS) {
            memo.revert_address =
                String::from_utf8(rd.read_bytes()?).map_err(|_| StdMemoError::RevertAddressUtf8)?;
        }
        if header.has(FLAG_ABORT_ADDRESS) {
            memo.abort_address = Some(rd.read_address()?);
        }
        if header.has(FLAG_REVERT_MESSAGE) {
            memo.revert_message = rd.read_bytes()?;
        }
        rd.finish()?;

        memo.validate()?;
        Ok(memo)
    }

    fn validate(&self) -> Result<(), StdMemoError> {
        let h = &self.header;
        if !h.has(FLAG_RECEIVER) {
            return Err(StdMemoError::MissingReceiverFlag);
        }
        if self.receiver == [0; ADDRESS_LEN] {
            return Err(StdMemoError::EmptyReceiver);
        }
        if h.op == OpCode::Deposit && !self.payload.is_empty() {
            return Err(StdMemoError::PayloadNotAllowed);
        }
        if (self.call_on_revert || h.has(FLAG_REVERT_ADDRESS))
            && self.revert_address.trim().is_empty()
        {
            return Err(StdMemoError::EmptyRevertAddress);
        }
        if self.abort_address == Some([0; ADDRESS_LEN]) {
            return Err(StdMemoError::EmptyAbortAddress);
        }
        if h.data_flags & FLAGS_RESERVED != 0 {
            return Err(StdMemoError::ReservedFlags);
        }
        Ok(())
    }

    pub fn abort_address_hex(&self) -> String {
        self.abort_address.map(|a| hex_address(&a)).unwrap_or_default()
    }
}

/// `0x`-prefixed lowercase hex of a 20-byte address.
pub fn hex_address(addr: &[u8; ADDRESS_LEN]) -> String {
    format!("0x{}", hex::encode(addr))
}

struct CompactReader<'a> {
    data: &'a [u8],
    pos: usize,
    long: bool,
}

impl CompactReader<'_> {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> &[u8] {
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        out
    }

    fn read_address(&mut self) -> Result<[u8; ADDRESS_LEN], StdMemoError> {
        if self.remaining() < ADDRESS_LEN {
            return Err(StdMemoError::ExpectedAddress(self.remaining()));
        }
        let mut addr = [0; ADDRESS_LEN];
        addr.copy_from_slice(self.take(ADDRESS_LEN));
        Ok(addr)
    }

    fn read_len(&mut self) -> Result<usize, StdMemoError> {
        let width = if self.long { 2 } else { 1 };
        if self.remaining() < width {
            return Err(StdMemoError::ExpectedLength(width));
        }
        let b = self.take(width);
        Ok(if self.long {
            u16::from_le_bytes([b[0], b[1]]) as usize
        } else {
            b[0] as usize
        })
    }

    fn read_bytes(&mut self) -> Result<Vec<u8>, StdMemoError> {
        let len = self.read_len()?;
        if self.remaining() < len {
            return Err(StdMemoError::ExpectedBytes(len, self.remaining()));
        }
        Ok(self.take(len).to_vec())
    }

    fn finish(&self) -> Result<(), StdMemoError> {
        if self.pos != self.data.len() {
            return Err(StdMemoError::TrailingBytes(self.pos, self.data.len()));
        }
        Ok(())
    }
}
