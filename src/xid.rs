use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, XaError};

/// X/Open transaction branch identifier.
///
/// Two `Xid`s are equal when format id, global transaction id and branch
/// qualifier all match. The coordinator uses it as the second registry index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Xid {
    format_id: i32,
    global_transaction_id: Vec<u8>,
    branch_qualifier: Vec<u8>,
}

impl Xid {
    /// Maximum length for the global transaction id.
    pub const MAXGTRIDSIZE: usize = 64;
    /// Maximum length for the branch qualifier.
    pub const MAXBQUALSIZE: usize = 64;

    /// Creates a new identifier.
    ///
    /// # Errors
    ///
    /// Returns `XAER_INVAL` if either part exceeds its maximum size.
    pub fn new(format_id: i32, global_transaction_id: &[u8], branch_qualifier: &[u8]) -> Result<Self> {
        if global_transaction_id.len() > Self::MAXGTRIDSIZE {
            return Err(XaError::invalid(format!(
                "global transaction id exceeds {} bytes",
                Self::MAXGTRIDSIZE
            )));
        }
        if branch_qualifier.len() > Self::MAXBQUALSIZE {
            return Err(XaError::invalid(format!(
                "branch qualifier exceeds {} bytes",
                Self::MAXBQUALSIZE
            )));
        }
        Ok(Self {
            format_id,
            global_transaction_id: global_transaction_id.to_vec(),
            branch_qualifier: branch_qualifier.to_vec(),
        })
    }

    pub fn format_id(&self) -> i32 {
        self.format_id
    }

    pub fn global_transaction_id(&self) -> &[u8] {
        &self.global_transaction_id
    }

    pub fn branch_qualifier(&self) -> &[u8] {
        &self.branch_qualifier
    }

    /// Encodes as little-endian `format_id`, gtrid length, gtrid, bqual length, bqual.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(
            12 + self.global_transaction_id.len() + self.branch_qualifier.len(),
        );
        bytes.extend_from_slice(&self.format_id.to_le_bytes());
        bytes.extend_from_slice(&(self.global_transaction_id.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&self.global_transaction_id);
        bytes.extend_from_slice(&(self.branch_qualifier.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&self.branch_qualifier);
        bytes
    }

    /// Decodes the layout written by [`Xid::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader { bytes, offset: 0 };
        let format_id = i32::from_le_bytes(reader.take_word()?);
        let gtrid_len = u32::from_le_bytes(reader.take_word()?) as usize;
        let gtrid = reader.take(gtrid_len)?;
        let bqual_len = u32::from_le_bytes(reader.take_word()?) as usize;
        let bqual = reader.take(bqual_len)?;
        if reader.offset != bytes.len() {
            return Err(XaError::invalid("trailing bytes after xid"));
        }
        Self::new(format_id, gtrid, bqual)
    }
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| XaError::invalid("xid data too short"))?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn take_word(&mut self) -> Result<[u8; 4]> {
        let slice = self.take(4)?;
        let mut word = [0u8; 4];
        word.copy_from_slice(slice);
        Ok(word)
    }
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for byte in bytes {
        write!(f, "{:02x}", byte)?;
    }
    Ok(())
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-", self.format_id)?;
        write_hex(f, &self.global_transaction_id)?;
        f.write_str("-")?;
        write_hex(f, &self.branch_qualifier)
    }
}
