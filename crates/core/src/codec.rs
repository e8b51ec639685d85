//! Fixed-width binary layout of a node record (format version 1).
//!
//! ```text
//! offset  width  field
//!      0      2  format version (u16)
//!      2      1  flags: bit0 left present, bit1 right present, bit2 id assigned
//!      3      1  reserved (0)
//!      4      4  dimension D (u32)
//!      8      8  id (u64)
//!     16      8  left id (u64, 0 when absent)
//!     24      8  right id (u64, 0 when absent)
//!     32      8  radius (f64)
//!     40      8  l1 norm (f64)
//!     48      8  complexity (f64)
//!     56      8  distance to parent (f64)
//!     64    8*D  key (f64 x D)
//! 64+8*D    8*D  normalized key (f64 x D)
//! ```
//!
//! All fields are little-endian. Floats are written by bit pattern, so every
//! value (NaN payloads and signed zeros included) survives a round trip.
//! Bucket keys are the node id as 8 big-endian bytes, which keeps ids sorted.

use crate::config::{record_len, RECORD_FORMAT_VERSION, RECORD_HEADER_LEN};
use crate::error::{Error, Result};
use crate::node::{Node, NodeId};

const FLAG_LEFT: u8 = 0b001;
const FLAG_RIGHT: u8 = 0b010;
const FLAG_ID: u8 = 0b100;
const KNOWN_FLAGS: u8 = FLAG_LEFT | FLAG_RIGHT | FLAG_ID;

/// Bucket key for a node id.
pub fn id_key(id: NodeId) -> [u8; 8] {
    id.to_be_bytes()
}

/// Inverse of [`id_key`].
pub fn key_id(key: &[u8]) -> Result<NodeId> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| Error::Corrupt(format!("node key must be 8 bytes, got {}", key.len())))?;
    Ok(NodeId::from_be_bytes(bytes))
}

/// Encode a node into its fixed-width record.
pub fn encode(node: &Node) -> Vec<u8> {
    let dimension = node.key.len();
    debug_assert_eq!(node.normalized_key.len(), dimension);

    let mut flags = 0u8;
    if node.left.is_some() {
        flags |= FLAG_LEFT;
    }
    if node.right.is_some() {
        flags |= FLAG_RIGHT;
    }
    if node.id.is_some() {
        flags |= FLAG_ID;
    }

    let mut buf = Vec::with_capacity(record_len(dimension));
    buf.extend_from_slice(&RECORD_FORMAT_VERSION.to_le_bytes());
    buf.push(flags);
    buf.push(0);
    buf.extend_from_slice(&(dimension as u32).to_le_bytes());
    buf.extend_from_slice(&node.id.unwrap_or(0).to_le_bytes());
    buf.extend_from_slice(&node.left.unwrap_or(0).to_le_bytes());
    buf.extend_from_slice(&node.right.unwrap_or(0).to_le_bytes());
    for v in [
        node.radius,
        node.l1_norm,
        node.complexity,
        node.distance_to_parent,
    ] {
        buf.extend_from_slice(&v.to_bits().to_le_bytes());
    }
    for &v in node.key.iter().chain(node.normalized_key.iter()) {
        buf.extend_from_slice(&v.to_bits().to_le_bytes());
    }
    buf
}

/// Decode a record written by [`encode`] for an index of the given dimension.
///
/// Fails with [`Error::Corrupt`] on a length, version, dimension, or flag mismatch.
pub fn decode(bytes: &[u8], dimension: usize) -> Result<Node> {
    let expected = record_len(dimension);
    if bytes.len() != expected {
        return Err(Error::Corrupt(format!(
            "record length {} != expected {} for dimension {}",
            bytes.len(),
            expected,
            dimension
        )));
    }

    let version = u16::from_le_bytes([bytes[0], bytes[1]]);
    if version != RECORD_FORMAT_VERSION {
        return Err(Error::Corrupt(format!(
            "unsupported record version {}",
            version
        )));
    }
    let flags = bytes[2];
    if flags & !KNOWN_FLAGS != 0 || bytes[3] != 0 {
        return Err(Error::Corrupt(format!(
            "unknown flag bits {:#04x}/{:#04x}",
            flags, bytes[3]
        )));
    }
    let stored_dimension = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    if stored_dimension != dimension {
        return Err(Error::Corrupt(format!(
            "record dimension {} != index dimension {}",
            stored_dimension, dimension
        )));
    }

    let word = |offset: usize| {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[offset..offset + 8]);
        u64::from_le_bytes(raw)
    };
    let float = |offset: usize| f64::from_bits(word(offset));
    let present = |flag: u8, value: u64| (flags & flag != 0).then_some(value);

    let floats = |start: usize| -> Vec<f64> {
        (0..dimension).map(|i| float(start + i * 8)).collect()
    };

    Ok(Node {
        id: present(FLAG_ID, word(8)),
        left: present(FLAG_LEFT, word(16)),
        right: present(FLAG_RIGHT, word(24)),
        radius: float(32),
        l1_norm: float(40),
        complexity: float(48),
        distance_to_parent: float(56),
        key: floats(RECORD_HEADER_LEN),
        normalized_key: floats(RECORD_HEADER_LEN + 8 * dimension),
    })
}
