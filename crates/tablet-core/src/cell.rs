//! The logical cell model (§3): `(row, column_family_id, qualifier, timestamp, revision, flag,
//! value)`, and the counter-cell encoding folded by the merge scanner.

use bijective_enum_map::injective_enum_map;


/// Ordered by decreasing specificity; a more-general delete masks any insert it dominates.
/// The discriminant values double as the flag's position in the serialized key sort order
/// (§3): `DeleteRow` is smallest so it sorts before any other cell of the same row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Flag {
    DeleteRow,
    DeleteColumnFamily,
    DeleteCell,
    DeleteCellVersion,
    Insert,
}

injective_enum_map! {
    Flag, u8,
    DeleteRow          <=> 0,
    DeleteColumnFamily <=> 1,
    DeleteCell         <=> 2,
    DeleteCellVersion  <=> 3,
    Insert             <=> 4,
}

impl Flag {
    #[must_use]
    pub fn is_delete(self) -> bool {
        self != Self::Insert
    }
}

/// The one-byte operator of a counter cell's value (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterOp {
    /// Add the encoded amount to the running accumulation.
    Add,
    /// Reset the running accumulation to the encoded amount, discarding older writes.
    Reset,
}

impl CounterOp {
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Add   => b'+',
            Self::Reset => b'=',
        }
    }

    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'+' => Some(Self::Add),
            b'=' => Some(Self::Reset),
            _    => None,
        }
    }
}

/// A 9-byte counter-cell value: an 8-byte big-endian `i64` amount plus a trailing operator byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterValue {
    pub amount: i64,
    pub op:     CounterOp,
}

impl CounterValue {
    #[must_use]
    pub fn encode(self) -> [u8; 9] {
        let mut bytes = [0_u8; 9];
        bytes[..8].copy_from_slice(&self.amount.to_be_bytes());
        bytes[8] = self.op.to_byte();
        bytes
    }

    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 9 {
            return None;
        }
        #[expect(clippy::unwrap_used, reason = "length checked above")]
        let amount = i64::from_be_bytes(bytes[..8].try_into().unwrap());
        let op = CounterOp::from_byte(bytes[8])?;
        Some(Self { amount, op })
    }

    /// Renders a folded counter accumulation as the ASCII decimal text the client reads back (§3).
    #[must_use]
    pub fn render_ascii(amount: i64) -> String {
        amount.to_string()
    }
}

/// A logical cell, independent of its serialized on-disk or in-memory representation.
///
/// Owns its byte fields so it can be constructed, moved through the update pipeline, and
/// compared without borrowing from a request buffer; the key model (`crate::key`) provides the
/// zero-copy serialized form used internally by caches and stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub row:               Vec<u8>,
    pub column_family_id:  u8,
    pub qualifier:         Vec<u8>,
    pub timestamp:         i64,
    pub revision:          i64,
    pub flag:              Flag,
    pub value:             Vec<u8>,
}

impl Cell {
    #[must_use]
    pub fn is_counter(&self) -> bool {
        self.value.len() == 9 && CounterValue::decode(&self.value).is_some()
    }

    #[must_use]
    pub fn counter_value(&self) -> Option<CounterValue> {
        CounterValue::decode(&self.value)
    }
}
