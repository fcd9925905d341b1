use std::fmt::{Display, Formatter};

use crate::value::Value;

pub type Row = Vec<Value>;

/// One item of an operator's output stream.
///
/// `Marker` closes a group emitted by a grouping operator. It carries no
/// values and is recognised by its variant alone, so an empty `Row` can never
/// be mistaken for it.
#[derive(Debug, Clone, PartialEq)]
pub enum Tuple {
    Row(Row),
    Marker,
}

impl Tuple {
    pub fn is_marker(&self) -> bool {
        matches!(self, Tuple::Marker)
    }

    pub fn row(&self) -> Option<&Row> {
        match self {
            Tuple::Row(row) => Some(row),
            Tuple::Marker => None,
        }
    }

    pub fn into_row(self) -> Option<Row> {
        match self {
            Tuple::Row(row) => Some(row),
            Tuple::Marker => None,
        }
    }
}

impl From<Row> for Tuple {
    fn from(row: Row) -> Self {
        Tuple::Row(row)
    }
}

/// Physical location of a row: heap page number and slot within the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    pub page_num: u32,
    pub slot: u16,
}

impl RecordId {
    /// Encoded width of a record id inside index entries.
    pub const SIZE: usize = 6;

    pub fn new(page_num: u32, slot: u16) -> Self {
        Self { page_num, slot }
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.page_num, self.slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_is_distinct_from_empty_row() {
        let empty = Tuple::Row(Vec::new());
        assert!(!empty.is_marker());
        assert_ne!(empty, Tuple::Marker);
        assert!(Tuple::Marker.row().is_none());
        assert_eq!(empty.into_row(), Some(Vec::new()));
    }

    #[test]
    fn record_ids_order_by_page_then_slot() {
        assert!(RecordId::new(1, 9) < RecordId::new(2, 0));
        assert!(RecordId::new(2, 1) < RecordId::new(2, 3));
        assert_eq!(RecordId::new(3, 4).to_string(), "(3, 4)");
    }
}
