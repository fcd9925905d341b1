use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

/// Comparison applied between a column value and a constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredicateOperator {
    Equals,
    NotEquals,
    LessThan,
    LessThanEquals,
    GreaterThan,
    GreaterThanEquals,
}

impl PredicateOperator {
    pub const ALL: [PredicateOperator; 6] = [
        PredicateOperator::Equals,
        PredicateOperator::NotEquals,
        PredicateOperator::LessThan,
        PredicateOperator::LessThanEquals,
        PredicateOperator::GreaterThan,
        PredicateOperator::GreaterThanEquals,
    ];

    /// Whether `lhs <op> rhs` holds given `lhs.cmp(rhs)`.
    pub fn accepts(self, ordering: Ordering) -> bool {
        match self {
            PredicateOperator::Equals => ordering == Ordering::Equal,
            PredicateOperator::NotEquals => ordering != Ordering::Equal,
            PredicateOperator::LessThan => ordering == Ordering::Less,
            PredicateOperator::LessThanEquals => ordering != Ordering::Greater,
            PredicateOperator::GreaterThan => ordering == Ordering::Greater,
            PredicateOperator::GreaterThanEquals => ordering != Ordering::Less,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PredicateOperator::Equals => "EQUALS",
            PredicateOperator::NotEquals => "NOT_EQUALS",
            PredicateOperator::LessThan => "LESS_THAN",
            PredicateOperator::LessThanEquals => "LESS_THAN_EQUALS",
            PredicateOperator::GreaterThan => "GREATER_THAN",
            PredicateOperator::GreaterThanEquals => "GREATER_THAN_EQUALS",
        }
    }
}

impl Display for PredicateOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
