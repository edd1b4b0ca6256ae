//! Stock ledger lines mutated by document side effects

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Normal,
    Low,
    Out,
    Excess,
}

impl Classification {
    /// Stock health label, checked as out, then low, then excess.
    /// `out` wins over `low` when the safety stock is zero, and `low` wins over `excess`
    /// when the maximum sits below the safety stock.
    pub fn of(current: u64, safety: u64, max: u64) -> Self {
        if current == 0 {
            Classification::Out
        } else if current < safety {
            Classification::Low
        } else if current > max {
            Classification::Excess
        } else {
            Classification::Normal
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Classification::Normal => "normal",
            Classification::Low => "low",
            Classification::Out => "out",
            Classification::Excess => "excess",
        };
        f.write_str(label)
    }
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct LinkedResource {
    #[n(0)]
    pub resource_code: String,
    #[n(1)]
    pub name: String,
    #[n(2)]
    current_stock: u64,
    #[n(3)]
    pub safety_stock: u64,
    #[n(4)]
    pub max_stock: u64,
}

impl LinkedResource {
    pub fn new(
        resource_code: impl Into<String>,
        name: impl Into<String>,
        current_stock: u64,
        safety_stock: u64,
        max_stock: u64,
    ) -> Self {
        Self {
            resource_code: resource_code.into(),
            name: name.into(),
            current_stock,
            safety_stock,
            max_stock,
        }
    }
    pub fn current_stock(&self) -> u64 {
        self.current_stock
    }
    // derived from the stock it describes, never stored
    pub fn classification(&self) -> Classification {
        Classification::of(self.current_stock, self.safety_stock, self.max_stock)
    }
    // only the dispatcher moves stock
    pub(crate) fn set_stock(&mut self, stock: u64) {
        self.current_stock = stock;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_boundaries() {
        assert_eq!(Classification::of(0, 5, 20), Classification::Out);
        assert_eq!(Classification::of(4, 5, 20), Classification::Low);
        assert_eq!(Classification::of(5, 5, 20), Classification::Normal);
        assert_eq!(Classification::of(20, 5, 20), Classification::Normal);
        assert_eq!(Classification::of(21, 5, 20), Classification::Excess);
    }

    #[test]
    fn zero_safety_stock_is_out_not_low() {
        assert_eq!(Classification::of(0, 0, 10), Classification::Out);
        assert_eq!(Classification::of(1, 0, 10), Classification::Normal);
    }

    #[test]
    fn overlapping_thresholds_follow_check_order() {
        assert_eq!(Classification::of(3, 5, 2), Classification::Low);
        assert_eq!(Classification::of(4, 0, 0), Classification::Excess);
        assert_eq!(Classification::of(0, 5, 0), Classification::Out);
    }
}
