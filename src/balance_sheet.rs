//! Read-only reporting over a consistent ledger snapshot.
//!
//! A [`BalanceSheet`] is captured once and never changes, so every total it
//! reports comes from the same instant. It is the tool for checking the
//! conservation law:
//!
//! ```text
//! count_all()[instrument] == supply()[instrument]
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;
use tracing::warn;

use crate::ledger::{Ledger, LedgerSnapshot};
use crate::types::{AccountId, InstrumentId, Quantity};

/// Something an audit found out of balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Discrepancy {
    /// Holdings across accounts differ from deposits minus withdrawals.
    Supply {
        instrument: String,
        held: Quantity,
        supply: Quantity,
    },
    /// An account's reserved balance differs from what its open orders hold.
    Reserved {
        account: AccountId,
        instrument: String,
        reserved: Quantity,
        expected: Quantity,
    },
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discrepancy::Supply {
                instrument,
                held,
                supply,
            } => write!(f, "{instrument}: accounts hold {held}, supply is {supply}"),
            Discrepancy::Reserved {
                account,
                instrument,
                reserved,
                expected,
            } => write!(
                f,
                "{account} {instrument}: reserved {reserved}, open orders hold {expected}"
            ),
        }
    }
}

/// Outcome of [`BalanceSheet::audit`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    pub totals: BTreeMap<String, Quantity>,
    pub discrepancies: Vec<Discrepancy>,
}

impl AuditReport {
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

/// Point-in-time view of every balance.
#[derive(Debug, Clone)]
pub struct BalanceSheet {
    symbols: Vec<String>,
    snapshot: LedgerSnapshot,
}

impl BalanceSheet {
    /// Snapshot the ledger.
    pub fn capture(ledger: &Ledger) -> Self {
        Self {
            symbols: ledger.symbols().to_vec(),
            snapshot: ledger.snapshot(),
        }
    }

    /// Total held (available + reserved) per instrument across all accounts.
    ///
    /// Every registered instrument appears, zero if nobody holds it.
    pub fn count_all(&self) -> BTreeMap<String, Quantity> {
        let mut totals: Vec<Quantity> = vec![Quantity::ZERO; self.symbols.len()];
        for (_, holdings) in &self.snapshot.accounts {
            for (instrument, balance) in holdings {
                if let Some(total) = totals.get_mut(instrument.0 as usize) {
                    *total = [*total, balance.available, balance.reserved].into_iter().sum();
                }
            }
        }
        self.by_symbol(totals)
    }

    /// Total reserved per instrument across all accounts.
    pub fn reserved(&self) -> BTreeMap<String, Quantity> {
        let mut totals: Vec<Quantity> = vec![Quantity::ZERO; self.symbols.len()];
        for (_, holdings) in &self.snapshot.accounts {
            for (instrument, balance) in holdings {
                if let Some(total) = totals.get_mut(instrument.0 as usize) {
                    *total = [*total, balance.reserved].into_iter().sum();
                }
            }
        }
        self.by_symbol(totals)
    }

    /// Deposited minus withdrawn per instrument.
    pub fn supply(&self) -> BTreeMap<String, Quantity> {
        self.by_symbol(self.snapshot.supply.clone())
    }

    /// Number of accounts in the snapshot.
    pub fn account_count(&self) -> usize {
        self.snapshot.accounts.len()
    }

    /// Check conservation, and that reserved balances match `expected_reserved`
    /// (the outstanding reservations of open orders, per account and instrument).
    ///
    /// Only meaningful when the books were frozen while this sheet was captured.
    pub fn audit(
        &self,
        expected_reserved: &HashMap<(AccountId, InstrumentId), Quantity>,
    ) -> AuditReport {
        let totals = self.count_all();
        let supply = self.supply();
        let mut discrepancies = Vec::new();

        for (instrument, held) in &totals {
            let supply = supply.get(instrument).copied().unwrap_or(Quantity::ZERO);
            if *held != supply {
                discrepancies.push(Discrepancy::Supply {
                    instrument: instrument.clone(),
                    held: *held,
                    supply,
                });
            }
        }

        for (account, holdings) in &self.snapshot.accounts {
            for (instrument, balance) in holdings {
                let expected = expected_reserved
                    .get(&(*account, *instrument))
                    .copied()
                    .unwrap_or(Quantity::ZERO);
                if balance.reserved != expected {
                    discrepancies.push(Discrepancy::Reserved {
                        account: *account,
                        instrument: self.symbol(*instrument).to_string(),
                        reserved: balance.reserved,
                        expected,
                    });
                }
            }
        }

        // reservations for accounts the ledger has never seen
        for ((account, instrument), expected) in expected_reserved {
            let known = self
                .snapshot
                .accounts
                .binary_search_by_key(account, |(id, _)| *id)
                .ok()
                .and_then(|idx| self.snapshot.accounts[idx].1.get(instrument));
            if known.is_none() && !expected.is_zero() {
                discrepancies.push(Discrepancy::Reserved {
                    account: *account,
                    instrument: self.symbol(*instrument).to_string(),
                    reserved: Quantity::ZERO,
                    expected: *expected,
                });
            }
        }

        for discrepancy in &discrepancies {
            warn!(%discrepancy, "audit discrepancy");
        }
        AuditReport {
            totals,
            discrepancies,
        }
    }

    fn symbol(&self, instrument: InstrumentId) -> &str {
        self.symbols
            .get(instrument.0 as usize)
            .map(String::as_str)
            .unwrap_or("?")
    }

    fn by_symbol(&self, values: Vec<Quantity>) -> BTreeMap<String, Quantity> {
        self.symbols.iter().cloned().zip(values).collect()
    }
}
