//! Account balance ledger.
//!
//! ## Model
//!
//! Each (account, instrument) pair has a [`Balance`] split into `available`
//! (spendable) and `reserved` (held against open orders). Both halves are never
//! negative. Value enters only through deposits and leaves only through
//! withdrawals; everything else moves it between halves or between accounts, so
//! for every instrument
//!
//! ```text
//! Σ accounts (available + reserved) == deposited − withdrawn
//! ```
//!
//! ## Atomicity
//!
//! Mutations are expressed as [`Posting`]s and applied in batches by
//! [`Ledger::apply`]. A batch locks every account it touches (ascending
//! [`AccountId`] order, so two batches can never deadlock), runs all postings
//! against scratch copies, and writes back only if every posting succeeded.
//! Readers never see half a batch.
//!
//! A ledger-wide gate is held shared by every batch and exclusively by
//! [`Ledger::snapshot`], which gives audits a consistent cut across all accounts
//! without serialising batches against each other.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{AccountId, InstrumentId, InstrumentRegistry, Quantity};

// ============================================================================
// Balance
// ============================================================================

/// Holdings of one account in one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balance {
    pub available: Quantity,
    pub reserved: Quantity,
}

impl Balance {
    /// `available + reserved`, `None` on overflow.
    pub fn total(&self) -> Option<Quantity> {
        self.available.checked_add(self.reserved)
    }
}

/// One row of a BALANCES query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRow {
    pub instrument: String,
    pub available: Quantity,
    pub reserved: Quantity,
}

/// Balances of one account, keyed by instrument.
pub type Holdings = BTreeMap<InstrumentId, Balance>;

// ============================================================================
// Postings
// ============================================================================

/// A single ledger movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Posting {
    /// External value in: credits available. Amount must be > 0.
    Deposit {
        account: AccountId,
        instrument: InstrumentId,
        amount: Quantity,
    },
    /// External value out: debits available. Amount must be > 0.
    Withdraw {
        account: AccountId,
        instrument: InstrumentId,
        amount: Quantity,
    },
    /// available → reserved
    Reserve {
        account: AccountId,
        instrument: InstrumentId,
        amount: Quantity,
    },
    /// reserved → available
    Release {
        account: AccountId,
        instrument: InstrumentId,
        amount: Quantity,
    },
    /// `from.reserved` → `to.available`; one leg of a trade.
    Transfer {
        from: AccountId,
        to: AccountId,
        instrument: InstrumentId,
        amount: Quantity,
    },
}

impl Posting {
    fn accounts(&self) -> [Option<AccountId>; 2] {
        match *self {
            Posting::Deposit { account, .. }
            | Posting::Withdraw { account, .. }
            | Posting::Reserve { account, .. }
            | Posting::Release { account, .. } => [Some(account), None],
            Posting::Transfer { from, to, .. } => [Some(from), Some(to)],
        }
    }

    fn credits(&self, account: AccountId) -> bool {
        match *self {
            Posting::Deposit { account: to, .. } | Posting::Transfer { to, .. } => to == account,
            _ => false,
        }
    }

    fn instrument(&self) -> InstrumentId {
        match *self {
            Posting::Deposit { instrument, .. }
            | Posting::Withdraw { instrument, .. }
            | Posting::Reserve { instrument, .. }
            | Posting::Release { instrument, .. }
            | Posting::Transfer { instrument, .. } => instrument,
        }
    }
}

// ============================================================================
// Ledger
// ============================================================================

/// Consistent copy of the whole ledger.
#[derive(Debug, Clone)]
pub struct LedgerSnapshot {
    /// Accounts in ascending id order
    pub accounts: Vec<(AccountId, Holdings)>,
    /// Deposited minus withdrawn, indexed by instrument id
    pub supply: Vec<Quantity>,
}

/// Balance ledger shared by every market of an engine.
#[derive(Debug)]
pub struct Ledger {
    /// Shared by batches, exclusive for snapshots
    gate: RwLock<()>,
    accounts: RwLock<HashMap<AccountId, Arc<Mutex<Holdings>>>>,
    supply: Mutex<Vec<Quantity>>,
    symbols: Vec<String>,
}

impl Ledger {
    /// Create an empty ledger for the registry's instruments.
    pub fn new(registry: &InstrumentRegistry) -> Self {
        Self {
            gate: RwLock::new(()),
            accounts: RwLock::new(HashMap::new()),
            supply: Mutex::new(vec![Quantity::ZERO; registry.len()]),
            symbols: registry.iter().map(|i| i.symbol.clone()).collect(),
        }
    }

    // ========================================================================
    // Primitives
    // ========================================================================

    pub fn deposit(&self, account: AccountId, instrument: InstrumentId, amount: Quantity) -> Result<()> {
        self.apply(&[Posting::Deposit {
            account,
            instrument,
            amount,
        }])?;
        debug!(%account, instrument = self.symbol(instrument), %amount, "deposit");
        Ok(())
    }

    pub fn withdraw(&self, account: AccountId, instrument: InstrumentId, amount: Quantity) -> Result<()> {
        self.apply(&[Posting::Withdraw {
            account,
            instrument,
            amount,
        }])?;
        debug!(%account, instrument = self.symbol(instrument), %amount, "withdraw");
        Ok(())
    }

    /// Move `amount` from available to reserved.
    ///
    /// Fails with `InsufficientFunds` when `available < amount`.
    pub fn reserve(&self, account: AccountId, instrument: InstrumentId, amount: Quantity) -> Result<()> {
        self.apply(&[Posting::Reserve {
            account,
            instrument,
            amount,
        }])
    }

    /// Move `amount` from reserved back to available.
    ///
    /// Releasing more than is reserved is an `InvariantViolation`.
    pub fn release(&self, account: AccountId, instrument: InstrumentId, amount: Quantity) -> Result<()> {
        self.apply(&[Posting::Release {
            account,
            instrument,
            amount,
        }])
    }

    /// Fail fast with `InsufficientFunds` when `account` cannot cover `amount`
    /// of `instrument`. Advisory: [`Ledger::apply`] checks again under the
    /// account lock.
    pub fn pre_check(&self, account: AccountId, instrument: InstrumentId, amount: Quantity) -> Result<()> {
        let available = self.balance(account, instrument).available;
        if available < amount {
            return Err(self.insufficient(account, instrument, amount, available));
        }
        Ok(())
    }

    /// Settle both legs of a trade atomically: the buyer pays `quote_qty` of
    /// `quote` out of reserved to the seller's available, the seller pays
    /// `base_qty` of `base` out of reserved to the buyer's available.
    pub fn settle(
        &self,
        buyer: AccountId,
        seller: AccountId,
        base: InstrumentId,
        quote: InstrumentId,
        base_qty: Quantity,
        quote_qty: Quantity,
    ) -> Result<()> {
        self.apply(&[
            Posting::Transfer {
                from: buyer,
                to: seller,
                instrument: quote,
                amount: quote_qty,
            },
            Posting::Transfer {
                from: seller,
                to: buyer,
                instrument: base,
                amount: base_qty,
            },
        ])
    }

    /// Apply a batch of postings atomically.
    ///
    /// Either every posting takes effect or none does.
    pub fn apply(&self, postings: &[Posting]) -> Result<()> {
        for posting in postings {
            if posting.instrument().0 as usize >= self.symbols.len() {
                return Err(Error::UnknownInstrument(format!("{:?}", posting.instrument())));
            }
        }

        let _gate = self.gate.read();

        let mut ids: Vec<AccountId> = postings
            .iter()
            .flat_map(|p| p.accounts())
            .flatten()
            .collect();
        ids.sort_unstable();
        ids.dedup();

        // only a credit opens an account; anything else on an unknown account
        // fails and works on a detached empty entry
        let handles: Vec<Arc<Mutex<Holdings>>> = ids
            .iter()
            .map(|&id| {
                if postings.iter().any(|p| p.credits(id)) {
                    self.handle(id)
                } else {
                    self.existing(id).unwrap_or_default()
                }
            })
            .collect();
        let mut guards: Vec<MutexGuard<'_, Holdings>> = handles.iter().map(|h| h.lock()).collect();
        let mut scratch: Vec<Holdings> = guards.iter().map(|g| (**g).clone()).collect();
        let mut supply_delta: Vec<(InstrumentId, Quantity, bool)> = Vec::new();

        for posting in postings {
            self.post(&ids, &mut scratch, posting, &mut supply_delta)?;
        }

        if !supply_delta.is_empty() {
            let mut supply = self.supply.lock();
            let mut next = supply.clone();
            for (instrument, amount, inflow) in supply_delta {
                let slot = &mut next[instrument.0 as usize];
                let updated = if inflow {
                    slot.checked_add(amount)
                } else {
                    slot.checked_sub(amount)
                };
                *slot = updated.ok_or_else(|| {
                    Error::InvalidAmount(format!("{} supply overflow", self.symbol(instrument)))
                })?;
            }
            *supply = next;
        }

        for (guard, holdings) in guards.iter_mut().zip(scratch) {
            **guard = holdings;
        }
        Ok(())
    }

    fn post(
        &self,
        ids: &[AccountId],
        scratch: &mut [Holdings],
        posting: &Posting,
        supply_delta: &mut Vec<(InstrumentId, Quantity, bool)>,
    ) -> Result<()> {
        match *posting {
            Posting::Deposit {
                account,
                instrument,
                amount,
            } => {
                if !amount.is_positive() {
                    return Err(Error::InvalidAmount(format!("deposit of {amount} must be positive")));
                }
                let balance = slot(ids, scratch, account, instrument)?;
                balance.available = self.add(balance.available, amount, instrument)?;
                supply_delta.push((instrument, amount, true));
            }
            Posting::Withdraw {
                account,
                instrument,
                amount,
            } => {
                if !amount.is_positive() {
                    return Err(Error::InvalidAmount(format!("withdrawal of {amount} must be positive")));
                }
                let balance = slot(ids, scratch, account, instrument)?;
                if balance.available < amount {
                    return Err(self.insufficient(account, instrument, amount, balance.available));
                }
                balance.available = self.sub(balance.available, amount, instrument)?;
                supply_delta.push((instrument, amount, false));
            }
            Posting::Reserve {
                account,
                instrument,
                amount,
            } => {
                if self.skip(amount)? {
                    return Ok(());
                }
                let balance = slot(ids, scratch, account, instrument)?;
                if balance.available < amount {
                    return Err(self.insufficient(account, instrument, amount, balance.available));
                }
                balance.available = self.sub(balance.available, amount, instrument)?;
                balance.reserved = self.add(balance.reserved, amount, instrument)?;
            }
            Posting::Release {
                account,
                instrument,
                amount,
            } => {
                if self.skip(amount)? {
                    return Ok(());
                }
                let balance = slot(ids, scratch, account, instrument)?;
                if balance.reserved < amount {
                    return Err(Error::invariant(format!(
                        "{account} releasing {amount} {} with only {} reserved",
                        self.symbol(instrument),
                        balance.reserved
                    )));
                }
                balance.reserved = self.sub(balance.reserved, amount, instrument)?;
                balance.available = self.add(balance.available, amount, instrument)?;
            }
            Posting::Transfer {
                from,
                to,
                instrument,
                amount,
            } => {
                if self.skip(amount)? {
                    return Ok(());
                }
                let payer = slot(ids, scratch, from, instrument)?;
                if payer.reserved < amount {
                    return Err(Error::invariant(format!(
                        "{from} paying {amount} {} with only {} reserved",
                        self.symbol(instrument),
                        payer.reserved
                    )));
                }
                payer.reserved = self.sub(payer.reserved, amount, instrument)?;

                let payee = slot(ids, scratch, to, instrument)?;
                payee.available = self.add(payee.available, amount, instrument)?;
            }
        }
        Ok(())
    }

    /// Zero amounts are no-ops, negative amounts are bugs.
    fn skip(&self, amount: Quantity) -> Result<bool> {
        if amount.is_negative() {
            return Err(Error::invariant(format!("negative ledger movement {amount}")));
        }
        Ok(amount.is_zero())
    }

    /// Callers check the sign beforehand, so a `None` here means the exact
    /// result needs more digits than a `Decimal` holds. That is a request the
    /// ledger cannot represent, not a broken ledger.
    fn add(&self, a: Quantity, b: Quantity, instrument: InstrumentId) -> Result<Quantity> {
        a.checked_add(b).ok_or_else(|| self.unrepresentable(a, '+', b, instrument))
    }

    fn sub(&self, a: Quantity, b: Quantity, instrument: InstrumentId) -> Result<Quantity> {
        a.checked_sub(b).ok_or_else(|| self.unrepresentable(a, '-', b, instrument))
    }

    fn unrepresentable(&self, a: Quantity, op: char, b: Quantity, instrument: InstrumentId) -> Error {
        Error::InvalidAmount(format!(
            "{a} {op} {b} {} is not exactly representable",
            self.symbol(instrument)
        ))
    }

    fn insufficient(
        &self,
        account: AccountId,
        instrument: InstrumentId,
        required: Quantity,
        available: Quantity,
    ) -> Error {
        Error::InsufficientFunds {
            account,
            instrument: self.symbol(instrument).to_string(),
            required: required.to_string(),
            available: available.to_string(),
        }
    }

    /// Get or lazily create the account entry.
    fn handle(&self, account: AccountId) -> Arc<Mutex<Holdings>> {
        if let Some(handle) = self.existing(account) {
            return handle;
        }
        Arc::clone(self.accounts.write().entry(account).or_default())
    }

    fn existing(&self, account: AccountId) -> Option<Arc<Mutex<Holdings>>> {
        self.accounts.read().get(&account).cloned()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn symbol(&self, instrument: InstrumentId) -> &str {
        self.symbols
            .get(instrument.0 as usize)
            .map(String::as_str)
            .unwrap_or("?")
    }

    /// Instrument symbols, indexed by instrument id.
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Balance of one account in one instrument (zero if never touched).
    pub fn balance(&self, account: AccountId, instrument: InstrumentId) -> Balance {
        self.existing(account)
            .and_then(|h| {
                let holdings = h.lock();
                holdings.get(&instrument).copied()
            })
            .unwrap_or_default()
    }

    /// One row per registered instrument, in registration order.
    pub fn balances(&self, account: AccountId) -> Vec<BalanceRow> {
        let holdings = match self.existing(account) {
            Some(h) => {
                let guard = h.lock();
                Holdings::clone(&guard)
            }
            None => Holdings::new(),
        };

        self.symbols
            .iter()
            .enumerate()
            .map(|(idx, symbol)| {
                let balance = holdings
                    .get(&InstrumentId(idx as u32))
                    .copied()
                    .unwrap_or_default();
                BalanceRow {
                    instrument: symbol.clone(),
                    available: balance.available,
                    reserved: balance.reserved,
                }
            })
            .collect()
    }

    /// Number of accounts that have ever been touched.
    pub fn account_count(&self) -> usize {
        self.accounts.read().len()
    }

    /// Deposited minus withdrawn, per instrument id.
    pub fn supply(&self) -> Vec<Quantity> {
        let _gate = self.gate.write();
        self.supply.lock().clone()
    }

    /// Consistent copy of every account and the supply counters.
    ///
    /// Blocks new batches for the duration of the copy.
    pub fn snapshot(&self) -> LedgerSnapshot {
        let _gate = self.gate.write();
        let handles: Vec<(AccountId, Arc<Mutex<Holdings>>)> = self
            .accounts
            .read()
            .iter()
            .map(|(id, h)| (*id, Arc::clone(h)))
            .collect();

        let mut accounts: Vec<(AccountId, Holdings)> = handles
            .into_iter()
            .map(|(id, h)| {
                let guard = h.lock();
                (id, Holdings::clone(&guard))
            })
            .collect();
        accounts.sort_unstable_by_key(|(id, _)| *id);

        LedgerSnapshot {
            accounts,
            supply: self.supply.lock().clone(),
        }
    }
}

/// Scratch balance for `account` in `instrument`; `ids` is sorted.
fn slot<'a>(
    ids: &[AccountId],
    scratch: &'a mut [Holdings],
    account: AccountId,
    instrument: InstrumentId,
) -> Result<&'a mut Balance> {
    let idx = ids
        .binary_search(&account)
        .map_err(|_| Error::invariant(format!("{account} not locked for posting")))?;
    Ok(scratch[idx].entry(instrument).or_default())
}

// ============================================================================
// Unit Tests
// ============================================================================
