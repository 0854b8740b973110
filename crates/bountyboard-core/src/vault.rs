use crate::error::VaultError;
use crate::types::{Principal, TaskId, TokenId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::debug;

/// Where a forfeited stake ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Forfeiture {
    /// Credited to the configured penalty sink.
    Sink(Principal),
    /// Kept in vault-owned custody, claimable by nobody.
    Frozen,
}

/// Custodian of escrowed value. The only component allowed to move funds.
///
/// Every call is all-or-nothing: on `Err` no balance has changed. The engine holds
/// the per-task lock for the whole call, so implementations backed by a remote
/// ledger may block as long as they need.
#[async_trait]
pub trait FundTransfer: Send + Sync {
    /// Move `amount` from `from`'s pre-authorised balance into custody for `task_id`.
    async fn lock(
        &self,
        task_id: TaskId,
        from: &Principal,
        token: &TokenId,
        amount: u64,
    ) -> Result<(), VaultError>;

    /// Move `amount` out of `task_id`'s custody to `to`.
    async fn release(
        &self,
        task_id: TaskId,
        to: &Principal,
        token: &TokenId,
        amount: u64,
    ) -> Result<(), VaultError>;

    /// Route `amount` of `task_id`'s custody to `sink`, or freeze it when no sink is set.
    async fn forfeit(
        &self,
        task_id: TaskId,
        token: &TokenId,
        amount: u64,
        sink: Option<&Principal>,
    ) -> Result<Forfeiture, VaultError>;
}

/// Serializable state of the in-memory vault.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSnapshot {
    pub balances: BTreeMap<TokenId, BTreeMap<Principal, u64>>,
    pub allowances: BTreeMap<TokenId, BTreeMap<Principal, u64>>,
    pub custody: BTreeMap<TokenId, BTreeMap<TaskId, u64>>,
    pub frozen: BTreeMap<TokenId, u64>,
}

impl VaultSnapshot {
    fn balance(&self, who: &Principal, token: &TokenId) -> u64 {
        self.balances
            .get(token)
            .and_then(|accounts| accounts.get(who))
            .copied()
            .unwrap_or(0)
    }

    fn allowance(&self, who: &Principal, token: &TokenId) -> u64 {
        self.allowances
            .get(token)
            .and_then(|accounts| accounts.get(who))
            .copied()
            .unwrap_or(0)
    }

    fn custody(&self, task_id: TaskId, token: &TokenId) -> u64 {
        self.custody
            .get(token)
            .and_then(|tasks| tasks.get(&task_id))
            .copied()
            .unwrap_or(0)
    }

    fn set_balance(&mut self, who: &Principal, token: &TokenId, amount: u64) {
        set_entry(&mut self.balances, token, who.clone(), amount);
    }

    fn set_allowance(&mut self, who: &Principal, token: &TokenId, amount: u64) {
        set_entry(&mut self.allowances, token, who.clone(), amount);
    }

    fn set_custody(&mut self, task_id: TaskId, token: &TokenId, amount: u64) {
        set_entry(&mut self.custody, token, task_id, amount);
    }
}

fn set_entry<K: Ord>(
    map: &mut BTreeMap<TokenId, BTreeMap<K, u64>>,
    token: &TokenId,
    key: K,
    amount: u64,
) {
    if amount == 0 {
        if let Some(inner) = map.get_mut(token) {
            inner.remove(&key);
            if inner.is_empty() {
                map.remove(token);
            }
        }
        return;
    }
    map.entry(token.clone()).or_default().insert(key, amount);
}

fn overflow(what: &str) -> VaultError {
    VaultError::Transfer(format!("{what} would overflow u64"))
}

/// Process-local vault with ERC-20 style allowances.
///
/// `lock` behaves like `transferFrom`: it needs both balance and allowance and
/// consumes the allowance it uses.
#[derive(Debug, Default)]
pub struct InMemoryVault {
    book: Mutex<VaultSnapshot>,
}

impl InMemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: VaultSnapshot) -> Self {
        Self {
            book: Mutex::new(snapshot),
        }
    }

    pub fn snapshot(&self) -> Result<VaultSnapshot, VaultError> {
        Ok(self.book()?.clone())
    }

    /// Credit newly created funds to `who`. This is the only way value enters the system.
    pub fn deposit(
        &self,
        who: &Principal,
        token: &TokenId,
        amount: u64,
    ) -> Result<u64, VaultError> {
        let mut book = self.book()?;
        let next = book
            .balance(who, token)
            .checked_add(amount)
            .ok_or_else(|| overflow("deposit"))?;
        book.set_balance(who, token, next);
        debug!(principal = %who, token = %token, amount, balance = next, "Deposited funds");
        Ok(next)
    }

    /// Pre-authorise the vault to pull up to `amount`. Replaces any previous allowance.
    pub fn approve(
        &self,
        owner: &Principal,
        token: &TokenId,
        amount: u64,
    ) -> Result<(), VaultError> {
        let mut book = self.book()?;
        book.set_allowance(owner, token, amount);
        debug!(principal = %owner, token = %token, amount, "Allowance set");
        Ok(())
    }

    pub fn balance_of(&self, who: &Principal, token: &TokenId) -> Result<u64, VaultError> {
        Ok(self.book()?.balance(who, token))
    }

    pub fn allowance(&self, who: &Principal, token: &TokenId) -> Result<u64, VaultError> {
        Ok(self.book()?.allowance(who, token))
    }

    pub fn custody_of(&self, task_id: TaskId, token: &TokenId) -> Result<u64, VaultError> {
        Ok(self.book()?.custody(task_id, token))
    }

    /// Forfeited value with no sink, held by nobody.
    pub fn frozen(&self, token: &TokenId) -> Result<u64, VaultError> {
        Ok(self.book()?.frozen.get(token).copied().unwrap_or(0))
    }

    /// External balances plus custody plus frozen value. Only `deposit` changes it.
    pub fn total_supply(&self, token: &TokenId) -> Result<u64, VaultError> {
        let book = self.book()?;
        let external: u64 = book.balances.get(token).map(|m| m.values().sum()).unwrap_or(0);
        let custody: u64 = book.custody.get(token).map(|m| m.values().sum()).unwrap_or(0);
        let frozen = book.frozen.get(token).copied().unwrap_or(0);
        Ok(external + custody + frozen)
    }

    fn book(&self) -> Result<std::sync::MutexGuard<'_, VaultSnapshot>, VaultError> {
        self.book
            .lock()
            .map_err(|_| VaultError::Transfer("vault lock poisoned".to_string()))
    }
}

#[async_trait]
impl FundTransfer for InMemoryVault {
    async fn lock(
        &self,
        task_id: TaskId,
        from: &Principal,
        token: &TokenId,
        amount: u64,
    ) -> Result<(), VaultError> {
        let mut book = self.book()?;
        let balance = book.balance(from, token);
        let allowance = book.allowance(from, token);
        let spendable = balance.min(allowance);
        if spendable < amount {
            return Err(VaultError::InsufficientFunds {
                principal: from.clone(),
                token: token.clone(),
                required: amount,
                available: spendable,
            });
        }
        let held = book
            .custody(task_id, token)
            .checked_add(amount)
            .ok_or_else(|| overflow("custody"))?;

        book.set_balance(from, token, balance - amount);
        book.set_allowance(from, token, allowance - amount);
        book.set_custody(task_id, token, held);
        debug!(task_id = %task_id, principal = %from, token = %token, amount, "Locked into custody");
        Ok(())
    }

    async fn release(
        &self,
        task_id: TaskId,
        to: &Principal,
        token: &TokenId,
        amount: u64,
    ) -> Result<(), VaultError> {
        let mut book = self.book()?;
        let held = book.custody(task_id, token);
        if held < amount {
            return Err(VaultError::CustodyUnderflow {
                task_id,
                token: token.clone(),
                required: amount,
                held,
            });
        }
        let credited = book
            .balance(to, token)
            .checked_add(amount)
            .ok_or_else(|| overflow("balance"))?;

        book.set_custody(task_id, token, held - amount);
        book.set_balance(to, token, credited);
        debug!(task_id = %task_id, principal = %to, token = %token, amount, "Released from custody");
        Ok(())
    }

    async fn forfeit(
        &self,
        task_id: TaskId,
        token: &TokenId,
        amount: u64,
        sink: Option<&Principal>,
    ) -> Result<Forfeiture, VaultError> {
        let mut book = self.book()?;
        let held = book.custody(task_id, token);
        if held < amount {
            return Err(VaultError::CustodyUnderflow {
                task_id,
                token: token.clone(),
                required: amount,
                held,
            });
        }

        let outcome = match sink {
            Some(sink) => {
                let credited = book
                    .balance(sink, token)
                    .checked_add(amount)
                    .ok_or_else(|| overflow("sink balance"))?;
                book.set_balance(sink, token, credited);
                Forfeiture::Sink(sink.clone())
            }
            None => {
                let frozen = book.frozen.get(token).copied().unwrap_or(0);
                let next = frozen
                    .checked_add(amount)
                    .ok_or_else(|| overflow("frozen custody"))?;
                book.frozen.insert(token.clone(), next);
                Forfeiture::Frozen
            }
        };
        book.set_custody(task_id, token, held - amount);
        debug!(task_id = %task_id, token = %token, amount, outcome = ?outcome, "Forfeited custody");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usdc() -> TokenId {
        TokenId::new("USDC")
    }

    #[tokio::test]
    async fn lock_requires_balance_and_allowance() {
        let vault = InMemoryVault::new();
        let alice = Principal::new("alice");
        vault.deposit(&alice, &usdc(), 100).unwrap();

        let err = vault.lock(TaskId(0), &alice, &usdc(), 50).await.unwrap_err();
        assert!(matches!(err, VaultError::InsufficientFunds { available: 0, .. }));

        vault.approve(&alice, &usdc(), 500).unwrap();
        let err = vault.lock(TaskId(0), &alice, &usdc(), 150).await.unwrap_err();
        assert!(matches!(err, VaultError::InsufficientFunds { available: 100, .. }));

        vault.lock(TaskId(0), &alice, &usdc(), 60).await.unwrap();
        assert_eq!(vault.balance_of(&alice, &usdc()).unwrap(), 40);
        assert_eq!(vault.allowance(&alice, &usdc()).unwrap(), 440);
        assert_eq!(vault.custody_of(TaskId(0), &usdc()).unwrap(), 60);
    }

    #[tokio::test]
    async fn release_rejects_underflow_without_moving_funds() {
        let vault = InMemoryVault::new();
        let alice = Principal::new("alice");
        vault.deposit(&alice, &usdc(), 10).unwrap();
        vault.approve(&alice, &usdc(), 10).unwrap();
        vault.lock(TaskId(1), &alice, &usdc(), 10).await.unwrap();

        let err = vault
            .release(TaskId(1), &alice, &usdc(), 11)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::CustodyUnderflow { held: 10, .. }));
        assert_eq!(vault.custody_of(TaskId(1), &usdc()).unwrap(), 10);
        assert_eq!(vault.balance_of(&alice, &usdc()).unwrap(), 0);
    }

    #[tokio::test]
    async fn forfeit_routes_to_sink_or_freezes() {
        let vault = InMemoryVault::new();
        let solver = Principal::new("solver");
        let treasury = Principal::new("treasury");
        vault.deposit(&solver, &usdc(), 20).unwrap();
        vault.approve(&solver, &usdc(), 20).unwrap();
        vault.lock(TaskId(0), &solver, &usdc(), 10).await.unwrap();
        vault.lock(TaskId(1), &solver, &usdc(), 10).await.unwrap();

        let to_sink = vault
            .forfeit(TaskId(0), &usdc(), 10, Some(&treasury))
            .await
            .unwrap();
        assert_eq!(to_sink, Forfeiture::Sink(treasury.clone()));
        assert_eq!(vault.balance_of(&treasury, &usdc()).unwrap(), 10);

        let frozen = vault.forfeit(TaskId(1), &usdc(), 10, None).await.unwrap();
        assert_eq!(frozen, Forfeiture::Frozen);
        assert_eq!(vault.frozen(&usdc()).unwrap(), 10);
        assert_eq!(vault.total_supply(&usdc()).unwrap(), 20);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let vault = InMemoryVault::new();
        vault.deposit(&Principal::new("a"), &usdc(), 5).unwrap();
        let json = serde_json::to_string(&vault.snapshot().unwrap()).unwrap();
        let back: VaultSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(InMemoryVault::from_snapshot(back).total_supply(&usdc()).unwrap(), 5);
    }
}
