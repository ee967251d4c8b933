//! Token balances
//!
//! Module accounts, user accounts and supplier and application stakes are
//! plain `u64` balances in the key-value store. Every primitive either applies fully or
//! returns an error before writing.

use thiserror::Error;

use super::{KvStore, StoreError};
use crate::constants::{APPLICATION_MODULE, SUPPLIER_MODULE};

const MODULE_BALANCE_PREFIX: &[u8] = b"balances/module/";
const ACCOUNT_BALANCE_PREFIX: &[u8] = b"balances/account/";
const SUPPLIER_STAKE_PREFIX: &[u8] = b"stakes/supplier/";
const APPLICATION_STAKE_PREFIX: &[u8] = b"stakes/application/";
const TOTAL_SUPPLY_KEY: &[u8] = b"supply";

/// Bank errors
#[derive(Debug, Error)]
pub enum BankError {
    #[error("insufficient funds in {holder}: balance {balance}, needed {amount}")]
    InsufficientFunds { holder: String, balance: u64, amount: u64 },
    #[error("balance overflow in {0}")]
    Overflow(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Holder of a balance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Holder<'a> {
    Module(&'a str),
    Account(&'a str),
    Stake(&'a str),
    ApplicationStake(&'a str),
}

impl Holder<'_> {
    fn key(&self) -> Vec<u8> {
        let (prefix, name) = match self {
            Holder::Module(name) => (MODULE_BALANCE_PREFIX, name),
            Holder::Account(name) => (ACCOUNT_BALANCE_PREFIX, name),
            Holder::Stake(name) => (SUPPLIER_STAKE_PREFIX, name),
            Holder::ApplicationStake(name) => (APPLICATION_STAKE_PREFIX, name),
        };
        [prefix, name.as_bytes()].concat()
    }

    fn label(&self) -> String {
        match self {
            Holder::Module(name) => format!("module {name}"),
            Holder::Account(name) => format!("account {name}"),
            Holder::Stake(name) => format!("stake of {name}"),
            Holder::ApplicationStake(name) => format!("stake of application {name}"),
        }
    }
}

fn read_u64<S: KvStore + ?Sized>(store: &S, key: &[u8]) -> Result<u64, StoreError> {
    match store.get(key)? {
        Some(bytes) => {
            let raw: [u8; 8] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| StoreError::Corrupt(String::from_utf8_lossy(key).into_owned()))?;
            Ok(u64::from_be_bytes(raw))
        }
        None => Ok(0),
    }
}

fn write_u64<S: KvStore + ?Sized>(store: &mut S, key: &[u8], value: u64) -> Result<(), StoreError> {
    if value == 0 {
        store.delete(key)
    } else {
        store.set(key, &value.to_be_bytes())
    }
}

/// Balance primitives, available on every `KvStore`
pub trait Bank: KvStore {
    fn module_balance(&self, module: &str) -> Result<u64, BankError> {
        Ok(read_u64(self, &Holder::Module(module).key())?)
    }

    fn account_balance(&self, address: &str) -> Result<u64, BankError> {
        Ok(read_u64(self, &Holder::Account(address).key())?)
    }

    fn supplier_stake(&self, supplier: &str) -> Result<u64, BankError> {
        Ok(read_u64(self, &Holder::Stake(supplier).key())?)
    }

    fn application_stake(&self, application: &str) -> Result<u64, BankError> {
        Ok(read_u64(self, &Holder::ApplicationStake(application).key())?)
    }

    /// Sum of every minted token not yet burned
    fn total_supply(&self) -> Result<u64, BankError> {
        Ok(read_u64(self, TOTAL_SUPPLY_KEY)?)
    }

    fn mint_to_module(&mut self, module: &str, amount: u64) -> Result<(), BankError> {
        if amount == 0 {
            return Ok(());
        }
        let supply = self
            .total_supply()?
            .checked_add(amount)
            .ok_or_else(|| BankError::Overflow("total supply".into()))?;
        credit(self, Holder::Module(module), amount)?;
        write_u64(self, TOTAL_SUPPLY_KEY, supply)?;
        Ok(())
    }

    fn burn_from_module(&mut self, module: &str, amount: u64) -> Result<(), BankError> {
        if amount == 0 {
            return Ok(());
        }
        debit(self, Holder::Module(module), amount)?;
        let supply = self.total_supply()?.saturating_sub(amount);
        write_u64(self, TOTAL_SUPPLY_KEY, supply)?;
        Ok(())
    }

    fn send_module_to_module(&mut self, from: &str, to: &str, amount: u64) -> Result<(), BankError> {
        transfer(self, Holder::Module(from), Holder::Module(to), amount)
    }

    fn send_module_to_account(&mut self, from: &str, to: &str, amount: u64) -> Result<(), BankError> {
        transfer(self, Holder::Module(from), Holder::Account(to), amount)
    }

    /// Move `amount` from the supplier's account into its stake
    fn stake_supplier(&mut self, supplier: &str, amount: u64) -> Result<(), BankError> {
        transfer(self, Holder::Account(supplier), Holder::Module(SUPPLIER_MODULE), amount)?;
        credit(self, Holder::Stake(supplier), amount)
    }

    /// Move `amount` from the application's account into its stake
    fn stake_application(&mut self, application: &str, amount: u64) -> Result<(), BankError> {
        transfer(self, Holder::Account(application), Holder::Module(APPLICATION_MODULE), amount)?;
        credit(self, Holder::ApplicationStake(application), amount)
    }

    /// Lower the application's recorded stake after its module funds were
    /// burned for settlement
    fn debit_application_stake(&mut self, application: &str, amount: u64) -> Result<(), BankError> {
        debit(self, Holder::ApplicationStake(application), amount)
    }

    /// Burn up to `penalty` from the supplier's stake; returns the amount burned
    fn slash_supplier(&mut self, supplier: &str, penalty: u64) -> Result<u64, BankError> {
        let slashed = self.supplier_stake(supplier)?.min(penalty);
        if slashed == 0 {
            return Ok(0);
        }
        debit(self, Holder::Stake(supplier), slashed)?;
        self.burn_from_module(SUPPLIER_MODULE, slashed)?;
        Ok(slashed)
    }
}

impl<S: KvStore + ?Sized> Bank for S {}

fn credit<S: KvStore + ?Sized>(store: &mut S, holder: Holder<'_>, amount: u64) -> Result<(), BankError> {
    let key = holder.key();
    let balance = read_u64(store, &key)?
        .checked_add(amount)
        .ok_or_else(|| BankError::Overflow(holder.label()))?;
    write_u64(store, &key, balance)?;
    Ok(())
}

fn debit<S: KvStore + ?Sized>(store: &mut S, holder: Holder<'_>, amount: u64) -> Result<(), BankError> {
    let key = holder.key();
    let balance = read_u64(store, &key)?;
    if balance < amount {
        return Err(BankError::InsufficientFunds { holder: holder.label(), balance, amount });
    }
    write_u64(store, &key, balance - amount)?;
    Ok(())
}

fn transfer<S: KvStore + ?Sized>(
    store: &mut S,
    from: Holder<'_>,
    to: Holder<'_>,
    amount: u64,
) -> Result<(), BankError> {
    if amount == 0 {
        return Ok(());
    }
    debit(store, from, amount)?;
    credit(store, to, amount)
}

/// Every non-zero module balance, in module name order
pub fn module_balances<S: KvStore + ?Sized>(store: &S) -> Result<Vec<(String, u64)>, BankError> {
    balances_under(store, MODULE_BALANCE_PREFIX)
}

/// Every non-zero account balance, in address order
pub fn account_balances<S: KvStore + ?Sized>(store: &S) -> Result<Vec<(String, u64)>, BankError> {
    balances_under(store, ACCOUNT_BALANCE_PREFIX)
}

fn balances_under<S: KvStore + ?Sized>(store: &S, prefix: &[u8]) -> Result<Vec<(String, u64)>, BankError> {
    store
        .scan_prefix(prefix)?
        .into_iter()
        .map(|(key, value)| {
            let name = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            let raw: [u8; 8] = value
                .as_slice()
                .try_into()
                .map_err(|_| StoreError::Corrupt(name.clone()))?;
            Ok((name, u64::from_be_bytes(raw)))
        })
        .collect()
}
