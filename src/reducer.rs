//! The inventory reducer: one transition function for pre-check, commit and replay

use crate::context::ApplyContext;
use crate::error::ValidationError;
use crate::state::{InventoryState, Product};
use crate::traits::Reducer;
use crate::transaction::{CreateItem, DeleteItem, EditItem, MoveStock, StockChange, Transaction};

/// Applies ledger transactions to an [`InventoryState`].
///
/// Every branch runs all of its checks before touching the state, so a refused
/// transaction leaves the state exactly as it was.
#[derive(Debug, Clone, Copy, Default)]
pub struct InventoryReducer;

impl InventoryReducer {
    pub fn new() -> Self {
        Self
    }
}

impl Reducer<InventoryState, Transaction> for InventoryReducer {
    fn apply(
        &self,
        state: &InventoryState,
        transaction: &Transaction,
        context: &ApplyContext,
    ) -> Result<InventoryState, ValidationError> {
        let mut next = state.clone();
        self.apply_in_place(&mut next, transaction, context)?;
        Ok(next)
    }

    fn apply_in_place(
        &self,
        state: &mut InventoryState,
        transaction: &Transaction,
        context: &ApplyContext,
    ) -> Result<(), ValidationError> {
        transaction.validate()?;

        if context.index == 0 {
            return match transaction {
                Transaction::Genesis(_) => Ok(()),
                other => Err(ValidationError::InvalidTransaction {
                    reason: format!("index 0 is reserved for genesis, got {}", other.kind()),
                }),
            };
        }

        match transaction {
            Transaction::Genesis(_) => Err(ValidationError::MisplacedGenesis {
                index: context.index,
            }),
            Transaction::CreateItem(t) => within_value(state, &t.sku, |s| create_item(s, t)),
            Transaction::StockIn(t) => within_value(state, &t.sku, |s| stock_in(s, t)),
            Transaction::StockOut(t) => stock_out(state, t),
            Transaction::Move(t) => within_value(state, &t.sku, |s| move_stock(s, t)),
            Transaction::AdminEditItem(t) => within_value(state, &t.sku, |s| edit_item(s, t)),
            Transaction::DeleteItem(t) => delete_item(state, t),
            // Administrative and profile events are audit-only; inventory is untouched.
            Transaction::AdminCreateUser(_)
            | Transaction::AdminEditRole(_)
            | Transaction::AdminEditEmail(_)
            | Transaction::AdminDeleteUser(_)
            | Transaction::AdminAddLocation(_)
            | Transaction::AdminRenameLocation(_)
            | Transaction::AdminArchiveLocation(_)
            | Transaction::AdminAddCategory(_)
            | Transaction::AdminRenameCategory(_)
            | Transaction::AdminArchiveCategory(_)
            | Transaction::UserUpdateProfile(_)
            | Transaction::UserChangePassword(_) => Ok(()),
        }
    }
}

/// Run `change` and undo it if the inventory value no longer fits a `Decimal`.
///
/// Only the product under `sku` is touched by the value-raising branches, so restoring it
/// restores the whole state.
fn within_value<F>(state: &mut InventoryState, sku: &str, change: F) -> Result<(), ValidationError>
where
    F: FnOnce(&mut InventoryState) -> Result<(), ValidationError>,
{
    let previous = state.products.get(sku).cloned();
    change(state)?;
    if state.total_value().is_some() {
        return Ok(());
    }

    match previous {
        Some(product) => {
            state.products.insert(sku.to_string(), product);
        }
        None => {
            state.products.remove(sku);
        }
    }
    Err(ValidationError::ValueOverflow {
        sku: sku.to_string(),
    })
}

fn live_product<'a>(
    state: &'a mut InventoryState,
    sku: &str,
) -> Result<&'a mut Product, ValidationError> {
    let product = state
        .products
        .get_mut(sku)
        .ok_or_else(|| ValidationError::UnknownProduct {
            sku: sku.to_string(),
        })?;
    if product.is_deleted {
        return Err(ValidationError::ProductDeleted {
            sku: sku.to_string(),
        });
    }
    Ok(product)
}

fn checked_credit(product: &Product, location: &str, quantity: u64) -> Result<u64, ValidationError> {
    product
        .quantity_at(location)
        .checked_add(quantity)
        .ok_or_else(|| ValidationError::QuantityOverflow {
            sku: product.sku.clone(),
        })
}

fn checked_debit(product: &Product, location: &str, quantity: u64) -> Result<u64, ValidationError> {
    let available = product.quantity_at(location);
    available
        .checked_sub(quantity)
        .ok_or_else(|| ValidationError::InsufficientStock {
            sku: product.sku.clone(),
            location: location.to_string(),
            available,
            requested: quantity,
        })
}

// Zero entries are dropped so equal stock always means equal state bytes.
fn set_quantity(product: &mut Product, location: &str, quantity: u64) {
    if quantity == 0 {
        product.locations.remove(location);
    } else {
        product.locations.insert(location.to_string(), quantity);
    }
}

fn create_item(state: &mut InventoryState, t: &CreateItem) -> Result<(), ValidationError> {
    if let Some(existing) = state.products.get(&t.sku) {
        if !existing.is_deleted {
            return Err(ValidationError::DuplicateSku { sku: t.sku.clone() });
        }
    }

    // A deleted SKU starts a fresh lifecycle.
    let mut product = Product::new(&t.sku, &t.product_name, t.price, &t.category);
    set_quantity(&mut product, &t.to_location, t.quantity);
    state.products.insert(t.sku.clone(), product);
    Ok(())
}

fn stock_in(state: &mut InventoryState, t: &StockChange) -> Result<(), ValidationError> {
    let product = live_product(state, &t.sku)?;
    let updated = checked_credit(product, &t.location, t.quantity)?;
    set_quantity(product, &t.location, updated);
    Ok(())
}

fn stock_out(state: &mut InventoryState, t: &StockChange) -> Result<(), ValidationError> {
    let product = live_product(state, &t.sku)?;
    let updated = checked_debit(product, &t.location, t.quantity)?;
    set_quantity(product, &t.location, updated);
    Ok(())
}

fn move_stock(state: &mut InventoryState, t: &MoveStock) -> Result<(), ValidationError> {
    let product = live_product(state, &t.sku)?;
    if t.from_location == t.to_location {
        return Err(ValidationError::SameLocation {
            location: t.from_location.clone(),
        });
    }

    let source = checked_debit(product, &t.from_location, t.quantity)?;
    let destination = checked_credit(product, &t.to_location, t.quantity)?;
    set_quantity(product, &t.from_location, source);
    set_quantity(product, &t.to_location, destination);
    Ok(())
}

fn edit_item(state: &mut InventoryState, t: &EditItem) -> Result<(), ValidationError> {
    let product = live_product(state, &t.sku)?;
    product.product_name = t.product_name.clone();
    product.price = t.price;
    product.category = t.category.clone();
    Ok(())
}

fn delete_item(state: &mut InventoryState, t: &DeleteItem) -> Result<(), ValidationError> {
    let product = live_product(state, &t.sku)?;
    let remaining = product.total_stock();
    if remaining > 0 {
        return Err(ValidationError::StockRemaining {
            sku: t.sku.clone(),
            remaining,
        });
    }
    product.is_deleted = true;
    Ok(())
}
