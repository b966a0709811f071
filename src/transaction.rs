//! Transaction variants recorded in ledger blocks

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;
use crate::types::BlockHash;

/// Identity of whoever performed a transaction.
///
/// Stamped by the ledger at commit time; whatever a client put here is overwritten.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub user_name: String,
    pub employee_id: String,
    pub role: String,
}

impl Actor {
    pub fn new(
        user_name: impl Into<String>,
        employee_id: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            user_name: user_name.into(),
            employee_id: employee_id.into(),
            role: role.into(),
        }
    }
}

/// Where a reset-produced genesis came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetProvenance {
    pub truncated_tip_index: u64,
    pub truncated_tip_hash: BlockHash,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenesisInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_from: Option<ResetProvenance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<Actor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateItem {
    pub sku: String,
    pub product_name: String,
    pub price: Decimal,
    pub category: String,
    pub quantity: u64,
    pub to_location: String,
    #[serde(default)]
    pub actor: Actor,
}

/// Payload shared by `STOCK_IN` and `STOCK_OUT`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockChange {
    pub sku: String,
    pub quantity: u64,
    pub location: String,
    #[serde(default)]
    pub actor: Actor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveStock {
    pub sku: String,
    pub quantity: u64,
    pub from_location: String,
    pub to_location: String,
    #[serde(default)]
    pub actor: Actor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditItem {
    pub sku: String,
    pub product_name: String,
    pub price: Decimal,
    pub category: String,
    #[serde(default)]
    pub actor: Actor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteItem {
    pub sku: String,
    #[serde(default)]
    pub actor: Actor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUser {
    pub employee_id: String,
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: String,
    #[serde(default)]
    pub actor: Actor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRole {
    pub employee_id: String,
    pub new_role: String,
    #[serde(default)]
    pub actor: Actor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditEmail {
    pub employee_id: String,
    pub new_email: String,
    #[serde(default)]
    pub actor: Actor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteUser {
    pub employee_id: String,
    #[serde(default)]
    pub actor: Actor,
}

/// Add or archive a location/category by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceEntry {
    pub name: String,
    #[serde(default)]
    pub actor: Actor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceRename {
    pub old_name: String,
    pub new_name: String,
    #[serde(default)]
    pub actor: Actor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub actor: Actor,
}

/// Password changes are recorded as an event only; no credential material is logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePassword {
    #[serde(default)]
    pub actor: Actor,
}

/// A ledger transaction, tagged by `kind`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Transaction {
    Genesis(GenesisInfo),
    CreateItem(CreateItem),
    StockIn(StockChange),
    StockOut(StockChange),
    Move(MoveStock),
    AdminEditItem(EditItem),
    DeleteItem(DeleteItem),
    AdminCreateUser(CreateUser),
    AdminEditRole(EditRole),
    AdminEditEmail(EditEmail),
    AdminDeleteUser(DeleteUser),
    AdminAddLocation(ReferenceEntry),
    AdminRenameLocation(ReferenceRename),
    AdminArchiveLocation(ReferenceEntry),
    AdminAddCategory(ReferenceEntry),
    AdminRenameCategory(ReferenceRename),
    AdminArchiveCategory(ReferenceEntry),
    UserUpdateProfile(UpdateProfile),
    UserChangePassword(ChangePassword),
}

/// Discriminant of [`Transaction`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Genesis,
    CreateItem,
    StockIn,
    StockOut,
    Move,
    AdminEditItem,
    DeleteItem,
    AdminCreateUser,
    AdminEditRole,
    AdminEditEmail,
    AdminDeleteUser,
    AdminAddLocation,
    AdminRenameLocation,
    AdminArchiveLocation,
    AdminAddCategory,
    AdminRenameCategory,
    AdminArchiveCategory,
    UserUpdateProfile,
    UserChangePassword,
}

impl TransactionKind {
    pub const ALL: [TransactionKind; 19] = [
        TransactionKind::Genesis,
        TransactionKind::CreateItem,
        TransactionKind::StockIn,
        TransactionKind::StockOut,
        TransactionKind::Move,
        TransactionKind::AdminEditItem,
        TransactionKind::DeleteItem,
        TransactionKind::AdminCreateUser,
        TransactionKind::AdminEditRole,
        TransactionKind::AdminEditEmail,
        TransactionKind::AdminDeleteUser,
        TransactionKind::AdminAddLocation,
        TransactionKind::AdminRenameLocation,
        TransactionKind::AdminArchiveLocation,
        TransactionKind::AdminAddCategory,
        TransactionKind::AdminRenameCategory,
        TransactionKind::AdminArchiveCategory,
        TransactionKind::UserUpdateProfile,
        TransactionKind::UserChangePassword,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Genesis => "GENESIS",
            TransactionKind::CreateItem => "CREATE_ITEM",
            TransactionKind::StockIn => "STOCK_IN",
            TransactionKind::StockOut => "STOCK_OUT",
            TransactionKind::Move => "MOVE",
            TransactionKind::AdminEditItem => "ADMIN_EDIT_ITEM",
            TransactionKind::DeleteItem => "DELETE_ITEM",
            TransactionKind::AdminCreateUser => "ADMIN_CREATE_USER",
            TransactionKind::AdminEditRole => "ADMIN_EDIT_ROLE",
            TransactionKind::AdminEditEmail => "ADMIN_EDIT_EMAIL",
            TransactionKind::AdminDeleteUser => "ADMIN_DELETE_USER",
            TransactionKind::AdminAddLocation => "ADMIN_ADD_LOCATION",
            TransactionKind::AdminRenameLocation => "ADMIN_RENAME_LOCATION",
            TransactionKind::AdminArchiveLocation => "ADMIN_ARCHIVE_LOCATION",
            TransactionKind::AdminAddCategory => "ADMIN_ADD_CATEGORY",
            TransactionKind::AdminRenameCategory => "ADMIN_RENAME_CATEGORY",
            TransactionKind::AdminArchiveCategory => "ADMIN_ARCHIVE_CATEGORY",
            TransactionKind::UserUpdateProfile => "USER_UPDATE_PROFILE",
            TransactionKind::UserChangePassword => "USER_CHANGE_PASSWORD",
        }
    }

    /// Kinds that change inventory state when applied
    pub fn affects_inventory(&self) -> bool {
        matches!(
            self,
            TransactionKind::CreateItem
                | TransactionKind::StockIn
                | TransactionKind::StockOut
                | TransactionKind::Move
                | TransactionKind::AdminEditItem
                | TransactionKind::DeleteItem
        )
    }

    /// Everything except genesis and an actor's own profile maintenance
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            TransactionKind::Genesis
                | TransactionKind::UserUpdateProfile
                | TransactionKind::UserChangePassword
        )
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Transaction {
    pub fn kind(&self) -> TransactionKind {
        match self {
            Transaction::Genesis(_) => TransactionKind::Genesis,
            Transaction::CreateItem(_) => TransactionKind::CreateItem,
            Transaction::StockIn(_) => TransactionKind::StockIn,
            Transaction::StockOut(_) => TransactionKind::StockOut,
            Transaction::Move(_) => TransactionKind::Move,
            Transaction::AdminEditItem(_) => TransactionKind::AdminEditItem,
            Transaction::DeleteItem(_) => TransactionKind::DeleteItem,
            Transaction::AdminCreateUser(_) => TransactionKind::AdminCreateUser,
            Transaction::AdminEditRole(_) => TransactionKind::AdminEditRole,
            Transaction::AdminEditEmail(_) => TransactionKind::AdminEditEmail,
            Transaction::AdminDeleteUser(_) => TransactionKind::AdminDeleteUser,
            Transaction::AdminAddLocation(_) => TransactionKind::AdminAddLocation,
            Transaction::AdminRenameLocation(_) => TransactionKind::AdminRenameLocation,
            Transaction::AdminArchiveLocation(_) => TransactionKind::AdminArchiveLocation,
            Transaction::AdminAddCategory(_) => TransactionKind::AdminAddCategory,
            Transaction::AdminRenameCategory(_) => TransactionKind::AdminRenameCategory,
            Transaction::AdminArchiveCategory(_) => TransactionKind::AdminArchiveCategory,
            Transaction::UserUpdateProfile(_) => TransactionKind::UserUpdateProfile,
            Transaction::UserChangePassword(_) => TransactionKind::UserChangePassword,
        }
    }

    /// The actor recorded on this transaction; genesis only has one after a reset
    pub fn actor(&self) -> Option<&Actor> {
        match self {
            Transaction::Genesis(g) => g.actor.as_ref(),
            Transaction::CreateItem(t) => Some(&t.actor),
            Transaction::StockIn(t) | Transaction::StockOut(t) => Some(&t.actor),
            Transaction::Move(t) => Some(&t.actor),
            Transaction::AdminEditItem(t) => Some(&t.actor),
            Transaction::DeleteItem(t) => Some(&t.actor),
            Transaction::AdminCreateUser(t) => Some(&t.actor),
            Transaction::AdminEditRole(t) => Some(&t.actor),
            Transaction::AdminEditEmail(t) => Some(&t.actor),
            Transaction::AdminDeleteUser(t) => Some(&t.actor),
            Transaction::AdminAddLocation(t)
            | Transaction::AdminArchiveLocation(t)
            | Transaction::AdminAddCategory(t)
            | Transaction::AdminArchiveCategory(t) => Some(&t.actor),
            Transaction::AdminRenameLocation(t) | Transaction::AdminRenameCategory(t) => {
                Some(&t.actor)
            }
            Transaction::UserUpdateProfile(t) => Some(&t.actor),
            Transaction::UserChangePassword(t) => Some(&t.actor),
        }
    }

    /// Overwrite the recorded actor. Genesis is left untouched.
    pub fn stamp_actor(&mut self, actor: Actor) {
        let slot = match self {
            Transaction::Genesis(_) => return,
            Transaction::CreateItem(t) => &mut t.actor,
            Transaction::StockIn(t) | Transaction::StockOut(t) => &mut t.actor,
            Transaction::Move(t) => &mut t.actor,
            Transaction::AdminEditItem(t) => &mut t.actor,
            Transaction::DeleteItem(t) => &mut t.actor,
            Transaction::AdminCreateUser(t) => &mut t.actor,
            Transaction::AdminEditRole(t) => &mut t.actor,
            Transaction::AdminEditEmail(t) => &mut t.actor,
            Transaction::AdminDeleteUser(t) => &mut t.actor,
            Transaction::AdminAddLocation(t)
            | Transaction::AdminArchiveLocation(t)
            | Transaction::AdminAddCategory(t)
            | Transaction::AdminArchiveCategory(t) => &mut t.actor,
            Transaction::AdminRenameLocation(t) | Transaction::AdminRenameCategory(t) => {
                &mut t.actor
            }
            Transaction::UserUpdateProfile(t) => &mut t.actor,
            Transaction::UserChangePassword(t) => &mut t.actor,
        };
        *slot = actor;
    }

    /// SKU referenced by an inventory transaction
    pub fn sku(&self) -> Option<&str> {
        match self {
            Transaction::CreateItem(t) => Some(&t.sku),
            Transaction::StockIn(t) | Transaction::StockOut(t) => Some(&t.sku),
            Transaction::Move(t) => Some(&t.sku),
            Transaction::AdminEditItem(t) => Some(&t.sku),
            Transaction::DeleteItem(t) => Some(&t.sku),
            _ => None,
        }
    }

    /// Quantity carried by a stock-bearing transaction
    pub fn quantity(&self) -> Option<u64> {
        match self {
            Transaction::CreateItem(t) => Some(t.quantity),
            Transaction::StockIn(t) | Transaction::StockOut(t) => Some(t.quantity),
            Transaction::Move(t) => Some(t.quantity),
            _ => None,
        }
    }

    /// Check that the payload is well-formed, independent of any inventory state
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Transaction::Genesis(_) => Ok(()),
            Transaction::CreateItem(t) => {
                require_name("sku", &t.sku)?;
                require_name("productName", &t.product_name)?;
                require_name("toLocation", &t.to_location)?;
                require_price(t.price)
            }
            Transaction::StockIn(t) | Transaction::StockOut(t) => {
                require_name("sku", &t.sku)?;
                require_name("location", &t.location)?;
                require_quantity(t.quantity)
            }
            Transaction::Move(t) => {
                require_name("sku", &t.sku)?;
                require_name("fromLocation", &t.from_location)?;
                require_name("toLocation", &t.to_location)?;
                require_quantity(t.quantity)
            }
            Transaction::AdminEditItem(t) => {
                require_name("sku", &t.sku)?;
                require_name("productName", &t.product_name)?;
                require_price(t.price)
            }
            Transaction::DeleteItem(t) => require_name("sku", &t.sku),
            Transaction::AdminCreateUser(t) => {
                require_name("employeeId", &t.employee_id)?;
                require_name("userName", &t.user_name)?;
                require_name("role", &t.role)
            }
            Transaction::AdminEditRole(t) => {
                require_name("employeeId", &t.employee_id)?;
                require_name("newRole", &t.new_role)
            }
            Transaction::AdminEditEmail(t) => {
                require_name("employeeId", &t.employee_id)?;
                require_name("newEmail", &t.new_email)
            }
            Transaction::AdminDeleteUser(t) => require_name("employeeId", &t.employee_id),
            Transaction::AdminAddLocation(t)
            | Transaction::AdminArchiveLocation(t)
            | Transaction::AdminAddCategory(t)
            | Transaction::AdminArchiveCategory(t) => require_name("name", &t.name),
            Transaction::AdminRenameLocation(t) | Transaction::AdminRenameCategory(t) => {
                require_name("oldName", &t.old_name)?;
                require_name("newName", &t.new_name)
            }
            Transaction::UserUpdateProfile(_) | Transaction::UserChangePassword(_) => Ok(()),
        }
    }
}

fn require_name(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::InvalidTransaction {
            reason: format!("{} cannot be empty", field),
        });
    }
    Ok(())
}

fn require_quantity(quantity: u64) -> Result<(), ValidationError> {
    if quantity == 0 {
        return Err(ValidationError::InvalidTransaction {
            reason: "quantity must be positive".to_string(),
        });
    }
    Ok(())
}

fn require_price(price: Decimal) -> Result<(), ValidationError> {
    if price.is_sign_negative() && !price.is_zero() {
        return Err(ValidationError::InvalidTransaction {
            reason: format!("price cannot be negative: {}", price),
        });
    }
    Ok(())
}
