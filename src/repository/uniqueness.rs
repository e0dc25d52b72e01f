//! Marker records that turn a conditional put into a unique constraint.
//!
//! A claim is acquired with `Put .. NotExists` in the same transaction as the
//! record it protects, and released with a delete in the transaction that
//! retires that record. There is no other locking.

use serde_json::Value;

use crate::db::{Attributes, Condition, Item, Key, WriteOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim<'a> {
    /// Lowercased email, back-referencing the owning username.
    Email(&'a str),
    PostSlug(&'a str),
    CategorySlug(&'a str),
    /// SHA-256 hex of a refresh token, back-referencing the username.
    RefreshToken(&'a str),
}

impl Claim<'_> {
    pub fn key(&self) -> Key {
        let id = match self {
            Claim::Email(email) => format!("USEREMAIL#{email}"),
            Claim::PostSlug(slug) => format!("SLUG#{slug}"),
            Claim::CategorySlug(slug) => format!("CATEGORYSLUG#{slug}"),
            Claim::RefreshToken(hash) => format!("REFRESH#{hash}"),
        };
        Key::new(id.clone(), id)
    }

    /// Guarded write that fails if the value is already claimed.
    pub fn acquire(&self, owner: Option<&str>) -> WriteOp {
        let mut attributes = Attributes::new();
        if let Some(owner) = owner {
            attributes.insert("owner".into(), Value::from(owner));
        }
        WriteOp::put(Item::new(self.key(), attributes), Condition::NotExists)
    }

    /// Delete that requires the claim to be present.
    pub fn release(&self) -> WriteOp {
        WriteOp::delete(self.key(), Condition::Exists)
    }

    /// Delete that tolerates an already-missing claim.
    pub fn release_if_present(&self) -> WriteOp {
        WriteOp::delete(self.key(), Condition::None)
    }
}

/// Username a claim record points back to.
pub fn claim_owner(item: &Item) -> Option<&str> {
    item.str_attr("owner")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{InMemoryTable, Table};

    #[test]
    fn test_claim_keys_use_distinct_prefixes() {
        assert_eq!(Claim::Email("a@b.c").key().pk, "USEREMAIL#a@b.c");
        assert_eq!(Claim::PostSlug("x").key().pk, "SLUG#x");
        assert_eq!(Claim::CategorySlug("x").key().pk, "CATEGORYSLUG#x");
        assert_ne!(Claim::PostSlug("x").key(), Claim::CategorySlug("x").key());
    }

    #[tokio::test]
    async fn test_second_acquire_fails_until_released() {
        let table = InMemoryTable::new();
        let claim = Claim::PostSlug("hello");

        table.transact_write(vec![claim.acquire(None)]).await.unwrap();
        let err = table
            .transact_write(vec![claim.acquire(None)])
            .await
            .unwrap_err();
        assert_eq!(err.failed_condition(), Some(0));

        table.transact_write(vec![claim.release()]).await.unwrap();
        table.transact_write(vec![claim.acquire(None)]).await.unwrap();
    }

    #[tokio::test]
    async fn test_owner_back_reference() {
        let table = InMemoryTable::new();
        let claim = Claim::Email("ann@example.com");
        table
            .transact_write(vec![claim.acquire(Some("ann"))])
            .await
            .unwrap();

        let item = table.get(&claim.key()).await.unwrap().unwrap();
        assert_eq!(claim_owner(&item), Some("ann"));
    }
}
