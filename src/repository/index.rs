//! Key layout and access-pattern index attributes.
//!
//! Every key prefix ends in `#`, and no prefix is a prefix of another up to
//! that delimiter, so a username can never collide with a slug or an email.
//! All index attributes are produced by [`compute_index_attributes`]; write
//! paths never build them by hand.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::db::{
    Attributes, Item, Key, StoreError, StoreResult, ENTITY_TYPE, GSI1_PK, GSI1_SK, GSI2_PK,
    GSI2_SK, TYPE_SK,
};
use crate::domain::{Category, Post, User};

pub const USER_TYPE: &str = "USER";
pub const POST_TYPE: &str = "POST";
pub const CATEGORY_TYPE: &str = "CATEGORY";

pub fn user_key(username: &str) -> Key {
    Key::new(format!("USER#{username}"), format!("METADATA#{username}"))
}

pub fn post_key(slug: &str) -> Key {
    Key::new(format!("POST#{slug}"), format!("METADATA#{slug}"))
}

pub fn category_key(slug: &str) -> Key {
    Key::new(format!("CATEGORY#{slug}"), format!("METADATA#{slug}"))
}

pub fn posts_by_author_partition(username: &str) -> String {
    format!("POSTS_BY_USER#{username}")
}

pub fn posts_by_category_partition(category_slug: &str) -> String {
    format!("POSTS_BY_CAT#{category_slug}")
}

/// Sortable creation timestamp; the slug suffix keeps equal instants distinct.
fn chronological_sort_key(created_at: &DateTime<Utc>, slug: &str) -> String {
    format!(
        "{}#{slug}",
        created_at.to_rfc3339_opts(SecondsFormat::Nanos, true)
    )
}

/// Secondary-index attributes of one primary record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexAttributes {
    pub entity_type: &'static str,
    pub type_sort: String,
    pub by_author: Option<(String, String)>,
    pub by_category: Option<(String, String)>,
}

impl IndexAttributes {
    fn apply(self, attributes: &mut Attributes) {
        attributes.insert(ENTITY_TYPE.into(), Value::from(self.entity_type));
        attributes.insert(TYPE_SK.into(), Value::from(self.type_sort));
        if let Some((pk, sk)) = self.by_author {
            attributes.insert(GSI1_PK.into(), Value::from(pk));
            attributes.insert(GSI1_SK.into(), Value::from(sk));
        }
        if let Some((pk, sk)) = self.by_category {
            attributes.insert(GSI2_PK.into(), Value::from(pk));
            attributes.insert(GSI2_SK.into(), Value::from(sk));
        }
    }
}

/// Borrowed view of any primary record.
#[derive(Debug, Clone, Copy)]
pub enum EntityRef<'a> {
    User(&'a User),
    Post(&'a Post),
    Category(&'a Category),
}

pub fn compute_index_attributes(entity: EntityRef<'_>) -> IndexAttributes {
    match entity {
        EntityRef::User(user) => IndexAttributes {
            entity_type: USER_TYPE,
            type_sort: user.username.clone(),
            by_author: None,
            by_category: None,
        },
        EntityRef::Post(post) => {
            let sort = chronological_sort_key(&post.created_at, &post.slug);
            IndexAttributes {
                entity_type: POST_TYPE,
                type_sort: sort.clone(),
                by_author: Some((
                    posts_by_author_partition(&post.author_id),
                    format!("POST#{sort}"),
                )),
                by_category: Some((
                    posts_by_category_partition(&post.category),
                    format!("POST#{sort}"),
                )),
            }
        }
        EntityRef::Category(category) => IndexAttributes {
            entity_type: CATEGORY_TYPE,
            type_sort: category.slug.clone(),
            by_author: None,
            by_category: None,
        },
    }
}

/// A primary record stored as one item.
pub trait Record: Serialize + DeserializeOwned {
    fn key(&self) -> Key;
    fn entity(&self) -> EntityRef<'_>;
}

impl Record for User {
    fn key(&self) -> Key {
        user_key(&self.username)
    }

    fn entity(&self) -> EntityRef<'_> {
        EntityRef::User(self)
    }
}

impl Record for Post {
    fn key(&self) -> Key {
        post_key(&self.slug)
    }

    fn entity(&self) -> EntityRef<'_> {
        EntityRef::Post(self)
    }
}

impl Record for Category {
    fn key(&self) -> Key {
        category_key(&self.slug)
    }

    fn entity(&self) -> EntityRef<'_> {
        EntityRef::Category(self)
    }
}

/// Serialises a record together with its derived index attributes.
pub fn to_item<R: Record>(record: &R) -> StoreResult<Item> {
    let mut attributes = match serde_json::to_value(record)? {
        Value::Object(map) => map,
        other => {
            return Err(StoreError::Unavailable(format!(
                "record serialised to a non-object value: {other}"
            )))
        }
    };
    compute_index_attributes(record.entity()).apply(&mut attributes);
    Ok(Item::new(record.key(), attributes))
}

pub fn from_item<R: DeserializeOwned>(item: Item) -> StoreResult<R> {
    Ok(serde_json::from_value(Value::Object(item.attributes))?)
}
