//! Domain entities persisted by the repository.

mod category;
mod post;
mod user;

pub use category::{Category, UNCATEGORIZED_NAME, UNCATEGORIZED_SLUG};
pub use post::{Post, PostStatus};
pub use user::{Role, User};
