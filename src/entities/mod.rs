// Entity Models
// Items are read-only; Categories and Associations are owned by the engine.

pub mod association;
pub mod category;
pub mod item;

pub use association::{Association, EnsureOutcome};
pub use category::{slugify, Category, CategorySnapshot, NewCategory};
pub use item::Item;
