pub mod dict;
pub mod sqlite;

pub use dict::Dict;
pub use sqlite::{NewVisitor, SqliteStore, VisitorKey, VisitorProfile};
