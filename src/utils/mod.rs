pub mod cursor;
pub mod sanitize;
