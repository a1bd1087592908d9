mod table;
pub use self::table::*;

mod engine;
pub use self::engine::*;
