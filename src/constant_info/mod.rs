mod pool;
mod types;

pub use self::pool::*;
pub use self::types::*;
