pub mod request;
pub mod response;
pub mod stats;

pub use request::*;
pub use response::*;
pub use stats::*;
