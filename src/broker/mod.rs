pub mod protocol;
pub mod router;

pub use router::{Router, RouterError};
