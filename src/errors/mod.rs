pub mod types;

pub use types::{AcquireError, IdentityError};
