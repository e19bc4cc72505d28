#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

pub mod config;
pub mod logging;
pub mod shared;
pub mod time;
pub mod util;

pub use shared::{ErrorType, ErrorUtils, NetworkError, NetworkResult, UserId};
