pub mod constants;
pub mod error;
pub mod hash;
pub mod manifest;
pub mod traits;

pub mod prelude {
    pub use super::constants::*;
    pub use super::error::*;
    pub use super::hash::*;
    pub use super::manifest::*;
    pub use super::traits::*;
}
