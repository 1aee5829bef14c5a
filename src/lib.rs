#[macro_use]
extern crate enum_primitive;

pub mod core;

pub mod prelude {
    pub use crate::core::*;
}
