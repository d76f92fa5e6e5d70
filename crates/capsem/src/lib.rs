//! Top-level facade crate for CAPSEM.
//!
//! Re-exports the policy core and the proxy library so users can depend on a
//! single crate.

pub mod core {
    pub use capsem_core::*;
}

pub mod proxy {
    pub use capsem_proxy::*;
}
