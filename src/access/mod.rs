pub mod policy;
pub mod roles;

pub use policy::{authorize, has_capability, require_role, Capability};
pub use roles::Role;
