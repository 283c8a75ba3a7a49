//! Backend-independent lowerings.

pub mod calls;
