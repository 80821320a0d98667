pub mod fragment;
pub mod group;

pub use fragment::*;
pub use group::*;

/// API group shared by both custom resources
pub const API_GROUP: &str = "render.fragments.dev";
