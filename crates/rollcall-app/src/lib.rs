// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

pub mod error;
pub mod filter;
pub mod ids;
pub mod leaf;
pub mod model;
pub mod mutation;
pub mod path;
pub mod selection;
pub mod state;
pub mod store;

pub use error::*;
pub use filter::*;
pub use ids::*;
pub use leaf::*;
pub use model::*;
pub use mutation::*;
pub use path::*;
pub use selection::*;
pub use state::*;
pub use store::*;
