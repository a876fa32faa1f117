//! IDM Core - Canonical identity model, query AST and backend traits

pub mod attrs;
pub mod deactivation;
pub mod error;
pub mod evaluator;
pub mod group;
pub mod ids;
pub mod models;
pub mod query;
pub mod stream;
pub mod traits;

pub use attrs::*;
pub use deactivation::*;
pub use error::*;
pub use evaluator::*;
pub use group::*;
pub use ids::*;
pub use models::*;
pub use query::*;
pub use stream::*;
pub use traits::*;
