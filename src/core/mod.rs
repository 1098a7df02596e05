pub mod analysis;
pub mod constraints;
pub mod error;
pub mod expression;
pub mod types;

pub use analysis::*;
pub use constraints::{ParameterRelation, RelationSet};
pub use error::*;
pub use expression::CompiledExpression;
pub use types::*;
