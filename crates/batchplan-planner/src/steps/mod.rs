//! Standard steps shared by field plans.

pub mod access;
pub mod constant;
pub mod lambda;
pub mod load;
pub mod polymorphic;

pub use access::AccessStep;
pub use constant::ConstantStep;
pub use lambda::LambdaStep;
pub use load::{BatchLoader, LoadStep};
pub use polymorphic::PolymorphicWrapStep;
