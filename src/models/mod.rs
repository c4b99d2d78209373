pub mod account;
pub mod conversion;
pub mod plan;

pub use account::Account;
pub use conversion::{ConversionOutcome, ConversionRequest, MediaKind};
pub use plan::{Plan, PlanCatalog};
