mod errors;
pub mod finetune;
pub mod lm;
pub mod settings;

pub use errors::{BackendError, ErrorClass, LmError};
pub use finetune::*;
pub use lm::*;
