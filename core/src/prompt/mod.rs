mod registry;

pub use registry::{ErrorResponsePolicy, PromptCancel, PromptRegistry, PromptWait};
