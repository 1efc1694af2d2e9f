mod forward;
mod interactive;

pub use forward::ForwardingPromptHandler;
pub use interactive::{
    parse_answer, render_question, InteractivePromptHandler, PromptTerminal, StdioTerminal,
};
