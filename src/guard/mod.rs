pub mod agent;
pub mod input;
pub mod state;

pub use agent::{GuardAgent, GuardSignal, MenuAction};
pub use input::{InputEvent, InputKind, Key, Target, Verdict};
pub use state::{GuardEffect, GuardState, GuardView, Notice};
