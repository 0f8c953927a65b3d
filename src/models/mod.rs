pub mod alert;
pub mod event;

pub use alert::{Alert, TriggerFamily, TriggerType};
pub use event::Event;
