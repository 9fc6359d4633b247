pub mod completion;
pub mod dispatcher;

pub use dispatcher::{track_metrics, Dispatcher};
