//! Core module - event queue, dispatcher and worker supervision

mod dispatcher;
mod event_bus;
mod supervisor;

pub use dispatcher::{DispatchStats, Dispatcher, EventSink};
pub use event_bus::{
    Action, Actions, Event, EventClass, EventPublisher, EventQueue, EventReceiver, Priority, Topic,
};
pub use supervisor::{Shutdown, Supervisor};
