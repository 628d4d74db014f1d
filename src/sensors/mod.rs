//! Sensor module - one-wire bus, alarm state machine and the alarm engine

mod engine;
mod onewire;
mod sensor;
mod simulator;
mod traits;

pub use engine::{AlarmEngine, CommandError, CycleReport, EngineHandle, EngineState, LiveState, SensorSnapshot};
pub use onewire::{parse_w1_slave, SysfsBus};
pub use sensor::{global_alarm_state, AlarmState, Sensor, Threshold, Transition};
pub use simulator::{demo_session, SimulatedBus};
pub use traits::{BusController, BusError};
