//! Decision engine for a multi-zone fil pilote heating installation.
//!
//! A [`CentralController`] holds the home-wide regime. Every change is
//! pushed through the [`PropagationChannel`] to each [`RoomController`],
//! which resolves its local overrides and emits a relay command through an
//! [`ActuatorSink`]. Nothing in this crate performs I/O or suspends.

pub mod catalog;
pub mod central;
pub mod entity;
pub mod error;
pub mod installation;
pub mod preset;
pub mod propagation;
pub mod room;

pub use catalog::{CommandPayload, HysteresisTable, PresetCatalog, TemperatureSetpoints};
pub use central::{
    CentralCmd, CentralConfig, CentralController, CentralOrder, CentralState, Regime,
    TemperaturePolicy,
};
pub use entity::{ActuatorRef, CentralId, EntityRef, EntityState, RoomId, StateSource};
pub use error::{HeatingError, HeatingResult};
pub use installation::{Installation, Snapshot};
pub use preset::{heating_action, HvacAction, HvacMode, Preset};
pub use propagation::{ActuatorSink, PropagationChannel, RegimeObserver};
pub use room::{
    resolve_override, Reason, Resolution, RoomConfig, RoomController, RoomState, RoomStatus,
};
