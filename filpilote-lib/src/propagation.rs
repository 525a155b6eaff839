//! Fan-out from a central to its rooms, and from rooms to their relays.

use crate::catalog::CommandPayload;
use crate::central::{CentralOrder, Regime};
use crate::entity::{ActuatorRef, StateSource};
use crate::error::HeatingResult;
use crate::room::{Resolution, RoomController};
use core::fmt;

/// Fire-and-forget delivery of a relay command. Must not block.
pub trait ActuatorSink {
    fn publish(&self, actuator: &ActuatorRef, payload: CommandPayload) -> HeatingResult<()>;
}

pub type RegimeObserver = Box<dyn Fn(&Regime) + Send>;

#[derive(Default)]
pub struct PropagationChannel {
    observers: Vec<RegimeObserver>,
}

impl fmt::Debug for PropagationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropagationChannel")
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl PropagationChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, observer: F)
    where
        F: Fn(&Regime) + Send + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    pub fn notify(&self, regime: &Regime) {
        for observer in &self.observers {
            observer(regime);
        }
    }

    /// Applies `order` to every room. A failing room is logged and skipped.
    pub fn broadcast<'a, I>(
        &self,
        order: &CentralOrder,
        rooms: I,
        states: &dyn StateSource,
        sink: &dyn ActuatorSink,
    ) -> Vec<Resolution>
    where
        I: IntoIterator<Item = &'a mut RoomController>,
    {
        rooms
            .into_iter()
            .filter_map(|room| match room.apply_central_order(order, states, sink) {
                Ok(resolution) => Some(resolution),
                Err(e) => {
                    tracing::error!(
                        "{}: central order {} not applied: {}",
                        room.id(),
                        order.preset,
                        e
                    );
                    None
                }
            })
            .collect()
    }
}
