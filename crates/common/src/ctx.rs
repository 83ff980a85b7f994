//! Per-transaction context
//!
//! The framework creates one `Ctx` per transaction (and one for the
//! end-of-block hooks), threads it by reference through every call, and
//! drains the event sink after commit. Nothing in the engine reads block
//! coordinates from anywhere else.

use crate::events::Event;

#[derive(Debug, Clone, Default)]
pub struct Ctx {
    pub block_height: u64,
    pub block_time_ms: u64,
    events: Vec<Event>,
}

impl Ctx {
    pub fn new(block_height: u64, block_time_ms: u64) -> Self {
        Self {
            block_height,
            block_time_ms,
            events: Vec::new(),
        }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dec::Dec;

    #[test]
    fn test_events_accumulate_and_drain() {
        let mut ctx = Ctx::new(7, 7_000);
        ctx.emit(Event::ReserveSnapshotSaved {
            pair: "ubtc:unusd".into(),
            base_reserve: Dec::ONE,
            quote_reserve: Dec::ONE,
            block_height: 7,
            block_time_ms: 7_000,
        });
        assert_eq!(ctx.events().len(), 1);
        let drained = ctx.take_events();
        assert_eq!(drained.len(), 1);
        assert!(ctx.events().is_empty());
    }
}
