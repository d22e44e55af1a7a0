//! Recording context for handler unit tests.

use nimbus_core::{Lpid, Message, ReversibleRng, SimContext, SimTime};

/// A `SimContext` that records sends instead of queueing them.
pub struct TestContext {
    pub now: SimTime,
    pub me: Lpid,
    pub lookahead: SimTime,
    pub rng: ReversibleRng,
    pub sent: Vec<(Lpid, SimTime, Message)>,
}

impl TestContext {
    pub fn new(me: Lpid) -> Self {
        Self {
            now: 0.0,
            me,
            lookahead: 0.1,
            rng: ReversibleRng::new(me),
            sent: Vec::new(),
        }
    }

    pub fn at(mut self, now: SimTime) -> Self {
        self.now = now;
        self
    }

    /// Pop the single message this handler is expected to have sent.
    pub fn only_send(&mut self) -> (Lpid, SimTime, Message) {
        assert_eq!(self.sent.len(), 1, "expected exactly one send");
        self.sent.pop().unwrap()
    }
}

impl SimContext for TestContext {
    fn now(&self) -> SimTime {
        self.now
    }

    fn me(&self) -> Lpid {
        self.me
    }

    fn lookahead(&self) -> SimTime {
        self.lookahead
    }

    fn send(&mut self, dest: Lpid, delay: SimTime, message: Message) {
        self.sent.push((dest, delay, message));
    }

    fn rng(&mut self) -> &mut ReversibleRng {
        &mut self.rng
    }
}
