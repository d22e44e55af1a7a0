//! Link LP - a bidirectional queueing channel.
//!
//! A link connects exactly two services and keeps one G/G/1-style next-free
//! timestamp per direction. The pre-update next-free time is stashed in the
//! event's saved scratch, so reverse restores it bit-identically; both
//! next-free fields are monotonically non-decreasing along any forward
//! history.

use crate::LinkConfiguration;
use nimbus_core::users::UserRegistry;
use nimbus_core::{Lpid, Message, Saved, SimContext, SimError, SimTime};
use nimbus_metrics::{LinkMetrics, NodeMetrics};

/// State of one link LP.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkState {
    /// Master-side end.
    pub from: Lpid,

    /// Slave-side end.
    pub to: Lpid,

    pub conf: LinkConfiguration,
    pub metrics: LinkMetrics,

    /// When the slave-to-master channel frees up.
    pub upward_next_free: SimTime,

    /// When the master-to-slave channel frees up.
    pub downward_next_free: SimTime,
}

impl LinkState {
    pub fn new(from: Lpid, to: Lpid, conf: LinkConfiguration) -> Self {
        Self {
            from,
            to,
            conf,
            metrics: LinkMetrics::default(),
            upward_next_free: 0.0,
            downward_next_free: 0.0,
        }
    }

    pub fn init(&mut self, ctx: &mut dyn SimContext) -> Result<(), SimError> {
        self.metrics = LinkMetrics::default();
        self.upward_next_free = 0.0;
        self.downward_next_free = 0.0;

        tracing::debug!(link = ctx.me(), from = self.from, to = self.to, "link initialized");
        Ok(())
    }

    pub fn forward(&mut self, msg: &mut Message, ctx: &mut dyn SimContext) -> Result<(), SimError> {
        let comm_size = msg.task.comm_size;
        let comm_time = self.conf.time_to_comm(comm_size);

        let next_free = if msg.downward {
            self.downward_next_free
        } else {
            self.upward_next_free
        };

        let waiting = (next_free - ctx.now()).max(0.0);
        let departure = waiting + comm_time;

        // Pre-update queue state goes into the event scratch.
        msg.saved = Saved::Link { next_free };

        if msg.downward {
            self.metrics.downward_comm_mbits += comm_size;
            self.metrics.downward_comm_packets += 1;
            self.metrics.downward_comm_time += comm_time;
            self.metrics.downward_waiting_time += waiting;
            self.downward_next_free = ctx.now() + departure;
        } else {
            self.metrics.upward_comm_mbits += comm_size;
            self.metrics.upward_comm_packets += 1;
            self.metrics.upward_comm_time += comm_time;
            self.metrics.upward_waiting_time += waiting;
            self.upward_next_free = ctx.now() + departure;
        }

        let send_to = if msg.downward { self.to } else { self.from };

        let mut out = Message::arrival(msg.task);
        out.downward = msg.downward;
        out.task_processed = msg.task_processed;
        out.route_offset = msg.route_offset;
        out.previous_service = ctx.me();
        out.vm = msg.vm;
        out.target_vm = msg.target_vm;

        ctx.send(send_to, departure, out);
        Ok(())
    }

    pub fn reverse(&mut self, msg: &mut Message, ctx: &mut dyn SimContext) -> Result<(), SimError> {
        let Saved::Link { next_free } = msg.saved else {
            return Err(SimError::PolicyViolation(
                "link reverse without saved queue state",
            ));
        };

        let comm_size = msg.task.comm_size;
        let comm_time = self.conf.time_to_comm(comm_size);
        let waiting = (next_free - ctx.now()).max(0.0);

        if msg.downward {
            self.downward_next_free = next_free;
            self.metrics.downward_comm_mbits -= comm_size;
            self.metrics.downward_comm_packets -= 1;
            self.metrics.downward_comm_time -= comm_time;
            self.metrics.downward_waiting_time -= waiting;
        } else {
            self.upward_next_free = next_free;
            self.metrics.upward_comm_mbits -= comm_size;
            self.metrics.upward_comm_packets -= 1;
            self.metrics.upward_comm_time -= comm_time;
            self.metrics.upward_waiting_time -= waiting;
        }

        msg.saved = Saved::None;
        Ok(())
    }

    /// Charge the owner's communication accounting. Commit-only.
    pub fn commit(&mut self, msg: &Message, users: &mut UserRegistry, now: SimTime) {
        let Saved::Link { next_free } = msg.saved else {
            return;
        };

        if let Some(user) = users.by_id_mut(msg.task.owner) {
            user.metrics.comm_time += self.conf.time_to_comm(msg.task.comm_size);
            user.metrics.comm_waiting_time += (next_free - now).max(0.0);
        }
    }

    pub fn finish(&self, gid: Lpid, node: &mut NodeMetrics) {
        node.report_link(gid, &self.metrics);
        node.observe_simulation_time(self.upward_next_free.max(self.downward_next_free));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestContext;
    use nimbus_core::Task;

    fn make_link() -> LinkState {
        // Scenario parameters: bandwidth 50, load 0, latency 1.
        LinkState::new(0, 2, LinkConfiguration::new(50.0, 0.0, 1.0))
    }

    fn downward_msg() -> Message {
        let mut msg = Message::arrival(Task {
            comm_size: 80.0,
            origin: 0,
            dest: 2,
            ..Task::default()
        });
        msg.route_offset = 1;
        msg.previous_service = 0;
        msg
    }

    #[test]
    fn forward_queues_and_relays_downward() {
        let mut link = make_link();
        let mut ctx = TestContext::new(1);
        let mut msg = downward_msg();

        link.forward(&mut msg, &mut ctx).unwrap();

        let (dest, delay, out) = ctx.only_send();
        assert_eq!(dest, 2);
        assert!((delay - 2.6).abs() < 1e-12);
        assert_eq!(out.previous_service, 1);
        assert_eq!(out.route_offset, 1);
        assert!(out.downward);

        assert!((link.downward_next_free - 2.6).abs() < 1e-12);
        assert_eq!(link.upward_next_free, 0.0);
        assert_eq!(link.metrics.downward_comm_packets, 1);
        assert_eq!(msg.saved, Saved::Link { next_free: 0.0 });
    }

    #[test]
    fn upward_uses_the_other_queue() {
        let mut link = make_link();
        let mut ctx = TestContext::new(1);

        let mut msg = downward_msg();
        msg.downward = false;
        msg.task_processed = true;

        link.forward(&mut msg, &mut ctx).unwrap();

        let (dest, _, out) = ctx.only_send();
        assert_eq!(dest, 0);
        assert!(!out.downward);
        assert!(out.task_processed);
        assert!((link.upward_next_free - 2.6).abs() < 1e-12);
        assert_eq!(link.downward_next_free, 0.0);
    }

    #[test]
    fn busy_link_adds_waiting() {
        let mut link = make_link();
        link.downward_next_free = 5.0;

        let mut ctx = TestContext::new(1).at(2.0);
        let mut msg = downward_msg();
        link.forward(&mut msg, &mut ctx).unwrap();

        // waiting 3.0 + comm 2.6
        let (_, delay, _) = ctx.only_send();
        assert!((delay - 5.6).abs() < 1e-12);
        assert!((link.downward_next_free - 7.6).abs() < 1e-12);
        assert!((link.metrics.downward_waiting_time - 3.0).abs() < 1e-12);
    }

    #[test]
    fn forward_reverse_is_bit_identical() {
        let mut link = make_link();
        link.downward_next_free = 1.25;
        let snapshot = link.clone();

        let mut ctx = TestContext::new(1).at(0.5);
        let mut msg = downward_msg();

        link.forward(&mut msg, &mut ctx).unwrap();
        assert_ne!(link, snapshot);

        link.reverse(&mut msg, &mut ctx).unwrap();
        assert_eq!(link, snapshot);
        assert_eq!(
            link.downward_next_free.to_bits(),
            snapshot.downward_next_free.to_bits()
        );
    }

    #[test]
    fn reverse_without_scratch_is_a_bug() {
        let mut link = make_link();
        let mut ctx = TestContext::new(1);
        let mut msg = downward_msg();

        let result = link.reverse(&mut msg, &mut ctx);
        assert!(matches!(result, Err(SimError::PolicyViolation(_))));
    }

    #[test]
    fn next_free_never_decreases_forward() {
        let mut link = make_link();
        let mut previous = 0.0;

        for step in 0..10 {
            let mut ctx = TestContext::new(1).at(step as f64 * 0.5);
            let mut msg = downward_msg();
            link.forward(&mut msg, &mut ctx).unwrap();

            assert!(link.downward_next_free >= previous);
            previous = link.downward_next_free;
        }
    }

    proptest::proptest! {
        #[test]
        fn forward_reverse_identity_holds_for_any_queue_state(
            next_free in 0.0f64..1e4,
            now in 0.0f64..1e4,
            comm_size in 1.0f64..1e3,
            downward: bool,
        ) {
            let mut link = make_link();
            if downward {
                link.downward_next_free = next_free;
            } else {
                link.upward_next_free = next_free;
            }
            let snapshot = link.clone();

            let mut ctx = TestContext::new(1).at(now);
            let mut msg = downward_msg();
            msg.downward = downward;
            msg.task.comm_size = comm_size;

            link.forward(&mut msg, &mut ctx).unwrap();
            link.reverse(&mut msg, &mut ctx).unwrap();

            proptest::prop_assert_eq!(link, snapshot);
        }
    }

    #[test]
    fn commit_charges_the_owner() {
        let mut users = UserRegistry::new();
        let alice = users.register("alice", 100.0).unwrap();

        let mut link = make_link();
        let mut ctx = TestContext::new(1);
        let mut msg = downward_msg();
        msg.task.owner = alice;

        link.forward(&mut msg, &mut ctx).unwrap();
        link.commit(&msg, &mut users, 0.0);

        let metrics = &users.by_id(alice).unwrap().metrics;
        assert!((metrics.comm_time - 2.6).abs() < 1e-12);
        assert_eq!(metrics.comm_waiting_time, 0.0);
    }
}
