//! Switch LP - a queue-less forwarder.
//!
//! Switches are a G/G/inf abstraction: every packet is delayed by the same
//! load-adjusted communication time regardless of contention, so the only
//! state is the metric counters and no saved scratch is needed.

use crate::SwitchConfiguration;
use nimbus_core::routing::RoutingTable;
use nimbus_core::{Lpid, Message, SimContext, SimError};
use nimbus_metrics::{NodeMetrics, SwitchMetrics};

/// State of one switch LP.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchState {
    pub conf: SwitchConfiguration,
    pub metrics: SwitchMetrics,
}

impl SwitchState {
    pub fn new(conf: SwitchConfiguration) -> Self {
        Self {
            conf,
            metrics: SwitchMetrics::default(),
        }
    }

    pub fn init(&mut self, ctx: &mut dyn SimContext) -> Result<(), SimError> {
        self.metrics = SwitchMetrics::default();

        tracing::debug!(
            switch = ctx.me(),
            bandwidth = self.conf.bandwidth,
            latency = self.conf.latency,
            "switch initialized"
        );
        Ok(())
    }

    pub fn forward(
        &mut self,
        msg: &mut Message,
        ctx: &mut dyn SimContext,
        routes: &RoutingTable,
    ) -> Result<(), SimError> {
        let comm_size = msg.task.comm_size;
        let comm_time = self.conf.time_to_comm(comm_size);

        if msg.downward {
            self.metrics.downward_comm_mbits += comm_size;
            self.metrics.downward_comm_packets += 1;
        } else {
            self.metrics.upward_comm_mbits += comm_size;
            self.metrics.upward_comm_packets += 1;
        }

        let route = routes.get_route(msg.task.origin, msg.task.dest)?;
        let next_hop = route.hop(msg.route_offset).ok_or(SimError::PolicyViolation(
            "switch consulted a route offset past the path",
        ))?;

        let mut out = Message::arrival(msg.task);
        out.task_processed = msg.task_processed;
        out.downward = msg.downward;
        out.route_offset = if msg.downward {
            msg.route_offset + 1
        } else {
            msg.route_offset.saturating_sub(1)
        };
        out.previous_service = ctx.me();
        out.vm = msg.vm;
        out.target_vm = msg.target_vm;

        ctx.send(next_hop, comm_time, out);
        Ok(())
    }

    pub fn reverse(&mut self, msg: &mut Message, _ctx: &mut dyn SimContext) -> Result<(), SimError> {
        let comm_size = msg.task.comm_size;

        if msg.downward {
            self.metrics.downward_comm_mbits -= comm_size;
            self.metrics.downward_comm_packets -= 1;
        } else {
            self.metrics.upward_comm_mbits -= comm_size;
            self.metrics.upward_comm_packets -= 1;
        }
        Ok(())
    }

    pub fn finish(&self, gid: Lpid, node: &mut NodeMetrics) {
        node.report_switch(gid, &self.metrics);
    }
}
