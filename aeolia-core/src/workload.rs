// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Request stream of one I/O context: random block-aligned offsets,
//! an in-flight limit and an optional request budget.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dispatcher::JobContext;
use crate::engine::Delivery;
use crate::request::OpKind;

#[derive(Debug)]
pub struct IoStream {
    ctx: JobContext,
    rng: StdRng,
    op: OpKind,
    bs: u32,
    depth: u32,
    blocks: u64,
    limit: Option<u64>,
    issued: u64,
    completed: u64,
    in_flight: u32,
}

impl IoStream {
    /// `None` for a compute context.
    ///
    /// Synchronous delivery keeps one request in flight whatever the
    /// configured depth.
    pub fn new(ctx: JobContext, delivery: Delivery, capacity: u64, seed: u64) -> Option<Self> {
        let op = ctx.op_kind()?;
        let bs = ctx.block_size()?;
        let depth = match delivery {
            Delivery::Inline => 1,
            Delivery::Interrupt | Delivery::Poll => ctx.iodepth()?,
        };
        let rng = StdRng::seed_from_u64(seed ^ (u64::from(ctx.id.value()) << 32));
        Some(Self {
            limit: ctx.number_ios,
            ctx,
            rng,
            op,
            bs,
            depth,
            blocks: (capacity / u64::from(bs)).max(1),
            issued: 0,
            completed: 0,
            in_flight: 0,
        })
    }

    pub fn context(&self) -> &JobContext {
        &self.ctx
    }

    pub fn op_kind(&self) -> OpKind {
        self.op
    }

    pub fn block_size(&self) -> u32 {
        self.bs
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Room for another submission.
    pub fn wants_more(&self) -> bool {
        self.in_flight < self.depth && self.limit.map_or(true, |l| self.issued < l)
    }

    /// Every request of a limited stream has completed.
    pub fn is_done(&self) -> bool {
        self.limit.is_some_and(|l| self.completed >= l)
    }

    pub fn next_offset(&mut self) -> u64 {
        self.rng.gen_range(0..self.blocks) * u64::from(self.bs)
    }

    pub fn on_submitted(&mut self) {
        self.issued += 1;
        self.in_flight += 1;
    }

    pub fn on_completed(&mut self, n: usize) {
        self.completed += n as u64;
        self.in_flight = self.in_flight.saturating_sub(n as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobSpec;
    use crate::engine::CpuPolicy;
    use crate::request::IoType;
    use crate::types::{BlockSize, IoDepth};

    fn ctx(depth: u32, limit: Option<u64>) -> JobContext {
        let mut spec = JobSpec::io(
            "test",
            IoType::RandWrite,
            IoDepth::new(depth).unwrap(),
            BlockSize::new(4096).unwrap(),
            1,
            "0".parse().unwrap(),
            CpuPolicy::Split,
        );
        spec.number_ios = limit;
        JobContext::expand(&spec, 0).remove(0)
    }

    #[test]
    fn test_offsets_aligned_and_in_range() {
        let mut s = IoStream::new(ctx(4, None), Delivery::Poll, 1 << 20, 9).unwrap();
        for _ in 0..1000 {
            let off = s.next_offset();
            assert_eq!(off % 4096, 0);
            assert!(off + 4096 <= 1 << 20);
        }
        assert_eq!(s.op_kind(), OpKind::Write);
    }

    #[test]
    fn test_same_seed_same_offsets() {
        let mut a = IoStream::new(ctx(1, None), Delivery::Poll, 1 << 30, 5).unwrap();
        let mut b = IoStream::new(ctx(1, None), Delivery::Poll, 1 << 30, 5).unwrap();
        for _ in 0..16 {
            assert_eq!(a.next_offset(), b.next_offset());
        }
    }

    #[test]
    fn test_depth_and_limit() {
        let mut s = IoStream::new(ctx(2, Some(3)), Delivery::Interrupt, 1 << 20, 0).unwrap();
        s.on_submitted();
        s.on_submitted();
        assert!(!s.wants_more());
        s.on_completed(2);
        s.on_submitted();
        assert!(!s.wants_more());
        assert!(!s.is_done());
        s.on_completed(1);
        assert!(s.is_done());
    }

    #[test]
    fn test_inline_delivery_is_synchronous() {
        let mut s = IoStream::new(ctx(32, None), Delivery::Inline, 1 << 20, 0).unwrap();
        s.on_submitted();
        assert!(!s.wants_more());
    }

    #[test]
    fn test_compute_context_has_no_stream() {
        let spec = JobSpec::compute("comp", "0".parse().unwrap(), 1_000);
        let ctx = JobContext::expand(&spec, 0).remove(0);
        assert!(IoStream::new(ctx, Delivery::Poll, 1 << 20, 0).is_none());
    }
}
