//! Dispatcher: partitions batches across a fixed worker pool.
//!
//! Each pooled worker is bound to a device queue for the life of the
//! dispatcher. A dispatch clones the shared progression once per worker,
//! advances the shared cursor by the worker's actual share, and joins the
//! pool before returning. The first worker error aborts the dispatch;
//! optimizer state already accumulated by other workers is not rolled back
//! and a dispatched batch always runs to completion (no cancellation).

use std::sync::Arc;

use parking_lot::Mutex;
use tensil_core::{Device, DeviceContext, Queue};

use crate::error::{DispatchError, Result};
use crate::op::BatchOp;
use crate::policy::{partition, Policy};
use crate::progression::Progression;

struct Worker {
    device: Device,
    queue: Queue,
}

pub struct Dispatcher {
    pool: rayon::ThreadPool,
    workers: Vec<Worker>,
}

impl Dispatcher {
    /// Build the pool from the policy: one worker (and one queue) per
    /// allocated thread, in device allocation order.
    pub fn new(ctx: &Arc<DeviceContext>, policy: &Policy) -> Result<Self> {
        let mut workers = Vec::new();
        for resource in policy.resources()? {
            for _ in 0..resource.threads {
                workers.push(Worker {
                    device: resource.device,
                    queue: ctx.queue(resource.device)?,
                });
            }
        }
        if workers.is_empty() {
            return Err(DispatchError::NoDevices);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.len())
            .build()
            .map_err(|e| DispatchError::Pool(e.to_string()))?;
        tracing::debug!(workers = workers.len(), "dispatcher pool ready");
        Ok(Self { pool, workers })
    }

    /// Number of pooled workers.
    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Devices the workers are bound to, one entry per worker.
    pub fn worker_devices(&self) -> Vec<Device> {
        self.workers.iter().map(|w| w.device).collect()
    }

    /// Consume `batch` samples: partition across the workers, hand every
    /// worker a private cursor copy, advance the shared cursor by each
    /// worker's actual share, run, join. Zero shares are skipped.
    pub fn dispatch(
        &self,
        progression: &mut Progression,
        batch: usize,
        op: &dyn BatchOp,
    ) -> Result<()> {
        if batch == 0 {
            return Ok(());
        }
        let shares = partition(batch, self.workers.len());
        tracing::debug!(batch, ?shares, "dispatching");

        let mut tasks: Vec<(Progression, usize, &Worker)> = Vec::new();
        for (worker, &share) in self.workers.iter().zip(&shares) {
            if share == 0 {
                continue;
            }
            tasks.push((progression.clone(), share, worker));
            progression.progress(share)?;
        }

        let failure: Mutex<Option<DispatchError>> = Mutex::new(None);
        self.pool.scope(|scope| {
            for (cursor, share, worker) in tasks {
                let failure = &failure;
                scope.spawn(move |_| {
                    if let Err(err) = run_worker(cursor, share, worker, op) {
                        let mut slot = failure.lock();
                        if slot.is_none() {
                            *slot = Some(err);
                        }
                    }
                });
            }
        });

        match failure.into_inner() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// One epoch: dispatch batches and apply the model update after each
    /// until `epoch_size` samples are consumed. The final batch may be
    /// short.
    pub fn run_epoch(
        &self,
        progression: &mut Progression,
        epoch_size: usize,
        batch: usize,
        op: &dyn BatchOp,
    ) -> Result<()> {
        if batch == 0 {
            return Ok(());
        }
        let mut remaining = epoch_size;
        while remaining > 0 {
            let step = remaining.min(batch);
            self.dispatch(progression, step, op)?;
            op.update_model()?;
            remaining -= step;
        }
        Ok(())
    }
}

/// Worker loop: pull slices bounded by the current tensor's remainder,
/// process, advance the private cursor, until the share is consumed.
fn run_worker(
    mut cursor: Progression,
    mut share: usize,
    worker: &Worker,
    op: &dyn BatchOp,
) -> Result<()> {
    while share > 0 {
        let pull = share.min(cursor.remaining_in_current()?);
        let input = cursor.input_slice(pull)?;
        let target = cursor.target_slice(pull)?;
        op.process(&input, &target, &worker.queue)?;
        cursor.progress(pull)?;
        share -= pull;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::BatchAccumulator;
    use crate::samples::SampleSet;
    use tensil_core::{ContextConfig, Tensor};

    fn setup(depths: &[usize], threads: usize) -> (Arc<DeviceContext>, Dispatcher, Progression) {
        let ctx = DeviceContext::new(ContextConfig::default()).unwrap();
        let q = ctx.default_queue();
        let set = SampleSet::new();
        for &depth in depths {
            let input = Tensor::from_host(&vec![1.0; 4 * depth], 2, 2, depth, q).unwrap();
            let target = Tensor::from_host(&vec![0.0; depth], 1, 1, depth, q).unwrap();
            set.push(input, target).unwrap();
        }
        let policy = Policy {
            max_threads: threads,
            devices: vec![Device::Cpu],
            multithread_per_device: true,
        };
        let dispatcher = Dispatcher::new(&ctx, &policy).unwrap();
        let progression = Progression::new(set).unwrap();
        (ctx, dispatcher, progression)
    }

    #[test]
    fn test_dispatch_consumes_exactly_the_batch() {
        let (_ctx, dispatcher, mut progression) = setup(&[5, 3], 3);
        let op = BatchAccumulator::new();
        dispatcher.dispatch(&mut progression, 6, &op).unwrap();
        assert_eq!(op.samples(), 6);
        // shared cursor advanced by the full batch: (5,3) + 6 -> (1,1)
        assert_eq!((progression.index(), progression.offset()), (1, 1));
    }

    #[test]
    fn test_single_worker_matches_multi_worker_totals() {
        let op_single = BatchAccumulator::new();
        let op_multi = BatchAccumulator::new();
        let (_c1, d1, mut p1) = setup(&[4, 4, 4], 1);
        let (_c2, d2, mut p2) = setup(&[4, 4, 4], 4);
        d1.dispatch(&mut p1, 10, &op_single).unwrap();
        d2.dispatch(&mut p2, 10, &op_multi).unwrap();
        assert_eq!(op_single.samples(), op_multi.samples());
        assert_eq!(op_single.sum(), op_multi.sum());
        assert_eq!((p1.index(), p1.offset()), (p2.index(), p2.offset()));
    }

    #[test]
    fn test_run_epoch_updates_after_every_batch() {
        let (_ctx, dispatcher, mut progression) = setup(&[6, 6], 2);
        let op = BatchAccumulator::new();
        dispatcher.run_epoch(&mut progression, 10, 4, &op).unwrap();
        assert_eq!(op.samples(), 10);
        // batches of 4, 4, 2
        assert_eq!(op.updates(), 3);
    }

    struct FailingOp;

    impl BatchOp for FailingOp {
        fn process(&self, _input: &Tensor, _target: &Tensor, _queue: &Queue) -> Result<()> {
            Err(DispatchError::Op("poisoned batch".into()))
        }

        fn update_model(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_worker_failure_propagates() {
        let (_ctx, dispatcher, mut progression) = setup(&[8], 2);
        let err = dispatcher.dispatch(&mut progression, 4, &FailingOp).unwrap_err();
        assert!(matches!(err, DispatchError::Op(_)));
    }

    #[test]
    fn test_batch_larger_than_one_tensor_cycles() {
        let (_ctx, dispatcher, mut progression) = setup(&[3, 2], 2);
        let op = BatchAccumulator::new();
        // batch spans both tensors and wraps into a second pass
        dispatcher.dispatch(&mut progression, 7, &op).unwrap();
        assert_eq!(op.samples(), 7);
        assert_eq!((progression.index(), progression.offset()), (0, 2));
    }
}
