// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Filter-worker execution over the device population.
//!
//! A worker is a user-supplied predicate with its own accumulator,
//! typically used to build a device subset for serialization. Workers run
//! over the full index or a caller-provided subset, read-write (the
//! executor hands them the locked device state) or read-only, optionally
//! batched so long scans never starve the packet path.
//!
//! Guarantees within one run: each device is visited at most once, in
//! non-decreasing ordinal order; a device removed mid-run is skipped from
//! the point of removal; a device inserted mid-run may or may not be
//! visited. Between batches nothing is locked, so workers must tolerate
//! the index changing under them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::device::{DeviceRef, DeviceState};
use crate::index::DeviceIndex;

/// Default devices per batch for batched workers.
pub const DEFAULT_WORKER_BATCH: usize = 1024;

/// A worker that may mutate device state. The executor holds the
/// per-device write lock across each `match_device` call.
pub trait FilterWorker: Send {
    fn match_device(&mut self, device: &DeviceRef, state: &mut DeviceState) -> bool;

    /// Receives the matched set once the run completes (or is cancelled).
    fn set_matched(&mut self, _matched: Vec<DeviceRef>) {}
}

/// A worker that must not mutate device state; runs under the per-device
/// read lock so concurrent readonly workers never serialize each other.
pub trait ReadonlyFilterWorker: Send {
    fn match_device(&mut self, device: &DeviceRef, state: &DeviceState) -> bool;

    fn set_matched(&mut self, _matched: Vec<DeviceRef>) {}
}

/// Execution knobs for one worker run.
#[derive(Clone)]
pub struct WorkerOptions {
    /// Process in ordinal-ordered chunks, releasing everything between
    /// chunks.
    pub batch: bool,

    /// Devices per chunk when batched.
    pub batch_size: usize,

    /// Cooperative cancel flag, checked between chunks.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            batch: true,
            batch_size: DEFAULT_WORKER_BATCH,
            cancel: None,
        }
    }
}

impl WorkerOptions {
    pub fn unbatched() -> Self {
        Self {
            batch: false,
            ..Default::default()
        }
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Acquire))
    }
}

enum WorkerSource<'a> {
    /// Snapshot of the whole index, taken at run start.
    All,
    /// Caller-provided subset, copied so the caller's vector stays free.
    Copied(Vec<DeviceRef>),
    /// Caller-provided subset, borrowed; the caller guarantees stability.
    Borrowed(&'a [DeviceRef]),
}

/// Run a read-write worker over every tracked device.
pub fn match_on_devices(
    index: &DeviceIndex,
    worker: &mut dyn FilterWorker,
    opts: &WorkerOptions,
) -> Vec<DeviceRef> {
    run(index, WorkerSource::All, opts, &mut |device| {
        let mut state = device.state_mut();
        worker.match_device(device, &mut state)
    })
    .finish_rw(worker)
}

/// Run a read-write worker over a caller-provided subset (copied).
pub fn match_on_devices_subset(
    index: &DeviceIndex,
    source: &[DeviceRef],
    worker: &mut dyn FilterWorker,
    opts: &WorkerOptions,
) -> Vec<DeviceRef> {
    run(
        index,
        WorkerSource::Copied(source.to_vec()),
        opts,
        &mut |device| {
            let mut state = device.state_mut();
            worker.match_device(device, &mut state)
        },
    )
    .finish_rw(worker)
}

/// Run a read-write worker over a borrowed subset without copying. The
/// caller must not change the slice for the duration of the run.
pub fn match_on_devices_raw(
    index: &DeviceIndex,
    source: &[DeviceRef],
    worker: &mut dyn FilterWorker,
    opts: &WorkerOptions,
) -> Vec<DeviceRef> {
    run(index, WorkerSource::Borrowed(source), opts, &mut |device| {
        let mut state = device.state_mut();
        worker.match_device(device, &mut state)
    })
    .finish_rw(worker)
}

/// Run a read-only worker over every tracked device.
pub fn do_readonly_device_work(
    index: &DeviceIndex,
    worker: &mut dyn ReadonlyFilterWorker,
    opts: &WorkerOptions,
) -> Vec<DeviceRef> {
    run(index, WorkerSource::All, opts, &mut |device| {
        let state = device.state();
        worker.match_device(device, &state)
    })
    .finish_ro(worker)
}

/// Run a read-only worker over a caller-provided subset (copied).
pub fn do_readonly_device_work_subset(
    index: &DeviceIndex,
    source: &[DeviceRef],
    worker: &mut dyn ReadonlyFilterWorker,
    opts: &WorkerOptions,
) -> Vec<DeviceRef> {
    run(
        index,
        WorkerSource::Copied(source.to_vec()),
        opts,
        &mut |device| {
            let state = device.state();
            worker.match_device(device, &state)
        },
    )
    .finish_ro(worker)
}

/// Run a read-only worker over a borrowed subset without copying.
pub fn do_readonly_device_work_raw(
    index: &DeviceIndex,
    source: &[DeviceRef],
    worker: &mut dyn ReadonlyFilterWorker,
    opts: &WorkerOptions,
) -> Vec<DeviceRef> {
    run(index, WorkerSource::Borrowed(source), opts, &mut |device| {
        let state = device.state();
        worker.match_device(device, &state)
    })
    .finish_ro(worker)
}

struct RunResult {
    matched: Vec<DeviceRef>,
}

impl RunResult {
    fn finish_rw(self, worker: &mut dyn FilterWorker) -> Vec<DeviceRef> {
        worker.set_matched(self.matched.clone());
        self.matched
    }

    fn finish_ro(self, worker: &mut dyn ReadonlyFilterWorker) -> Vec<DeviceRef> {
        worker.set_matched(self.matched.clone());
        self.matched
    }
}

fn run(
    index: &DeviceIndex,
    source: WorkerSource<'_>,
    opts: &WorkerOptions,
    visit: &mut dyn FnMut(&DeviceRef) -> bool,
) -> RunResult {
    // Materialize the ordinal-ordered work list. The index snapshot is
    // already ordinal-ordered; subsets are sorted here.
    let all_snapshot;
    let sorted_subset;
    let devices: &[DeviceRef] = match source {
        WorkerSource::All => {
            all_snapshot = index.snapshot();
            &all_snapshot
        }
        WorkerSource::Copied(mut vec) => {
            vec.sort_unstable_by_key(|d| d.ordinal());
            sorted_subset = vec;
            &sorted_subset
        }
        WorkerSource::Borrowed(slice) => {
            if slice.windows(2).all(|w| w[0].ordinal() <= w[1].ordinal()) {
                slice
            } else {
                let mut vec = slice.to_vec();
                vec.sort_unstable_by_key(|d| d.ordinal());
                sorted_subset = vec;
                &sorted_subset
            }
        }
    };

    let chunk = if opts.batch {
        opts.batch_size.max(1)
    } else {
        devices.len().max(1)
    };

    let mut matched = Vec::new();
    for batch in devices.chunks(chunk) {
        if opts.cancelled() {
            break;
        }
        for device in batch {
            // Skip devices removed since the work list was built.
            if !index.contains(&device.key()) {
                continue;
            }
            if visit(device) {
                matched.push(Arc::clone(device));
            }
        }
        if opts.batch {
            std::thread::yield_now();
        }
    }

    RunResult { matched }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use airscout_types::{DeviceKey, MacAddr};

    fn build_index(n: u8) -> DeviceIndex {
        let index = DeviceIndex::new();
        for i in 0..n {
            let mac: MacAddr = format!("00:00:00:00:00:{:02x}", i).parse().unwrap();
            index
                .insert(Device::new(DeviceKey::new(1, mac), mac, 1, "t", 0, false))
                .unwrap();
        }
        index
    }

    struct CollectOrdinals {
        seen: Vec<usize>,
        matched: usize,
    }

    impl ReadonlyFilterWorker for CollectOrdinals {
        fn match_device(&mut self, device: &DeviceRef, _state: &DeviceState) -> bool {
            self.seen.push(device.ordinal());
            device.ordinal() % 2 == 0
        }

        fn set_matched(&mut self, matched: Vec<DeviceRef>) {
            self.matched = matched.len();
        }
    }

    #[test]
    fn test_visits_in_ordinal_order() {
        let index = build_index(10);
        let mut worker = CollectOrdinals {
            seen: Vec::new(),
            matched: 0,
        };
        let opts = WorkerOptions {
            batch: true,
            batch_size: 3,
            cancel: None,
        };
        let matched = do_readonly_device_work(&index, &mut worker, &opts);

        assert_eq!(worker.seen, (0..10).collect::<Vec<_>>());
        assert_eq!(matched.len(), 5);
        assert_eq!(worker.matched, 5);
    }

    #[test]
    fn test_subset_sorted_before_visiting() {
        let index = build_index(6);
        let snapshot = index.snapshot();
        // deliberately shuffled subset
        let subset = vec![
            Arc::clone(&snapshot[4]),
            Arc::clone(&snapshot[1]),
            Arc::clone(&snapshot[3]),
        ];

        let mut worker = CollectOrdinals {
            seen: Vec::new(),
            matched: 0,
        };
        do_readonly_device_work_subset(&index, &subset, &mut worker, &WorkerOptions::default());
        assert_eq!(worker.seen, vec![1, 3, 4]);
    }

    #[test]
    fn test_removed_device_skipped() {
        let index = build_index(4);
        let snapshot = index.snapshot();
        index.remove(&snapshot[2].key(), 100);

        let mut worker = CollectOrdinals {
            seen: Vec::new(),
            matched: 0,
        };
        // run over the stale snapshot; ordinal 2 must be skipped
        do_readonly_device_work_raw(&index, &snapshot, &mut worker, &WorkerOptions::default());
        assert_eq!(worker.seen, vec![0, 1, 3]);
    }

    #[test]
    fn test_cancel_between_batches() {
        let index = build_index(10);
        let cancel = Arc::new(AtomicBool::new(false));

        struct CancelAfterFirst {
            cancel: Arc<AtomicBool>,
            visited: usize,
        }
        impl ReadonlyFilterWorker for CancelAfterFirst {
            fn match_device(&mut self, _device: &DeviceRef, _state: &DeviceState) -> bool {
                self.visited += 1;
                self.cancel.store(true, Ordering::Release);
                true
            }
        }

        let mut worker = CancelAfterFirst {
            cancel: Arc::clone(&cancel),
            visited: 0,
        };
        let opts = WorkerOptions {
            batch: true,
            batch_size: 2,
            cancel: Some(cancel),
        };
        do_readonly_device_work(&index, &mut worker, &opts);
        // first batch completes, second never starts
        assert_eq!(worker.visited, 2);
    }

    #[test]
    fn test_rw_worker_mutates_under_lock() {
        let index = build_index(3);

        struct Tagger;
        impl FilterWorker for Tagger {
            fn match_device(&mut self, _device: &DeviceRef, state: &mut DeviceState) -> bool {
                state.set_tag("swept", "yes");
                true
            }
        }

        let matched = match_on_devices(&index, &mut Tagger, &WorkerOptions::default());
        assert_eq!(matched.len(), 3);
        for device in index.snapshot().iter() {
            assert_eq!(
                device.state().tags.get("swept").map(String::as_str),
                Some("yes")
            );
        }
    }
}
