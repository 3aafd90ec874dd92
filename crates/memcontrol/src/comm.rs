//! Collective-communication boundary used by the reporting protocol.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::{Arc, Barrier};

/// Rank that receives reductions and prints the aggregate.
pub const ROOT: usize = 0;

/// The collective operations a reporting round needs.
///
/// Every method is collective except `rank` and `size`: all members of the
/// group must call it, in the same order.
pub trait Communicator {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Blocks until every member has arrived.
    fn barrier(&self);

    /// Element-wise sum of `local` across the group, delivered to [`ROOT`] only.
    fn reduce_sum(&self, local: &[u64]) -> Option<Vec<u64>>;

    fn is_root(&self) -> bool {
        self.rank() == ROOT
    }
}

impl<C: Communicator + ?Sized> Communicator for &C {
    fn rank(&self) -> usize {
        (**self).rank()
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn barrier(&self) {
        (**self).barrier()
    }

    fn reduce_sum(&self, local: &[u64]) -> Option<Vec<u64>> {
        (**self).reduce_sum(local)
    }
}

/// A group of one: barriers return immediately and the reduction is the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl Communicator for SingleProcess {
    fn rank(&self) -> usize {
        ROOT
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn reduce_sum(&self, local: &[u64]) -> Option<Vec<u64>> {
        Some(local.to_vec())
    }
}

/// Builds groups of in-process ranks, one endpoint per thread.
pub struct LocalGroup;

impl LocalGroup {
    /// Returns `size` endpoints ordered by rank. Each must be moved to its own thread.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(size: usize) -> Vec<LocalComm> {
        if size == 0 {
            return Vec::new();
        }

        let barrier = Arc::new(Barrier::new(size));
        // one channel per non-root rank keeps rounds from mixing
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (1..size).map(|_| unbounded::<Vec<u64>>()).unzip();

        let mut root_inbox = Some(receivers);
        (0..size)
            .map(|rank| LocalComm {
                rank,
                size,
                barrier: Arc::clone(&barrier),
                to_root: if rank == ROOT {
                    None
                } else {
                    Some(senders[rank - 1].clone())
                },
                inbox: if rank == ROOT {
                    root_inbox.take().unwrap_or_default()
                } else {
                    Vec::new()
                },
            })
            .collect()
    }
}

/// One rank of a [`LocalGroup`].
pub struct LocalComm {
    rank: usize,
    size: usize,
    barrier: Arc<Barrier>,
    to_root: Option<Sender<Vec<u64>>>,
    inbox: Vec<Receiver<Vec<u64>>>,
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        self.barrier.wait();
    }

    fn reduce_sum(&self, local: &[u64]) -> Option<Vec<u64>> {
        if let Some(to_root) = &self.to_root {
            // the root holds every receiver for the group's lifetime
            let _ = to_root.send(local.to_vec());
            return None;
        }

        let mut total = local.to_vec();
        for inbox in &self.inbox {
            let Ok(contribution) = inbox.recv() else {
                continue;
            };
            if contribution.len() > total.len() {
                total.resize(contribution.len(), 0);
            }
            for (slot, value) in total.iter_mut().zip(contribution) {
                *slot += value;
            }
        }
        Some(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_single_process_reduction_is_identity() {
        let comm = SingleProcess;
        assert!(comm.is_root());
        assert_eq!(comm.reduce_sum(&[1, 2, 3]), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_local_group_sums_on_root_only() {
        let handles: Vec<_> = LocalGroup::new(4)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let rank = comm.rank() as u64;
                    let first = comm.reduce_sum(&[rank, 1]);
                    let second = comm.reduce_sum(&[10 * rank, 2]);
                    comm.barrier();
                    (comm.rank(), first, second)
                })
            })
            .collect();

        for handle in handles {
            let (rank, first, second) = handle.join().unwrap();
            if rank == ROOT {
                assert_eq!(first, Some(vec![6, 4]));
                assert_eq!(second, Some(vec![60, 8]));
            } else {
                assert_eq!(first, None);
                assert_eq!(second, None);
            }
        }
    }

    #[test]
    fn test_empty_group() {
        assert!(LocalGroup::new(0).is_empty());
    }
}
