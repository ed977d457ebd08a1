//! In-process cohort: one tokio task per peer.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future;
use log::debug;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::Barrier;

use super::{CommError, CommResult, Transport};

struct Shared<M> {
    senders: Vec<mpsc::UnboundedSender<M>>,
    barrier: Barrier,
    sent: AtomicU64,
    handled: AtomicU64,
    cells: Mutex<Vec<u64>>,
}

/// One peer's endpoint into a [`LocalCohort`].
pub struct CohortPeer<M> {
    rank: u32,
    shared: Arc<Shared<M>>,
    inbox: mpsc::UnboundedReceiver<M>,
}

impl<M: Send + 'static> CohortPeer<M> {
    fn drain(&mut self, apply: &mut (dyn FnMut(M) + Send)) -> usize {
        let mut handled = 0;
        loop {
            match self.inbox.try_recv() {
                Ok(message) => {
                    apply(message);
                    self.shared.handled.fetch_add(1, Ordering::SeqCst);
                    handled += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return handled,
            }
        }
    }

    async fn all_reduce(&mut self, value: u64, fold: fn(u64, u64) -> u64) -> CommResult<u64> {
        {
            let mut cells = self
                .shared
                .cells
                .lock()
                .map_err(|_| CommError::cohort("reduction cells poisoned"))?;
            cells[self.rank as usize] = value;
        }
        self.shared.barrier.wait().await;
        let folded = {
            let cells = self
                .shared
                .cells
                .lock()
                .map_err(|_| CommError::cohort("reduction cells poisoned"))?;
            cells.iter().copied().fold(None, |acc, v| {
                Some(match acc {
                    None => v,
                    Some(acc) => fold(acc, v),
                })
            })
        };
        // Second rendezvous so the cells can be reused by the next
        // collective without racing a slow reader.
        self.shared.barrier.wait().await;
        folded.ok_or_else(|| CommError::cohort("empty cohort"))
    }
}

#[async_trait]
impl<M: Send + 'static> Transport<M> for CohortPeer<M> {
    fn rank(&self) -> u32 {
        self.rank
    }

    fn size(&self) -> u32 {
        self.shared.senders.len() as u32
    }

    fn send(&mut self, dest: u32, message: M) -> CommResult<()> {
        let sender = self
            .shared
            .senders
            .get(dest as usize)
            .ok_or(CommError::PeerUnreachable { dest })?;
        self.shared.sent.fetch_add(1, Ordering::SeqCst);
        sender.send(message).map_err(|_| {
            self.shared.sent.fetch_sub(1, Ordering::SeqCst);
            CommError::PeerUnreachable { dest }
        })
    }

    fn progress(&mut self, apply: &mut (dyn FnMut(M) + Send)) -> CommResult<usize> {
        Ok(self.drain(apply))
    }

    async fn barrier(&mut self, apply: &mut (dyn FnMut(M) + Send)) -> CommResult<()> {
        loop {
            self.drain(apply);
            // Rendezvous freezes the sent counter: nobody is outside the
            // collective, and nobody sends between the rendezvous points.
            self.shared.barrier.wait().await;
            // Messages sent before the rendezvous are already delivered
            // to the channels; pick up the stragglers.
            self.drain(apply);
            self.shared.barrier.wait().await;
            let sent = self.shared.sent.load(Ordering::SeqCst);
            let handled = self.shared.handled.load(Ordering::SeqCst);
            // Third rendezvous: every peer reads the frozen counters
            // before anyone is released into the next phase's sends.
            self.shared.barrier.wait().await;
            if sent == handled {
                return Ok(());
            }
        }
    }

    async fn all_reduce_sum(&mut self, value: u64) -> CommResult<u64> {
        self.all_reduce(value, u64::wrapping_add).await
    }

    async fn all_reduce_max(&mut self, value: u64) -> CommResult<u64> {
        self.all_reduce(value, u64::max).await
    }
}

/// Spawns N peers as tokio tasks and waits for all of them.
pub struct LocalCohort;

impl LocalCohort {
    /// Run `make(peer)` for every rank in `0..peers` concurrently and
    /// collect the results in rank order. The whole cohort shares one
    /// barrier, so every peer must follow the same collective schedule.
    pub async fn run<M, F, Fut, T>(peers: u32, make: F) -> CommResult<Vec<T>>
    where
        M: Send + 'static,
        F: Fn(CohortPeer<M>) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if peers == 0 {
            return Err(CommError::cohort("cohort size must be at least 1"));
        }

        let mut senders = Vec::with_capacity(peers as usize);
        let mut inboxes = Vec::with_capacity(peers as usize);
        for _ in 0..peers {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            inboxes.push(rx);
        }

        let shared = Arc::new(Shared {
            senders,
            barrier: Barrier::new(peers as usize),
            sent: AtomicU64::new(0),
            handled: AtomicU64::new(0),
            cells: Mutex::new(vec![0; peers as usize]),
        });

        debug!("spawning local cohort of {peers} peers");

        let handles: Vec<_> = inboxes
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| {
                let peer = CohortPeer {
                    rank: rank as u32,
                    shared: Arc::clone(&shared),
                    inbox,
                };
                tokio::spawn(make(peer))
            })
            .collect();

        future::join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.map_err(|e| CommError::cohort(e.to_string())))
            .collect()
    }
}
