//! Synthetic collectives over worker threads. Each worker owns its buffers
//! and exchanges them with the others through channels, so every iteration
//! allocates, grows and frees heap memory the way a message-passing
//! collective does.

use std::fmt;
use std::thread;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use eyre::{eyre, Result};

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collective {
    /// Ring allreduce: every worker ends with the element-wise sum
    Allreduce,
    /// Worker 0 sends its buffer to all others
    Broadcast,
    /// Worker 0 collects every worker's buffer into one
    Gather,
}

impl fmt::Display for Collective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Collective::Allreduce => write!(f, "allreduce"),
            Collective::Broadcast => write!(f, "broadcast"),
            Collective::Gather => write!(f, "gather"),
        }
    }
}

impl Collective {
    /// Runs one iteration and returns a checksum verified against the
    /// expected result.
    pub fn run(self, workers: usize, elements: usize) -> Result<u64> {
        match self {
            Collective::Allreduce => allreduce(workers, elements),
            Collective::Broadcast => broadcast(workers, elements),
            Collective::Gather => gather(workers, elements),
        }
    }
}

fn contribution(rank: usize, elements: usize) -> Vec<u64> {
    vec![rank as u64 + 1; elements]
}

fn join_all(handles: Vec<thread::ScopedJoinHandle<'_, Result<u64>>>) -> Result<Vec<u64>> {
    handles
        .into_iter()
        .map(|h| h.join().map_err(|_| eyre!("worker panicked"))?)
        .collect()
}

fn allreduce(workers: usize, elements: usize) -> Result<u64> {
    let (senders, receivers): (Vec<Sender<Vec<u64>>>, Vec<Receiver<Vec<u64>>>) =
        (0..workers).map(|_| bounded(1)).unzip();

    let results = thread::scope(|s| {
        let handles = receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| {
                let right = senders[(rank + 1) % workers].clone();
                s.spawn(move || -> Result<u64> {
                    let mut acc = contribution(rank, elements);
                    let mut passing = acc.clone();
                    for _ in 1..workers {
                        right
                            .send(passing)
                            .map_err(|_| eyre!("ring broken at worker {}", rank))?;
                        passing = inbox.recv()?;
                        for (a, v) in acc.iter_mut().zip(&passing) {
                            *a += v;
                        }
                    }
                    Ok(acc.iter().sum())
                })
            })
            .collect();
        join_all(handles)
    })?;

    let n = workers as u64;
    let expected = n * (n + 1) / 2 * elements as u64;
    if let Some(bad) = results.iter().position(|&r| r != expected) {
        eyre::bail!(
            "allreduce mismatch on worker {}: got {}, expected {}",
            bad,
            results[bad],
            expected
        );
    }
    Ok(expected)
}

fn broadcast(workers: usize, elements: usize) -> Result<u64> {
    let (senders, receivers): (Vec<Sender<Vec<u64>>>, Vec<Receiver<Vec<u64>>>) =
        (1..workers).map(|_| bounded(1)).unzip();

    let results = thread::scope(|s| {
        let mut handles = vec![s.spawn(move || -> Result<u64> {
            let data = contribution(0, elements);
            for peer in &senders {
                peer.send(data.clone())
                    .map_err(|_| eyre!("broadcast receiver hung up"))?;
            }
            Ok(data.iter().sum())
        })];
        handles.extend(receivers.into_iter().map(|inbox| {
            s.spawn(move || -> Result<u64> {
                let data = inbox.recv()?;
                Ok(data.iter().sum())
            })
        }));
        join_all(handles)
    })?;

    let expected = elements as u64;
    if results.iter().any(|&r| r != expected) {
        eyre::bail!("broadcast mismatch: {:?}, expected {}", results, expected);
    }
    Ok(expected)
}

fn gather(workers: usize, elements: usize) -> Result<u64> {
    let (tx, rx) = unbounded::<(usize, Vec<u64>)>();

    let results = thread::scope(|s| {
        let mut handles: Vec<_> = (1..workers)
            .map(|rank| {
                let tx = tx.clone();
                s.spawn(move || -> Result<u64> {
                    let data = contribution(rank, elements);
                    tx.send((rank, data))
                        .map_err(|_| eyre!("gather root hung up"))?;
                    Ok(0)
                })
            })
            .collect();
        drop(tx);

        handles.push(s.spawn(move || -> Result<u64> {
            let mut parts = vec![contribution(0, elements)];
            parts.extend(rx.iter().map(|(_, data)| data));
            let mut gathered = Vec::new();
            for part in parts {
                gathered.extend_from_slice(&part);
            }
            if gathered.len() != workers * elements {
                eyre::bail!(
                    "gathered {} elements, expected {}",
                    gathered.len(),
                    workers * elements
                );
            }
            Ok(gathered.iter().sum())
        }));
        join_all(handles)
    })?;

    let n = workers as u64;
    let expected = n * (n + 1) / 2 * elements as u64;
    match results.last() {
        Some(&sum) if sum == expected => Ok(expected),
        other => Err(eyre!("gather mismatch: {:?}, expected {}", other, expected)),
    }
}
