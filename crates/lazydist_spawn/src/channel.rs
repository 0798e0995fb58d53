//! Channel between the coordinator and the workers of a group.

use std::collections::VecDeque;
use std::fmt::Debug;

use lazydist_error::{DbError, Result};
use tracing::trace;

use crate::message::Frame;

/// Coordinator end of a group channel.
pub trait GroupChannel: Debug + Send {
    /// Number of workers in the group.
    fn size(&self) -> usize;

    /// Send a frame to a single rank.
    fn send(&mut self, rank: usize, frame: Frame) -> Result<()>;

    /// Block until the next frame from `rank` arrives.
    ///
    /// Frames from other ranks that arrive in the meantime are buffered.
    fn recv(&mut self, rank: usize) -> Result<Frame>;

    /// Close the channel and wait for every worker to exit.
    fn shutdown(&mut self) -> Result<()>;
}

/// Worker end of a group channel.
pub trait WorkerEndpoint: Send {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Block until the next frame from the coordinator arrives.
    fn recv(&mut self) -> Result<Frame>;

    fn send(&mut self, frame: Frame) -> Result<()>;
}

/// Message delivered to the coordinator's inbound queue.
#[derive(Debug)]
pub(crate) enum Inbound {
    Frame { rank: usize, frame: Frame },
    /// Worker side of the channel closed.
    Closed { rank: usize, reason: Option<String> },
}

/// Demultiplexes the single inbound queue shared by all workers into per
/// rank queues.
#[derive(Debug)]
pub(crate) struct InboundMux {
    receiver: async_channel::Receiver<Inbound>,
    pending: Vec<VecDeque<Frame>>,
}

impl InboundMux {
    pub(crate) fn new(receiver: async_channel::Receiver<Inbound>, size: usize) -> Self {
        InboundMux {
            receiver,
            pending: (0..size).map(|_| VecDeque::new()).collect(),
        }
    }

    pub(crate) fn recv_from(&mut self, rank: usize) -> Result<Frame> {
        let queue = self
            .pending
            .get_mut(rank)
            .ok_or_else(|| DbError::internal("Rank out of range").with_field("rank", rank))?;
        if let Some(frame) = queue.pop_front() {
            return Ok(frame);
        }

        loop {
            match self.receiver.recv_blocking() {
                Ok(Inbound::Frame { rank: from, frame }) => {
                    trace!(from, frame = frame.name(), "inbound frame");
                    if from == rank {
                        return Ok(frame);
                    }
                    match self.pending.get_mut(from) {
                        Some(queue) => queue.push_back(frame),
                        None => {
                            return Err(DbError::protocol("Frame from unknown rank")
                                .with_field("rank", from));
                        }
                    }
                }
                Ok(Inbound::Closed { rank: from, reason }) => {
                    let mut err = DbError::protocol("Worker closed its channel")
                        .with_field("rank", from);
                    if let Some(reason) = reason {
                        err = err.with_field("reason", reason);
                    }
                    return Err(err);
                }
                Err(_) => return Err(DbError::protocol("All workers disconnected")),
            }
        }
    }
}

/// Collective operations on top of a [`GroupChannel`].
///
/// Any channel failure marks the communicator as broken. A broken
/// communicator's group can't be reused.
#[derive(Debug)]
pub struct Communicator {
    channel: Box<dyn GroupChannel>,
    broken: bool,
}

impl Communicator {
    pub fn new(channel: Box<dyn GroupChannel>) -> Self {
        Communicator {
            channel,
            broken: false,
        }
    }

    pub fn size(&self) -> usize {
        self.channel.size()
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    fn check<T>(&mut self, res: Result<T>) -> Result<T> {
        if res.is_err() {
            self.broken = true;
        }
        res
    }

    pub fn send(&mut self, rank: usize, frame: Frame) -> Result<()> {
        let res = self.channel.send(rank, frame);
        self.check(res)
    }

    pub fn recv(&mut self, rank: usize) -> Result<Frame> {
        let res = self.channel.recv(rank);
        self.check(res)
    }

    /// Send a copy of the frame to every rank.
    pub fn broadcast(&mut self, frame: &Frame) -> Result<()> {
        for rank in 0..self.size() {
            self.send(rank, frame.clone())?;
        }
        Ok(())
    }

    /// Send the `i`-th frame to rank `i`.
    pub fn scatter(&mut self, frames: Vec<Frame>) -> Result<()> {
        if frames.len() != self.size() {
            return Err(DbError::internal("Scatter requires one frame per rank")
                .with_field("frames", frames.len())
                .with_field("size", self.size()));
        }
        for (rank, frame) in frames.into_iter().enumerate() {
            self.send(rank, frame)?;
        }
        Ok(())
    }

    /// Receive one frame from every rank, indexed by rank.
    pub fn gather(&mut self) -> Result<Vec<Frame>> {
        (0..self.size()).map(|rank| self.recv(rank)).collect()
    }

    pub fn shutdown(&mut self) -> Result<()> {
        self.channel.shutdown()
    }
}
