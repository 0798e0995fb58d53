//! Launching worker groups.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::io::{BufReader, BufWriter, Stdin, Stdout};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;

use lazydist_error::{DbError, ErrorKind, OptionExt, Result};
use tracing::{debug, error, info, warn};

use crate::channel::{GroupChannel, Inbound, InboundMux, WorkerEndpoint};
use crate::computation::ComputationRegistry;
use crate::env::{WORKER_RANK_ENV, WORKER_SIZE_ENV, WORKER_VERBOSITY_ENV};
use crate::message::{Frame, read_frame, write_frame};
use crate::worker::worker_loop;

/// Everything needed to start a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub num_workers: usize,
    /// Variables set on every worker.
    pub env: BTreeMap<String, String>,
    pub verbosity: u8,
}

/// Starts a fixed size group of workers and returns the coordinator end of
/// its channel.
pub trait GroupLauncher: Debug + Send + Sync {
    fn launch(&self, request: &SpawnRequest) -> Result<Box<dyn GroupChannel>>;
}

/// Runs workers as threads in the current process.
#[derive(Debug, Clone)]
pub struct ThreadLauncher {
    registry: Arc<ComputationRegistry>,
}

impl ThreadLauncher {
    pub fn new(registry: ComputationRegistry) -> Self {
        ThreadLauncher {
            registry: Arc::new(registry),
        }
    }
}

impl GroupLauncher for ThreadLauncher {
    fn launch(&self, request: &SpawnRequest) -> Result<Box<dyn GroupChannel>> {
        let size = request.num_workers;
        let (inbound_tx, inbound_rx) = async_channel::unbounded();

        let mut senders = Vec::with_capacity(size);
        let mut handles = Vec::with_capacity(size);
        for rank in 0..size {
            let (tx, rx) = async_channel::unbounded();
            let endpoint = ThreadEndpoint {
                rank,
                size,
                incoming: rx,
                outgoing: inbound_tx.clone(),
            };
            let registry = self.registry.clone();
            let handle = std::thread::Builder::new()
                .name(format!("lazydist-worker-{rank}"))
                .spawn(move || run_thread_worker(endpoint, &registry))?;
            senders.push(tx);
            handles.push(handle);
        }

        debug!(size, "launched thread workers");

        Ok(Box::new(ThreadGroupChannel {
            size,
            senders,
            handles,
            inbound: InboundMux::new(inbound_rx, size),
        }))
    }
}

fn run_thread_worker(mut endpoint: ThreadEndpoint, registry: &ComputationRegistry) {
    let rank = endpoint.rank;
    let reason = match worker_loop(&mut endpoint, registry) {
        Ok(()) => None,
        Err(err) => {
            error!(rank, %err, "worker loop failed");
            Some(err.to_string())
        }
    };
    let _ = endpoint
        .outgoing
        .send_blocking(Inbound::Closed { rank, reason });
}

#[derive(Debug)]
struct ThreadEndpoint {
    rank: usize,
    size: usize,
    incoming: async_channel::Receiver<Frame>,
    outgoing: async_channel::Sender<Inbound>,
}

impl WorkerEndpoint for ThreadEndpoint {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn recv(&mut self) -> Result<Frame> {
        self.incoming
            .recv_blocking()
            .map_err(|_| DbError::protocol("Coordinator closed the channel"))
    }

    fn send(&mut self, frame: Frame) -> Result<()> {
        self.outgoing
            .send_blocking(Inbound::Frame {
                rank: self.rank,
                frame,
            })
            .map_err(|_| DbError::protocol("Coordinator closed the channel"))
    }
}

#[derive(Debug)]
struct ThreadGroupChannel {
    size: usize,
    senders: Vec<async_channel::Sender<Frame>>,
    handles: Vec<JoinHandle<()>>,
    inbound: InboundMux,
}

impl GroupChannel for ThreadGroupChannel {
    fn size(&self) -> usize {
        self.size
    }

    fn send(&mut self, rank: usize, frame: Frame) -> Result<()> {
        let sender = self.senders.get(rank).required("sender for rank")?;
        sender
            .send_blocking(frame)
            .map_err(|_| DbError::protocol("Worker closed its channel").with_field("rank", rank))
    }

    fn recv(&mut self, rank: usize) -> Result<Frame> {
        self.inbound.recv_from(rank)
    }

    fn shutdown(&mut self) -> Result<()> {
        self.senders.clear();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
        Ok(())
    }
}

/// Runs each worker as a child process speaking the frame protocol over its
/// stdin and stdout.
///
/// Children never share the coordinator's stdin.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    executable: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(executable: impl Into<PathBuf>, args: Vec<String>) -> Self {
        ProcessLauncher {
            executable: executable.into(),
            args,
        }
    }

    /// Launch workers by re-running the current executable with `args`.
    pub fn current_exe(args: Vec<String>) -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?, args))
    }
}

impl GroupLauncher for ProcessLauncher {
    fn launch(&self, request: &SpawnRequest) -> Result<Box<dyn GroupChannel>> {
        let size = request.num_workers;
        let mut children = Vec::with_capacity(size);
        let mut errcodes = vec![0; size];

        for (rank, errcode) in errcodes.iter_mut().enumerate() {
            let spawned = Command::new(&self.executable)
                .args(&self.args)
                .envs(&request.env)
                .env(WORKER_RANK_ENV, rank.to_string())
                .env(WORKER_SIZE_ENV, size.to_string())
                .env(WORKER_VERBOSITY_ENV, request.verbosity.to_string())
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .spawn();
            match spawned {
                Ok(child) => children.push(child),
                Err(err) => {
                    error!(rank, %err, "failed to spawn worker");
                    *errcode = err.raw_os_error().unwrap_or(-1);
                }
            }
        }

        if errcodes.iter().any(|c| *c != 0) {
            for mut child in children {
                let _ = child.kill();
                let _ = child.wait();
            }
            return Err(DbError::new("Failed to spawn worker processes")
                .with_kind(ErrorKind::Io)
                .with_field("executable", self.executable.display())
                .with_field("errcodes", format!("{errcodes:?}")));
        }

        let (inbound_tx, inbound_rx) = async_channel::unbounded();
        let mut writers = Vec::with_capacity(size);
        let mut readers = Vec::with_capacity(size);
        for (rank, child) in children.iter_mut().enumerate() {
            let stdin = child.stdin.take().required("child stdin")?;
            let stdout = child.stdout.take().required("child stdout")?;
            writers.push(BufWriter::new(stdin));

            let tx = inbound_tx.clone();
            let reader = std::thread::Builder::new()
                .name(format!("lazydist-reader-{rank}"))
                .spawn(move || {
                    let mut stdout = BufReader::new(stdout);
                    let reason = loop {
                        match read_frame(&mut stdout) {
                            Ok(Some(frame)) => {
                                if tx.send_blocking(Inbound::Frame { rank, frame }).is_err() {
                                    return;
                                }
                            }
                            Ok(None) => break None,
                            Err(err) => break Some(err.to_string()),
                        }
                    };
                    let _ = tx.send_blocking(Inbound::Closed { rank, reason });
                })?;
            readers.push(reader);
        }

        info!(size, executable = %self.executable.display(), "launched worker processes");

        Ok(Box::new(ProcessGroupChannel {
            size,
            writers,
            children,
            readers,
            inbound: InboundMux::new(inbound_rx, size),
        }))
    }
}

#[derive(Debug)]
struct ProcessGroupChannel {
    size: usize,
    writers: Vec<BufWriter<ChildStdin>>,
    children: Vec<Child>,
    readers: Vec<JoinHandle<()>>,
    inbound: InboundMux,
}

impl GroupChannel for ProcessGroupChannel {
    fn size(&self) -> usize {
        self.size
    }

    fn send(&mut self, rank: usize, frame: Frame) -> Result<()> {
        let writer = self.writers.get_mut(rank).required("writer for rank")?;
        write_frame(writer, &frame)
    }

    fn recv(&mut self, rank: usize) -> Result<Frame> {
        self.inbound.recv_from(rank)
    }

    fn shutdown(&mut self) -> Result<()> {
        // Closing stdin makes any worker that missed the exit command stop.
        self.writers.clear();

        let mut first_err = None;
        for (rank, mut child) in self.children.drain(..).enumerate() {
            match child.wait() {
                Ok(status) if status.success() => (),
                Ok(status) => {
                    warn!(rank, %status, "worker exited with failure");
                }
                Err(err) => {
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }
        for reader in self.readers.drain(..) {
            let _ = reader.join();
        }

        match first_err {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

/// Worker end of a process channel, reading frames from stdin and writing
/// them to stdout.
#[derive(Debug)]
pub struct StdioEndpoint {
    rank: usize,
    size: usize,
    reader: BufReader<Stdin>,
    writer: BufWriter<Stdout>,
}

impl StdioEndpoint {
    /// Create an endpoint using the rank and size set by the launcher.
    pub fn from_env() -> Result<Self> {
        let rank = read_usize_env(WORKER_RANK_ENV)?;
        let size = read_usize_env(WORKER_SIZE_ENV)?;
        Ok(StdioEndpoint {
            rank,
            size,
            reader: BufReader::new(std::io::stdin()),
            writer: BufWriter::new(std::io::stdout()),
        })
    }
}

fn read_usize_env(key: &str) -> Result<usize> {
    let raw = std::env::var(key)
        .map_err(|_| DbError::protocol("Missing worker environment variable").with_field("var", key))?;
    raw.parse().map_err(|_| {
        DbError::protocol("Invalid worker environment variable")
            .with_field("var", key)
            .with_field("value", raw)
    })
}

impl WorkerEndpoint for StdioEndpoint {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn recv(&mut self) -> Result<Frame> {
        read_frame(&mut self.reader)?
            .ok_or_else(|| DbError::protocol("Coordinator closed the channel"))
    }

    fn send(&mut self, frame: Frame) -> Result<()> {
        write_frame(&mut self.writer, &frame)
    }
}
