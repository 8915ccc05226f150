//! # agent
//!
//! why: run one consensus node as a single cooperative task
//! relations: drives the replog-core state machine, syncs replog-storage, sends via Transport
//! what: Transport trait, Inbound message wrapper, NodeAgent dispatch loop

use crate::config::AgentConfig;
use crate::error::Result;
use crate::timer::Timers;
use replog_core::{CommandHandler, Envelope, Message, PeerId, RaftNode, Transition};
use replog_storage::Storage;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::info;

/// how a node hands messages to the outside world
///
/// implementations must preserve per-destination FIFO order and must not
/// block; a slow or dead destination is simply not our problem here, the
/// heartbeat cadence re-delivers whatever matters.
pub trait Transport: Send {
    fn send(&mut self, envelope: Envelope);
}

/// one inbound message with its transport-level sender
#[derive(Debug, Clone)]
pub struct Inbound {
    pub from: PeerId,
    pub message: Message,
}

/// a single node agent: mailbox, timers, state machine, storage
///
/// the run loop serializes everything: one message or one timer action at a
/// time, each followed by the advance step. there is no other thread and no
/// lock anywhere in a node.
pub struct NodeAgent<T: Transport> {
    node: RaftNode,
    config: AgentConfig,
    transport: T,
    mailbox: mpsc::UnboundedReceiver<Inbound>,
    timers: Timers,
    storage: Option<Box<dyn Storage + Send>>,
    persisted_term: u64,
    persisted_vote: Option<PeerId>,
}

impl<T: Transport> NodeAgent<T> {
    pub fn new(
        id: PeerId,
        config: AgentConfig,
        transport: T,
        mailbox: mpsc::UnboundedReceiver<Inbound>,
    ) -> Self {
        let timers = Timers::new(&config.timing);
        Self {
            node: RaftNode::new(id),
            config,
            transport,
            mailbox,
            timers,
            storage: None,
            persisted_term: 0,
            persisted_vote: None,
        }
    }

    /// attach the application handler invoked for each committed command
    pub fn with_handler(mut self, handler: CommandHandler) -> Self {
        self.node = self.node.with_handler(handler);
        self
    }

    /// attach durable storage and restore any state it holds
    ///
    /// without storage the agent is the in-memory reference setup; with it,
    /// hard state is written back before any message leaves the node.
    pub fn with_storage(mut self, storage: Box<dyn Storage + Send>) -> Result<Self> {
        let (term, voted_for) = storage.load_term_and_vote()?;
        let log = storage.load_log()?;
        if term > 0 || !log.is_empty() {
            info!(node = %self.node.id, term, entries = log.len(), "restored persisted state");
        }
        self.node.restore(term, voted_for.clone(), log);
        self.persisted_term = term;
        self.persisted_vote = voted_for;
        self.storage = Some(storage);
        Ok(self)
    }

    /// run the dispatch loop until the mailbox closes
    pub async fn run(mut self) -> Result<()> {
        self.transport.send(Envelope::new(
            self.config.discovery.clone(),
            Message::RegisterNode,
        ));
        info!(node = %self.node.id, discovery = %self.config.discovery, "node registered");

        let mut tick = tokio::time::interval(self.config.timing.tick_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                inbound = self.mailbox.recv() => {
                    let Some(Inbound { from, message }) = inbound else {
                        info!(node = %self.node.id, "mailbox closed, shutting down");
                        return Ok(());
                    };
                    let transition = self.node.handle_message(&from, message);
                    self.finish_dispatch(transition)?;
                }
                _ = tick.tick() => {
                    self.check_timers()?;
                }
            }
        }
    }

    /// poll both timers; at most one action per tick keeps handler latency
    /// bounded
    fn check_timers(&mut self) -> Result<()> {
        if self.timers.heartbeat_due() {
            self.timers.reset_heartbeat();
            let transition = self.node.heartbeat_timeout();
            self.finish_dispatch(transition)?;
        } else if self.timers.election_due() {
            self.timers.reset_election();
            let transition = self.node.election_timeout();
            self.finish_dispatch(transition)?;
        }
        Ok(())
    }

    /// persist, send, and advance after every handler, in that order
    fn finish_dispatch(&mut self, transition: Transition) -> Result<()> {
        // hard state must hit storage before any message built on it leaves
        self.persist(transition.log_changed)?;
        if transition.reset_election_timer {
            self.timers.reset_election();
        }
        for envelope in transition.outbound {
            self.transport.send(envelope);
        }
        // the advance step only moves volatile cursors, nothing to persist
        let advance = self.node.advance();
        for envelope in advance.outbound {
            self.transport.send(envelope);
        }
        Ok(())
    }

    fn persist(&mut self, log_changed: bool) -> Result<()> {
        let Some(storage) = self.storage.as_mut() else {
            return Ok(());
        };
        if self.node.current_term != self.persisted_term
            || self.node.voted_for != self.persisted_vote
        {
            storage.save_term_and_vote(self.node.current_term, self.node.voted_for.as_ref())?;
            self.persisted_term = self.node.current_term;
            self.persisted_vote = self.node.voted_for.clone();
        }
        if log_changed {
            storage.save_log(&self.node.log)?;
        }
        Ok(())
    }
}
