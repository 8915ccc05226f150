//! # node
//!
//! why: define the consensus state machine and its transitions
//! relations: uses message.rs for the protocol types, peer.rs for the peer table
//! what: NodeState enum, RaftNode struct, message handlers, advance step

use crate::{Envelope, LogEntry, Message, PeerId, ReplicationState};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// smallest cluster a leader may be elected in; below this a candidacy
/// never broadcasts, which keeps a two-node bring-up from split-braining
pub const MIN_CLUSTER_SIZE: usize = 3;

/// callback invoked for every committed command, in log order
pub type CommandHandler = Box<dyn FnMut(&[u8]) + Send>;

/// the three roles a node can hold
///
/// vote tallies only exist while campaigning, so they live inside the
/// `Candidate` variant rather than as a free-floating counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// passive role: answers votes and replicates from the leader
    Follower,
    /// campaigning role: collecting votes for this term
    Candidate { votes: u64 },
    /// active role: appends client commands and drives replication
    Leader,
}

impl Default for NodeState {
    fn default() -> Self {
        Self::Follower
    }
}

/// what a handler asks of the surrounding dispatch loop
///
/// handlers never perform I/O themselves; they return the messages to send
/// and the timer bookkeeping to apply.
#[derive(Debug, Default)]
pub struct Transition {
    /// messages to hand to the transport, in order
    pub outbound: Vec<Envelope>,
    /// the election timer must be re-armed with a fresh random timeout
    pub reset_election_timer: bool,
    /// the log was appended to or truncated; persistent embedders must sync it
    pub log_changed: bool,
}

impl Transition {
    fn send(to: PeerId, message: Message) -> Self {
        Self {
            outbound: vec![Envelope::new(to, message)],
            ..Self::default()
        }
    }
}

/// a single node's consensus state machine
///
/// owns the persistent-style variables (`current_term`, `voted_for`, `log`),
/// the derived commit/apply cursors, and the leader-side peer table. every
/// mutation goes through a handler; the surrounding loop serializes them.
pub struct RaftNode {
    /// this node's identity, carried in every message it originates
    pub id: PeerId,

    // -- persistent state --
    /// current term, monotonically non-decreasing
    pub current_term: u64,
    /// who received our vote in the current term, if anyone
    pub voted_for: Option<PeerId>,
    /// the replicated log, 1-indexed in the protocol
    pub log: Vec<LogEntry>,

    // -- volatile state --
    /// highest log index known to be committed
    pub commit_index: u64,
    /// highest log index applied to the application handler
    pub last_applied: u64,
    /// the peer this node currently believes to be leader (may be self)
    pub leader: Option<PeerId>,
    /// current role
    pub state: NodeState,

    // -- leader bookkeeping --
    /// replication cursors per peer, excluding self
    pub peers: HashMap<PeerId, ReplicationState>,
    /// clients awaiting a reply, keyed by the log index they are waiting on
    pub pending_commands: HashMap<u64, PeerId>,

    handler: Option<CommandHandler>,
}

impl RaftNode {
    /// create a new node in follower state with an empty log
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            current_term: 0,
            voted_for: None,
            log: Vec::new(),
            commit_index: 0,
            last_applied: 0,
            leader: None,
            state: NodeState::Follower,
            peers: HashMap::new(),
            pending_commands: HashMap::new(),
            handler: None,
        }
    }

    /// attach the application handler invoked for each committed command
    pub fn with_handler(mut self, handler: CommandHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    /// reload persistent state after a restart; must run before any message
    pub fn restore(&mut self, term: u64, voted_for: Option<PeerId>, log: Vec<LogEntry>) {
        self.current_term = term;
        self.voted_for = voted_for;
        self.log = log;
    }

    pub fn is_leader(&self) -> bool {
        matches!(self.state, NodeState::Leader)
    }

    // -- log helpers --

    /// index of the last log entry, 0 for an empty log
    pub fn last_log_index(&self) -> u64 {
        self.log.len() as u64
    }

    /// term of the last log entry, 0 for an empty log
    pub fn last_log_term(&self) -> u64 {
        self.log.last().map(|e| e.term).unwrap_or(0)
    }

    /// term of the entry at a 1-indexed position, 0 if absent
    pub fn term_at(&self, index: u64) -> u64 {
        if index == 0 || index > self.last_log_index() {
            return 0;
        }
        self.log[index as usize - 1].term
    }

    // -- dispatch --

    /// route one inbound message to its handler
    ///
    /// `from` is the transport-level sender, used where the protocol carries
    /// the counterparty out-of-band (commands, probes).
    pub fn handle_message(&mut self, from: &PeerId, message: Message) -> Transition {
        match message {
            Message::ActiveNodes { nodes } => self.handle_active_nodes(&nodes),
            Message::Command { command } => self.handle_command(from, command),
            Message::AppendEntries {
                term,
                leader,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
            } => self.handle_append_entries(
                term,
                leader,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
            ),
            Message::AppendEntriesResult { term, peer, success } => {
                self.handle_append_entries_result(term, &peer, success)
            }
            Message::RequestVote {
                term,
                candidate,
                last_log_index,
                last_log_term,
            } => self.handle_request_vote(term, candidate, last_log_index, last_log_term),
            Message::RequestVoteResult { term, vote_granted } => {
                self.handle_request_vote_result(term, vote_granted)
            }
            Message::Ping => Transition::send(from.clone(), Message::Pong),
            Message::Pong => Transition::default(),
            Message::RegisterNode | Message::CommandResult { .. } => {
                warn!(node = %self.id, from = %from, "dropping message this node does not consume");
                Transition::default()
            }
        }
    }

    /// pre-dispatch term check: a higher term demotes us on the spot
    ///
    /// returns the failure replies owed to pending clients when the demotion
    /// ends a leadership.
    fn observe_term(&mut self, term: u64) -> Vec<Envelope> {
        if term > self.current_term {
            self.step_down(term)
        } else {
            Vec::new()
        }
    }

    /// drop to follower in the given term, clearing vote and leader belief
    fn step_down(&mut self, term: u64) -> Vec<Envelope> {
        let was_leader = self.is_leader();
        self.current_term = term;
        self.voted_for = None;
        self.leader = None;
        self.state = NodeState::Follower;
        if was_leader {
            info!(node = %self.id, term, "stepping down from leadership");
            self.fail_pending_commands()
        } else {
            Vec::new()
        }
    }

    /// answer every waiting client with failure and forget them
    fn fail_pending_commands(&mut self) -> Vec<Envelope> {
        self.pending_commands
            .drain()
            .map(|(_, client)| {
                Envelope::new(
                    client,
                    Message::CommandResult {
                        success: false,
                        redirect: None,
                    },
                )
            })
            .collect()
    }

    // -- membership --

    /// refresh the peer table from a discovery update
    ///
    /// cursors of peers still present survive; departed peers are dropped and
    /// replication to them stops silently.
    pub fn handle_active_nodes(&mut self, nodes: &[PeerId]) -> Transition {
        let last_log_index = self.last_log_index();
        let mut table = HashMap::with_capacity(nodes.len());
        for peer in nodes {
            if *peer == self.id {
                continue;
            }
            let cursors = self
                .peers
                .remove(peer)
                .unwrap_or_else(|| ReplicationState::reset(last_log_index));
            table.insert(peer.clone(), cursors);
        }
        self.peers = table;
        info!(node = %self.id, peers = self.peers.len(), "refreshed cluster membership");
        Transition::default()
    }

    // -- command intake --

    /// accept a client command if leading, otherwise redirect
    pub fn handle_command(&mut self, from: &PeerId, command: Vec<u8>) -> Transition {
        if !self.is_leader() {
            debug!(node = %self.id, client = %from, "redirecting command");
            return Transition::send(
                from.clone(),
                Message::CommandResult {
                    success: false,
                    redirect: self.leader.clone(),
                },
            );
        }
        self.log.push(LogEntry::new(self.current_term, command));
        let index = self.last_log_index();
        self.pending_commands.insert(index, from.clone());
        info!(node = %self.id, index, "accepted client command");
        Transition {
            outbound: self.broadcast_append_entries(),
            log_changed: true,
            ..Transition::default()
        }
    }

    // -- replication, leader side --

    /// on heartbeat cadence, a leader re-sends AppendEntries to every peer
    pub fn heartbeat_timeout(&mut self) -> Transition {
        if !self.is_leader() {
            return Transition::default();
        }
        Transition {
            outbound: self.broadcast_append_entries(),
            ..Transition::default()
        }
    }

    fn broadcast_append_entries(&self) -> Vec<Envelope> {
        self.peers
            .iter()
            .filter_map(|(peer, cursors)| self.append_entries_for(peer, cursors))
            .collect()
    }

    /// build the AppendEntries for one peer from its replication cursor
    fn append_entries_for(&self, peer: &PeerId, cursors: &ReplicationState) -> Option<Envelope> {
        if cursors.next_index == 0 {
            warn!(node = %self.id, peer = %peer, "next_index is zero, not sending AppendEntries");
            return None;
        }
        let prev_log_index = cursors.next_index - 1;
        let entries = if self.last_log_index() >= cursors.next_index {
            self.log[cursors.next_index as usize - 1..].to_vec()
        } else {
            Vec::new()
        };
        Some(Envelope::new(
            peer.clone(),
            Message::AppendEntries {
                term: self.current_term,
                leader: self.id.clone(),
                prev_log_index,
                prev_log_term: self.term_at(prev_log_index),
                entries,
                leader_commit: self.commit_index,
            },
        ))
    }

    /// digest a follower's answer and advance or back off its cursor
    pub fn handle_append_entries_result(
        &mut self,
        term: u64,
        peer: &PeerId,
        success: bool,
    ) -> Transition {
        let mut transition = Transition {
            outbound: self.observe_term(term),
            ..Transition::default()
        };
        if !self.is_leader() {
            return transition;
        }
        let last_log_index = self.last_log_index();
        let Some(cursors) = self.peers.get_mut(peer) else {
            warn!(node = %self.id, peer = %peer, "AppendEntries result from unknown peer");
            return transition;
        };
        if success {
            cursors.match_index = cursors.next_index - 1;
            cursors.next_index = last_log_index + 1;
        } else {
            cursors.next_index = cursors.next_index.saturating_sub(1).max(1);
            let cursors = *cursors;
            // retry immediately so the log-matching backoff converges without
            // waiting out a heartbeat interval
            if let Some(envelope) = self.append_entries_for(peer, &cursors) {
                transition.outbound.push(envelope);
            }
        }
        transition
    }

    // -- replication, follower side --

    /// reconcile our log with the leader's view
    pub fn handle_append_entries(
        &mut self,
        term: u64,
        leader: PeerId,
        prev_log_index: u64,
        prev_log_term: u64,
        entries: Vec<LogEntry>,
        leader_commit: u64,
    ) -> Transition {
        if term == self.current_term && self.is_leader() {
            warn!(node = %self.id, other = %leader, term, "two leaders in the same term");
        }
        let mut transition = Transition {
            outbound: self.observe_term(term),
            ..Transition::default()
        };

        if term < self.current_term {
            transition.outbound.push(self.append_entries_reply(leader, false));
            return transition;
        }

        // same-term demotion: a competing leader yields to the sender
        if self.is_leader() {
            transition.outbound.extend(self.fail_pending_commands());
        }
        self.state = NodeState::Follower;
        self.leader = Some(leader.clone());

        if prev_log_index > 0
            && (self.last_log_index() < prev_log_index
                || self.term_at(prev_log_index) != prev_log_term)
        {
            debug!(
                node = %self.id,
                prev_log_index,
                prev_log_term,
                local_term = self.term_at(prev_log_index),
                "log mismatch, asking leader to back off"
            );
            transition.outbound.push(self.append_entries_reply(leader, false));
            return transition;
        }

        let mut index = prev_log_index;
        for entry in entries {
            index += 1;
            // a conflicting entry at this index invalidates it and everything
            // after it
            if self.last_log_index() >= index && self.term_at(index) != entry.term {
                self.log.truncate(index as usize - 1);
                transition.log_changed = true;
            }
            if self.last_log_index() < index {
                self.log.push(entry);
                transition.log_changed = true;
            }
        }

        if leader_commit > self.commit_index {
            self.commit_index = self.commit_index.max(leader_commit.min(index));
        }

        transition.reset_election_timer = true;
        transition.outbound.push(self.append_entries_reply(leader, true));
        transition
    }

    fn append_entries_reply(&self, to: PeerId, success: bool) -> Envelope {
        Envelope::new(
            to,
            Message::AppendEntriesResult {
                term: self.current_term,
                peer: self.id.clone(),
                success,
            },
        )
    }

    // -- elections --

    /// the election timer fired: campaign for the next term
    pub fn election_timeout(&mut self) -> Transition {
        if self.is_leader() {
            return Transition::default();
        }
        self.current_term += 1;
        self.voted_for = Some(self.id.clone());
        self.leader = None;
        self.state = NodeState::Candidate { votes: 1 };

        let mut transition = Transition {
            reset_election_timer: true,
            ..Transition::default()
        };
        if self.peers.len() + 1 < MIN_CLUSTER_SIZE {
            info!(
                node = %self.id,
                term = self.current_term,
                cluster = self.peers.len() + 1,
                "cluster too small to elect a leader"
            );
            return transition;
        }

        info!(node = %self.id, term = self.current_term, "starting election");
        let last_log_index = self.last_log_index();
        let last_log_term = self.last_log_term();
        for peer in self.peers.keys() {
            transition.outbound.push(Envelope::new(
                peer.clone(),
                Message::RequestVote {
                    term: self.current_term,
                    candidate: self.id.clone(),
                    last_log_index,
                    last_log_term,
                },
            ));
        }
        transition
    }

    /// decide whether the candidate deserves our vote for this term
    pub fn handle_request_vote(
        &mut self,
        term: u64,
        candidate: PeerId,
        last_log_index: u64,
        last_log_term: u64,
    ) -> Transition {
        let mut transition = Transition {
            outbound: self.observe_term(term),
            ..Transition::default()
        };

        let not_yet_voted = match &self.voted_for {
            None => true,
            Some(voted) => *voted == candidate,
        };
        let granted = term >= self.current_term
            && not_yet_voted
            && self.candidate_log_up_to_date(last_log_index, last_log_term);

        if granted {
            self.voted_for = Some(candidate.clone());
            transition.reset_election_timer = true;
        }
        debug!(node = %self.id, candidate = %candidate, term, granted, "handled vote request");
        transition.outbound.push(Envelope::new(
            candidate,
            Message::RequestVoteResult {
                term: self.current_term,
                vote_granted: granted,
            },
        ));
        transition
    }

    /// the election restriction: a candidate must not lag our log
    ///
    /// compared against our last log entry, not our applied cursor, so a
    /// vote can never elect a leader missing committed entries
    fn candidate_log_up_to_date(&self, candidate_last_index: u64, candidate_last_term: u64) -> bool {
        let our_last_term = self.last_log_term();
        if candidate_last_term != our_last_term {
            candidate_last_term > our_last_term
        } else {
            candidate_last_index >= self.last_log_index()
        }
    }

    /// tally a vote; promotion happens the moment a majority is in
    pub fn handle_request_vote_result(&mut self, term: u64, vote_granted: bool) -> Transition {
        let mut transition = Transition {
            outbound: self.observe_term(term),
            ..Transition::default()
        };
        if !vote_granted || term != self.current_term {
            return transition;
        }
        let NodeState::Candidate { votes } = &mut self.state else {
            // grants arriving after this candidacy ended must not re-promote
            return transition;
        };
        *votes += 1;
        if 2 * *votes <= self.peers.len() as u64 {
            return transition;
        }

        info!(node = %self.id, term = self.current_term, "promoted to leader");
        self.state = NodeState::Leader;
        self.leader = Some(self.id.clone());
        let last_log_index = self.last_log_index();
        for cursors in self.peers.values_mut() {
            *cursors = ReplicationState::reset(last_log_index);
        }
        transition.outbound.extend(self.broadcast_append_entries());
        transition
    }

    // -- advance step --

    /// run after every handler: move the commit cursor, drain applies
    ///
    /// bounded by the log length, so dispatch latency stays predictable.
    pub fn advance(&mut self) -> Transition {
        let mut transition = Transition::default();
        if self.is_leader() {
            self.advance_commit_index();
        }
        while self.commit_index > self.last_applied {
            self.last_applied += 1;
            let entry = &self.log[self.last_applied as usize - 1];
            if let Some(handler) = self.handler.as_mut() {
                handler(&entry.command);
            }
            info!(node = %self.id, index = self.last_applied, "applied command");
            if let Some(client) = self.pending_commands.remove(&self.last_applied) {
                transition.outbound.push(Envelope::new(
                    client,
                    Message::CommandResult {
                        success: true,
                        redirect: None,
                    },
                ));
            }
        }
        transition
    }

    /// leader-side commit rule: an entry commits once a strict majority of
    /// the cluster (counting self) holds it and it belongs to our own term
    fn advance_commit_index(&mut self) {
        let cluster = self.peers.len() as u64 + 1;
        for index in (self.commit_index + 1)..=self.last_log_index() {
            if self.term_at(index) != self.current_term {
                continue;
            }
            let replicated =
                1 + self.peers.values().filter(|c| c.match_index >= index).count() as u64;
            if 2 * replicated > cluster {
                self.commit_index = index;
            }
        }
    }
}
