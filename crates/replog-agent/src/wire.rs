//! # wire
//!
//! why: carry logical messages over a byte stream without locking out future fields
//! relations: encodes replog-core message types, framed for transports via tokio_util
//! what: tagged varint encoding, Frame type, WireCodec length-delimited framing

use crate::error::WireError;
use bytes::{Buf, BufMut, BytesMut};
use replog_core::{LogEntry, Message, PeerId};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// frames larger than this are treated as corrupt
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

// wire types, protobuf-compatible
const WIRE_VARINT: u8 = 0;
const WIRE_LEN: u8 = 2;

// frame-level tags: the sender identity, then one tag per message kind.
// new kinds extend the list; old readers skip tags they do not know.
const TAG_SENDER: u32 = 1;
const TAG_REGISTER_NODE: u32 = 2;
const TAG_ACTIVE_NODES: u32 = 3;
const TAG_APPEND_ENTRIES: u32 = 4;
const TAG_APPEND_ENTRIES_RESULT: u32 = 5;
const TAG_REQUEST_VOTE: u32 = 6;
const TAG_REQUEST_VOTE_RESULT: u32 = 7;
const TAG_COMMAND: u32 = 8;
const TAG_COMMAND_RESULT: u32 = 9;
const TAG_PING: u32 = 10;
const TAG_PONG: u32 = 11;

/// one message on the wire together with its sender
///
/// identities the field tables keep out-of-band (the leader of an
/// AppendEntries, the candidate of a RequestVote, the peer answering one)
/// are filled back in from the sender at decode time.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub from: PeerId,
    pub message: Message,
}

impl Frame {
    pub fn new(from: PeerId, message: Message) -> Self {
        Self { from, message }
    }
}

// -- varint primitives --

fn put_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        if value < 0x80 {
            buf.push(value as u8);
            return;
        }
        buf.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
}

fn get_varint(buf: &mut &[u8]) -> Result<u64, WireError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        if !buf.has_remaining() {
            return Err(WireError::UnexpectedEof);
        }
        if shift >= 64 {
            return Err(WireError::VarintOverflow);
        }
        let byte = buf.get_u8();
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

// -- field helpers --

fn put_key(buf: &mut Vec<u8>, tag: u32, wire_type: u8) {
    put_varint(buf, (u64::from(tag) << 3) | u64::from(wire_type));
}

/// varint field; zero values are elided like proto3 defaults
fn put_u64_field(buf: &mut Vec<u8>, tag: u32, value: u64) {
    if value == 0 {
        return;
    }
    put_key(buf, tag, WIRE_VARINT);
    put_varint(buf, value);
}

fn put_bool_field(buf: &mut Vec<u8>, tag: u32, value: bool) {
    put_u64_field(buf, tag, u64::from(value));
}

/// length-delimited field, always emitted
fn put_len_field(buf: &mut Vec<u8>, tag: u32, bytes: &[u8]) {
    put_key(buf, tag, WIRE_LEN);
    put_varint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// length-delimited field, elided when empty
fn put_bytes_field(buf: &mut Vec<u8>, tag: u32, bytes: &[u8]) {
    if bytes.is_empty() {
        return;
    }
    put_len_field(buf, tag, bytes);
}

fn get_len_prefixed<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], WireError> {
    let len = get_varint(buf)? as usize;
    if buf.len() < len {
        return Err(WireError::UnexpectedEof);
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

fn get_string(buf: &mut &[u8]) -> Result<String, WireError> {
    Ok(String::from_utf8(get_len_prefixed(buf)?.to_vec())?)
}

/// consume a field this reader does not understand
fn skip_field(buf: &mut &[u8], tag: u32, wire_type: u8) -> Result<(), WireError> {
    match wire_type {
        WIRE_VARINT => {
            get_varint(buf)?;
        }
        WIRE_LEN => {
            get_len_prefixed(buf)?;
        }
        other => {
            return Err(WireError::UnsupportedWireType {
                tag,
                wire_type: other,
            })
        }
    }
    Ok(())
}

fn split_key(key: u64) -> (u32, u8) {
    ((key >> 3) as u32, (key & 0x7) as u8)
}

// -- nested message encodings --

fn encode_peer_id(peer: &PeerId) -> Vec<u8> {
    let mut buf = Vec::new();
    put_bytes_field(&mut buf, 1, peer.address.as_bytes());
    put_bytes_field(&mut buf, 2, peer.id.as_bytes());
    buf
}

fn decode_peer_id(mut buf: &[u8]) -> Result<PeerId, WireError> {
    let mut address = String::new();
    let mut id = String::new();
    while !buf.is_empty() {
        let (tag, wire_type) = split_key(get_varint(&mut buf)?);
        match (tag, wire_type) {
            (1, WIRE_LEN) => address = get_string(&mut buf)?,
            (2, WIRE_LEN) => id = get_string(&mut buf)?,
            _ => skip_field(&mut buf, tag, wire_type)?,
        }
    }
    Ok(PeerId { address, id })
}

fn encode_log_entry(entry: &LogEntry) -> Vec<u8> {
    let mut buf = Vec::new();
    put_bytes_field(&mut buf, 1, &entry.command);
    put_u64_field(&mut buf, 2, entry.term);
    buf
}

fn decode_log_entry(mut buf: &[u8]) -> Result<LogEntry, WireError> {
    let mut command = Vec::new();
    let mut term = 0;
    while !buf.is_empty() {
        let (tag, wire_type) = split_key(get_varint(&mut buf)?);
        match (tag, wire_type) {
            (1, WIRE_LEN) => command = get_len_prefixed(&mut buf)?.to_vec(),
            (2, WIRE_VARINT) => term = get_varint(&mut buf)?,
            _ => skip_field(&mut buf, tag, wire_type)?,
        }
    }
    Ok(LogEntry { term, command })
}

// -- frame encoding --

fn message_body(message: &Message) -> (u32, Vec<u8>) {
    let mut buf = Vec::new();
    match message {
        Message::RegisterNode => (TAG_REGISTER_NODE, buf),
        Message::ActiveNodes { nodes } => {
            for node in nodes {
                put_len_field(&mut buf, 1, &encode_peer_id(node));
            }
            (TAG_ACTIVE_NODES, buf)
        }
        // the leader identity rides on the frame sender
        Message::AppendEntries {
            term,
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit,
            ..
        } => {
            put_u64_field(&mut buf, 1, *term);
            put_u64_field(&mut buf, 2, *prev_log_index);
            put_u64_field(&mut buf, 3, *prev_log_term);
            put_u64_field(&mut buf, 4, *leader_commit);
            for entry in entries {
                put_len_field(&mut buf, 5, &encode_log_entry(entry));
            }
            (TAG_APPEND_ENTRIES, buf)
        }
        Message::AppendEntriesResult { term, success, .. } => {
            put_u64_field(&mut buf, 1, *term);
            put_bool_field(&mut buf, 2, *success);
            (TAG_APPEND_ENTRIES_RESULT, buf)
        }
        Message::RequestVote {
            term,
            last_log_index,
            last_log_term,
            ..
        } => {
            put_u64_field(&mut buf, 1, *term);
            put_u64_field(&mut buf, 2, *last_log_index);
            put_u64_field(&mut buf, 3, *last_log_term);
            (TAG_REQUEST_VOTE, buf)
        }
        Message::RequestVoteResult { term, vote_granted } => {
            put_u64_field(&mut buf, 1, *term);
            put_bool_field(&mut buf, 2, *vote_granted);
            (TAG_REQUEST_VOTE_RESULT, buf)
        }
        Message::Command { command } => {
            put_bytes_field(&mut buf, 1, command);
            (TAG_COMMAND, buf)
        }
        Message::CommandResult { success, redirect } => {
            put_bool_field(&mut buf, 1, *success);
            if let Some(peer) = redirect {
                put_len_field(&mut buf, 2, &encode_peer_id(peer));
            }
            (TAG_COMMAND_RESULT, buf)
        }
        Message::Ping => (TAG_PING, buf),
        Message::Pong => (TAG_PONG, buf),
    }
}

/// encode one frame body (without the outer length prefix)
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let mut buf = Vec::new();
    put_len_field(&mut buf, TAG_SENDER, &encode_peer_id(&frame.from));
    let (tag, body) = message_body(&frame.message);
    put_len_field(&mut buf, tag, &body);
    buf
}

/// decode one frame body (without the outer length prefix)
pub fn decode_frame(mut buf: &[u8]) -> Result<Frame, WireError> {
    let mut sender: Option<PeerId> = None;
    let mut body: Option<(u32, Vec<u8>)> = None;
    while !buf.is_empty() {
        let (tag, wire_type) = split_key(get_varint(&mut buf)?);
        match tag {
            TAG_SENDER if wire_type == WIRE_LEN => {
                sender = Some(decode_peer_id(get_len_prefixed(&mut buf)?)?);
            }
            TAG_REGISTER_NODE..=TAG_PONG if wire_type == WIRE_LEN => {
                body = Some((tag, get_len_prefixed(&mut buf)?.to_vec()));
            }
            _ => skip_field(&mut buf, tag, wire_type)?,
        }
    }
    let from = sender.ok_or(WireError::MissingSender)?;
    let (tag, body) = body.ok_or(WireError::MissingBody)?;
    let message = decode_message(tag, &body, &from)?;
    Ok(Frame { from, message })
}

fn decode_message(tag: u32, mut buf: &[u8], from: &PeerId) -> Result<Message, WireError> {
    match tag {
        TAG_REGISTER_NODE => Ok(Message::RegisterNode),
        TAG_PING => Ok(Message::Ping),
        TAG_PONG => Ok(Message::Pong),
        TAG_ACTIVE_NODES => {
            let mut nodes = Vec::new();
            while !buf.is_empty() {
                let (tag, wire_type) = split_key(get_varint(&mut buf)?);
                match (tag, wire_type) {
                    (1, WIRE_LEN) => nodes.push(decode_peer_id(get_len_prefixed(&mut buf)?)?),
                    _ => skip_field(&mut buf, tag, wire_type)?,
                }
            }
            Ok(Message::ActiveNodes { nodes })
        }
        TAG_APPEND_ENTRIES => {
            let mut term = 0;
            let mut prev_log_index = 0;
            let mut prev_log_term = 0;
            let mut leader_commit = 0;
            let mut entries = Vec::new();
            while !buf.is_empty() {
                let (tag, wire_type) = split_key(get_varint(&mut buf)?);
                match (tag, wire_type) {
                    (1, WIRE_VARINT) => term = get_varint(&mut buf)?,
                    (2, WIRE_VARINT) => prev_log_index = get_varint(&mut buf)?,
                    (3, WIRE_VARINT) => prev_log_term = get_varint(&mut buf)?,
                    (4, WIRE_VARINT) => leader_commit = get_varint(&mut buf)?,
                    (5, WIRE_LEN) => entries.push(decode_log_entry(get_len_prefixed(&mut buf)?)?),
                    _ => skip_field(&mut buf, tag, wire_type)?,
                }
            }
            Ok(Message::AppendEntries {
                term,
                leader: from.clone(),
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
            })
        }
        TAG_APPEND_ENTRIES_RESULT => {
            let mut term = 0;
            let mut success = false;
            while !buf.is_empty() {
                let (tag, wire_type) = split_key(get_varint(&mut buf)?);
                match (tag, wire_type) {
                    (1, WIRE_VARINT) => term = get_varint(&mut buf)?,
                    (2, WIRE_VARINT) => success = get_varint(&mut buf)? != 0,
                    _ => skip_field(&mut buf, tag, wire_type)?,
                }
            }
            Ok(Message::AppendEntriesResult {
                term,
                peer: from.clone(),
                success,
            })
        }
        TAG_REQUEST_VOTE => {
            let mut term = 0;
            let mut last_log_index = 0;
            let mut last_log_term = 0;
            while !buf.is_empty() {
                let (tag, wire_type) = split_key(get_varint(&mut buf)?);
                match (tag, wire_type) {
                    (1, WIRE_VARINT) => term = get_varint(&mut buf)?,
                    (2, WIRE_VARINT) => last_log_index = get_varint(&mut buf)?,
                    (3, WIRE_VARINT) => last_log_term = get_varint(&mut buf)?,
                    _ => skip_field(&mut buf, tag, wire_type)?,
                }
            }
            Ok(Message::RequestVote {
                term,
                candidate: from.clone(),
                last_log_index,
                last_log_term,
            })
        }
        TAG_REQUEST_VOTE_RESULT => {
            let mut term = 0;
            let mut vote_granted = false;
            while !buf.is_empty() {
                let (tag, wire_type) = split_key(get_varint(&mut buf)?);
                match (tag, wire_type) {
                    (1, WIRE_VARINT) => term = get_varint(&mut buf)?,
                    (2, WIRE_VARINT) => vote_granted = get_varint(&mut buf)? != 0,
                    _ => skip_field(&mut buf, tag, wire_type)?,
                }
            }
            Ok(Message::RequestVoteResult { term, vote_granted })
        }
        TAG_COMMAND => {
            let mut command = Vec::new();
            while !buf.is_empty() {
                let (tag, wire_type) = split_key(get_varint(&mut buf)?);
                match (tag, wire_type) {
                    (1, WIRE_LEN) => command = get_len_prefixed(&mut buf)?.to_vec(),
                    _ => skip_field(&mut buf, tag, wire_type)?,
                }
            }
            Ok(Message::Command { command })
        }
        TAG_COMMAND_RESULT => {
            let mut success = false;
            let mut redirect = None;
            while !buf.is_empty() {
                let (tag, wire_type) = split_key(get_varint(&mut buf)?);
                match (tag, wire_type) {
                    (1, WIRE_VARINT) => success = get_varint(&mut buf)? != 0,
                    (2, WIRE_LEN) => {
                        redirect = Some(decode_peer_id(get_len_prefixed(&mut buf)?)?)
                    }
                    _ => skip_field(&mut buf, tag, wire_type)?,
                }
            }
            Ok(Message::CommandResult { success, redirect })
        }
        other => Err(WireError::UnsupportedWireType {
            tag: other,
            wire_type: WIRE_LEN,
        }),
    }
}

// -- stream framing --

/// length-delimited framing for frames on a byte stream
#[derive(Default)]
pub struct WireCodec;

impl Encoder<Frame> for WireCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), io::Error> {
        let body = encode_frame(&item);
        if body.len() > MAX_FRAME_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
        }
        dst.put_u32(body.len() as u32);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

impl Decoder for WireCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        if src.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes(src[..4].try_into().unwrap()) as usize;
        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
        }
        if src.len() < 4 + len {
            src.reserve(4 + len - src.len());
            return Ok(None);
        }
        src.advance(4);
        let body = src.split_to(len);
        decode_frame(&body)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
