//! The framed wire messages exchanged between ring peers.
//!
//! Every frame carries an [`Envelope`]: a protocol tag plus either a Chord
//! control message (tag 1) or an opaque application payload (any other tag).
//! The envelope is serialized as JSON, so fields are named, unknown fields
//! are skipped on decode, and newly added optional fields default to absent,
//! which keeps old and new nodes interoperable.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};

use crate::core::{Finger, NodeId, CHORD_PROTO};

/// Chord control commands. The numbering is part of the wire format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Command {
    Ping = 0,
    Pong = 1,
    GetPred = 2,
    GetId = 3,
    GetFingers = 4,
    ClaimPred = 5,
    GetSucc = 6,
}

impl Command {
    /// Decode a wire command number. Unknown numbers come from newer peers
    /// and are reported to the dispatcher as `None`.
    pub fn from_wire(value: u32) -> Option<Command> {
        match value {
            0 => Some(Command::Ping),
            1 => Some(Command::Pong),
            2 => Some(Command::GetPred),
            3 => Some(Command::GetId),
            4 => Some(Command::GetFingers),
            5 => Some(Command::ClaimPred),
            6 => Some(Command::GetSucc),
            _ => None,
        }
    }
}

/// A finger as it travels on the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FingerMessage {
    pub id: NodeId,
    pub address: String,
}

impl From<&Finger> for FingerMessage {
    fn from(finger: &Finger) -> Self {
        Self {
            id: finger.id,
            address: finger.addr.clone(),
        }
    }
}

impl From<FingerMessage> for Finger {
    fn from(msg: FingerMessage) -> Self {
        Finger::new(msg.id, msg.address)
    }
}

/// One Chord control message: a command plus whichever payload variant the
/// command uses. Absent fields encode the null body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChordMessage {
    pub cmd: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingers: Option<Vec<FingerMessage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pred: Option<FingerMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<NodeId>,
}

impl ChordMessage {
    fn bare(cmd: Command) -> Self {
        Self {
            cmd: cmd as u32,
            fingers: None,
            pred: None,
            id: None,
        }
    }
}

/// Top-level framed message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub proto: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chord: Option<ChordMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<u8>>,
}

impl Envelope {
    fn chord(msg: ChordMessage) -> Self {
        Self {
            proto: CHORD_PROTO,
            chord: Some(msg),
            payload: None,
        }
    }

    /// The empty-bodied reply: "no predecessor" or a bare acknowledgement.
    pub fn null() -> Self {
        Self {
            proto: CHORD_PROTO,
            chord: None,
            payload: None,
        }
    }

    pub fn ping() -> Self {
        Self::chord(ChordMessage::bare(Command::Ping))
    }

    pub fn pong() -> Self {
        Self::chord(ChordMessage::bare(Command::Pong))
    }

    pub fn get_id() -> Self {
        Self::chord(ChordMessage::bare(Command::GetId))
    }

    pub fn send_id(id: NodeId) -> Self {
        let mut msg = ChordMessage::bare(Command::GetId);
        msg.id = Some(id);
        Self::chord(msg)
    }

    pub fn get_fingers() -> Self {
        Self::chord(ChordMessage::bare(Command::GetFingers))
    }

    pub fn get_succ() -> Self {
        Self::chord(ChordMessage::bare(Command::GetSucc))
    }

    /// A `FingerList` reply. The command mirrors the request so a reply is
    /// recognizable on its own ([`Command::GetFingers`] or [`Command::GetSucc`]).
    pub fn send_fingers(cmd: Command, fingers: &[Finger]) -> Self {
        let mut msg = ChordMessage::bare(cmd);
        msg.fingers = Some(fingers.iter().map(FingerMessage::from).collect());
        Self::chord(msg)
    }

    pub fn get_pred() -> Self {
        Self::chord(ChordMessage::bare(Command::GetPred))
    }

    pub fn send_pred(finger: &Finger) -> Self {
        let mut msg = ChordMessage::bare(Command::GetPred);
        msg.pred = Some(FingerMessage::from(finger));
        Self::chord(msg)
    }

    pub fn claim_pred(finger: &Finger) -> Self {
        let mut msg = ChordMessage::bare(Command::ClaimPred);
        msg.pred = Some(FingerMessage::from(finger));
        Self::chord(msg)
    }

    /// A message for a layered application protocol (tag other than 1).
    pub fn application(proto: u32, payload: Vec<u8>) -> Self {
        Self {
            proto,
            chord: None,
            payload: Some(payload),
        }
    }
}

pub fn encode(envelope: &Envelope) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(envelope)?)
}

pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    Ok(serde_json::from_slice(bytes)?)
}

fn chord_body(envelope: &Envelope) -> Result<&ChordMessage> {
    if envelope.proto != CHORD_PROTO {
        bail!("expected chord reply, got protocol tag {}", envelope.proto);
    }
    envelope
        .chord
        .as_ref()
        .ok_or_else(|| anyhow!("chord reply has no body"))
}

/// Extract the finger list from a `GetFingers` or `GetSucc` reply. A null
/// body decodes as an empty list.
pub fn parse_fingers(envelope: &Envelope) -> Result<Vec<Finger>> {
    if envelope.proto != CHORD_PROTO {
        bail!("expected chord reply, got protocol tag {}", envelope.proto);
    }
    let Some(body) = envelope.chord.as_ref() else {
        return Ok(Vec::new());
    };
    Ok(body
        .fingers
        .iter()
        .flatten()
        .cloned()
        .map(Finger::from)
        .collect())
}

/// Extract the predecessor from a `GetPred` reply. The null reply means the
/// peer has no predecessor.
pub fn parse_pred(envelope: &Envelope) -> Result<Option<Finger>> {
    if envelope.proto != CHORD_PROTO {
        bail!("expected chord reply, got protocol tag {}", envelope.proto);
    }
    Ok(envelope
        .chord
        .as_ref()
        .and_then(|body| body.pred.clone())
        .map(Finger::from))
}

pub fn parse_id(envelope: &Envelope) -> Result<NodeId> {
    chord_body(envelope)?
        .id
        .ok_or_else(|| anyhow!("reply carries no identifier"))
}

/// True iff the reply is a well-formed `Pong`. Any other command, a null
/// body, or a foreign protocol tag counts as failure.
pub fn parse_pong(envelope: &Envelope) -> bool {
    envelope.proto == CHORD_PROTO
        && envelope
            .chord
            .as_ref()
            .map(|body| body.cmd == Command::Pong as u32)
            .unwrap_or(false)
}
