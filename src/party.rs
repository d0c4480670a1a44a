//! Participants and the peer configuration handed to every party.
//!
//! A party learns who it is and where everybody else lives from its command line:
//! `-i<me>` followed by one `-p<id>:<addr>:<port>` per party (including itself).
//! This is the format parsed by FRESCO's `CmdLineUtil`, so the exact token layout,
//! trailing space included, must not change.

use std::{collections::BTreeSet, net::IpAddr};

use derive_more::{Display, From, Into};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Port every party listens on.
pub const PARTY_PORT: u16 = 9001;

/// 1-based party identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Into, Serialize,
    Deserialize,
)]
pub struct PartyId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: PartyId,
    pub addr: IpAddr,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PeerError {
    #[error("A peer list needs at least one participant")]
    Empty,
    #[error("Participant at position {position} has id {found}, expected {expected}")]
    NonContiguous {
        position: usize,
        found: PartyId,
        expected: PartyId,
    },
    #[error("Own id {id} is outside of 1..={parties}")]
    SelfOutOfRange { id: PartyId, parties: usize },
    #[error("Missing own id (-i)")]
    MissingSelf,
    #[error("Own id given more than once")]
    DuplicateSelf,
    #[error("Party {0} listed more than once")]
    DuplicatePeer(PartyId),
    #[error("Own id {0} is not among the listed parties")]
    UnknownSelf(PartyId),
    #[error("Malformed token '{0}'")]
    Malformed(String),
}

/// Ordered list of participants, ids are exactly `1..=n` in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerList(Vec<Participant>);

impl PeerList {
    /// Construct a peer list, checking that ids run contiguously from 1.
    pub fn new(participants: Vec<Participant>) -> Result<Self, PeerError> {
        if participants.is_empty() {
            return Err(PeerError::Empty);
        }
        for (position, p) in participants.iter().enumerate() {
            let expected = PartyId(position as u32 + 1);
            if p.id != expected {
                return Err(PeerError::NonContiguous {
                    position,
                    found: p.id,
                    expected,
                });
            }
        }
        Ok(Self(participants))
    }

    /// Assign ids in enumeration order.
    pub fn from_addrs(addrs: impl IntoIterator<Item = impl Into<IpAddr>>) -> Result<Self, PeerError> {
        let participants = addrs
            .into_iter()
            .enumerate()
            .map(|(i, addr)| Participant {
                id: PartyId(i as u32 + 1),
                addr: addr.into(),
            })
            .collect();
        Self::new(participants)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Participant> {
        self.0.iter()
    }

    fn check_self(&self, id: PartyId) -> Result<(), PeerError> {
        if id.0 == 0 || id.0 as usize > self.len() {
            return Err(PeerError::SelfOutOfRange {
                id,
                parties: self.len(),
            });
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a PeerList {
    type Item = &'a Participant;
    type IntoIter = std::slice::Iter<'a, Participant>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Build the peer configuration string for party `me`.
///
/// Returns `-i<me> -p1:<addr1>:9001 ... -pN:<addrN>:9001 `, every token followed by a single space.
pub fn build_config(me: PartyId, peers: &PeerList) -> Result<String, PeerError> {
    peers.check_self(me)?;
    let others = peers
        .iter()
        .map(|p| format!("-p{}:{}:{PARTY_PORT} ", p.id, p.addr))
        .join("");
    Ok(format!("-i{me} {others}"))
}

/// Same tokens as [`build_config`], one argument each.
pub fn config_args(me: PartyId, peers: &PeerList) -> Result<Vec<String>, PeerError> {
    let config = build_config(me, peers)?;
    Ok(config.split_whitespace().map(str::to_owned).collect())
}

/// Peer configuration as read back from a party's arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub me: PartyId,
    pub peers: Vec<(PartyId, IpAddr, u16)>,
}

impl PeerConfig {
    /// Parse `-i<id>` and `-p<id>:<addr>:<port>` tokens, other tokens are ignored.
    pub fn parse<S: AsRef<str>>(tokens: impl IntoIterator<Item = S>) -> Result<Self, PeerError> {
        let mut me = None;
        let mut peers = Vec::new();
        let mut seen = BTreeSet::new();
        for token in tokens {
            let token = token.as_ref();
            if let Some(id) = token.strip_prefix("-i") {
                if me.is_some() {
                    return Err(PeerError::DuplicateSelf);
                }
                me = Some(parse_id(id, token)?);
            } else if let Some(peer) = token.strip_prefix("-p") {
                let (id, addr, port) = parse_peer(peer, token)?;
                if !seen.insert(id) {
                    return Err(PeerError::DuplicatePeer(id));
                }
                peers.push((id, addr, port));
            }
        }
        let me = me.ok_or(PeerError::MissingSelf)?;
        if !seen.contains(&me) {
            return Err(PeerError::UnknownSelf(me));
        }
        Ok(Self { me, peers })
    }

    pub fn parse_str(config: &str) -> Result<Self, PeerError> {
        Self::parse(config.split_whitespace())
    }

    /// Socket addresses of everybody but ourselves.
    pub fn others(&self) -> Vec<std::net::SocketAddr> {
        self.peers
            .iter()
            .filter(|(id, _, _)| *id != self.me)
            .map(|&(_, addr, port)| (addr, port).into())
            .collect_vec()
    }
}

fn parse_id(id: &str, token: &str) -> Result<PartyId, PeerError> {
    match id.parse::<u32>() {
        Ok(0) | Err(_) => Err(PeerError::Malformed(token.to_owned())),
        Ok(id) => Ok(PartyId(id)),
    }
}

fn parse_peer(peer: &str, token: &str) -> Result<(PartyId, IpAddr, u16), PeerError> {
    let malformed = || PeerError::Malformed(token.to_owned());
    // The address may be IPv6, so split the id off the front and the port off the back.
    let (id, rest) = peer.split_once(':').ok_or_else(malformed)?;
    let (addr, port) = rest.rsplit_once(':').ok_or_else(malformed)?;
    let id = parse_id(id, token)?;
    let addr = addr.parse().map_err(|_| malformed())?;
    let port = port.parse().map_err(|_| malformed())?;
    Ok((id, addr, port))
}
