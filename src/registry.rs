//! In-memory room registry shared by the admission and relay services.
//!
//! The registry is the single piece of state shared between the two I/O
//! paths (spec.md §5): every mutation and every read that depends on a
//! consistent view of a room's members happens under one mutex. The
//! registry itself never performs I/O — callers snapshot what they need
//! under the lock and do their sends/writes after releasing it.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;

use crate::token;

pub type RoomName = Vec<u8>;
pub type Token = Vec<u8>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("room already exists")]
    RoomExists,
    #[error("room not found")]
    RoomNotFound,
    #[error("registry mutex poisoned")]
    MutexPoisoned,
}

/// One member of a room: its token, whether it is the host, and its
/// datagram address. The address is `None` until the member's first valid
/// chat datagram arrives — admission never learns the client's UDP port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub token: Token,
    pub is_host: bool,
    pub addr: Option<SocketAddr>,
}

#[derive(Debug, Default)]
struct Room {
    members: Vec<Member>,
}

impl Room {
    fn position_of(&self, token: &[u8]) -> Option<usize> {
        self.members.iter().position(|m| m.token == token)
    }
}

#[derive(Default)]
pub struct Registry {
    rooms: Mutex<HashMap<RoomName, Room>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry { rooms: Mutex::new(HashMap::new()) }
    }

    /// Creates a room with a single host member, minting the host token
    /// under the same lock as the insert so the mint and the mutation are
    /// atomic. Fails with `RoomExists` if the name is already taken; the
    /// registry is left unchanged on failure.
    pub fn create(&self, room_name: &[u8], host_ip: IpAddr) -> Result<Token, RegistryError> {
        let mut rooms = match self.rooms.lock() {
            Ok(rooms) => rooms,
            Err(_) => return Err(RegistryError::MutexPoisoned),
        };
        if rooms.contains_key(room_name) {
            return Err(RegistryError::RoomExists);
        }
        let token = token::host_token(host_ip);
        let room = Room {
            members: vec![Member { token: token.clone(), is_host: true, addr: None }],
        };
        rooms.insert(room_name.to_vec(), room);
        Ok(token)
    }

    /// Appends a guest member, minting `guest_<ip>_<n>` where `n` is the
    /// room's member count at join time, read under the same lock as the
    /// append. Fails with `RoomNotFound` if the room does not exist.
    pub fn join(&self, room_name: &[u8], guest_ip: IpAddr) -> Result<Token, RegistryError> {
        let mut rooms = match self.rooms.lock() {
            Ok(rooms) => rooms,
            Err(_) => return Err(RegistryError::MutexPoisoned),
        };
        let room = rooms.get_mut(room_name).ok_or(RegistryError::RoomNotFound)?;
        let token = token::guest_token(guest_ip, room.members.len());
        room.members.push(Member { token: token.clone(), is_host: false, addr: None });
        Ok(token)
    }

    /// Returns the member with the given token in the given room, if any.
    pub fn authenticate(&self, room_name: &[u8], token: &[u8]) -> Result<Option<Member>, RegistryError> {
        let rooms = match self.rooms.lock() {
            Ok(rooms) => rooms,
            Err(_) => return Err(RegistryError::MutexPoisoned),
        };
        Ok(rooms.get(room_name).and_then(|room| room.members.iter().find(|m| m.token == token).cloned()))
    }

    /// Sets (or updates, on NAT rebinding) a member's datagram address.
    /// No-op if the room or token no longer exists.
    pub fn bind_address(&self, room_name: &[u8], token: &[u8], addr: SocketAddr) -> Result<(), RegistryError> {
        let mut rooms = match self.rooms.lock() {
            Ok(rooms) => rooms,
            Err(_) => return Err(RegistryError::MutexPoisoned),
        };
        if let Some(room) = rooms.get_mut(room_name) {
            if let Some(idx) = room.position_of(token) {
                room.members[idx].addr = Some(addr);
            }
        }
        Ok(())
    }

    /// Snapshot of every *bound* member of the room other than the one
    /// holding `token`. Safe to call right before releasing the lock and
    /// then sending outside of it.
    pub fn members_except(&self, room_name: &[u8], token: &[u8]) -> Result<Vec<Member>, RegistryError> {
        let rooms = match self.rooms.lock() {
            Ok(rooms) => rooms,
            Err(_) => return Err(RegistryError::MutexPoisoned),
        };
        Ok(match rooms.get(room_name) {
            Some(room) => room
                .members
                .iter()
                .filter(|m| m.token != token && m.addr.is_some())
                .cloned()
                .collect(),
            None => Vec::new(),
        })
    }

    /// Number of rooms currently tracked. Used by tests and shutdown
    /// logging, never by the protocol itself.
    pub fn room_count(&self) -> Result<usize, RegistryError> {
        match self.rooms.lock() {
            Ok(rooms) => Ok(rooms.len()),
            Err(_) => Err(RegistryError::MutexPoisoned),
        }
    }

    /// Number of members in a room, or `None` if it does not exist.
    pub fn member_count(&self, room_name: &[u8]) -> Result<Option<usize>, RegistryError> {
        match self.rooms.lock() {
            Ok(rooms) => Ok(rooms.get(room_name).map(|r| r.members.len())),
            Err(_) => Err(RegistryError::MutexPoisoned),
        }
    }

    /// Drops every room. Called once, at shutdown.
    pub fn clear(&self) -> Result<(), RegistryError> {
        match self.rooms.lock() {
            Ok(mut rooms) => {
                rooms.clear();
                Ok(())
            }
            Err(_) => Err(RegistryError::MutexPoisoned),
        }
    }
}
