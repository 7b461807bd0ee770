#![warn(clippy::pedantic)]
// Sometimes a redundant else is clearer
#![allow(clippy::redundant_else)]
// Don't care enough to fix
#![allow(clippy::match_same_arms)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::similar_names)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::wildcard_imports)]

//! The mDNS / DNS-SD protocol engine: an I/O-free state machine
//! combining a cache of received records, a store of locally owned
//! (published) records with probing and conflict detection, and a
//! registry of outstanding queries with caller callbacks.
//!
//! The caller supplies the socket and the clock and drives the
//! non-blocking loop: feed received datagrams to [`Engine::receive`],
//! drain [`Engine::next_packet`] until it returns `None`, then wait
//! for at most [`Engine::sleep`] before going round again.

pub mod cache;
pub mod clock;
pub mod engine;
pub mod hash;
pub mod publish;
pub mod query;
pub mod scheduler;

use std::net::{Ipv4Addr, Ipv6Addr};

/// The mDNS UDP port.
pub const MDNS_PORT: u16 = 5353;

/// The IPv4 link-local multicast group.
pub const MDNS_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);

/// The IPv6 link-local multicast group (`ff02::fb`).
pub const MDNS_GROUP_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xfb);
