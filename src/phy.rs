/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */

//! Transport abstraction.
//!
//! The protocol engine is transport-agnostic: the host owns the sockets and
//! the poll loop, and speaks to the engine purely in datagrams and byte
//! streams through these traits. Implementations are expected to be
//! non-blocking throughout, to multiplex readable/writable/error sets in a
//! single poll loop, and to provide some way for other threads to wake that
//! loop (the classic trick is a pipe whose read end sits in the select set).

use crate::inetaddress::InetAddress;

/// Opaque handle to a host socket. Meaningful only to the host's transport
/// layer; the engine just passes it back on sends and closes.
pub type SocketHandle = u64;

/// Services the host provides to the engine.
pub trait PhyLayer: Send + Sync {
    /// Send a UDP datagram from a local socket to a remote address.
    /// Returns true if the datagram was accepted for sending; false is
    /// treated as packet loss, never retried here.
    fn send_udp(&self, local: SocketHandle, remote: &InetAddress, data: &[u8]) -> bool;

    /// Begin listening for TCP connections on an address. The handle is
    /// reported to the handler via `on_tcp_accept` for each new connection.
    fn tcp_listen(&self, local: &InetAddress) -> Option<SocketHandle>;

    /// Begin an outgoing TCP connection; completion is signaled via
    /// `on_tcp_connect`.
    fn tcp_connect(&self, remote: &InetAddress) -> Option<SocketHandle>;

    /// Queue stream bytes. Returns the number of bytes accepted, which may
    /// be short; the handler's `on_tcp_writable` says when to try again.
    fn tcp_send(&self, sock: SocketHandle, data: &[u8]) -> usize;

    /// Close a stream or listener.
    fn tcp_close(&self, sock: SocketHandle);
}

/// Callbacks the engine's host invokes as transport events arrive.
pub trait PhyHandler: Send + Sync {
    /// A UDP datagram arrived on a local socket.
    fn on_udp(&self, local: SocketHandle, from: &InetAddress, data: &[u8]);

    /// An outgoing TCP connection finished (or failed) connecting.
    fn on_tcp_connect(&self, sock: SocketHandle, success: bool);

    /// A listener accepted a connection.
    fn on_tcp_accept(&self, listener: SocketHandle, sock: SocketHandle, from: &InetAddress);

    /// Stream bytes arrived.
    fn on_tcp_data(&self, sock: SocketHandle, data: &[u8]);

    /// The socket can accept more outgoing bytes after a short write.
    fn on_tcp_writable(&self, sock: SocketHandle);

    /// The socket closed, locally or remotely.
    fn on_tcp_close(&self, sock: SocketHandle);
}
