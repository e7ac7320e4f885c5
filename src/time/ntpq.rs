use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace};

use crate::core::{Error, Result};

/// Mode 6 header: LI = 0, VN = 2, mode = 6 (control), as sent by ntpq
const CONTROL_HEADER: u8 = (2 << 3) | 6;

/// Control header size in bytes
const HEADER_LEN: usize = 12;

/// Largest control datagram ntpd emits
const MAX_DATAGRAM: usize = 1024;

const OP_READSTAT: u8 = 1;
const OP_READVAR: u8 = 2;

const FLAG_RESPONSE: u8 = 0x80;
const FLAG_ERROR: u8 = 0x40;
const FLAG_MORE: u8 = 0x20;
const OPCODE_MASK: u8 = 0x1f;

/// Association id addressing the daemon's system variables
pub const SYSTEM_ASSOCIATION: u16 = 0;

/// One association as listed by the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssociationStatus {
    pub id: u16,
    pub status: u16,
}

/// Variables returned for one association
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarResponse {
    /// Status word of the association (system status for association 0)
    pub status: u16,
    /// `name=value` text
    pub text: String,
}

/// Peer selection code carried in an association status word
pub fn selection_code(status: u16) -> u8 {
    ((status >> 8) & 0x7) as u8
}

/// Query capability of an NTP daemon
pub trait NtpQuery: Send + 'static {
    /// Opens the control connection
    fn connect(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Drops the control connection
    fn close(&mut self);

    /// Lists the associations the daemon tracks
    fn associations(&mut self) -> impl Future<Output = Result<Vec<AssociationStatus>>> + Send;

    /// Reads the named variables of one association
    fn read_vars(
        &mut self,
        association: u16,
        names: &[&'static str],
    ) -> impl Future<Output = Result<VarResponse>> + Send;
}

/// NTP mode 6 control message client
pub struct NtpqClient {
    address: String,
    timeout: Duration,
    socket: Option<UdpSocket>,
    sequence: u16,
}

impl NtpqClient {
    /// Creates an unconnected client for `address` (host:port)
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        NtpqClient {
            address: address.into(),
            timeout,
            socket: None,
            sequence: 0,
        }
    }

    async fn request(&mut self, opcode: u8, association: u16, data: &[u8]) -> Result<(u16, Vec<u8>)> {
        self.sequence = self.sequence.wrapping_add(1);
        let sequence = self.sequence;
        let packet = encode_request(opcode, sequence, association, data)?;

        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| Error::daemon("control connection not open"))?;
        socket.send(&packet).await?;

        let mut assembly = Reassembly::default();
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let len = tokio::time::timeout(self.timeout, socket.recv(&mut buf))
                .await
                .map_err(|_| Error::daemon(format!("no control response from {}", self.address)))??;

            let Some(fragment) = decode_response(&buf[..len], opcode, sequence)? else {
                trace!(len, "Ignoring stale control datagram");
                continue;
            };
            if let Some(done) = assembly.push(fragment)? {
                return Ok(done);
            }
        }
    }
}

impl NtpQuery for NtpqClient {
    async fn connect(&mut self) -> Result<()> {
        let peer: SocketAddr = tokio::net::lookup_host(self.address.as_str())
            .await?
            .next()
            .ok_or_else(|| Error::daemon(format!("cannot resolve {}", self.address)))?;

        let local: SocketAddr = if peer.is_ipv4() {
            "0.0.0.0:0".parse().map_err(|_| Error::daemon("bad bind address"))?
        } else {
            "[::]:0".parse().map_err(|_| Error::daemon("bad bind address"))?
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        info!(daemon = %peer, "Control connection open");
        self.socket = Some(socket);
        Ok(())
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            debug!(daemon = %self.address, "Control connection closed");
        }
    }

    async fn associations(&mut self) -> Result<Vec<AssociationStatus>> {
        let (_, data) = self.request(OP_READSTAT, SYSTEM_ASSOCIATION, &[]).await?;
        if data.len() % 4 != 0 {
            return Err(Error::daemon(format!("association list of {} bytes", data.len())));
        }

        let mut data = &data[..];
        let mut list = Vec::with_capacity(data.len() / 4);
        while data.has_remaining() {
            list.push(AssociationStatus {
                id: data.get_u16(),
                status: data.get_u16(),
            });
        }
        Ok(list)
    }

    async fn read_vars(&mut self, association: u16, names: &[&'static str]) -> Result<VarResponse> {
        let query = names.join(",");
        let (status, data) = self.request(OP_READVAR, association, query.as_bytes()).await?;
        Ok(VarResponse {
            status,
            text: String::from_utf8_lossy(&data).into_owned(),
        })
    }
}

fn encode_request(opcode: u8, sequence: u16, association: u16, data: &[u8]) -> Result<BytesMut> {
    let count = u16::try_from(data.len())
        .ok()
        .filter(|&n| HEADER_LEN + n as usize <= MAX_DATAGRAM)
        .ok_or_else(|| Error::daemon("control request too long"))?;

    let mut packet = BytesMut::with_capacity(HEADER_LEN + data.len() + 3);
    packet.put_u8(CONTROL_HEADER);
    packet.put_u8(opcode & OPCODE_MASK);
    packet.put_u16(sequence);
    packet.put_u16(0); // status
    packet.put_u16(association);
    packet.put_u16(0); // offset
    packet.put_u16(count);
    packet.extend_from_slice(data);
    while packet.len() % 4 != 0 {
        packet.put_u8(0);
    }
    Ok(packet)
}

#[derive(Debug)]
struct Fragment {
    status: u16,
    offset: usize,
    more: bool,
    data: Vec<u8>,
}

/// Decodes one response datagram; `None` for datagrams of another exchange
fn decode_response(packet: &[u8], opcode: u8, sequence: u16) -> Result<Option<Fragment>> {
    if packet.len() < HEADER_LEN {
        return Err(Error::daemon(format!("short control datagram ({} bytes)", packet.len())));
    }

    let mut header = &packet[..HEADER_LEN];
    let mode = header.get_u8() & 0x7;
    let flags = header.get_u8();
    let seq = header.get_u16();
    let status = header.get_u16();
    let _association = header.get_u16();
    let offset = header.get_u16() as usize;
    let count = header.get_u16() as usize;

    if mode != 6 || flags & FLAG_RESPONSE == 0 || flags & OPCODE_MASK != opcode || seq != sequence {
        return Ok(None);
    }
    if flags & FLAG_ERROR != 0 {
        return Err(Error::daemon(format!("daemon error code {}", status >> 8)));
    }
    if packet.len() < HEADER_LEN + count {
        return Err(Error::daemon("truncated control datagram"));
    }

    Ok(Some(Fragment {
        status,
        offset,
        more: flags & FLAG_MORE != 0,
        data: packet[HEADER_LEN..HEADER_LEN + count].to_vec(),
    }))
}

/// Collects the fragments of one response
#[derive(Debug, Default)]
struct Reassembly {
    status: u16,
    fragments: Vec<(usize, Vec<u8>)>,
    total: Option<usize>,
}

impl Reassembly {
    fn push(&mut self, fragment: Fragment) -> Result<Option<(u16, Vec<u8>)>> {
        if self.fragments.iter().any(|(offset, _)| *offset == fragment.offset) {
            return Ok(None);
        }
        if !fragment.more {
            self.total = Some(fragment.offset + fragment.data.len());
        }
        self.status = fragment.status;
        self.fragments.push((fragment.offset, fragment.data));

        let Some(total) = self.total else {
            return Ok(None);
        };

        self.fragments.sort_by_key(|(offset, _)| *offset);
        let mut expected = 0;
        for (offset, data) in &self.fragments {
            if *offset != expected {
                return Ok(None);
            }
            expected += data.len();
        }
        if expected != total {
            return Err(Error::daemon("overlapping control fragments"));
        }

        let data = self
            .fragments
            .drain(..)
            .flat_map(|(_, data)| data)
            .collect();
        Ok(Some((self.status, data)))
    }
}
