//! Packet sources for the capture state machine: UDP sockets, raw-socket
//! sniffers, and disk files read as fixed-size records.
//!
//! Sockets are built with `socket2` so options (reuse, buffer sizes,
//! timeouts) can be set before handing I/O to `std::net::UdpSocket`. The
//! sniffer variant reads raw IPv4 datagrams and strips the IP and UDP
//! headers in place.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::status::{Result, Status, Whence};

const UDP_HEADER_SIZE: usize = 8;

/// Outcome of one source read.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SourceRead {
    /// One packet of this many bytes is in the buffer.
    Packet(usize),
    /// The read deadline expired (or nothing was pending in a drain).
    Timeout,
    /// Disk source ran out of whole records.
    EndOfFile,
}

/// Where packets come from.
pub enum PacketSource {
    Udp(UdpSocket),
    /// Raw socket receiving full IPv4 datagrams.
    Sniffer(UdpSocket),
    Disk { file: File, frame_size: usize },
}

/// Bind a UDP socket for capture with the options the receive path wants.
pub fn bind_udp(addr: SocketAddr, recv_buffer_bytes: usize) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if recv_buffer_bytes > 0 {
        socket.set_recv_buffer_size(recv_buffer_bytes)?;
    }
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

impl PacketSource {
    /// Disk source reading fixed-size records of `frame_size` bytes.
    pub fn disk(file: File, frame_size: usize) -> Result<PacketSource> {
        if frame_size == 0 {
            return Err(Status::InvalidArgument);
        }
        Ok(PacketSource::Disk { file, frame_size })
    }

    pub(crate) fn is_seekable(&self) -> bool {
        matches!(self, PacketSource::Disk { .. })
    }

    /// Largest packet this source can produce into `buf_size`-byte buffers.
    pub(crate) fn frame_capacity(&self, max_payload_size: usize, header_size: usize) -> usize {
        match self {
            // Room for the format header plus payload.
            PacketSource::Udp(_) => header_size + max_payload_size,
            // Raw datagrams also carry IP (up to 60 bytes) + UDP headers.
            PacketSource::Sniffer(_) => 60 + UDP_HEADER_SIZE + header_size + max_payload_size,
            PacketSource::Disk { frame_size, .. } => *frame_size,
        }
    }

    /// Deadline for the blocking read at the top of each receive cycle.
    pub(crate) fn set_timeout(&self, timeout: Duration) -> io::Result<()> {
        match self {
            PacketSource::Udp(socket) | PacketSource::Sniffer(socket) => {
                socket.set_read_timeout(Some(timeout))
            }
            PacketSource::Disk { .. } => Ok(()),
        }
    }

    /// Switch socket sources between the blocking head read and the
    /// non-blocking drain of the rest of a batch.
    pub(crate) fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            PacketSource::Udp(socket) | PacketSource::Sniffer(socket) => {
                socket.set_nonblocking(nonblocking)
            }
            PacketSource::Disk { .. } => Ok(()),
        }
    }

    /// Read one packet into `buf`. For sniffer sources the transport
    /// headers are stripped and the payload moved to the front.
    pub(crate) fn recv_packet(&mut self, buf: &mut [u8]) -> io::Result<SourceRead> {
        match self {
            PacketSource::Udp(socket) => match socket.recv(buf) {
                Ok(len) => Ok(SourceRead::Packet(len)),
                Err(e) if would_block(&e) => Ok(SourceRead::Timeout),
                Err(e) => Err(e),
            },
            PacketSource::Sniffer(socket) => match socket.recv(buf) {
                Ok(len) => Ok(strip_ip_udp(buf, len)),
                Err(e) if would_block(&e) => Ok(SourceRead::Timeout),
                Err(e) => Err(e),
            },
            PacketSource::Disk { file, frame_size } => {
                let record_start = file.stream_position()?;
                let frame = &mut buf[..*frame_size];
                match file.read_exact(frame) {
                    Ok(()) => Ok(SourceRead::Packet(*frame_size)),
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        // Rewind past the partial record so a later append
                        // plus re-read starts at a whole frame.
                        file.seek(SeekFrom::Start(record_start))?;
                        Ok(SourceRead::EndOfFile)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    pub(crate) fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        match self {
            PacketSource::Disk { file, .. } => {
                let target = match whence {
                    Whence::Set => SeekFrom::Start(offset as u64),
                    Whence::Cur => SeekFrom::Current(offset),
                    Whence::End => SeekFrom::End(offset),
                };
                file.seek(target).map_err(|_| Status::MemOpFailed)
            }
            _ => Err(Status::InvalidState),
        }
    }

    pub(crate) fn tell(&mut self) -> Result<u64> {
        match self {
            PacketSource::Disk { file, .. } => {
                file.stream_position().map_err(|_| Status::MemOpFailed)
            }
            _ => Err(Status::InvalidState),
        }
    }
}

fn would_block(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Drop the IPv4 + UDP headers from a raw datagram, keeping the payload at
/// the front of the buffer. Non-UDP traffic reads as a timeout so the
/// caller just moves on.
fn strip_ip_udp(buf: &mut [u8], len: usize) -> SourceRead {
    if len < 20 {
        return SourceRead::Timeout;
    }
    let ihl = usize::from(buf[0] & 0x0F) * 4;
    if buf[0] >> 4 != 4 || ihl < 20 || buf[9] != 17 {
        return SourceRead::Timeout;
    }
    let skip = ihl + UDP_HEADER_SIZE;
    if len <= skip {
        return SourceRead::Timeout;
    }
    buf.copy_within(skip..len, 0);
    SourceRead::Packet(len - skip)
}
