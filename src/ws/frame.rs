/*
 * frame.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Corriere, an asynchronous HTTP client.
 *
 * Corriere is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Corriere is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Corriere.  If not, see <http://www.gnu.org/licenses/>.
 */

//! WebSocket frame format (RFC 6455 §5): masked encoder for the send
//! path, pull-style reader for the receive path.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

// Opcodes
pub const OP_CONTINUATION: u8 = 0x0;
pub const OP_TEXT: u8 = 0x1;
pub const OP_BINARY: u8 = 0x2;
pub const OP_CLOSE: u8 = 0x8;
pub const OP_PING: u8 = 0x9;
pub const OP_PONG: u8 = 0xA;

pub fn is_control(opcode: u8) -> bool {
    matches!(opcode, OP_CLOSE | OP_PING | OP_PONG)
}

/// Encode one frame, client to server: FIN set, payload XOR-masked with
/// `mask_key`. Length uses the 7-bit, 16-bit, or 64-bit form as needed.
pub fn encode_frame(opcode: u8, payload: &[u8], mask_key: &[u8; 4], out: &mut BytesMut) -> Result<()> {
    if is_control(opcode) && payload.len() > 125 {
        return Err(Error::Connection("control frame payload over 125 bytes".into()));
    }
    let fin: u8 = 0x80;
    out.put_u8(fin | (opcode & 0x0f));
    let len = payload.len();
    if len < 126 {
        out.put_u8(0x80 | (len as u8));
    } else if len < 65536 {
        out.put_u8(0x80 | 126);
        out.put_u16(len as u16);
    } else {
        out.put_u8(0x80 | 127);
        out.put_u64(len as u64);
    }
    out.put_slice(mask_key);
    for (i, &b) in payload.iter().enumerate() {
        out.put_u8(b ^ mask_key[i % 4]);
    }
    Ok(())
}

/// Pull-style frame reader over the read half of the transport, with a
/// buffer seeded from any bytes read past the handshake.
pub struct FrameReader<R> {
    reader: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, leftover: Bytes) -> Self {
        let mut buf = BytesMut::with_capacity(8192);
        buf.extend_from_slice(&leftover);
        Self { reader, buf }
    }

    async fn read_exactly(&mut self, n: usize) -> Result<Bytes> {
        let mut tmp = [0u8; 8192];
        while self.buf.len() < n {
            let read = self.reader.read(&mut tmp).await?;
            if read == 0 {
                return Err(Error::ConnectionDisconnected);
            }
            self.buf.extend_from_slice(&tmp[..read]);
        }
        Ok(self.buf.split_to(n).freeze())
    }

    /// Read one complete frame, unmasking if the peer masked it.
    /// Returns (opcode, payload).
    pub async fn read_frame(&mut self) -> Result<(u8, Bytes)> {
        let header = self.read_exactly(2).await?;
        let opcode = header[0] & 0x0f;
        let masked = (header[1] & 0x80) != 0;
        let len7 = header[1] & 0x7f;

        let len = match len7 {
            126 => {
                let mut ext = self.read_exactly(2).await?;
                ext.get_u16() as usize
            }
            127 => {
                let mut ext = self.read_exactly(8).await?;
                ext.get_u64() as usize
            }
            n => n as usize,
        };
        if is_control(opcode) && len > 125 {
            return Err(Error::Connection("control frame payload over 125 bytes".into()));
        }

        if masked {
            let key = self.read_exactly(4).await?;
            let payload = self.read_exactly(len).await?;
            let mut unmasked = BytesMut::with_capacity(len);
            for (i, &b) in payload.iter().enumerate() {
                unmasked.put_u8(b ^ key[i % 4]);
            }
            Ok((opcode, unmasked.freeze()))
        } else {
            let payload = self.read_exactly(len).await?;
            Ok((opcode, payload))
        }
    }
}
