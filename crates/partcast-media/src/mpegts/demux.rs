//! Transport-stream demultiplexer.
//!
//! Reads a raw byte feed, resynchronizes on 188-byte packet
//! boundaries, discovers elementary PIDs from PAT/PMT, and delivers
//! reassembled access units to a [`FrameSink`] in strict arrival
//! order. One instance owns all PID state for one stream session.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::Result;

use super::packet::{self, PACKET_SIZE, PAT_PID, STREAM_TYPE_AAC, STREAM_TYPE_H264, STREAM_TYPE_H265, SYNC_BYTE};
use super::pat::parse_pat;
use super::pes::{AccessUnit, PesAssembler};
use super::pmt::parse_pmt;
use super::section::SectionAssembler;

/// Video codec discovered from the PMT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    H265,
}

/// Receiver for demultiplexed output. The packager implements this;
/// calls arrive on the demux task in packet order.
pub trait FrameSink {
    /// Program Clock Reference in 27 MHz ticks, forwarded from any
    /// packet that carries one.
    fn on_pcr(&mut self, pcr: u64) -> Result<()>;
    /// Called once when the PMT reveals the video codec, before any
    /// video access unit is delivered.
    fn on_video_codec(&mut self, _codec: VideoCodec) -> Result<()> {
        Ok(())
    }
    fn on_video_access_unit(&mut self, unit: AccessUnit) -> Result<()>;
    fn on_audio_access_unit(&mut self, unit: AccessUnit) -> Result<()>;
}

/// Stateful demultiplexer for one MPEG-TS session.
///
/// PID assignments are first-wins: once the PAT names a PMT PID or the
/// PMT names an elementary PID, retransmitted tables never reassign it.
#[derive(Debug, Default)]
pub struct TsDemuxer {
    pmt_pid: Option<u16>,
    video_pid: Option<u16>,
    audio_pid: Option<u16>,
    video_codec: Option<VideoCodec>,
    pat: SectionAssembler,
    pmt: SectionAssembler,
    video_pes: PesAssembler,
    audio_pes: PesAssembler,
    packets: u64,
    resync_skips: u64,
}

impl TsDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn video_codec(&self) -> Option<VideoCodec> {
        self.video_codec
    }

    /// Total packets processed so far.
    pub fn packet_count(&self) -> u64 {
        self.packets
    }

    /// Consume the byte feed until end-of-stream.
    ///
    /// Any short read terminates cleanly: encoder exit is the normal
    /// way a live session ends, not an error.
    pub async fn run<R, S>(&mut self, mut reader: R, sink: &mut S) -> Result<()>
    where
        R: AsyncRead + Unpin,
        S: FrameSink,
    {
        let mut buf = [0u8; PACKET_SIZE];
        loop {
            // Resynchronize byte-by-byte until the sync byte.
            loop {
                let mut byte = [0u8; 1];
                match reader.read(&mut byte).await {
                    Ok(0) => {
                        self.log_eos();
                        return Ok(());
                    }
                    Ok(_) if byte[0] == SYNC_BYTE => break,
                    Ok(_) => {
                        self.resync_skips += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            buf[0] = SYNC_BYTE;
            match reader.read_exact(&mut buf[1..]).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    self.log_eos();
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }

            self.handle_packet(&buf, sink)?;
        }
    }

    fn log_eos(&self) {
        tracing::info!(
            packets = self.packets,
            skipped_bytes = self.resync_skips,
            "transport stream ended"
        );
    }

    /// Dispatch one complete packet. Public so tests and synchronous
    /// callers can drive the demuxer without an async reader.
    pub fn handle_packet<S: FrameSink>(&mut self, ts_packet: &[u8], sink: &mut S) -> Result<()> {
        self.packets += 1;
        let pid = packet::pid(ts_packet);

        if let Some(pcr) = packet::pcr(ts_packet) {
            sink.on_pcr(pcr)?;
        }

        if pid == PAT_PID {
            if let Some(section) = self.pat.push(ts_packet) {
                self.handle_pat(&section);
            }
        } else if Some(pid) == self.pmt_pid {
            if let Some(section) = self.pmt.push(ts_packet) {
                self.handle_pmt(&section, sink)?;
            }
        } else if Some(pid) == self.video_pid {
            for unit in self.video_pes.push(ts_packet) {
                sink.on_video_access_unit(unit)?;
            }
        } else if Some(pid) == self.audio_pid {
            for unit in self.audio_pes.push(ts_packet) {
                sink.on_audio_access_unit(unit)?;
            }
        }

        Ok(())
    }

    fn handle_pat(&mut self, section: &[u8]) {
        if self.pmt_pid.is_some() {
            return;
        }
        match parse_pat(section) {
            Ok(programs) => {
                if let Some(program) = programs.first() {
                    tracing::info!(
                        program = program.program_number,
                        pmt_pid = program.pmt_pid,
                        "assigned PMT PID"
                    );
                    self.pmt_pid = Some(program.pmt_pid);
                }
            }
            Err(e) => tracing::debug!(error = %e, "ignoring unparsable PAT"),
        }
    }

    fn handle_pmt<S: FrameSink>(&mut self, section: &[u8], sink: &mut S) -> Result<()> {
        let pmt = match parse_pmt(section) {
            Ok(pmt) => pmt,
            Err(e) => {
                tracing::debug!(error = %e, "ignoring unparsable PMT");
                return Ok(());
            }
        };
        for stream in &pmt.streams {
            match stream.stream_type {
                STREAM_TYPE_H264 if self.video_pid.is_none() => {
                    tracing::info!(pid = stream.elementary_pid, "assigned H.264 video PID");
                    self.video_pid = Some(stream.elementary_pid);
                    self.video_codec = Some(VideoCodec::H264);
                    sink.on_video_codec(VideoCodec::H264)?;
                }
                STREAM_TYPE_H265 if self.video_pid.is_none() => {
                    tracing::info!(pid = stream.elementary_pid, "assigned H.265 video PID");
                    self.video_pid = Some(stream.elementary_pid);
                    self.video_codec = Some(VideoCodec::H265);
                    sink.on_video_codec(VideoCodec::H265)?;
                }
                STREAM_TYPE_AAC if self.audio_pid.is_none() => {
                    tracing::info!(pid = stream.elementary_pid, "assigned AAC audio PID");
                    self.audio_pid = Some(stream.elementary_pid);
                }
                _ => {}
            }
        }
        Ok(())
    }
}
