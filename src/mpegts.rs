//! Minimal MPEG-TS demuxer: finds the H.264 elementary stream through the
//! PAT and PMT and reassembles its PES packets into Annex B access units.

use anyhow::{Result, anyhow};

const PACKET_LEN: usize = 188;
const SYNC_BYTE: u8 = 0x47;
const PAT_PID: u16 = 0x0000;
const STREAM_TYPE_H264: u8 = 0x1B;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    /// 90 kHz presentation timestamp, when the PES header carries one.
    pub pts: Option<u64>,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct TsDemuxer {
    pmt_pid: Option<u16>,
    video_pid: Option<u16>,
    pes: Vec<u8>,
    units: Vec<AccessUnit>,
}

impl TsDemuxer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn video_pid(&self) -> Option<u16> {
        self.video_pid
    }

    /// Feeds a chunk of transport stream. Bytes before the first sync byte
    /// and between desynchronised packets are skipped.
    pub fn push(&mut self, data: &[u8]) {
        let mut cursor = 0;
        while cursor + PACKET_LEN <= data.len() {
            if data[cursor] != SYNC_BYTE {
                cursor += 1;
                continue;
            }
            self.handle_packet(&data[cursor..cursor + PACKET_LEN]);
            cursor += PACKET_LEN;
        }
    }

    /// Flushes the last pending PES packet and returns every access unit.
    #[must_use]
    pub fn finish(mut self) -> Vec<AccessUnit> {
        self.flush_pes();
        self.units
    }

    fn handle_packet(&mut self, packet: &[u8]) {
        let unit_start = packet[1] & 0x40 != 0;
        let pid = (u16::from(packet[1] & 0x1F) << 8) | u16::from(packet[2]);
        let adaptation = (packet[3] >> 4) & 0x03;

        let mut offset = 4;
        if adaptation & 0x02 != 0 {
            offset += 1 + usize::from(packet[4]);
        }
        if adaptation & 0x01 == 0 || offset >= PACKET_LEN {
            return;
        }
        let payload = &packet[offset..];

        if pid == PAT_PID {
            if unit_start && let Some(pmt) = parse_pat(payload) {
                self.pmt_pid = Some(pmt);
            }
        } else if Some(pid) == self.pmt_pid {
            if unit_start && let Some(video) = parse_pmt(payload) {
                self.video_pid = Some(video);
            }
        } else if Some(pid) == self.video_pid {
            if unit_start {
                self.flush_pes();
            }
            self.pes.extend_from_slice(payload);
        }
    }

    fn flush_pes(&mut self) {
        if self.pes.is_empty() {
            return;
        }
        let pes = std::mem::take(&mut self.pes);
        if let Ok(unit) = parse_pes(&pes)
            && !unit.data.is_empty()
        {
            self.units.push(unit);
        }
    }
}

/// Demuxes a complete segment into H.264 access units.
pub fn demux_h264(segment: &[u8]) -> Result<Vec<AccessUnit>> {
    let mut demuxer = TsDemuxer::new();
    demuxer.push(segment);
    if demuxer.video_pid().is_none() {
        return Err(anyhow!("segment has no H.264 elementary stream"));
    }
    Ok(demuxer.finish())
}

/// Returns the section bytes (starting at `table_id`) after the pointer field,
/// cut to `section_length` minus the trailing CRC.
fn section_body(payload: &[u8], table_id: u8) -> Option<&[u8]> {
    let pointer = usize::from(*payload.first()?);
    let section = payload.get(1 + pointer..)?;
    if *section.first()? != table_id || section.len() < 3 {
        return None;
    }
    let length = (usize::from(section[1] & 0x0F) << 8) | usize::from(section[2]);
    let end = (3 + length).checked_sub(4)?;
    section.get(..end)
}

fn parse_pat(payload: &[u8]) -> Option<u16> {
    let section = section_body(payload, 0x00)?;
    section
        .get(8..)?
        .chunks_exact(4)
        .find_map(|entry| {
            let program = u16::from_be_bytes([entry[0], entry[1]]);
            (program != 0).then(|| (u16::from(entry[2] & 0x1F) << 8) | u16::from(entry[3]))
        })
}

fn parse_pmt(payload: &[u8]) -> Option<u16> {
    let section = section_body(payload, 0x02)?;
    let info_len = (usize::from(*section.get(10)? & 0x0F) << 8) | usize::from(*section.get(11)?);
    let mut cursor = 12 + info_len;
    while cursor + 5 <= section.len() {
        let stream_type = section[cursor];
        let pid = (u16::from(section[cursor + 1] & 0x1F) << 8) | u16::from(section[cursor + 2]);
        let es_info_len =
            (usize::from(section[cursor + 3] & 0x0F) << 8) | usize::from(section[cursor + 4]);
        if stream_type == STREAM_TYPE_H264 {
            return Some(pid);
        }
        cursor += 5 + es_info_len;
    }
    None
}

fn parse_pes(pes: &[u8]) -> Result<AccessUnit> {
    if pes.len() < 9 || pes[..3] != [0, 0, 1] {
        return Err(anyhow!("missing PES start code"));
    }
    let flags = pes[7];
    let header_len = usize::from(pes[8]);
    let data_start = 9 + header_len;
    if data_start > pes.len() {
        return Err(anyhow!("PES header exceeds packet"));
    }
    let pts = if flags & 0x80 != 0 && header_len >= 5 {
        Some(read_timestamp(&pes[9..14]))
    } else {
        None
    };
    Ok(AccessUnit {
        pts,
        data: pes[data_start..].to_vec(),
    })
}

fn read_timestamp(bytes: &[u8]) -> u64 {
    (u64::from((bytes[0] >> 1) & 0x07) << 30)
        | (u64::from(bytes[1]) << 22)
        | (u64::from(bytes[2] >> 1) << 15)
        | (u64::from(bytes[3]) << 7)
        | u64::from(bytes[4] >> 1)
}
