//! Live playlist window with blocking-reload support.
//!
//! The playlist engine is the sole owner of the segment window, the
//! media-sequence counters, and the preload hint. The packager submits
//! completed parts and segments; HTTP readers block cooperatively on
//! the version watch channel until a newer playlist is published or
//! their deadline elapses.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::Result;

pub const PLAYLIST_FILE: &str = "playlist.m3u8";
pub const INIT_FILE: &str = "init.mp4";

#[derive(Debug, Clone)]
pub struct PlaylistConfig {
    /// Completed segments retained in the window.
    pub window_size: usize,
    /// Segment target duration in seconds.
    pub target_duration: f64,
    /// Part target duration in seconds.
    pub part_target: f64,
    pub hold_back: f64,
    pub part_hold_back: f64,
    pub output_dir: PathBuf,
}

/// One advertised partial segment.
#[derive(Debug, Clone)]
pub struct PartEntry {
    pub name: String,
    pub duration: f64,
    /// Starts on a keyframe.
    pub independent: bool,
}

#[derive(Debug)]
struct SegmentEntry {
    sequence: u64,
    name: String,
    duration: f64,
    program_time: DateTime<Utc>,
    parts: Vec<PartEntry>,
}

/// A rendered playlist together with the version that produced it.
#[derive(Debug, Clone)]
pub struct PlaylistSnapshot {
    pub body: Bytes,
    pub version: u64,
}

#[derive(Debug, Default)]
struct State {
    segments: VecDeque<SegmentEntry>,
    /// Parts of the segment still being produced.
    open_parts: Vec<PartEntry>,
    next_sequence: u64,
    base_sequence: u64,
    version: u64,
    preload_hint: Option<String>,
    init: Option<Bytes>,
    media: HashMap<String, Bytes>,
    rendered: Option<Bytes>,
}

#[derive(Debug)]
pub struct LivePlaylist {
    config: PlaylistConfig,
    state: Mutex<State>,
    publish: watch::Sender<u64>,
}

impl LivePlaylist {
    pub fn new(config: PlaylistConfig) -> Self {
        let (publish, _) = watch::channel(0);
        Self {
            config,
            state: Mutex::new(State::default()),
            publish,
        }
    }

    pub fn config(&self) -> &PlaylistConfig {
        &self.config
    }

    /// Store the init segment. Write-once; later calls are ignored.
    pub fn set_init_segment(&self, data: Bytes) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.init.is_some() {
                return Ok(());
            }
            state.init = Some(data.clone());
        }
        tracing::info!(bytes = data.len(), "init segment published");
        fs::write(self.config.output_dir.join(INIT_FILE), &data)?;
        Ok(())
    }

    /// Add a completed part of the segment currently being produced,
    /// advance the preload hint to the part now in flight, and
    /// republish so part-level blocking readers wake up.
    pub fn add_part(&self, part: PartEntry, data: Bytes, preload_hint: Option<String>) -> Result<()> {
        let path = self.config.output_dir.join(&part.name);
        let name = part.name.clone();
        {
            let mut state = self.state.lock();
            state.media.insert(name.clone(), data.clone());
            state.open_parts.push(part);
            state.preload_hint = preload_hint;
            self.republish(&mut state);
        }
        tracing::debug!(part = %name, bytes = data.len(), "part published");
        fs::write(path, &data)?;
        Ok(())
    }

    /// Close the current segment: assign the next sequence number,
    /// fold the open parts into it, evict past the window bound, and
    /// wake blocked readers.
    ///
    /// A persistence failure is returned to the caller but in-memory
    /// state stays valid and continues to be served.
    pub fn add_segment(
        &self,
        name: &str,
        duration: f64,
        program_time: DateTime<Utc>,
        preload_hint: Option<String>,
        data: Bytes,
    ) -> Result<()> {
        let rendered;
        {
            let mut state = self.state.lock();
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            let parts = std::mem::take(&mut state.open_parts);
            state.media.insert(name.to_string(), data.clone());
            state.segments.push_back(SegmentEntry {
                sequence,
                name: name.to_string(),
                duration,
                program_time,
                parts,
            });
            while state.segments.len() > self.config.window_size {
                if let Some(evicted) = state.segments.pop_front() {
                    state.media.remove(&evicted.name);
                    for part in &evicted.parts {
                        state.media.remove(&part.name);
                    }
                }
            }
            if let Some(front) = state.segments.front() {
                state.base_sequence = front.sequence;
            }
            state.preload_hint = preload_hint;
            self.republish(&mut state);
            rendered = state.rendered.clone();
        }
        tracing::debug!(segment = %name, duration, "segment published");

        fs::write(self.config.output_dir.join(name), &data)?;
        if let Some(body) = rendered {
            self.persist_playlist(&body)?;
        }
        Ok(())
    }

    fn republish(&self, state: &mut State) {
        state.version += 1;
        state.rendered = self.render(state).map(Bytes::from);
        if state.rendered.is_some() {
            let _ = self.publish.send(state.version);
        }
    }

    /// Atomic replace so a concurrent reader never sees a torn file.
    fn persist_playlist(&self, body: &Bytes) -> Result<()> {
        let path = self.config.output_dir.join(PLAYLIST_FILE);
        let tmp = path.with_extension("m3u8.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn render(&self, state: &State) -> Option<String> {
        if state.segments.is_empty() || state.init.is_none() {
            return None;
        }
        let target = self.config.target_duration.ceil().max(1.0) as u64;
        let mut lines = vec![
            "#EXTM3U".to_string(),
            "#EXT-X-VERSION:9".to_string(),
            format!("#EXT-X-TARGETDURATION:{target}"),
            format!(
                "#EXT-X-SERVER-CONTROL:CAN-BLOCK-RELOAD=YES,HOLD-BACK={:.3},PART-HOLD-BACK={:.3}",
                self.config.hold_back, self.config.part_hold_back
            ),
            format!("#EXT-X-PART-INF:PART-TARGET={:.3}", self.config.part_target),
            format!("#EXT-X-MAP:URI=\"{INIT_FILE}\""),
            format!("#EXT-X-MEDIA-SEQUENCE:{}", state.base_sequence),
        ];
        for segment in &state.segments {
            lines.push(format!(
                "#EXT-X-PROGRAM-DATE-TIME:{}",
                segment.program_time.to_rfc3339_opts(SecondsFormat::Millis, true)
            ));
            for part in &segment.parts {
                lines.push(render_part(part));
            }
            lines.push(format!("#EXTINF:{:.3},", segment.duration));
            lines.push(segment.name.clone());
        }
        for part in &state.open_parts {
            lines.push(render_part(part));
        }
        if let Some(hint) = &state.preload_hint {
            lines.push(format!("#EXT-X-PRELOAD-HINT:TYPE=PART,URI=\"{hint}\""));
        }
        let mut body = lines.join("\n");
        body.push('\n');
        Some(body)
    }

    /// Blocking-reload read. Returns immediately when a playlist exists
    /// and `since` is absent or already superseded; otherwise waits up
    /// to `wait` for a newer publish and returns whatever is current
    /// afterwards. `None` means no playlist has been published yet.
    pub async fn playlist(&self, since: Option<u64>, wait: Duration) -> Option<PlaylistSnapshot> {
        if let Some(snapshot) = self.snapshot_if_fresh(since) {
            return Some(snapshot);
        }
        if !wait.is_zero() {
            let mut updates = self.publish.subscribe();
            let newer = updates.wait_for(|v| since.map_or(*v > 0, |s| *v > s));
            let _ = tokio::time::timeout(wait, newer).await;
        }
        let state = self.state.lock();
        state.rendered.as_ref().map(|body| PlaylistSnapshot {
            body: body.clone(),
            version: state.version,
        })
    }

    fn snapshot_if_fresh(&self, since: Option<u64>) -> Option<PlaylistSnapshot> {
        let state = self.state.lock();
        let body = state.rendered.as_ref()?;
        match since {
            Some(s) if state.version <= s => None,
            _ => Some(PlaylistSnapshot {
                body: body.clone(),
                version: state.version,
            }),
        }
    }

    pub fn init_segment(&self) -> Option<Bytes> {
        self.state.lock().init.clone()
    }

    /// Bytes for a part or segment still inside the window.
    pub fn media(&self, name: &str) -> Option<Bytes> {
        self.state.lock().media.get(name).cloned()
    }

    /// Absolute count of segments ever closed.
    pub fn total_segments(&self) -> u64 {
        self.state.lock().next_sequence
    }

    pub fn version(&self) -> u64 {
        self.state.lock().version
    }
}

fn render_part(part: &PartEntry) -> String {
    if part.independent {
        format!(
            "#EXT-X-PART:DURATION={:.3},URI=\"{}\",INDEPENDENT=YES",
            part.duration, part.name
        )
    } else {
        format!("#EXT-X-PART:DURATION={:.3},URI=\"{}\"", part.duration, part.name)
    }
}
