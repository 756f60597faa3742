use crate::config::Transport;
use crate::error::{RadioError, Result};
use crate::station::{Station, StreamSource, KNOWN_FORMATS};
use anyhow::{anyhow, bail};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use std::collections::VecDeque;
use std::io::{BufReader, Cursor, Read};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

const SAMPLE_RATE: u32 = 44100;
const CHANNELS: u16 = 2;
const MAX_BUFFERED_BYTES: usize = 32 * 1024 * 1024;

pub trait PlaybackHandle {
    fn play(&mut self) -> Result<()>;
    fn stop(&mut self);
    fn is_playing(&self) -> bool;
    fn set_volume(&mut self, _volume: f32) {}
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HandleOptions {
    pub transport: Transport,
    pub volume: f32,
}

pub trait HandleFactory {
    fn create(
        &mut self,
        index: usize,
        station: &Station,
        options: &HandleOptions,
    ) -> Result<Box<dyn PlaybackHandle>>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlayerEvent {
    Ended { index: usize },
    Failed { index: usize, reason: String },
}

pub fn resolve_candidates(sources: &[StreamSource], supported: &[&str]) -> Vec<StreamSource> {
    sources
        .iter()
        .filter_map(|src| {
            let format = src.effective_format()?;
            supported.contains(&format.as_str()).then(|| StreamSource {
                url: src.url.clone(),
                format: Some(format),
            })
        })
        .collect()
}

pub struct RodioFactory {
    _stream: OutputStream, // must keep alive or audio stops
    stream_handle: OutputStreamHandle,
    client: reqwest::Client,
    runtime: tokio::runtime::Handle,
    events: UnboundedSender<PlayerEvent>,
}

impl RodioFactory {
    // must be called from inside the tokio runtime
    pub fn new(
        client: reqwest::Client,
        events: UnboundedSender<PlayerEvent>,
    ) -> anyhow::Result<Self> {
        let (stream, stream_handle) = OutputStream::try_default().map_err(|e| {
            anyhow!(
                "Failed to initialize audio output: {}. Check your audio drivers.",
                e
            )
        })?;

        Ok(Self {
            _stream: stream,
            stream_handle,
            client,
            runtime: tokio::runtime::Handle::current(),
            events,
        })
    }
}

impl HandleFactory for RodioFactory {
    fn create(
        &mut self,
        index: usize,
        station: &Station,
        options: &HandleOptions,
    ) -> Result<Box<dyn PlaybackHandle>> {
        let candidates = resolve_candidates(&station.sources, KNOWN_FORMATS);
        if candidates.is_empty() {
            return Err(RadioError::playback(index, "no source in a supported format"));
        }
        debug!(index, ?candidates, transport = ?options.transport, "creating handle");

        let shared = HandleShared {
            index,
            candidates,
            stream_handle: self.stream_handle.clone(),
            events: self.events.clone(),
            volume: options.volume,
            session: SessionFlag::default(),
        };

        Ok(match options.transport {
            Transport::Streaming => Box::new(StreamHandle {
                shared,
                session: None,
            }),
            Transport::Buffered => Box::new(BufferedHandle {
                shared,
                client: self.client.clone(),
                runtime: self.runtime.clone(),
                sink: None,
                task: None,
            }),
        })
    }
}

#[derive(Debug, Default)]
struct SessionWord {
    generation: u64,
    playing: bool,
}

// Generation and playing flag change together under one lock, so a worker
// from an old session can never clear the flag of a newer one.
#[derive(Clone, Debug, Default)]
struct SessionFlag(Arc<Mutex<SessionWord>>);

impl SessionFlag {
    fn word(&self) -> MutexGuard<'_, SessionWord> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn begin(&self) -> u64 {
        let mut w = self.word();
        w.generation += 1;
        w.playing = true;
        w.generation
    }

    fn halt(&self) {
        let mut w = self.word();
        w.generation += 1;
        w.playing = false;
    }

    fn is_playing(&self) -> bool {
        self.word().playing
    }

    fn is_current(&self, generation: u64) -> bool {
        self.word().generation == generation
    }

    fn end(&self, generation: u64) -> bool {
        let mut w = self.word();
        if w.generation != generation {
            return false;
        }
        w.playing = false;
        true
    }
}

struct HandleShared {
    index: usize,
    candidates: Vec<StreamSource>,
    stream_handle: OutputStreamHandle,
    events: UnboundedSender<PlayerEvent>,
    volume: f32,
    session: SessionFlag,
}

impl HandleShared {
    fn new_sink(&self) -> Result<Arc<Mutex<Sink>>> {
        let sink = Sink::try_new(&self.stream_handle).map_err(|e| {
            RadioError::playback(self.index, format!("Failed to create audio sink: {}", e))
        })?;
        sink.set_volume(self.volume);
        Ok(Arc::new(Mutex::new(sink)))
    }

    fn watcher(&self, generation: u64) -> EndWatcher {
        EndWatcher {
            index: self.index,
            generation,
            session: self.session.clone(),
            events: self.events.clone(),
        }
    }
}

struct EndWatcher {
    index: usize,
    generation: u64,
    session: SessionFlag,
    events: UnboundedSender<PlayerEvent>,
}

impl EndWatcher {
    fn is_current(&self) -> bool {
        self.session.is_current(self.generation)
    }

    fn finish(&self, event: PlayerEvent) {
        if self.session.end(self.generation) {
            let _ = self.events.send(event);
        }
    }
}

struct StreamSession {
    child: Arc<Mutex<Option<Child>>>,
    sink: Arc<Mutex<Sink>>,
}

impl StreamSession {
    fn shutdown(self) {
        if let Ok(s) = self.sink.lock() {
            s.stop();
        }
        reap_child(&self.child);
    }
}

pub struct StreamHandle {
    shared: HandleShared,
    session: Option<StreamSession>,
}

impl PlaybackHandle for StreamHandle {
    fn play(&mut self) -> Result<()> {
        if let Some(old) = self.session.take() {
            old.shutdown();
        }

        let index = self.shared.index;
        let mut spawned = None;
        for candidate in &self.shared.candidates {
            match spawn_ffmpeg(&candidate.url) {
                Ok(child) => {
                    info!(index, url = %candidate.url, "streaming");
                    spawned = Some(child);
                    break;
                }
                Err(e) => warn!(index, url = %candidate.url, error = %e, "candidate failed"),
            }
        }
        let mut child =
            spawned.ok_or_else(|| RadioError::playback(index, "no source could be opened"))?;

        let stdout = match child.stdout.take() {
            Some(out) => out,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(RadioError::playback(index, "Failed to capture ffmpeg stdout"));
            }
        };

        let sink = match self.shared.new_sink() {
            Ok(sink) => sink,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        let child = Arc::new(Mutex::new(Some(child)));
        let generation = self.shared.session.begin();
        let (tx, rx) = mpsc::sync_channel::<Vec<i16>>(10);
        let watcher = self.shared.watcher(generation);
        let reader_child = child.clone();
        thread::spawn(move || {
            pump_pcm(stdout, tx);
            reap_child(&reader_child);
            watcher.finish(PlayerEvent::Ended {
                index: watcher.index,
            });
        });

        if let Ok(s) = sink.lock() {
            s.append(PcmSource::new(rx, CHANNELS, SAMPLE_RATE));
        }

        self.session = Some(StreamSession { child, sink });
        Ok(())
    }

    fn stop(&mut self) {
        self.shared.session.halt();
        if let Some(session) = self.session.take() {
            session.shutdown();
        }
    }

    fn is_playing(&self) -> bool {
        self.shared.session.is_playing()
    }

    fn set_volume(&mut self, volume: f32) {
        self.shared.volume = volume;
        if let Some(session) = &self.session {
            if let Ok(s) = session.sink.lock() {
                s.set_volume(volume);
            }
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

// Finite files only: a live stream never completes and hits MAX_BUFFERED_BYTES.
pub struct BufferedHandle {
    shared: HandleShared,
    client: reqwest::Client,
    runtime: tokio::runtime::Handle,
    sink: Option<Arc<Mutex<Sink>>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl PlaybackHandle for BufferedHandle {
    fn play(&mut self) -> Result<()> {
        self.stop();

        let sink = self.shared.new_sink()?;
        let generation = self.shared.session.begin();
        let watcher = self.shared.watcher(generation);
        let candidates = self.shared.candidates.clone();
        let client = self.client.clone();
        let task_sink = sink.clone();

        self.task = Some(self.runtime.spawn(async move {
            let index = watcher.index;
            for candidate in candidates {
                if !watcher.is_current() {
                    return;
                }
                let bytes = match fetch(&client, &candidate.url).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(index, url = %candidate.url, error = %e, "download failed");
                        continue;
                    }
                };
                match Decoder::new(Cursor::new(bytes)) {
                    Ok(decoder) => {
                        info!(index, url = %candidate.url, "buffered source decoded");
                        if let Ok(s) = task_sink.lock() {
                            s.append(decoder);
                        }
                        while !sink_drained(&task_sink) {
                            tokio::time::sleep(Duration::from_millis(250)).await;
                        }
                        watcher.finish(PlayerEvent::Ended { index });
                        return;
                    }
                    Err(e) => warn!(index, url = %candidate.url, error = %e, "decode failed"),
                }
            }
            watcher.finish(PlayerEvent::Failed {
                index,
                reason: "no source could be downloaded and decoded".into(),
            });
        }));
        self.sink = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        self.shared.session.halt();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(sink) = self.sink.take() {
            if let Ok(s) = sink.lock() {
                s.stop();
            }
        }
    }

    fn is_playing(&self) -> bool {
        self.shared.session.is_playing()
    }

    fn set_volume(&mut self, volume: f32) {
        self.shared.volume = volume;
        if let Some(sink) = &self.sink {
            if let Ok(s) = sink.lock() {
                s.set_volume(volume);
            }
        }
    }
}

impl Drop for BufferedHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn fetch(client: &reqwest::Client, url: &str) -> anyhow::Result<Vec<u8>> {
    let mut resp = client.get(url).send().await?.error_for_status()?;
    let mut body = Vec::new();
    while let Some(chunk) = resp.chunk().await? {
        append_capped(&mut body, &chunk, MAX_BUFFERED_BYTES)?;
    }
    Ok(body)
}

fn append_capped(body: &mut Vec<u8>, chunk: &[u8], cap: usize) -> anyhow::Result<()> {
    if body.len() + chunk.len() > cap {
        bail!("resource exceeds {} bytes; use the streaming transport", cap);
    }
    body.extend_from_slice(chunk);
    Ok(())
}

fn sink_drained(sink: &Mutex<Sink>) -> bool {
    sink.lock().map(|s| s.empty()).unwrap_or(true)
}

// Whoever gets here first (stop() or the reader thread) kills and waits.
fn reap_child(slot: &Mutex<Option<Child>>) {
    let taken = slot.lock().ok().and_then(|mut guard| guard.take());
    if let Some(mut c) = taken {
        let _ = c.kill();
        let _ = c.wait();
    }
}

fn spawn_ffmpeg(stream_url: &str) -> anyhow::Result<Child> {
    Command::new("ffmpeg")
        .arg("-reconnect")
        .arg("1")
        .arg("-reconnect_streamed")
        .arg("1")
        .arg("-reconnect_delay_max")
        .arg("5")
        .arg("-i")
        .arg(stream_url)
        .arg("-f")
        .arg("s16le")
        .arg("-acodec")
        .arg("pcm_s16le")
        .arg("-ar")
        .arg(SAMPLE_RATE.to_string())
        .arg("-ac")
        .arg(CHANNELS.to_string())
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| anyhow!("Failed to spawn ffmpeg: {}. Is ffmpeg installed?", e))
}

fn pump_pcm(stdout: ChildStdout, tx: mpsc::SyncSender<Vec<i16>>) {
    let mut reader = BufReader::new(stdout);
    let mut buf = [0u8; 8192];
    let mut carry: Option<u8> = None;

    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let samples = decode_s16le(&mut carry, &buf[..n]);
                if tx.send(samples).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}

// an odd trailing byte waits in `carry` for the next read
fn decode_s16le(carry: &mut Option<u8>, bytes: &[u8]) -> Vec<i16> {
    let mut samples = Vec::with_capacity(bytes.len() / 2 + 1);
    let mut rest = bytes;

    if let Some(lo) = carry.take() {
        match rest.split_first() {
            Some((hi, tail)) => {
                samples.push(i16::from_le_bytes([lo, *hi]));
                rest = tail;
            }
            None => {
                *carry = Some(lo);
                return samples;
            }
        }
    }

    let mut pairs = rest.chunks_exact(2);
    for pair in &mut pairs {
        samples.push(i16::from_le_bytes([pair[0], pair[1]]));
    }
    if let [last] = pairs.remainder() {
        *carry = Some(*last);
    }
    samples
}

// pads with silence while the network catches up
struct PcmSource {
    rx: mpsc::Receiver<Vec<i16>>,
    buffer: VecDeque<i16>,
    channels: u16,
    sample_rate: u32,
}

impl PcmSource {
    fn new(rx: mpsc::Receiver<Vec<i16>>, channels: u16, sample_rate: u32) -> Self {
        PcmSource {
            rx,
            buffer: VecDeque::with_capacity(8192),
            channels,
            sample_rate,
        }
    }
}

impl Iterator for PcmSource {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(s) = self.buffer.pop_front() {
                return Some(s as f32 / 32768.0);
            }

            match self.rx.try_recv() {
                Ok(chunk) => {
                    self.buffer.extend(chunk);
                    continue;
                }
                Err(mpsc::TryRecvError::Empty) => {
                    match self.rx.recv_timeout(Duration::from_millis(100)) {
                        Ok(chunk) => {
                            self.buffer.extend(chunk);
                            continue;
                        }
                        Err(mpsc::RecvTimeoutError::Timeout) => return Some(0.0),
                        Err(mpsc::RecvTimeoutError::Disconnected) => return None,
                    }
                }
                Err(mpsc::TryRecvError::Disconnected) => return None,
            }
        }
    }
}

impl Source for PcmSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }
    fn channels(&self) -> u16 {
        self.channels
    }
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
    fn total_duration(&self) -> Option<Duration> {
        None // live stream
    }
}
