//! Capture/playback backend seam
//!
//! The engine talks to the platform audio runtime through the
//! [`CaptureBackend`] and [`AudioContext`] traits. The cpal implementation
//! owns its streams on a dedicated thread (cpal streams are not `Send`);
//! the mock implementation drives lifecycle tests without hardware.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, unbounded, Sender};

use crate::audio::buffer::{create_shared_queue, CaptureBlock, SharedBlockQueue};
use crate::audio::device::{get_input_device, list_input_devices, DeviceDescriptor};
use crate::constants::{BLOCK_QUEUE_CAPACITY, DEFAULT_SAMPLE_RATE};
use crate::error::{AudioError, DeviceError};
use crate::graph::SharedChain;

/// Observable state of an open audio context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Running,
    /// The context stopped producing audio without being closed (OS audio
    /// policy, backgrounding). Recoverable via resume.
    Suspended,
    Closed,
}

const STATE_RUNNING: u8 = 0;
const STATE_SUSPENDED: u8 = 1;
const STATE_CLOSED: u8 = 2;

fn state_from_u8(v: u8) -> ContextState {
    match v {
        STATE_RUNNING => ContextState::Running,
        STATE_SUSPENDED => ContextState::Suspended,
        _ => ContextState::Closed,
    }
}

/// Capture constraints requested when opening a device.
///
/// Platform echo cancellation, AGC, and noise suppression are disabled by
/// default: the engine supplies its own conditioning (or none) to keep
/// latency predictable.
#[derive(Debug, Clone)]
pub struct CaptureConstraints {
    pub echo_cancellation: bool,
    pub auto_gain_control: bool,
    pub noise_suppression: bool,
    pub sample_rate: u32,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: false,
            auto_gain_control: false,
            noise_suppression: false,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

/// Handle to an open capture-through-playback context.
///
/// Exclusively owned by the engine; nulled out on teardown so no reference
/// outlives a stop.
pub trait AudioContext: Send {
    fn state(&self) -> ContextState;

    /// Attempts to restart a suspended context
    fn resume(&mut self) -> Result<(), AudioError>;

    /// Stops capture tracks and releases the context. Idempotent; skips
    /// work if already closed.
    fn close(&mut self) -> Result<(), AudioError>;

    fn sample_rate(&self) -> u32;

    fn device_label(&self) -> &str;
}

/// Platform seam for device enumeration and context creation
pub trait CaptureBackend: Send + Sync {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DeviceError>;

    /// Opens the given device (or the platform default when `None`) and
    /// wires capture through the shared chain to stereo playback
    fn open(
        &self,
        device_id: Option<&str>,
        constraints: &CaptureConstraints,
        chain: SharedChain,
    ) -> Result<Box<dyn AudioContext>, AudioError>;
}

// ---------------------------------------------------------------------------
// cpal implementation
// ---------------------------------------------------------------------------

enum ContextCommand {
    Resume(Sender<Result<(), AudioError>>),
    Close,
}

/// Real backend over the default cpal host
pub struct CpalBackend;

impl CaptureBackend for CpalBackend {
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        list_input_devices()
    }

    fn open(
        &self,
        device_id: Option<&str>,
        constraints: &CaptureConstraints,
        chain: SharedChain,
    ) -> Result<Box<dyn AudioContext>, AudioError> {
        let context = CpalContext::open(device_id, constraints, chain)?;
        Ok(Box::new(context))
    }
}

/// Send-able handle to a pair of cpal streams owned by a dedicated thread
pub struct CpalContext {
    label: String,
    sample_rate: u32,
    state: Arc<AtomicU8>,
    cmd_tx: Sender<ContextCommand>,
    thread: Option<JoinHandle<()>>,
    closed: bool,
}

impl CpalContext {
    fn open(
        device_id: Option<&str>,
        constraints: &CaptureConstraints,
        chain: SharedChain,
    ) -> Result<Self, AudioError> {
        let device_id = device_id.map(str::to_string);
        let sample_rate = constraints.sample_rate;
        let state = Arc::new(AtomicU8::new(STATE_RUNNING));
        let (cmd_tx, cmd_rx) = unbounded::<ContextCommand>();
        // Startup handshake: the stream thread reports whether it could
        // open the device before the caller proceeds
        let (ready_tx, ready_rx) = bounded::<Result<String, AudioError>>(1);

        let thread_state = state.clone();
        let thread = thread::Builder::new()
            .name("daf-audio".to_string())
            .spawn(move || {
                let queue = create_shared_queue(BLOCK_QUEUE_CAPACITY);
                let streams = build_streams(
                    device_id.as_deref(),
                    sample_rate,
                    queue,
                    chain,
                    thread_state.clone(),
                );
                let (label, input, output) = match streams {
                    Ok(v) => v,
                    Err(e) => {
                        thread_state.store(STATE_CLOSED, Ordering::SeqCst);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(label));

                loop {
                    match cmd_rx.recv() {
                        Ok(ContextCommand::Resume(reply)) => {
                            let result = input
                                .play()
                                .and_then(|()| output.play())
                                .map_err(|e| AudioError::StreamError(e.to_string()));
                            if result.is_ok() {
                                thread_state.store(STATE_RUNNING, Ordering::SeqCst);
                            }
                            let _ = reply.send(result);
                        }
                        Ok(ContextCommand::Close) | Err(_) => {
                            // Streams drop here, stopping capture and playback
                            thread_state.store(STATE_CLOSED, Ordering::SeqCst);
                            return;
                        }
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let label = match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(label)) => label,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                return Err(AudioError::StreamError(
                    "audio thread did not start".to_string(),
                ));
            }
        };

        Ok(Self {
            label,
            sample_rate,
            state,
            cmd_tx,
            thread: Some(thread),
            closed: false,
        })
    }
}

impl AudioContext for CpalContext {
    fn state(&self) -> ContextState {
        state_from_u8(self.state.load(Ordering::SeqCst))
    }

    fn resume(&mut self) -> Result<(), AudioError> {
        if self.closed {
            return Err(AudioError::Shutdown("context already closed".to_string()));
        }
        let (reply_tx, reply_rx) = bounded(1);
        self.cmd_tx
            .send(ContextCommand::Resume(reply_tx))
            .map_err(|_| AudioError::Suspended)?;
        reply_rx
            .recv_timeout(Duration::from_secs(2))
            .map_err(|_| AudioError::Suspended)?
    }

    fn close(&mut self) -> Result<(), AudioError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let _ = self.cmd_tx.send(ContextCommand::Close);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                return Err(AudioError::Shutdown("audio thread panicked".to_string()));
            }
        }
        self.state.store(STATE_CLOSED, Ordering::SeqCst);
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn device_label(&self) -> &str {
        &self.label
    }
}

impl Drop for CpalContext {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

type StreamPair = (String, cpal::Stream, cpal::Stream);

/// Builds the capture and playback streams on the owning thread.
///
/// Capture downmixes the device's native channel layout to mono and pushes
/// blocks into the lock-free queue; playback pulls, runs the shared chain,
/// and writes interleaved stereo.
fn build_streams(
    device_id: Option<&str>,
    sample_rate: u32,
    queue: SharedBlockQueue,
    chain: SharedChain,
    state: Arc<AtomicU8>,
) -> Result<StreamPair, AudioError> {
    let host = cpal::default_host();

    let input_device = match device_id {
        Some(id) => get_input_device(id).map_err(|e| AudioError::StreamError(e.to_string()))?,
        None => host.default_input_device().ok_or_else(|| {
            AudioError::PermissionDenied("no capture device available".to_string())
        })?,
    };
    let output_device = host.default_output_device().ok_or_else(|| {
        AudioError::UnsupportedPlatform("no audio output available".to_string())
    })?;

    let label = input_device
        .name()
        .unwrap_or_else(|_| "Unknown".to_string());

    let input_default = input_device
        .default_input_config()
        .map_err(|e| AudioError::PermissionDenied(e.to_string()))?;
    let input_channels = input_default.channels();
    let input_format = input_default.sample_format();

    let input_config = StreamConfig {
        channels: input_channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let output_config = StreamConfig {
        channels: 2,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let input_stream = {
        let queue = queue.clone();
        let state = state.clone();
        let start = Instant::now();
        let mut sequence: u32 = 0;
        let on_error = move |err: cpal::StreamError| {
            tracing::warn!("capture stream error: {}", err);
            state.store(STATE_SUSPENDED, Ordering::SeqCst);
        };
        match input_format {
            SampleFormat::F32 => input_device
                .build_input_stream(
                    &input_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let mono = downmix_to_mono(data, input_channels);
                        let timestamp = start.elapsed().as_micros() as u64;
                        sequence = sequence.wrapping_add(1);
                        let _ = queue.push(CaptureBlock::new(mono, timestamp, sequence));
                    },
                    on_error,
                    None,
                )
                .map_err(map_build_error)?,
            SampleFormat::I16 => input_device
                .build_input_stream(
                    &input_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let as_f32: Vec<f32> =
                            data.iter().map(|s| f32::from(*s) / 32768.0).collect();
                        let mono = downmix_to_mono(&as_f32, input_channels);
                        let timestamp = start.elapsed().as_micros() as u64;
                        sequence = sequence.wrapping_add(1);
                        let _ = queue.push(CaptureBlock::new(mono, timestamp, sequence));
                    },
                    on_error,
                    None,
                )
                .map_err(map_build_error)?,
            format => {
                return Err(AudioError::UnsupportedFormat(format!("{format:?}")));
            }
        }
    };

    let output_stream = {
        let state = state.clone();
        let mut pending: VecDeque<f32> = VecDeque::new();
        let mut mono_scratch: Vec<f32> = Vec::new();
        output_device
            .build_output_stream(
                &output_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / 2;
                    // A short fill counts an underrun and pads with silence
                    while pending.len() < frames {
                        match queue.pop() {
                            Some(block) => pending.extend(block.samples),
                            None => break,
                        }
                    }

                    mono_scratch.clear();
                    for _ in 0..frames {
                        mono_scratch.push(pending.pop_front().unwrap_or(0.0));
                    }

                    // Contention fallback: the engine holds the lock only
                    // during rebuilds; never block the audio callback
                    match chain.try_lock() {
                        Some(mut chain) => chain.process_block(&mono_scratch, data),
                        None => data.fill(0.0),
                    }
                },
                move |err| {
                    tracing::warn!("playback stream error: {}", err);
                    state.store(STATE_SUSPENDED, Ordering::SeqCst);
                },
                None,
            )
            .map_err(map_build_error)?
    };

    input_stream
        .play()
        .map_err(|e| AudioError::StreamError(e.to_string()))?;
    output_stream
        .play()
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    Ok((label, input_stream, output_stream))
}

fn downmix_to_mono(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    let channels = channels as usize;
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn map_build_error(err: cpal::BuildStreamError) -> AudioError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => {
            AudioError::PermissionDenied("capture device is not available".to_string())
        }
        other => AudioError::StreamError(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Mock implementation for tests and examples without hardware
// ---------------------------------------------------------------------------

/// Hardware-free backend: scripted devices, contexts, and resume outcomes
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    /// Shared observation point for a mock context's lifecycle
    #[derive(Default)]
    pub struct ContextProbe {
        state: AtomicU8,
        pub resume_calls: AtomicUsize,
        pub close_calls: AtomicUsize,
    }

    impl ContextProbe {
        pub fn state(&self) -> ContextState {
            state_from_u8(self.state.load(Ordering::SeqCst))
        }

        /// Simulates the platform autonomously suspending the context
        pub fn force_suspend(&self) {
            self.state.store(STATE_SUSPENDED, Ordering::SeqCst);
        }
    }

    /// Scripted capture backend
    #[derive(Default)]
    pub struct MockBackend {
        devices: Mutex<Vec<DeviceDescriptor>>,
        fail_open_with: Mutex<Option<String>>,
        resume_script: Arc<Mutex<VecDeque<bool>>>,
        pub enumerate_calls: AtomicUsize,
        pub open_calls: AtomicUsize,
        opened_ids: Mutex<Vec<Option<String>>>,
        probes: Mutex<Vec<Arc<ContextProbe>>>,
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_devices(devices: Vec<DeviceDescriptor>) -> Self {
            let backend = Self::default();
            *backend.devices.lock() = devices;
            backend
        }

        pub fn set_devices(&self, devices: Vec<DeviceDescriptor>) {
            *self.devices.lock() = devices;
        }

        /// Makes the next `open` fail with a permission-denied error
        pub fn fail_next_open(&self, message: &str) {
            *self.fail_open_with.lock() = Some(message.to_string());
        }

        /// Scripts the outcome of upcoming resume attempts (true = success).
        /// An exhausted script succeeds.
        pub fn script_resumes(&self, outcomes: &[bool]) {
            let mut script = self.resume_script.lock();
            script.clear();
            script.extend(outcomes.iter().copied());
        }

        /// Probe for the most recently opened context
        pub fn last_probe(&self) -> Option<Arc<ContextProbe>> {
            self.probes.lock().last().cloned()
        }

        /// Device ids passed to `open`, in order (None = platform default)
        pub fn opened_ids(&self) -> Vec<Option<String>> {
            self.opened_ids.lock().clone()
        }
    }

    impl CaptureBackend for MockBackend {
        fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
            self.enumerate_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.devices.lock().clone())
        }

        fn open(
            &self,
            device_id: Option<&str>,
            constraints: &CaptureConstraints,
            _chain: SharedChain,
        ) -> Result<Box<dyn AudioContext>, AudioError> {
            self.open_calls.fetch_add(1, Ordering::SeqCst);
            self.opened_ids.lock().push(device_id.map(str::to_string));

            if let Some(message) = self.fail_open_with.lock().take() {
                return Err(AudioError::PermissionDenied(message));
            }

            let label = device_id
                .and_then(|id| {
                    self.devices
                        .lock()
                        .iter()
                        .find(|d| d.id == id)
                        .map(|d| d.label.clone())
                })
                .unwrap_or_else(|| "Mock Microphone".to_string());

            let probe = Arc::new(ContextProbe::default());
            self.probes.lock().push(probe.clone());

            Ok(Box::new(MockContext {
                label,
                sample_rate: constraints.sample_rate,
                probe,
                resume_script: self.resume_script.clone(),
            }))
        }
    }

    /// Context whose state is driven by its probe and resume script
    pub struct MockContext {
        label: String,
        sample_rate: u32,
        probe: Arc<ContextProbe>,
        resume_script: Arc<Mutex<VecDeque<bool>>>,
    }

    impl AudioContext for MockContext {
        fn state(&self) -> ContextState {
            self.probe.state()
        }

        fn resume(&mut self) -> Result<(), AudioError> {
            self.probe.resume_calls.fetch_add(1, Ordering::SeqCst);
            let outcome = self.resume_script.lock().pop_front().unwrap_or(true);
            if outcome {
                self.probe.state.store(STATE_RUNNING, Ordering::SeqCst);
                Ok(())
            } else {
                Err(AudioError::Suspended)
            }
        }

        fn close(&mut self) -> Result<(), AudioError> {
            if self.probe.state() == ContextState::Closed {
                return Ok(());
            }
            self.probe.close_calls.fetch_add(1, Ordering::SeqCst);
            self.probe.state.store(STATE_CLOSED, Ordering::SeqCst);
            Ok(())
        }

        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn device_label(&self) -> &str {
            &self.label
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockBackend;
    use super::*;
    use crate::graph::shared_chain;

    #[test]
    fn test_downmix_stereo() {
        let interleaved = [1.0, 0.0, 0.5, 0.5];
        assert_eq!(downmix_to_mono(&interleaved, 2), vec![0.5, 0.5]);
    }

    #[test]
    fn test_downmix_mono_is_identity() {
        let samples = [0.1, 0.2, 0.3];
        assert_eq!(downmix_to_mono(&samples, 1), samples.to_vec());
    }

    #[test]
    fn test_mock_context_lifecycle() {
        let backend = MockBackend::new();
        let chain = shared_chain(48000);
        let mut context = backend
            .open(None, &CaptureConstraints::default(), chain)
            .unwrap();

        assert_eq!(context.state(), ContextState::Running);

        let probe = backend.last_probe().unwrap();
        probe.force_suspend();
        assert_eq!(context.state(), ContextState::Suspended);

        context.resume().unwrap();
        assert_eq!(context.state(), ContextState::Running);

        context.close().unwrap();
        assert_eq!(context.state(), ContextState::Closed);
        // Idempotent
        context.close().unwrap();
        assert_eq!(probe.close_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_mock_scripted_resume_failures() {
        let backend = MockBackend::new();
        backend.script_resumes(&[false, false, true]);
        let chain = shared_chain(48000);
        let mut context = backend
            .open(None, &CaptureConstraints::default(), chain)
            .unwrap();

        assert!(context.resume().is_err());
        assert!(context.resume().is_err());
        assert!(context.resume().is_ok());
    }

    #[test]
    fn test_mock_open_failure() {
        let backend = MockBackend::new();
        backend.fail_next_open("denied");
        let chain = shared_chain(48000);
        let result = backend.open(None, &CaptureConstraints::default(), chain);
        assert!(matches!(result, Err(AudioError::PermissionDenied(_))));
    }
}
