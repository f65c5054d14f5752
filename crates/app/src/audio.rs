use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{info, warn};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use voxgate_core::constants::{BLOCK_SIZE, SAMPLE_RATE};
use voxgate_core::{AudioSink, CancelToken, Pipeline};

/// Time the output device is given to drain after the last sample was queued.
const DRAIN_GRACE: Duration = Duration::from_millis(150);

fn mono_config(sample_rate: u32) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    }
}

pub fn find_input_device(host: &cpal::Host, name: &str) -> Result<cpal::Device> {
    if name == "default" {
        host.default_input_device()
            .context("No default input found")
    } else {
        host.input_devices()?
            .find(|d| d.name().ok().as_deref() == Some(name))
            .with_context(|| format!("Input device '{}' not found", name))
    }
}

pub fn find_output_device(host: &cpal::Host, name: &str) -> Result<cpal::Device> {
    if name == "default" {
        host.default_output_device()
            .context("No default output found")
    } else {
        host.output_devices()?
            .find(|d| d.name().ok().as_deref() == Some(name))
            .with_context(|| format!("Output device '{}' not found", name))
    }
}

/// Microphone capture feeding the pipeline.
///
/// The cpal callback only pushes samples into a ring buffer; a dedicated thread pops
/// whole blocks and runs `Pipeline::process_block` on them.
pub struct AudioEngine {
    _input_stream: cpal::Stream,
    is_running: Arc<AtomicBool>,
}

impl AudioEngine {
    pub fn start(input_device_name: &str, mut pipeline: Pipeline) -> Result<Self> {
        let host = cpal::default_host();
        info!("Audio host: {}", host.id().name());

        let input_device = find_input_device(&host, input_device_name)?;
        info!(
            "Using input device: {}",
            input_device.name().unwrap_or_default()
        );

        // Latency management (200ms buffer)
        let buffer_size = (SAMPLE_RATE as usize) / 5;
        let rb_in = HeapRb::<f32>::new(buffer_size);
        let (mut prod_in, mut cons_in) = rb_in.split();

        let input_stream = input_device
            .build_input_stream(
                &mono_config(SAMPLE_RATE),
                move |data: &[f32], _| {
                    let _ = prod_in.push_slice(data);
                },
                |err| warn!("Input error: {}", err),
                None,
            )
            .context("Failed to open input stream")?;

        let is_running = Arc::new(AtomicBool::new(true));
        let run_flag = is_running.clone();

        thread::Builder::new()
            .name("voxgate-audio".into())
            .spawn(move || {
                let mut raw = [0.0f32; BLOCK_SIZE];
                let mut block = [0i16; BLOCK_SIZE];
                let mut overruns = 0u64;

                while run_flag.load(Ordering::Relaxed) {
                    if cons_in.occupied_len() < BLOCK_SIZE {
                        thread::sleep(Duration::from_micros(500));
                        continue;
                    }
                    if cons_in.is_full() {
                        overruns += 1;
                        if overruns == 1 || overruns % 100 == 0 {
                            warn!("Capture buffer overrun ({} so far)", overruns);
                        }
                    }

                    cons_in.pop_slice(&mut raw);
                    for (dst, &s) in block.iter_mut().zip(raw.iter()) {
                        *dst = (s * 32768.0).clamp(-32768.0, 32767.0) as i16;
                    }

                    let report = pipeline.process_block(&block);
                    if report.woke {
                        info!("Listening{}", if report.barge_in { " (barge-in)" } else { "" });
                    }
                    if let Some(samples) = report.utterance_samples {
                        info!("Captured utterance ({} ms)", samples * 1000 / SAMPLE_RATE as usize);
                    }
                }
            })
            .context("Failed to spawn audio processing thread")?;

        input_stream.play()?;

        Ok(Self {
            _input_stream: input_stream,
            is_running,
        })
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.is_running.store(false, Ordering::Relaxed);
    }
}

/// Plays clips on an output device, one stream per clip.
///
/// Stores the device name rather than the device so the sink can be shared with the
/// worker thread.
pub struct CpalSink {
    device_name: String,
}

impl CpalSink {
    /// Checks that the device exists.
    pub fn new(device_name: &str) -> Result<Self> {
        let device = find_output_device(&cpal::default_host(), device_name)?;
        info!("Using output device: {}", device.name().unwrap_or_default());
        Ok(Self {
            device_name: device_name.to_string(),
        })
    }
}

impl AudioSink for CpalSink {
    fn play(&self, samples: &[i16], sample_rate: u32, cancel: &CancelToken) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let device = find_output_device(&cpal::default_host(), &self.device_name)?;

        let rb = HeapRb::<f32>::new(samples.len());
        let (mut prod, mut cons) = rb.split();
        for &s in samples {
            let _ = prod.try_push(f32::from(s) / 32768.0);
        }

        let stream = device
            .build_output_stream(
                &mono_config(sample_rate),
                move |data: &mut [f32], _| {
                    let read = cons.pop_slice(data);
                    for sample in data.iter_mut().skip(read) {
                        *sample = 0.0;
                    }
                },
                |err| warn!("Output error: {}", err),
                None,
            )
            .context("Failed to open output stream")?;
        stream.play().context("Failed to start playback")?;

        // The producer observes how much the callback has consumed
        while !prod.is_empty() {
            if cancel.is_cancelled() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(10));
        }

        let drained = std::time::Instant::now();
        while drained.elapsed() < DRAIN_GRACE {
            if cancel.is_cancelled() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        Ok(())
    }
}

pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    println!("Audio Host: {}", host.id().name());
    println!("\nInput Devices:");
    for device in host.input_devices()? {
        println!("  - {}", device.name().unwrap_or("Unknown".to_string()));
    }
    println!("\nOutput Devices:");
    for device in host.output_devices()? {
        println!("  - {}", device.name().unwrap_or("Unknown".to_string()));
    }
    Ok(())
}
