use crate::command_manager::CommandProcessor;
use crate::voice::VoiceRenderer;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

/// Consumer thread: drains voice command lists and renders on a fixed cadence.
pub struct AudioThread {
    processor: CommandProcessor<VoiceRenderer>,
    wake_rx: Receiver<()>,
    running: Arc<AtomicBool>,
    frames_per_tick: u32,
    tick_interval: Duration,
}

/// Owner side of a running [`AudioThread`]. Stops and joins it on drop.
pub struct AudioThreadHandle {
    wake_tx: Sender<()>,
    running: Arc<AtomicBool>,
    join: Option<JoinHandle<CommandProcessor<VoiceRenderer>>>,
}

impl AudioThread {
    pub fn spawn(
        processor: CommandProcessor<VoiceRenderer>,
        frames_per_tick: u32,
        tick_interval: Duration,
    ) -> std::io::Result<AudioThreadHandle> {
        // One pending wake is enough, extra requests coalesce
        let (wake_tx, wake_rx) = bounded(1);
        let running = Arc::new(AtomicBool::new(true));

        let mut audio_thread = AudioThread {
            processor,
            wake_rx,
            running: running.clone(),
            frames_per_tick,
            tick_interval,
        };
        let join = thread::Builder::new()
            .name("atk-audio".into())
            .spawn(move || {
                audio_thread.run();
                audio_thread.processor
            })?;

        Ok(AudioThreadHandle { wake_tx, running, join: Some(join) })
    }

    fn run(&mut self) {
        info!(
            "[AudioThread] Started: {} frames every {:?}",
            self.frames_per_tick, self.tick_interval
        );
        while self.running.load(Ordering::Acquire) {
            match self.wake_rx.recv_timeout(self.tick_interval) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            // Process Commands
            if self.processor.process_command() {
                debug!("[AudioThread] Processed command lists");
            }

            // Process Audio
            self.processor.handler_mut().render(self.frames_per_tick);

            if !self.processor.is_connected() {
                debug!("[AudioThread] Voice command producer gone");
                break;
            }
        }

        // Anything flushed before shutdown still gets its reply
        self.processor.process_command();
        self.processor.handler_mut().flush_replies();
        info!(
            "[AudioThread] Stopped after {} frames",
            self.processor.handler().rendered_frames()
        );
    }
}

impl AudioThreadHandle {
    /// Request-process hook for the voice command manager.
    pub fn waker(&self) -> impl Fn() + Send + 'static + use<> {
        let wake_tx = self.wake_tx.clone();
        move || {
            let _ = wake_tx.try_send(());
        }
    }

    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }

    /// Stop the thread and hand back the consumer half.
    pub fn shutdown(mut self) -> anyhow::Result<CommandProcessor<VoiceRenderer>> {
        self.stop();
        let join = self.join.take().ok_or_else(|| anyhow::anyhow!("audio thread already joined"))?;
        join.join().map_err(|_| anyhow::anyhow!("audio thread panicked"))
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let _ = self.wake_tx.try_send(());
    }
}

impl Drop for AudioThreadHandle {
    fn drop(&mut self) {
        self.stop();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
