//! Per-line sample loop
//!
//! Single flow of control: the only suspension point is the blocking read
//! of the next input line. For each line the engine
//! - checks the reconfiguration slot (the only point where settings change)
//! - hands the line to the [`FrameScheduler`]
//!
//! End of input ends the loop cleanly. A failed write is fatal and is
//! returned immediately without retry.

use super::config::{ConfigError, ConfigPort};
use super::output::FrameWriter;
use super::scheduler::{FrameScheduler, RunCommand};
use crate::settings::SettingsSource;
use crate::stats::counters::EngineStats;
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Errors that end the sample loop
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to read input: {0}")]
    Input(#[source] io::Error),

    #[error("failed to write output: {0}")]
    Output(#[source] io::Error),
}

impl EngineError {
    /// Whether the downstream consumer went away
    pub fn is_broken_pipe(&self) -> bool {
        matches!(self, EngineError::Output(e) if e.kind() == io::ErrorKind::BrokenPipe)
    }
}

/// Trigger-and-framing engine over a line-oriented input stream
pub struct Engine<S: SettingsSource> {
    scheduler: FrameScheduler,
    port: ConfigPort<S>,
    stats: EngineStats,
    shutdown: Option<Arc<AtomicBool>>,
}

impl<S: SettingsSource> Engine<S> {
    /// Create an engine with the port's startup configuration
    ///
    /// # Example
    /// ```
    /// use pqscope_core::scope::config::ConfigPort;
    /// use pqscope_core::scope::output::{FrameWriter, OutputFormat};
    /// use pqscope_core::{Engine, Settings};
    ///
    /// let port = ConfigPort::new(Settings::default(), None, 65536);
    /// let mut engine = Engine::new(port).unwrap();
    /// let mut out = FrameWriter::new(Vec::new(), OutputFormat::Raw);
    /// let stats = engine.run("1 2 3 4\n".as_bytes(), &mut out).unwrap();
    /// assert_eq!(stats.lines_read, 1);
    /// ```
    pub fn new(mut port: ConfigPort<S>) -> Result<Self, EngineError> {
        let config = port.initial()?;
        tracing::info!(
            policy = config.policy.name(),
            frame_samples = config.params.frame_samples,
            pre = config.params.pre_trigger_samples,
            post = config.params.post_trigger_samples,
            capacity = port.capacity(),
            "Engine configured"
        );
        let scheduler = FrameScheduler::new(port.capacity(), config);
        Ok(Self {
            scheduler,
            port,
            stats: EngineStats::new(),
            shutdown: None,
        })
    }

    /// Stop the loop at the next line once `flag` is set
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    /// Apply a pending reconfiguration, if any
    ///
    /// Must only be called between two lines. A rejected configuration is
    /// logged and the current one is kept. A stop takes effect before the
    /// new parameters and a run after them, so parameters changed together
    /// with a stop re-render the frozen frame. While stopped, a re-rendered
    /// frame is written before returning.
    pub fn apply_pending<W: Write>(&mut self, out: &mut FrameWriter<W>) -> Result<(), EngineError> {
        let update = match self.port.poll() {
            Ok(Some(update)) => update,
            Ok(None) => return Ok(()),
            Err(e) => {
                self.stats.rejected_reconfigurations += 1;
                tracing::warn!(error = %e, "Reconfiguration rejected, keeping current settings");
                return Ok(());
            }
        };

        if update.command == Some(RunCommand::Stop) {
            self.scheduler.command(RunCommand::Stop);
        }
        self.scheduler.reconfigure(update.config);
        if update.command == Some(RunCommand::Run) {
            self.scheduler.command(RunCommand::Run);
        }
        self.stats.reconfigurations += 1;

        if let Some(frame) = self.scheduler.flush_ready(out).map_err(EngineError::Output)? {
            self.stats.record_frame(&frame);
        }
        Ok(())
    }

    /// Run until end of input or shutdown
    ///
    /// # Returns
    /// Final statistics. Output is flushed before returning.
    pub fn run<R: BufRead, W: Write>(
        &mut self,
        mut input: R,
        out: &mut FrameWriter<W>,
    ) -> Result<EngineStats, EngineError> {
        let mut line = Vec::with_capacity(128);

        loop {
            if self.shutdown_requested() {
                tracing::info!("Shutdown requested");
                break;
            }

            line.clear();
            let n = input.read_until(b'\n', &mut line).map_err(EngineError::Input)?;
            if n == 0 {
                tracing::info!(lines = self.stats.lines_read, "End of input");
                break;
            }

            self.apply_pending(out)?;

            let text = String::from_utf8_lossy(&line);
            let outcome = self
                .scheduler
                .process_line(&text, out)
                .map_err(EngineError::Output)?;
            self.stats.record_line(&outcome);
        }

        out.flush().map_err(EngineError::Output)?;
        self.stats.sync_from(&self.scheduler);
        self.stats.log_summary();
        Ok(self.stats.clone())
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::config::notification_channel;
    use crate::scope::output::OutputFormat;
    use crate::scope::scheduler::RunState;
    use crate::settings::{Settings, TriggerMode};
    use std::sync::Mutex;

    fn settings() -> Settings {
        Settings {
            sample_rate: 1000.0,
            time_per_division: 0.01,
            horizontal_divisions: 10,
            pre_trigger_percent: 20.0,
            trigger_mode: TriggerMode::Freerun,
            ..Settings::default()
        }
    }

    fn lines(n: usize) -> String {
        (0..n).map(|i| format!("{} 0 0 0\n", i)).collect()
    }

    /// Writer that fails every write
    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    #[test]
    fn test_end_of_input_is_clean() {
        let mut engine = Engine::new(ConfigPort::new(settings(), None, 4096)).unwrap();
        let mut out = FrameWriter::new(Vec::new(), OutputFormat::Raw);
        let stats = engine.run(lines(450).as_bytes(), &mut out).unwrap();

        assert_eq!(stats.lines_read, 450);
        assert_eq!(stats.freerun_triggers, 5);
        // Frames at 0..400 end by sample 479; the last one is still pending
        assert_eq!(stats.frames_emitted, 4);
        assert_eq!(engine.scheduler().sp(), 449);
    }

    #[test]
    fn test_write_failure_is_fatal() {
        let mut engine = Engine::new(ConfigPort::new(settings(), None, 4096)).unwrap();
        let mut out = FrameWriter::new(Broken, OutputFormat::Raw);
        let err = engine.run(lines(300).as_bytes(), &mut out).unwrap_err();
        assert!(err.is_broken_pipe());
        // Stopped at the first frame
        assert!(engine.stats().lines_read < 100);
    }

    #[test]
    fn test_startup_rejects_oversized_frame() {
        let result = Engine::new(ConfigPort::new(settings(), None, 64));
        assert!(matches!(
            result,
            Err(EngineError::Config(ConfigError::FrameExceedsCapacity { .. }))
        ));
    }

    #[test]
    fn test_shutdown_flag_stops_loop() {
        let flag = Arc::new(AtomicBool::new(true));
        let mut engine = Engine::new(ConfigPort::new(settings(), None, 4096))
            .unwrap()
            .with_shutdown(flag);
        let mut out = FrameWriter::new(Vec::new(), OutputFormat::Raw);
        let stats = engine.run(lines(10).as_bytes(), &mut out).unwrap();
        assert_eq!(stats.lines_read, 0);
    }

    #[test]
    fn test_invalid_utf8_is_parse_failure() {
        let mut engine = Engine::new(ConfigPort::new(settings(), None, 4096)).unwrap();
        let mut out = FrameWriter::new(Vec::new(), OutputFormat::Raw);
        let input: &[u8] = b"1 2 3 4\n\xff\xfe 2 3 4\n5 6 7 8\n";
        let stats = engine.run(input, &mut out).unwrap();
        assert_eq!(stats.lines_read, 3);
        assert_eq!(stats.parse_failures, 1);
    }

    #[test]
    fn test_stop_command_through_settings() {
        let shared = Arc::new(Mutex::new(settings()));
        let (notifier, rx) = notification_channel();
        let mut engine = Engine::new(ConfigPort::new(shared.clone(), Some(rx), 4096)).unwrap();

        shared.lock().unwrap().run_state = RunState::Stopped;
        notifier.notify();

        let mut out = FrameWriter::new(Vec::new(), OutputFormat::Raw);
        let stats = engine.run(lines(10).as_bytes(), &mut out).unwrap();
        assert_eq!(engine.scheduler().run_state(), RunState::Stopped);
        assert_eq!(stats.reconfigurations, 1);
    }

    #[test]
    fn test_rejected_reconfiguration_keeps_config() {
        let shared = Arc::new(Mutex::new(settings()));
        let (notifier, rx) = notification_channel();
        let mut engine = Engine::new(ConfigPort::new(shared.clone(), Some(rx), 4096)).unwrap();

        shared.lock().unwrap().time_per_division = 100.0;
        notifier.notify();

        let mut out = FrameWriter::new(Vec::new(), OutputFormat::Raw);
        let stats = engine.run(lines(10).as_bytes(), &mut out).unwrap();
        assert_eq!(stats.rejected_reconfigurations, 1);
        assert_eq!(engine.scheduler().config().params.frame_samples, 100);
    }
}
