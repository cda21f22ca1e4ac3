//! The machine state report printed when the emulator stops.
use std::collections::BTreeMap;
use std::io::{self, Write};

use termcolor::{self, ColorChoice, ColorSpec, StandardStream, WriteColor};
use tracing::{event, Level};

use kn10::{AprFlag, AprStatus, Bugcheck, Kn10, PcFlags, StopReason};

fn get_colour_choice() -> termcolor::ColorChoice {
    if atty::is(atty::Stream::Stdout) {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    }
}

pub struct StopReporter {
    stream: StandardStream,
}

impl StopReporter {
    pub fn new() -> StopReporter {
        StopReporter {
            stream: StandardStream::stdout(get_colour_choice()),
        }
    }

    fn set_colour(&mut self, colour: termcolor::Color, bold: bool) {
        let mut spec = ColorSpec::new();
        spec.set_fg(Some(colour)).set_bold(bold);
        if let Err(e) = self.stream.set_color(&spec) {
            event!(Level::ERROR, "Failed to select colour {:?}: {}", spec, e);
        }
    }

    fn reset_colour(&mut self) {
        if let Err(e) = self.stream.reset() {
            event!(Level::ERROR, "Failed to reset terminal: {}", e);
        }
    }

    fn heading(&mut self, text: &str) -> io::Result<()> {
        self.set_colour(termcolor::Color::Cyan, true);
        write!(self.stream, "{text}")?;
        self.reset_colour();
        Ok(())
    }

    pub fn stopped(&mut self, outcome: &Result<StopReason, Bugcheck>) -> io::Result<()> {
        match outcome {
            Ok(reason) => {
                self.set_colour(termcolor::Color::Green, true);
                let text = match reason {
                    StopReason::Halted => "halted".to_string(),
                    StopReason::Breakpoint(at) => format!("breakpoint at {at}"),
                    StopReason::StepLimit => "single step".to_string(),
                    StopReason::InstructionLimit => "instruction limit reached".to_string(),
                    StopReason::Idle => "idle".to_string(),
                };
                write!(self.stream, "Stopped: {text}")?;
            }
            Err(bugcheck) => {
                self.set_colour(termcolor::Color::Red, true);
                write!(self.stream, "Machine check: {bugcheck}")?;
            }
        }
        self.reset_colour();
        writeln!(self.stream)
    }

    pub fn machine_state(&mut self, kn: &Kn10) -> io::Result<()> {
        self.heading("PC")?;
        writeln!(
            self.stream,
            " {} after {} instructions, time base {} us",
            kn.pc(),
            kn.instructions_executed(),
            kn.time_base_usec()
        )?;
        self.heading("Flags")?;
        writeln!(self.stream, " {:06o} {:?}", kn.flags().bits(), kn.flags())?;
        self.flag_warning(kn.flags())?;

        self.heading("ACs")?;
        writeln!(self.stream)?;
        for row in 0..4u8 {
            for col in 0..4u8 {
                let n = row * 4 + col;
                write!(self.stream, "  {:2o}: {:o}", n, kn.ac(n))?;
            }
            writeln!(self.stream)?;
        }

        let pi = kn.pi_status();
        self.heading("PI")?;
        writeln!(
            self.stream,
            " {} levels {:03o} in progress {:03o} requests dev {:03o} prog {:03o} apr {:03o}",
            if pi.system_on { "on" } else { "off" },
            pi.levels_on,
            pi.in_progress,
            pi.device_requests,
            pi.program_requests,
            pi.apr_requests
        )?;

        self.heading("APR")?;
        for status in kn.apr_statuses().iter().filter(|s| s.set) {
            self.set_colour(termcolor::Color::Yellow, false);
            write!(self.stream, " {}", status.name)?;
            self.reset_colour();
        }
        writeln!(self.stream)?;

        let timers = kn.timer_statistics();
        self.heading("Timers")?;
        writeln!(
            self.stream,
            " {} of {} in use ({} sub-tick, {} multi-tick, {} every interval, {} quiescent); \
             {} us per tick, {} ticks per interval",
            timers.capacity - timers.free,
            timers.capacity,
            timers.sub_tick,
            timers.multi_tick,
            timers.interval_tick,
            timers.quiescent,
            timers.usec_per_tick,
            timers.subticks_per_interval
        )?;
        self.stream.flush()
    }

    /// Report the APR flags whose state changed during the run.
    pub fn apr_changes(&mut self, changes: &BTreeMap<AprFlag, AprStatus>) -> io::Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        self.heading("APR changes")?;
        for status in changes.values() {
            self.set_colour(
                if status.set {
                    termcolor::Color::Yellow
                } else {
                    termcolor::Color::White
                },
                false,
            );
            write!(
                self.stream,
                " {} {}{}",
                status.name,
                if status.set { "set" } else { "clear" },
                if status.enabled { " (enabled)" } else { "" }
            )?;
            self.reset_colour();
        }
        writeln!(self.stream)?;
        self.stream.flush()
    }

    fn flag_warning(&mut self, flags: PcFlags) -> io::Result<()> {
        if flags.intersects(PcFlags::TRAPS) {
            self.set_colour(termcolor::Color::Yellow, false);
            writeln!(self.stream, "  (trap pending)")?;
            self.reset_colour();
        }
        Ok(())
    }
}

impl Drop for StopReporter {
    fn drop(&mut self) {
        self.reset_colour();
    }
}
