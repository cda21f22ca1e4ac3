//! Machine configuration.
//!
//! Everything here is fixed when the machine is constructed.  In
//! particular the tick model cannot be changed later: a machine
//! driven by a host interval timer and one driven by counting
//! instructions behave differently enough that switching between
//! them mid-run would make the time base meaningless.
use std::error::Error;
use std::fmt::{self, Display, Formatter};

use serde::Serialize;

/// Which processor is emulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Variant {
    /// Single-section addressing (KS10-like).
    Flat,
    /// Multi-section addressing (KL10-like).
    Extended,
}

/// How the scheduler's notion of time advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TickModel {
    /// One scheduler tick every `instructions_per_tick` instructions.
    /// Runs are exactly reproducible.
    Counting { instructions_per_tick: u32 },
    /// A host interval timer counts ticks; they are applied at the
    /// next synchronization point.
    HostInterrupt,
}

#[derive(Debug, Clone, Serialize)]
pub struct MachineConfiguration {
    pub variant: Variant,
    /// Size of physical memory, in words.
    pub memory_words: usize,
    pub tick_model: TickModel,
    /// Microseconds of emulated time per scheduler tick.
    pub usec_per_tick: u64,
    /// Scheduler ticks per interval tick (the granularity of the
    /// multi-tick timer queue).
    pub subticks_per_interval: u64,
    /// Number of entries in the timer arena.
    pub timer_pool_capacity: usize,
    /// PI channel used for a bus adapter's high-priority requests
    /// until the guest changes it.
    pub adapter_high_channel: u8,
    /// PI channel used for a bus adapter's low-priority requests
    /// until the guest changes it.
    pub adapter_low_channel: u8,
}

impl Default for MachineConfiguration {
    fn default() -> Self {
        MachineConfiguration {
            variant: Variant::Flat,
            memory_words: 512 * 1024,
            tick_model: TickModel::Counting {
                instructions_per_tick: 1,
            },
            usec_per_tick: 1,
            subticks_per_interval: 1000,
            timer_pool_capacity: 64,
            adapter_high_channel: 6,
            adapter_low_channel: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    ZeroInstructionsPerTick,
    ZeroTickLength,
    ZeroSubticksPerInterval,
    NotEnoughMemory { words: usize },
    BadAdapterChannel { channel: u8 },
}

impl Display for ConfigurationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            ConfigurationError::ZeroInstructionsPerTick => {
                f.write_str("instructions per tick must be at least 1")
            }
            ConfigurationError::ZeroTickLength => {
                f.write_str("microseconds per tick must be at least 1")
            }
            ConfigurationError::ZeroSubticksPerInterval => {
                f.write_str("ticks per interval must be at least 1")
            }
            ConfigurationError::NotEnoughMemory { words } => write!(
                f,
                "{words} words of memory is not enough to hold the process tables"
            ),
            ConfigurationError::BadAdapterChannel { channel } => write!(
                f,
                "{channel} is not a PI channel (valid channels are 1-7)"
            ),
        }
    }
}

impl Error for ConfigurationError {}

impl MachineConfiguration {
    pub fn is_extended(&self) -> bool {
        self.variant == Variant::Extended
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if let TickModel::Counting {
            instructions_per_tick: 0,
        } = self.tick_model
        {
            return Err(ConfigurationError::ZeroInstructionsPerTick);
        }
        if self.usec_per_tick == 0 {
            return Err(ConfigurationError::ZeroTickLength);
        }
        if self.subticks_per_interval == 0 {
            return Err(ConfigurationError::ZeroSubticksPerInterval);
        }
        if self.memory_words < 0o2000 {
            return Err(ConfigurationError::NotEnoughMemory {
                words: self.memory_words,
            });
        }
        for channel in [self.adapter_high_channel, self.adapter_low_channel] {
            if !(1..=7).contains(&channel) {
                return Err(ConfigurationError::BadAdapterChannel { channel });
            }
        }
        Ok(())
    }
}

#[test]
fn default_configuration_is_valid() {
    assert_eq!(MachineConfiguration::default().validate(), Ok(()));
}

#[test]
fn zero_instructions_per_tick_is_rejected() {
    let config = MachineConfiguration {
        tick_model: TickModel::Counting {
            instructions_per_tick: 0,
        },
        ..MachineConfiguration::default()
    };
    assert_eq!(
        config.validate(),
        Err(ConfigurationError::ZeroInstructionsPerTick)
    );
}
