//! The emulated machine as a whole.
//!
//! [`Kn10`] owns every subsystem: the processor context, memory, the
//! PI system, the APR, the buses and their devices, the clock and the
//! timer scheduler.  Subsystems never hold references to each other;
//! anything which needs to touch more than one of them is a method
//! here.
//!
//! ## The synchronization point
//!
//! The instruction loop runs flat out until either the clock's
//! countdown runs out or the attention flag is raised.  It then calls
//! [`Kn10::sync`], which does the following, in this order:
//!
//! 1. clear the attention flag;
//! 2. poll the devices which asked to be polled;
//! 3. apply the scheduler ticks which have become due, running timer
//!    callouts;
//! 4. if the PI system selects a channel, take the interrupt;
//! 5. otherwise, if a trap is pending and nothing has raised the
//!    attention flag again, take the trap.
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use tracing::{event, Level};

use base::prelude::*;

use super::abort::{Abort, Bugcheck, PageFailure, PageFailureCause};
use super::apr::{Apr, AprConoEffect, AprFlag, AprStatus};
use super::bus::{
    split_timer_arg, unibus_data, Bus, BusError, BusWidth, Device, DeviceContext, DeviceId, Route,
    StatusWriteEffect,
};
use super::clock::Clock;
use super::config::{ConfigurationError, MachineConfiguration, TickModel};
use super::context::{AddressSpace, PcFlags, Phase, ProcessorContext};
use super::ea::{self, Ea, EaMemory};
use super::host::{Attention, HostError, HostSupport, Ticker};
use super::memory::{MemoryOpFailure, MemoryUnit};
use super::pi::{PiController, PiStatus};
use super::run::{DebugState, FetchCache};
use super::timer::{TimerAction, TimerError, TimerScheduler, TimerStatistics};

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{self, Display, Formatter};

#[derive(Debug)]
pub enum SetupError {
    Configuration(ConfigurationError),
    Timer(TimerError),
}

impl Display for SetupError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            SetupError::Configuration(e) => write!(f, "bad machine configuration: {e}"),
            SetupError::Timer(e) => write!(f, "failed to set up the timer scheduler: {e}"),
        }
    }
}

impl Error for SetupError {}

impl From<ConfigurationError> for SetupError {
    fn from(e: ConfigurationError) -> SetupError {
        SetupError::Configuration(e)
    }
}

impl From<TimerError> for SetupError {
    fn from(e: TimerError) -> SetupError {
        SetupError::Timer(e)
    }
}

#[derive(Debug)]
pub struct Kn10 {
    pub(crate) config: MachineConfiguration,
    pub(crate) extended: bool,
    pub(crate) cpu: ProcessorContext,
    pub(crate) mem: MemoryUnit,
    pub(crate) pi: PiController,
    pub(crate) apr: Apr,
    pub(crate) bus: Bus,
    pub(crate) clock: Clock,
    pub(crate) timers: TimerScheduler<Kn10>,
    pub(crate) attention: Attention,
    pub(crate) poll_requests: Vec<DeviceId>,
    /// The device request mask last given to the PI system.
    pub(crate) device_mask: u8,
    pub(crate) fetch_cache: FetchCache,
    pub(crate) debug: DebugState,
    pub(crate) halted: bool,
    pub(crate) idle: bool,
    pub(crate) instructions: u64,
}

pub(crate) fn timers_of(kn10: &mut Kn10) -> &mut TimerScheduler<Kn10> {
    &mut kn10.timers
}

/// Timer callout for the interval timer (TIM).
fn interval_timer_expired(kn10: &mut Kn10, _arg: u64) -> TimerAction {
    kn10.clock.expire();
    kn10.pi_devupd();
    TimerAction::Repeat
}

/// Timer callout for timers created by devices.
pub(crate) fn device_timer_expired(kn10: &mut Kn10, arg: u64) -> TimerAction {
    let (id, device_arg) = split_timer_arg(arg);
    kn10.with_device(id, |device, ctx| device.timer_expired(ctx, device_arg))
        .unwrap_or(TimerAction::Kill)
}

impl Kn10 {
    pub fn new(config: MachineConfiguration) -> Result<Kn10, SetupError> {
        config.validate()?;
        let mut timers = TimerScheduler::new(
            config.timer_pool_capacity,
            config.usec_per_tick,
            config.subticks_per_interval,
        )?;
        let mut clock = Clock::new(config.tick_model, config.usec_per_tick);
        // The interval timer's entry is created quiescent and started by
        // CONO TIM.
        let handle = timers.get_timer(interval_timer_expired, 0, 1)?;
        timers.quiesce(handle)?;
        clock.set_timer(handle);
        event!(Level::INFO, "creating machine with configuration {:?}", config);
        Ok(Kn10 {
            extended: config.is_extended(),
            cpu: ProcessorContext::new(),
            mem: MemoryUnit::new(config.memory_words),
            pi: PiController::new(),
            apr: Apr::new(),
            bus: Bus::new(config.adapter_high_channel, config.adapter_low_channel),
            clock,
            timers,
            attention: Attention::new(),
            poll_requests: Vec::new(),
            device_mask: 0,
            fetch_cache: FetchCache::default(),
            debug: DebugState::default(),
            halted: false,
            idle: false,
            instructions: 0,
            config,
        })
    }

    pub fn configuration(&self) -> &MachineConfiguration {
        &self.config
    }

    pub fn pc(&self) -> VirtualAddress {
        self.cpu.pc
    }

    pub fn set_pc(&mut self, pc: VirtualAddress) {
        self.cpu.pc = if self.extended {
            pc
        } else {
            VirtualAddress::new(0, pc.offset())
        };
        self.halted = false;
    }

    pub fn flags(&self) -> PcFlags {
        self.cpu.flags
    }

    pub fn set_flags(&mut self, flags: PcFlags) {
        self.cpu.flags = flags;
    }

    /// An accumulator in the current block.
    pub fn ac(&self, n: u8) -> Word {
        self.cpu.ac(n)
    }

    pub fn set_ac(&mut self, n: u8, value: Word) {
        self.cpu.set_ac(n, value);
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn instructions_executed(&self) -> u64 {
        self.instructions
    }

    /// Emulated time since the machine was created.
    pub fn time_base_usec(&self) -> u64 {
        self.clock.time_base()
    }

    pub fn read_physical(&self, addr: PhysicalAddress) -> Result<Word, MemoryOpFailure> {
        self.mem.read_physical(addr)
    }

    pub fn write_physical(
        &mut self,
        addr: PhysicalAddress,
        value: Word,
    ) -> Result<(), MemoryOpFailure> {
        self.mem.write_physical(addr, value)
    }

    pub fn load_image(&mut self, image: &[(PhysicalAddress, Word)]) -> Result<(), MemoryOpFailure> {
        for (addr, value) in image {
            self.mem.write_physical(*addr, *value)?;
        }
        event!(Level::INFO, "loaded {} words", image.len());
        Ok(())
    }

    pub fn map_page(
        &mut self,
        space: AddressSpace,
        virtual_page: u32,
        physical_page: u32,
        writable: bool,
    ) -> Result<(), MemoryOpFailure> {
        self.mem
            .map_page(space, virtual_page, physical_page, writable)
    }

    pub fn unmap_page(
        &mut self,
        space: AddressSpace,
        virtual_page: u32,
    ) -> Result<(), MemoryOpFailure> {
        self.mem.unmap_page(space, virtual_page)
    }

    pub fn attach_unibus_device(
        &mut self,
        device: Box<dyn Device>,
        range: RangeInclusive<u32>,
        adapter: u8,
    ) -> Result<DeviceId, BusError> {
        self.bus.register_unibus(device, range, adapter)
    }

    pub fn attach_iobus_device(
        &mut self,
        device: Box<dyn Device>,
        code: DeviceCode,
    ) -> Result<DeviceId, BusError> {
        self.bus.register_iobus(device, code)
    }

    /// The attention flag, for anything outside the instruction loop
    /// which needs the machine to stop and look around.
    pub fn attention(&self) -> Attention {
        self.attention.clone()
    }

    /// A ticker for a host interval timer.
    pub fn host_ticker(&self) -> Ticker {
        Ticker::new(self.clock.host_tick_counter(), self.attention.clone())
    }

    /// Start the host's interval timer, which will drive the
    /// scheduler under the host interrupt tick model.
    pub fn start_host_clock<H: HostSupport + ?Sized>(&self, host: &mut H) -> Result<(), HostError> {
        match self.clock.model() {
            TickModel::Counting { .. } => Err(HostError::WrongTickModel),
            TickModel::HostInterrupt => {
                let period = Duration::from_micros(self.timers.usec_per_tick());
                host.start_interval_timer(period, self.host_ticker())
            }
        }
    }

    /// Unapplied host ticks (host interrupt tick model).
    pub fn host_tick_counter(&self) -> Arc<std::sync::atomic::AtomicU32> {
        self.clock.host_tick_counter()
    }

    pub fn pi_status(&self) -> PiStatus {
        self.pi.status()
    }

    pub fn apr_statuses(&self) -> Vec<AprStatus> {
        self.apr.statuses()
    }

    pub fn drain_apr_changes(&mut self) -> BTreeMap<AprFlag, AprStatus> {
        self.apr.drain_changes()
    }

    pub fn timer_statistics(&self) -> TimerStatistics {
        self.timers.statistics()
    }

    pub fn set_usec_per_tick(&mut self, usec_per_tick: u64) -> Result<(), TimerError> {
        self.timers.set_usec_per_tick(usec_per_tick)?;
        self.clock.set_usec_per_tick(usec_per_tick);
        Ok(())
    }

    /// Does the instruction loop need to stop at the synchronization
    /// point?
    #[inline]
    pub(crate) fn needs_sync(&self) -> bool {
        self.attention.is_raised() || self.clock.is_exhausted()
    }

    /// Call a device, giving it a context through which it can change
    /// its interrupt request, use timers and ask to be polled.
    /// Returns `None` if there is no such device.
    pub(crate) fn with_device<R, F>(&mut self, id: DeviceId, f: F) -> Option<R>
    where
        F: FnOnce(&mut dyn Device, &mut DeviceContext<'_>) -> R,
    {
        let now = self.clock.time_base();
        let (device, request) = self.bus.parts(id)?;
        let mut ctx = DeviceContext::new(
            id,
            request,
            &mut self.timers,
            &mut self.poll_requests,
            now,
        );
        let result = f(device, &mut ctx);
        if ctx.request_changed() {
            self.pi_devupd();
        }
        Some(result)
    }

    /// Recompute the device request mask, passing it to the PI system
    /// only when it has changed.  Requests the PI system has already
    /// answered are not latched again until the mask changes.
    pub(crate) fn pi_devupd(&mut self) {
        self.bus.recompute_mask();
        let mask = self.bus.request_mask() | self.clock.request_mask();
        if mask == self.device_mask {
            return;
        }
        self.device_mask = mask;
        self.pi.set_device_requests(mask);
        if mask != 0 {
            self.attention.raise();
        }
    }

    /// Recompute the APR's PI request.
    pub(crate) fn apr_update(&mut self) {
        let mask = self.apr.request_mask();
        self.pi.set_apr_requests(mask);
        if mask != 0 {
            self.attention.raise();
        }
    }

    /// Raise attention if the PI system has something to do.
    pub(crate) fn pi_recheck(&mut self) {
        if self.pi.select().is_some() {
            self.attention.raise();
        }
    }

    pub(crate) fn raise_trap_flags(&mut self, traps: PcFlags) {
        self.cpu.raise_trap_flags(traps, self.mem.paging());
        if self.cpu.trap_pending {
            self.attention.raise();
        }
    }

    /// Reset every device on every bus (CONO APR I/O reset).
    pub(crate) fn io_reset(&mut self) {
        event!(Level::DEBUG, "I/O reset");
        let ids: Vec<DeviceId> = self.bus.device_ids().collect();
        for id in ids {
            self.with_device(id, |device, ctx| device.reset(ctx));
        }
        self.bus.clear_requests(None);
        self.clock.reset();
        if let Err(e) = self.clock.reprogram(&mut self.timers) {
            event!(Level::ERROR, "failed to stop the interval timer: {}", e);
        }
        self.pi_devupd();
    }

    fn initialize_adapter(&mut self, adapter: u8) {
        event!(Level::DEBUG, "initializing Unibus adapter {}", adapter);
        for id in self.bus.adapter_devices(adapter) {
            self.with_device(id, |device, ctx| device.reset(ctx));
        }
        self.bus.clear_requests(Some(adapter));
        self.pi_devupd();
    }

    fn poll_devices(&mut self) {
        let ids = std::mem::take(&mut self.poll_requests);
        for id in ids {
            self.with_device(id, |device, ctx| device.poll(ctx));
        }
    }

    /// The synchronization point.
    pub fn sync(&mut self) -> Result<(), Bugcheck> {
        self.attention.clear();
        self.poll_devices();
        let ticks = self.clock.take_due_ticks();
        for _ in 0..ticks {
            self.clock.tick();
            TimerScheduler::advance(self, timers_of);
        }
        if let Some(channel) = self.pi.select() {
            self.idle = false;
            self.take_interrupt(channel)?;
        } else if self.cpu.trap_pending && !self.attention.is_raised() {
            self.take_trap()?;
        }
        Ok(())
    }

    fn note_nxm(&mut self, pf: &PageFailure) {
        if pf.is_non_existent_memory() {
            self.apr.set_flag(AprFlag::NonExistentMemory);
            self.apr_update();
        }
    }

    /// Read a word at an effective address, in the context selected
    /// for `phase`.
    pub(crate) fn read(&mut self, ea: Ea, phase: Phase) -> Result<Word, Abort> {
        let (space, block) = self.cpu.context_for(phase);
        if ea.is_ac() {
            return Ok(self.cpu.ac_in_block(block, ea.address.offset() as u8));
        }
        self.mem.read_virtual(space, ea.address).map_err(|pf| {
            self.note_nxm(&pf);
            Abort::PageFail(pf)
        })
    }

    pub(crate) fn write(&mut self, ea: Ea, phase: Phase, value: Word) -> Result<(), Abort> {
        let (space, block) = self.cpu.context_for(phase);
        if ea.is_ac() {
            self.cpu
                .set_ac_in_block(block, ea.address.offset() as u8, value);
            return Ok(());
        }
        match self.mem.write_virtual(space, ea.address, value) {
            Ok(()) => Ok(()),
            Err(pf) => {
                self.note_nxm(&pf);
                Err(Abort::PageFail(pf))
            }
        }
    }

    pub(crate) fn read_data(&mut self, ea: Ea) -> Result<Word, Abort> {
        self.read(ea, Phase::Data)
    }

    pub(crate) fn write_data(&mut self, ea: Ea, value: Word) -> Result<(), Abort> {
        self.write(ea, Phase::Data, value)
    }

    /// Read a word at a physical address on behalf of the processor
    /// itself (process tables, vectors).
    pub(crate) fn read_table(&mut self, addr: PhysicalAddress) -> Result<Word, PageFailure> {
        self.mem.read_physical(addr).map_err(|_| {
            let pf = PageFailure::new(
                PageFailureCause::NonExistentMemory,
                VirtualAddress::from_bits(addr.bits()),
                AddressSpace::Exec,
                false,
            );
            self.note_nxm(&pf);
            pf
        })
    }

    pub(crate) fn write_table(
        &mut self,
        addr: PhysicalAddress,
        value: Word,
    ) -> Result<(), PageFailure> {
        self.mem.write_physical(addr, value).map_err(|_| {
            let pf = PageFailure::new(
                PageFailureCause::NonExistentMemory,
                VirtualAddress::from_bits(addr.bits()),
                AddressSpace::Exec,
                true,
            );
            self.note_nxm(&pf);
            pf
        })
    }

    /// Resolve the effective address of `inst`, polling for attention
    /// along indirection chains.
    pub(crate) fn resolve(&mut self, inst: Instruction, default_section: u32) -> Result<Ea, Abort> {
        let extended = self.extended;
        let mut view = EaView {
            kn10: self,
            poll: true,
        };
        ea::resolve(&mut view, inst, default_section, extended)
    }

    /// Resolve an effective address without polling (used while
    /// executing a vector instruction, which cannot be interrupted).
    pub(crate) fn resolve_without_polling(
        &mut self,
        inst: Instruction,
        default_section: u32,
    ) -> Result<Ea, Abort> {
        let extended = self.extended;
        let mut view = EaView {
            kn10: self,
            poll: false,
        };
        ea::resolve(&mut view, inst, default_section, extended)
    }

    /// Perform a Unibus read for RDIO.
    pub(crate) fn unibus_read(&mut self, adapter: u8, address: u32) -> Result<u32, Abort> {
        let value = match self.bus.route(adapter, address) {
            Route::Device(id) => self
                .with_device(id, |device, ctx| device.read(ctx, address))
                .and_then(Result::ok)
                .map(unibus_data),
            Route::PageMap(index) => Some(self.bus.read_page_map(adapter, index)),
            Route::Status => Some(self.bus.read_status(adapter)),
            Route::Maintenance => Some(self.bus.read_maintenance(adapter)),
            Route::Nonexistent => None,
        };
        value.ok_or_else(|| self.non_existent_device(adapter, address, false))
    }

    /// Perform a Unibus write for WRIO.
    pub(crate) fn unibus_write(
        &mut self,
        adapter: u8,
        address: u32,
        value: u32,
    ) -> Result<(), Abort> {
        let ok = match self.bus.route(adapter, address) {
            Route::Device(id) => self
                .with_device(id, |device, ctx| {
                    device.write(ctx, address, unibus_data(value), BusWidth::Word)
                })
                .is_some_and(|r| r.is_ok()),
            Route::PageMap(index) => {
                self.bus.write_page_map(adapter, index, value);
                true
            }
            Route::Status => {
                if self.bus.write_status(adapter, value) == StatusWriteEffect::InitializeAdapter {
                    self.initialize_adapter(adapter);
                }
                // The channel assignments may have changed.
                self.pi_devupd();
                true
            }
            Route::Maintenance => {
                self.bus.write_maintenance(adapter, value);
                true
            }
            Route::Nonexistent => false,
        };
        if ok {
            Ok(())
        } else {
            Err(self.non_existent_device(adapter, address, true))
        }
    }

    fn non_existent_device(&mut self, adapter: u8, address: u32, write: bool) -> Abort {
        event!(
            Level::DEBUG,
            "non-existent device at {}:{:06o}",
            adapter,
            address
        );
        self.bus.non_existent_device(adapter);
        Abort::PageFail(PageFailure::new(
            PageFailureCause::NonExistentDevice { adapter, address },
            VirtualAddress::ZERO,
            self.cpu.current_space(),
            write,
        ))
    }

    pub(crate) fn cono_apr(&mut self, bits: u32) {
        if self.apr.cono(bits) == AprConoEffect::IoReset {
            self.io_reset();
        }
        self.apr_update();
    }

    pub(crate) fn cono_tim(&mut self, bits: u32) -> Result<(), Bugcheck> {
        if self.clock.cono_tim(bits) {
            self.clock
                .reprogram(&mut self.timers)
                .map_err(Bugcheck::Timer)?;
        }
        self.pi_devupd();
        Ok(())
    }
}

/// The machine as seen by the effective address calculation.
struct EaView<'a> {
    kn10: &'a mut Kn10,
    poll: bool,
}

impl EaMemory for EaView<'_> {
    fn index_register(&mut self, x: u8) -> Word {
        let (_, block) = self.kn10.cpu.context_for(Phase::AddressCalculation);
        self.kn10.cpu.ac_in_block(block, x)
    }

    fn fetch_indirect(&mut self, address: VirtualAddress, global: bool) -> Result<Word, Abort> {
        let ea = Ea {
            address,
            global,
            flag_word: Word::ZERO,
        };
        self.kn10.read(ea, Phase::AddressCalculation)
    }

    fn attention(&mut self) -> bool {
        self.poll && self.kn10.attention.is_raised()
    }

    fn address_space(&self) -> AddressSpace {
        self.kn10.cpu.context_for(Phase::AddressCalculation).0
    }
}

#[cfg(test)]
mod tests;
