//! The I/O buses and the interrupt request aggregator.
//!
//! Devices attach in one of two ways:
//!
//! - to a Unibus adapter (numbered 1-4), occupying a range of Unibus
//!   register addresses which the guest reaches with RDIO and WRIO;
//! - to the I/O bus, under a 7-bit device code which the guest
//!   reaches with the CONO/CONI/DATAO/DATAI family.
//!
//! The bus owns every device (in registration order) and hands out
//! [`DeviceId`]s; everything else refers to devices by id.
//!
//! Devices ask for interrupts by setting their [`InterruptRequest`]
//! through the [`DeviceContext`] they are given whenever the machine
//! calls them.  A Unibus device asks for its adapter's high or low
//! priority channel; an I/O bus device names its channels directly.
//! The bus combines the requests into a single PI channel mask.
//!
//! ## Adapter registers
//!
//! Each adapter also answers at some Unibus addresses of its own:
//!
//! | Address       | Register |
//! | ------------- | -------- |
//! | 763000-763077 | page map (stored, not interpreted) |
//! | 763100        | status |
//! | 763101        | maintenance (stored, not interpreted) |
//!
//! The status register:
//!
//! | Bits   | Name | Meaning |
//! | ------ | ---- | ------- |
//! | 400000 | TIM  | Unibus timeout (write 1 to clear) |
//! | 200000 | BAD  | bad memory data (write 1 to clear) |
//! | 100000 | PAR  | bus parity error (write 1 to clear) |
//! | 040000 | NXD  | non-existent device (write 1 to clear) |
//! | 004000 | HI   | some device is requesting the high channel |
//! | 002000 | LO   | some device is requesting the low channel |
//! | 001000 | PWR  | power low (write 1 to clear) |
//! | 000200 | DXF  | disable transfer on error (write 1 to clear) |
//! | 000100 | INI  | initialize the adapter's devices (write only) |
//! | 000070 | -    | high priority PI channel |
//! | 000007 | -    | low priority PI channel |
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{self, Debug, Display, Formatter};
use std::ops::RangeInclusive;

use tracing::{event, Level};

use base::prelude::*;

use super::kn10::Kn10;
use super::pi::channel_bit;
use super::timer::{TimerAction, TimerError, TimerHandle, TimerScheduler};

/// Number of Unibus adapters.
pub const ADAPTERS: u8 = 4;

/// The most devices a single adapter will accept.
pub const MAX_DEVICES_PER_ADAPTER: usize = 32;

pub const PAGE_MAP_FIRST: u32 = 0o763_000;
pub const PAGE_MAP_LAST: u32 = 0o763_077;
pub const STATUS_REGISTER: u32 = 0o763_100;
pub const MAINTENANCE_REGISTER: u32 = 0o763_101;

pub const STATUS_TIM: u32 = 0o400_000;
pub const STATUS_BAD: u32 = 0o200_000;
pub const STATUS_PAR: u32 = 0o100_000;
pub const STATUS_NXD: u32 = 0o040_000;
pub const STATUS_HI: u32 = 0o004_000;
pub const STATUS_LO: u32 = 0o002_000;
pub const STATUS_PWR: u32 = 0o001_000;
pub const STATUS_DXF: u32 = 0o000_200;
pub const STATUS_INI: u32 = 0o000_100;
const STATUS_STICKY: u32 =
    STATUS_TIM | STATUS_BAD | STATUS_PAR | STATUS_NXD | STATUS_PWR | STATUS_DXF;

/// Bits of a device's timer argument available to the device; the
/// rest identify the device.
pub const DEVICE_TIMER_ARG_MASK: u64 = (1 << 48) - 1;

/// Unibus data is 16 bits wide.
const UNIBUS_DATA_MASK: u32 = 0o177_777;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(usize);

impl DeviceId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "device#{}", self.0)
    }
}

/// What a device is asking of the PI system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterruptRequest {
    #[default]
    None,
    /// The adapter's high priority channel (Unibus devices).
    High,
    /// The adapter's low priority channel (Unibus devices).
    Low,
    /// The PI channels in this mask (I/O bus devices).
    Channels(u8),
}

/// The width of a Unibus write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusWidth {
    Word,
    Byte,
}

/// A device's refusal of a bus cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusFault {
    /// Nothing answered at the address.
    NoResponse,
}

impl Display for BusFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            BusFault::NoResponse => f.write_str("no response on the bus"),
        }
    }
}

impl Error for BusFault {}

/// Configuration-time errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    Overlap {
        adapter: u8,
        requested: RangeInclusive<u32>,
        existing: String,
    },
    EmptyRange {
        adapter: u8,
        requested: RangeInclusive<u32>,
    },
    TooManyDevices {
        adapter: u8,
    },
    NoSuchAdapter(u8),
    DeviceCodeInUse(DeviceCode),
}

impl Display for BusError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            BusError::Overlap {
                adapter,
                requested,
                existing,
            } => write!(
                f,
                "addresses {:06o}-{:06o} on adapter {adapter} overlap those of {existing}",
                requested.start(),
                requested.end()
            ),
            BusError::EmptyRange { adapter, requested } => write!(
                f,
                "address range {:06o}-{:06o} on adapter {adapter} is empty",
                requested.start(),
                requested.end()
            ),
            BusError::TooManyDevices { adapter } => write!(
                f,
                "adapter {adapter} already has {MAX_DEVICES_PER_ADAPTER} devices"
            ),
            BusError::NoSuchAdapter(n) => {
                write!(f, "there is no adapter {n} (adapters are 1-{ADAPTERS})")
            }
            BusError::DeviceCodeInUse(code) => write!(f, "device code {code} is not available"),
        }
    }
}

impl Error for BusError {}

/// The interface between the machine and a peripheral.
///
/// Every method has a default which behaves like a device that does
/// nothing, so a device implements only what it uses.
pub trait Device {
    fn name(&self) -> String;

    /// The machine is taking an interrupt which this device requested.
    /// Return the interrupt vector (zero for the standard location).
    /// The default withdraws the request.
    fn interrupt_vector(&mut self, ctx: &mut DeviceContext<'_>) -> u32 {
        ctx.withdraw();
        0
    }

    /// CONO.
    fn conditions_out(&mut self, _ctx: &mut DeviceContext<'_>, _bits: u32) {}

    /// CONI (and CONSZ/CONSO).
    fn conditions_in(&mut self, _ctx: &mut DeviceContext<'_>) -> Word {
        Word::ZERO
    }

    /// DATAO.
    fn data_out(&mut self, _ctx: &mut DeviceContext<'_>, _word: Word) {}

    /// DATAI.
    fn data_in(&mut self, _ctx: &mut DeviceContext<'_>) -> Word {
        Word::ZERO
    }

    /// A Unibus read of one of the device's registers.
    fn read(&mut self, _ctx: &mut DeviceContext<'_>, _address: u32) -> Result<u32, BusFault> {
        Err(BusFault::NoResponse)
    }

    /// A Unibus write of one of the device's registers.
    fn write(
        &mut self,
        _ctx: &mut DeviceContext<'_>,
        _address: u32,
        _value: u32,
        _width: BusWidth,
    ) -> Result<(), BusFault> {
        Err(BusFault::NoResponse)
    }

    /// One of the device's timers expired.  `arg` is the value given
    /// to [`DeviceContext::get_timer`].
    fn timer_expired(&mut self, _ctx: &mut DeviceContext<'_>, _arg: u64) -> TimerAction {
        TimerAction::Kill
    }

    /// Host-level work, done at the synchronization point after the
    /// device called [`DeviceContext::request_poll`].
    fn poll(&mut self, _ctx: &mut DeviceContext<'_>) {}

    fn reset(&mut self, _ctx: &mut DeviceContext<'_>) {}
}

/// What a device may do to the rest of the machine while it is being
/// called.
pub struct DeviceContext<'a> {
    id: DeviceId,
    request: &'a mut InterruptRequest,
    timers: &'a mut TimerScheduler<Kn10>,
    poll_requests: &'a mut Vec<DeviceId>,
    now_usec: u64,
    changed: bool,
}

impl<'a> DeviceContext<'a> {
    pub(crate) fn new(
        id: DeviceId,
        request: &'a mut InterruptRequest,
        timers: &'a mut TimerScheduler<Kn10>,
        poll_requests: &'a mut Vec<DeviceId>,
        now_usec: u64,
    ) -> DeviceContext<'a> {
        DeviceContext {
            id,
            request,
            timers,
            poll_requests,
            now_usec,
            changed: false,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Emulated time, in microseconds.
    pub fn now_usec(&self) -> u64 {
        self.now_usec
    }

    pub(crate) fn request_changed(&self) -> bool {
        self.changed
    }

    fn set_request(&mut self, request: InterruptRequest) {
        if *self.request != request {
            event!(
                Level::TRACE,
                "{} interrupt request {:?} -> {:?}",
                self.id,
                self.request,
                request
            );
            *self.request = request;
            self.changed = true;
        }
    }

    pub fn request_high(&mut self) {
        self.set_request(InterruptRequest::High);
    }

    pub fn request_low(&mut self) {
        self.set_request(InterruptRequest::Low);
    }

    pub fn request_channels(&mut self, mask: u8) {
        if mask == 0 {
            self.set_request(InterruptRequest::None);
        } else {
            self.set_request(InterruptRequest::Channels(mask));
        }
    }

    pub fn withdraw(&mut self) {
        self.set_request(InterruptRequest::None);
    }

    /// Ask to be polled at the next synchronization point.
    pub fn request_poll(&mut self) {
        if !self.poll_requests.contains(&self.id) {
            self.poll_requests.push(self.id);
        }
    }

    /// Start a countdown timer; when it expires the device's
    /// `timer_expired` method is called with `arg`.
    pub fn get_timer(&mut self, arg: u64, usec: u64) -> Result<TimerHandle, TimerError> {
        let tagged = ((self.id.0 as u64) << 48) | (arg & DEVICE_TIMER_ARG_MASK);
        self.timers
            .get_timer(super::kn10::device_timer_expired, tagged, usec)
    }

    pub fn set_interval(&mut self, handle: TimerHandle, usec: u64) -> Result<(), TimerError> {
        self.timers.set_interval(handle, usec)
    }

    pub fn quiesce(&mut self, handle: TimerHandle) -> Result<(), TimerError> {
        self.timers.quiesce(handle)
    }

    pub fn activate(&mut self, handle: TimerHandle) -> Result<(), TimerError> {
        self.timers.activate(handle)
    }

    pub fn kill(&mut self, handle: TimerHandle) -> Result<(), TimerError> {
        self.timers.kill(handle)
    }
}

/// Split a device timer argument into the device and the device's own
/// argument.
pub(crate) fn split_timer_arg(arg: u64) -> (DeviceId, u64) {
    (DeviceId((arg >> 48) as usize), arg & DEVICE_TIMER_ARG_MASK)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Attachment {
    Unibus {
        adapter: u8,
        range: RangeInclusive<u32>,
    },
    IoBus(DeviceCode),
}

struct Registration {
    device: Box<dyn Device>,
    request: InterruptRequest,
    attachment: Attachment,
}

#[derive(Debug, Clone)]
struct Adapter {
    number: u8,
    devices: Vec<DeviceId>,
    status: u32,
    high_channel: u8,
    low_channel: u8,
    page_map: [u32; 64],
    maintenance: u32,
}

impl Adapter {
    fn new(number: u8, high_channel: u8, low_channel: u8) -> Adapter {
        Adapter {
            number,
            devices: Vec::new(),
            status: 0,
            high_channel,
            low_channel,
            page_map: [0; 64],
            maintenance: 0,
        }
    }
}

/// Where a Unibus address leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Device(DeviceId),
    PageMap(usize),
    Status,
    Maintenance,
    Nonexistent,
}

/// A device which is requesting the channel being serviced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptSource {
    Unibus { adapter: u8, device: DeviceId },
    IoBus { device: DeviceId },
}

/// What a write to an adapter status register asks of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusWriteEffect {
    None,
    InitializeAdapter,
}

pub struct Bus {
    devices: Vec<Registration>,
    adapters: Vec<Adapter>,
    iobus: BTreeMap<DeviceCode, DeviceId>,
    mask: u8,
}

impl Debug for Bus {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        let names: Vec<String> = self.devices.iter().map(|r| r.device.name()).collect();
        f.debug_struct("Bus")
            .field("devices", &names)
            .field("adapters", &self.adapters)
            .field("iobus", &self.iobus)
            .field("mask", &self.mask)
            .finish()
    }
}

/// Device codes the processor itself answers to.
const INTERNAL_DEVICES: [DeviceCode; 5] = [
    DeviceCode::APR,
    DeviceCode::PI,
    DeviceCode::PAG,
    DeviceCode::TIM,
    DeviceCode::MTR,
];

impl Bus {
    pub fn new(high_channel: u8, low_channel: u8) -> Bus {
        Bus {
            devices: Vec::new(),
            adapters: (1..=ADAPTERS)
                .map(|n| Adapter::new(n, high_channel, low_channel))
                .collect(),
            iobus: BTreeMap::new(),
            mask: 0,
        }
    }

    fn adapter(&self, number: u8) -> Option<&Adapter> {
        self.adapters.iter().find(|a| a.number == number)
    }

    fn adapter_mut(&mut self, number: u8) -> Option<&mut Adapter> {
        self.adapters.iter_mut().find(|a| a.number == number)
    }

    fn range_of(&self, id: DeviceId) -> Option<&RangeInclusive<u32>> {
        match &self.devices.get(id.0)?.attachment {
            Attachment::Unibus { range, .. } => Some(range),
            Attachment::IoBus(_) => None,
        }
    }

    pub fn register_unibus(
        &mut self,
        device: Box<dyn Device>,
        range: RangeInclusive<u32>,
        adapter: u8,
    ) -> Result<DeviceId, BusError> {
        if range.is_empty() {
            return Err(BusError::EmptyRange {
                adapter,
                requested: range,
            });
        }
        let a = self
            .adapter(adapter)
            .ok_or(BusError::NoSuchAdapter(adapter))?;
        if a.devices.len() >= MAX_DEVICES_PER_ADAPTER {
            return Err(BusError::TooManyDevices { adapter });
        }
        for existing in a.devices.iter() {
            if let Some(r) = self.range_of(*existing) {
                if r.start() <= range.end() && range.start() <= r.end() {
                    return Err(BusError::Overlap {
                        adapter,
                        requested: range,
                        existing: self.devices[existing.0].device.name(),
                    });
                }
            }
        }
        let id = DeviceId(self.devices.len());
        event!(
            Level::INFO,
            "attaching {} to adapter {} at {:06o}-{:06o}",
            device.name(),
            adapter,
            range.start(),
            range.end()
        );
        self.devices.push(Registration {
            device,
            request: InterruptRequest::None,
            attachment: Attachment::Unibus { adapter, range },
        });
        if let Some(a) = self.adapter_mut(adapter) {
            a.devices.push(id);
        }
        Ok(id)
    }

    pub fn register_iobus(
        &mut self,
        device: Box<dyn Device>,
        code: DeviceCode,
    ) -> Result<DeviceId, BusError> {
        let reserved = INTERNAL_DEVICES.contains(&code)
            || code.opcode() == opcodes::RDIO
            || code.opcode() == opcodes::WRIO;
        if reserved || self.iobus.contains_key(&code) {
            return Err(BusError::DeviceCodeInUse(code));
        }
        let id = DeviceId(self.devices.len());
        event!(
            Level::INFO,
            "attaching {} to the I/O bus as device {}",
            device.name(),
            code
        );
        self.devices.push(Registration {
            device,
            request: InterruptRequest::None,
            attachment: Attachment::IoBus(code),
        });
        self.iobus.insert(code, id);
        Ok(id)
    }

    pub fn iobus_device(&self, code: DeviceCode) -> Option<DeviceId> {
        self.iobus.get(&code).copied()
    }

    pub fn device_ids(&self) -> impl Iterator<Item = DeviceId> {
        (0..self.devices.len()).map(DeviceId)
    }

    pub fn adapter_devices(&self, adapter: u8) -> Vec<DeviceId> {
        self.adapter(adapter)
            .map(|a| a.devices.clone())
            .unwrap_or_default()
    }

    /// The device and its request slot, for building a
    /// [`DeviceContext`].
    pub(crate) fn parts(
        &mut self,
        id: DeviceId,
    ) -> Option<(&mut dyn Device, &mut InterruptRequest)> {
        let r = self.devices.get_mut(id.0)?;
        Some((r.device.as_mut(), &mut r.request))
    }

    pub fn request_of(&self, id: DeviceId) -> InterruptRequest {
        self.devices
            .get(id.0)
            .map(|r| r.request)
            .unwrap_or_default()
    }

    pub fn route(&self, adapter: u8, address: u32) -> Route {
        let Some(a) = self.adapter(adapter) else {
            return Route::Nonexistent;
        };
        for id in a.devices.iter() {
            if let Some(range) = self.range_of(*id) {
                if range.contains(&address) {
                    return Route::Device(*id);
                }
            }
        }
        match address {
            PAGE_MAP_FIRST..=PAGE_MAP_LAST => Route::PageMap((address - PAGE_MAP_FIRST) as usize),
            STATUS_REGISTER => Route::Status,
            MAINTENANCE_REGISTER => Route::Maintenance,
            _ => Route::Nonexistent,
        }
    }

    /// The PI channel mask which `request` asks for, given the
    /// attachment of the device which made it.
    fn channels_for(&self, attachment: &Attachment, request: InterruptRequest) -> u8 {
        match (request, attachment) {
            (InterruptRequest::None, _) => 0,
            (InterruptRequest::Channels(mask), _) => mask,
            (InterruptRequest::High, Attachment::Unibus { adapter, .. }) => self
                .adapter(*adapter)
                .map(|a| channel_bit(a.high_channel))
                .unwrap_or(0),
            (InterruptRequest::Low, Attachment::Unibus { adapter, .. }) => self
                .adapter(*adapter)
                .map(|a| channel_bit(a.low_channel))
                .unwrap_or(0),
            // High/low priority means nothing off the Unibus.
            (InterruptRequest::High | InterruptRequest::Low, Attachment::IoBus(_)) => 0,
        }
    }

    /// Recompute the aggregate request mask.  Returns the new mask if
    /// it changed.
    pub fn recompute_mask(&mut self) -> Option<u8> {
        let mask = self
            .devices
            .iter()
            .map(|r| self.channels_for(&r.attachment, r.request))
            .fold(0, |acc, m| acc | m)
            & 0o177;
        if mask != self.mask {
            self.mask = mask;
            Some(mask)
        } else {
            None
        }
    }

    pub fn request_mask(&self) -> u8 {
        self.mask
    }

    /// The first device (in priority order) requesting `channel`.
    pub fn interrupt_source(&self, channel: u8) -> Option<InterruptSource> {
        let bit = channel_bit(channel);
        for a in self.adapters.iter() {
            for id in a.devices.iter() {
                let r = &self.devices[id.0];
                if self.channels_for(&r.attachment, r.request) & bit != 0 {
                    return Some(InterruptSource::Unibus {
                        adapter: a.number,
                        device: *id,
                    });
                }
            }
        }
        self.devices
            .iter()
            .enumerate()
            .filter(|(_, r)| matches!(r.attachment, Attachment::IoBus(_)))
            .find(|(_, r)| self.channels_for(&r.attachment, r.request) & bit != 0)
            .map(|(i, _)| InterruptSource::IoBus {
                device: DeviceId(i),
            })
    }

    /// Note that nothing answered at `address` on `adapter`.
    pub fn non_existent_device(&mut self, adapter: u8) {
        if let Some(a) = self.adapter_mut(adapter) {
            a.status |= STATUS_NXD;
        }
    }

    pub fn read_status(&self, adapter: u8) -> u32 {
        let Some(a) = self.adapter(adapter) else {
            return 0;
        };
        let mut status = a.status | (u32::from(a.high_channel) << 3) | u32::from(a.low_channel);
        for id in a.devices.iter() {
            match self.devices[id.0].request {
                InterruptRequest::High => status |= STATUS_HI,
                InterruptRequest::Low => status |= STATUS_LO,
                InterruptRequest::None | InterruptRequest::Channels(_) => (),
            }
        }
        status
    }

    pub fn write_status(&mut self, adapter: u8, value: u32) -> StatusWriteEffect {
        let Some(a) = self.adapter_mut(adapter) else {
            return StatusWriteEffect::None;
        };
        a.status &= !(value & STATUS_STICKY);
        a.high_channel = ((value >> 3) & 7) as u8;
        a.low_channel = (value & 7) as u8;
        if value & STATUS_INI != 0 {
            StatusWriteEffect::InitializeAdapter
        } else {
            StatusWriteEffect::None
        }
    }

    pub fn read_page_map(&self, adapter: u8, index: usize) -> u32 {
        self.adapter(adapter)
            .and_then(|a| a.page_map.get(index).copied())
            .unwrap_or(0)
    }

    pub fn write_page_map(&mut self, adapter: u8, index: usize, value: u32) {
        if let Some(slot) = self
            .adapter_mut(adapter)
            .and_then(|a| a.page_map.get_mut(index))
        {
            *slot = value & HALF_MASK;
        }
    }

    pub fn read_maintenance(&self, adapter: u8) -> u32 {
        self.adapter(adapter).map(|a| a.maintenance).unwrap_or(0)
    }

    pub fn write_maintenance(&mut self, adapter: u8, value: u32) {
        if let Some(a) = self.adapter_mut(adapter) {
            a.maintenance = value & UNIBUS_DATA_MASK;
        }
    }

    /// Forget every device's request (part of a bus reset).
    pub fn clear_requests(&mut self, adapter: Option<u8>) {
        for r in self.devices.iter_mut() {
            let affected = match (&r.attachment, adapter) {
                (_, None) => true,
                (Attachment::Unibus { adapter: a, .. }, Some(n)) => *a == n,
                (Attachment::IoBus(_), Some(_)) => false,
            };
            if affected {
                r.request = InterruptRequest::None;
            }
        }
    }
}

/// Mask a value for a Unibus data transfer.
pub fn unibus_data(value: u32) -> u32 {
    value & UNIBUS_DATA_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Dummy(&'static str);

    impl Device for Dummy {
        fn name(&self) -> String {
            self.0.to_string()
        }
    }

    fn dummy(name: &'static str) -> Box<dyn Device> {
        Box::new(Dummy(name))
    }

    fn set_request(bus: &mut Bus, id: DeviceId, request: InterruptRequest) {
        bus.devices[id.0].request = request;
    }

    #[test]
    fn overlap_on_same_adapter_is_rejected() {
        let mut bus = Bus::new(6, 7);
        bus.register_unibus(dummy("rh11"), 0o776_700..=0o776_776, 1)
            .expect("first registration succeeds");
        let e = bus
            .register_unibus(dummy("dz11"), 0o776_770..=0o777_000, 1)
            .expect_err("overlap must be rejected");
        assert!(matches!(e, BusError::Overlap { adapter: 1, .. }));
        assert!(e.to_string().contains("rh11"));
        // The same range on another adapter is fine.
        bus.register_unibus(dummy("dz11"), 0o776_770..=0o777_000, 3)
            .expect("different adapters are independent");
        // So is an adjacent, non-overlapping range.
        bus.register_unibus(dummy("lp20"), 0o775_400..=0o776_677, 1)
            .expect("adjacent ranges do not overlap");
    }

    #[test]
    fn registration_errors() {
        let mut bus = Bus::new(6, 7);
        assert_eq!(
            bus.register_unibus(dummy("x"), 0..=1, 5).err(),
            Some(BusError::NoSuchAdapter(5))
        );
        for i in 0..MAX_DEVICES_PER_ADAPTER as u32 {
            bus.register_unibus(dummy("x"), (i * 2)..=(i * 2 + 1), 2)
                .expect("room on the adapter");
        }
        assert_eq!(
            bus.register_unibus(dummy("x"), 0o1000..=0o1001, 2).err(),
            Some(BusError::TooManyDevices { adapter: 2 })
        );
    }

    #[test]
    fn internal_and_duplicate_device_codes_are_rejected() {
        let mut bus = Bus::new(6, 7);
        for code in [0o000, 0o004, 0o010, 0o020, 0o024, 0o120, 0o134] {
            let code = DeviceCode::from_written(code);
            assert_eq!(
                bus.register_iobus(dummy("x"), code).err(),
                Some(BusError::DeviceCodeInUse(code))
            );
        }
        let code = DeviceCode::from_written(0o200);
        let id = bus.register_iobus(dummy("dtc"), code).expect("free code");
        assert_eq!(bus.iobus_device(code), Some(id));
        assert_eq!(
            bus.register_iobus(dummy("x"), code).err(),
            Some(BusError::DeviceCodeInUse(code))
        );
    }

    #[test]
    fn routing() {
        let mut bus = Bus::new(6, 7);
        let id = bus
            .register_unibus(dummy("dz11"), 0o760_010..=0o760_017, 3)
            .expect("no overlap");
        assert_eq!(bus.route(3, 0o760_012), Route::Device(id));
        assert_eq!(bus.route(1, 0o760_012), Route::Nonexistent);
        assert_eq!(bus.route(3, 0o763_005), Route::PageMap(5));
        assert_eq!(bus.route(3, STATUS_REGISTER), Route::Status);
        assert_eq!(bus.route(3, MAINTENANCE_REGISTER), Route::Maintenance);
        assert_eq!(bus.route(7, STATUS_REGISTER), Route::Nonexistent);
    }

    #[test]
    fn request_mask_follows_adapter_channels() {
        let mut bus = Bus::new(6, 7);
        let hi = bus
            .register_unibus(dummy("hi"), 0o100..=0o101, 1)
            .expect("no overlap");
        let lo = bus
            .register_unibus(dummy("lo"), 0o200..=0o201, 1)
            .expect("no overlap");
        assert_eq!(bus.recompute_mask(), None);
        set_request(&mut bus, hi, InterruptRequest::High);
        assert_eq!(bus.recompute_mask(), Some(channel_bit(6)));
        assert_eq!(bus.recompute_mask(), None);
        set_request(&mut bus, lo, InterruptRequest::Low);
        assert_eq!(
            bus.recompute_mask(),
            Some(channel_bit(6) | channel_bit(7))
        );
        let status = bus.read_status(1);
        assert_eq!(status & (STATUS_HI | STATUS_LO), STATUS_HI | STATUS_LO);
        assert_eq!(status & 0o77, 0o67);
        // The guest moves the adapter to channels 2 and 3.
        assert_eq!(bus.write_status(1, 0o23), StatusWriteEffect::None);
        assert_eq!(
            bus.recompute_mask(),
            Some(channel_bit(2) | channel_bit(3))
        );
    }

    #[test]
    fn interrupt_source_order() {
        let mut bus = Bus::new(3, 7);
        let io = bus
            .register_iobus(dummy("io"), DeviceCode::from_written(0o200))
            .expect("free code");
        let late = bus
            .register_unibus(dummy("late"), 0o300..=0o301, 2)
            .expect("no overlap");
        let early = bus
            .register_unibus(dummy("early"), 0o100..=0o101, 1)
            .expect("no overlap");
        set_request(&mut bus, io, InterruptRequest::Channels(channel_bit(3)));
        set_request(&mut bus, late, InterruptRequest::High);
        assert_eq!(
            bus.interrupt_source(3),
            Some(InterruptSource::Unibus {
                adapter: 2,
                device: late
            })
        );
        set_request(&mut bus, early, InterruptRequest::High);
        assert_eq!(
            bus.interrupt_source(3),
            Some(InterruptSource::Unibus {
                adapter: 1,
                device: early
            })
        );
        set_request(&mut bus, early, InterruptRequest::None);
        set_request(&mut bus, late, InterruptRequest::None);
        assert_eq!(
            bus.interrupt_source(3),
            Some(InterruptSource::IoBus { device: io })
        );
        assert_eq!(bus.interrupt_source(4), None);
    }

    #[test]
    fn status_error_bits_are_write_one_to_clear() {
        let mut bus = Bus::new(6, 7);
        bus.non_existent_device(1);
        assert_ne!(bus.read_status(1) & STATUS_NXD, 0);
        bus.write_status(1, 0o67);
        assert_ne!(bus.read_status(1) & STATUS_NXD, 0);
        assert_eq!(
            bus.write_status(1, STATUS_NXD | STATUS_INI | 0o67),
            StatusWriteEffect::InitializeAdapter
        );
        assert_eq!(bus.read_status(1), 0o67);
    }

    #[test]
    fn device_timer_arguments_carry_the_device() {
        let arg = (5_u64 << 48) | 0o1234;
        assert_eq!(split_timer_arg(arg), (DeviceId(5), 0o1234));
    }
}
