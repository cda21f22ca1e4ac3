use std::time::Duration;

use base::prelude::*;

use crate::abort::{Abort, Bugcheck};
use crate::apr::AprFlag;
use crate::bus::{Device, DeviceContext, InterruptRequest};
use crate::config::{MachineConfiguration, TickModel, Variant};
use crate::host::{Attention, HostError, HostSupport, Ticker};
use crate::pi::channel_bit;
use crate::run::StopReason;
use crate::testing::{config, get, machine, op, program, put};
use crate::timer::TimerScheduler;

use super::{timers_of, Kn10};

/// CONO PI: turn on the selected levels and the PI system.
const PI_LEVELS_ON: u32 = 0o002_200;

/// An I/O bus device which keeps requesting until it is told to stop.
#[derive(Debug, Default)]
struct Doorbell;

impl Device for Doorbell {
    fn name(&self) -> String {
        "doorbell".to_string()
    }

    fn interrupt_vector(&mut self, _ctx: &mut DeviceContext<'_>) -> u32 {
        0
    }
}

/// A Unibus device with an interrupt vector.
#[derive(Debug)]
struct Vectored {
    vector: u32,
}

impl Device for Vectored {
    fn name(&self) -> String {
        "vectored".to_string()
    }

    fn interrupt_vector(&mut self, ctx: &mut DeviceContext<'_>) -> u32 {
        ctx.withdraw();
        self.vector
    }
}

#[derive(Debug, Default)]
struct FakeHost {
    period: Option<Duration>,
}

impl HostSupport for FakeHost {
    fn now(&self) -> Duration {
        Duration::ZERO
    }

    fn start_interval_timer(&mut self, period: Duration, _ticker: Ticker) -> Result<(), HostError> {
        self.period = Some(period);
        Ok(())
    }

    fn idle_until_event(&mut self, _attention: &Attention, _max_wait: Duration) {}
}

fn host_interrupt_machine() -> Kn10 {
    Kn10::new(MachineConfiguration {
        tick_model: TickModel::HostInterrupt,
        usec_per_tick: 10,
        ..config(Variant::Flat)
    })
    .expect("test configuration should be valid")
}

#[test]
fn bad_configuration_is_rejected() {
    let result = Kn10::new(MachineConfiguration {
        subticks_per_interval: 0,
        ..config(Variant::Flat)
    });
    assert!(result.is_err());
}

#[test]
fn device_request_is_delivered_once() {
    let mut kn = machine(Variant::Flat);
    let id = kn
        .attach_iobus_device(Box::<Doorbell>::default(), DeviceCode::from_written(0o740))
        .expect("attach should succeed");
    kn.pi.cono(PI_LEVELS_ON | u32::from(channel_bit(3)));
    put(&mut kn, 0o46, op(opcodes::JSR, 0, 0o1000));
    kn.set_pc(VirtualAddress::new(0, 0o2000));

    kn.with_device(id, |_, ctx| ctx.request_channels(channel_bit(3)));
    assert!(kn.attention.is_raised());
    assert_eq!(kn.pi_status().device_requests, channel_bit(3));

    kn.sync().expect("interrupt should be delivered");
    assert_eq!(kn.pc(), VirtualAddress::new(0, 0o1001));
    assert_eq!(get(&kn, 0o1000), Word::from_halves(0, 0o2000));
    assert_eq!(kn.pi_status().in_progress, channel_bit(3));

    // The device is still requesting, but its channel is in progress.
    kn.attention().raise();
    kn.sync().expect("nothing to deliver");
    assert_eq!(kn.pc(), VirtualAddress::new(0, 0o1001));
    assert_eq!(get(&kn, 0o1000), Word::from_halves(0, 0o2000));
    assert_eq!(kn.bus.request_of(id), InterruptRequest::Channels(channel_bit(3)));
}

#[test]
fn unibus_vector_selects_the_adapter_table_entry() {
    let mut kn = machine(Variant::Flat);
    let id = kn
        .attach_unibus_device(Box::new(Vectored { vector: 0o120 }), 0o772_000..=0o772_017, 3)
        .expect("attach should succeed");
    // Adapter 3's vector table starts at 600.
    put(&mut kn, 0o103, Word::from_halves(0, 0o600));
    put(&mut kn, 0o624, op(opcodes::JSR, 0, 0o1000));
    kn.pi.cono(PI_LEVELS_ON | u32::from(channel_bit(6)));
    kn.set_pc(VirtualAddress::new(0, 0o2000));

    kn.with_device(id, |_, ctx| ctx.request_high());
    kn.sync().expect("interrupt should be delivered");

    assert_eq!(kn.pc(), VirtualAddress::new(0, 0o1001));
    assert_eq!(kn.pi_status().in_progress, channel_bit(6));
    assert_eq!(kn.bus.request_of(id), InterruptRequest::None);
    assert_eq!(kn.pi_status().device_requests, 0);
}

#[test]
fn interval_timer_expires_after_exactly_its_period() {
    let mut kn = machine(Variant::Flat);
    kn.clock.cono_mtr(3);
    // Enabled, period 100 units of 10 microseconds.
    kn.cono_tim(0o040_000 | 100)
        .expect("timer should be programmed");

    for _ in 0..999 {
        TimerScheduler::advance(&mut kn, timers_of);
    }
    assert_eq!(kn.clock.coni_tim().rh() & 0o020_000, 0);
    assert_eq!(kn.pi_status().device_requests, 0);

    TimerScheduler::advance(&mut kn, timers_of);
    assert_ne!(kn.clock.coni_tim().rh() & 0o020_000, 0);
    assert_eq!(kn.pi_status().device_requests, channel_bit(3));
}

#[test]
fn clearing_timer_done_keeps_the_period() {
    let mut kn = machine(Variant::Flat);
    kn.clock.cono_mtr(3);
    kn.cono_tim(0o040_000 | 100)
        .expect("timer should be programmed");
    for _ in 0..600 {
        TimerScheduler::advance(&mut kn, timers_of);
    }
    // The interrupt handler's usual CONO: clear done, leave the
    // enable and period alone.
    kn.cono_tim(0o040_000 | 0o020_000 | 100)
        .expect("timer should be programmed");
    for _ in 0..399 {
        TimerScheduler::advance(&mut kn, timers_of);
    }
    assert_eq!(kn.clock.coni_tim().rh() & 0o020_000, 0);
    TimerScheduler::advance(&mut kn, timers_of);
    assert_ne!(kn.clock.coni_tim().rh() & 0o020_000, 0);
    assert_eq!(kn.pi_status().device_requests, channel_bit(3));
}

#[test]
fn changing_the_timer_period_restarts_it() {
    let mut kn = machine(Variant::Flat);
    kn.cono_tim(0o040_000 | 100)
        .expect("timer should be programmed");
    for _ in 0..600 {
        TimerScheduler::advance(&mut kn, timers_of);
    }
    kn.cono_tim(0o040_000 | 50)
        .expect("timer should be programmed");
    for _ in 0..499 {
        TimerScheduler::advance(&mut kn, timers_of);
    }
    assert_eq!(kn.clock.coni_tim().rh() & 0o020_000, 0);
    TimerScheduler::advance(&mut kn, timers_of);
    assert_ne!(kn.clock.coni_tim().rh() & 0o020_000, 0);
}

#[test]
fn io_reset_stops_the_interval_timer() {
    let mut kn = machine(Variant::Flat);
    kn.clock.cono_mtr(3);
    kn.cono_tim(0o040_000 | 100)
        .expect("timer should be programmed");
    for _ in 0..600 {
        TimerScheduler::advance(&mut kn, timers_of);
    }
    // CONO APR with the I/O reset bit.
    kn.cono_apr(0o200_000);
    assert_eq!(kn.clock.coni_tim().rh(), 0);
    for _ in 0..2000 {
        TimerScheduler::advance(&mut kn, timers_of);
    }
    assert_eq!(kn.clock.coni_tim().rh(), 0);
    assert_eq!(kn.pi_status().device_requests, 0);
    assert_eq!(kn.timer_statistics().quiescent, 1);
}

#[test]
fn unchanged_device_requests_are_not_latched_again() {
    let mut kn = machine(Variant::Flat);
    let id = kn
        .attach_iobus_device(Box::<Doorbell>::default(), DeviceCode::from_written(0o740))
        .expect("attach should succeed");
    kn.with_device(id, |_, ctx| ctx.request_channels(channel_bit(3)));
    assert_eq!(kn.pi_status().device_requests, channel_bit(3));

    kn.pi.begin(3);
    kn.attention.clear();
    kn.pi_devupd();
    assert!(!kn.attention.is_raised());
    assert_eq!(kn.pi_status().device_requests, 0);

    kn.with_device(id, |_, ctx| ctx.request_channels(channel_bit(3) | channel_bit(5)));
    assert!(kn.attention.is_raised());
    assert_eq!(
        kn.pi_status().device_requests,
        channel_bit(3) | channel_bit(5)
    );
}

#[test]
fn apr_flag_changes_are_reported_once() {
    let mut kn = machine(Variant::Flat);
    // CONO APR: set NXM.
    kn.cono_apr(0o012_000);
    let changes = kn.drain_apr_changes();
    assert_eq!(changes.len(), 1);
    assert!(changes[&AprFlag::NonExistentMemory].set);
    assert!(kn.drain_apr_changes().is_empty());
}

#[test]
fn interval_timer_interrupts_a_running_program() {
    // A period shorter than one interval is timed exactly, whatever
    // the interval phase when the timer is started.
    let mut kn = Kn10::new(MachineConfiguration {
        subticks_per_interval: 2000,
        ..config(Variant::Flat)
    })
    .expect("test configuration should be valid");
    put(&mut kn, 0o46, op(opcodes::JSR, 0, 0o1000));
    put(&mut kn, 0o1001, op(opcodes::JRST, 4, 0o1001));
    program(
        &mut kn,
        0o2000,
        &[
            Instruction::io(DeviceCode::PI, IoFunction::Cono, false, 0, PI_LEVELS_ON | 0o020)
                .word(),
            Instruction::io(DeviceCode::MTR, IoFunction::Cono, false, 0, 3).word(),
            Instruction::io(DeviceCode::TIM, IoFunction::Cono, false, 0, 0o040_000 | 100)
                .word(),
            op(opcodes::JRST, 0, 0o2003),
        ],
    );

    assert_eq!(kn.run(None), Ok(StopReason::Halted));

    assert_eq!(get(&kn, 0o1000), Word::from_halves(0, 0o2003));
    let executed = kn.instructions_executed();
    assert!((1000..=1010).contains(&executed), "executed {executed}");
    assert!(kn.time_base_usec() >= 1000);
}

#[test]
fn indirection_is_abandoned_when_attention_is_raised() {
    let mut kn = machine(Variant::Flat);
    put(&mut kn, 0o100, Word::from_halves(0o20, 0o101));
    put(&mut kn, 0o101, Word::from(0o102));
    let inst = Instruction::from_fields(opcodes::MOVE, 1, true, 0, 0o100);

    kn.attention().raise();
    assert_eq!(kn.resolve(inst, 0), Err(Abort::Interrupted));
    // Vector instructions never stop part way.
    let ea = kn
        .resolve_without_polling(inst, 0)
        .expect("resolution should complete");
    assert_eq!(ea.address, VirtualAddress::new(0, 0o102));

    kn.attention.clear();
    let ea = kn.resolve(inst, 0).expect("resolution should complete");
    assert_eq!(ea.address, VirtualAddress::new(0, 0o102));
}

#[test]
fn breakpoint_stops_before_the_instruction_and_proceeds() {
    let mut kn = machine(Variant::Flat);
    program(
        &mut kn,
        0o2000,
        &[
            op(opcodes::MOVEI, 1, 1),
            op(opcodes::MOVEI, 2, 2),
            op(opcodes::MOVEI, 3, 3),
            op(opcodes::JRST, 4, 0o2003),
        ],
    );
    kn.set_breakpoint(VirtualAddress::new(0, 0o2002));

    assert_eq!(
        kn.run(None),
        Ok(StopReason::Breakpoint(VirtualAddress::new(0, 0o2002)))
    );
    assert_eq!(kn.ac(2), Word::from(2));
    assert_eq!(kn.ac(3), Word::ZERO);

    assert_eq!(kn.run(None), Ok(StopReason::Halted));
    assert_eq!(kn.ac(3), Word::from(3));
}

#[test]
fn single_step_stops_after_the_requested_count() {
    let mut kn = machine(Variant::Flat);
    program(
        &mut kn,
        0o2000,
        &[
            op(opcodes::MOVEI, 1, 1),
            op(opcodes::MOVEI, 2, 2),
            op(opcodes::MOVEI, 3, 3),
        ],
    );
    kn.set_single_step(Some(2));

    assert_eq!(kn.run(None), Ok(StopReason::StepLimit));
    assert_eq!(kn.pc(), VirtualAddress::new(0, 0o2002));
    assert_eq!(kn.ac(3), Word::ZERO);
}

#[test]
fn bugcheck_halts_the_machine() {
    let mut kn = machine(Variant::Flat);
    put(&mut kn, 0o46, op(opcodes::MOVEI, 1, 1));
    program(
        &mut kn,
        0o2000,
        &[
            Instruction::io(DeviceCode::PI, IoFunction::Cono, false, 0, 0o006_200 | 0o020)
                .word(),
            op(opcodes::JRST, 0, 0o2001),
        ],
    );

    let result = kn.run(None);

    assert!(matches!(
        result,
        Err(Bugcheck::IllegalVectorInstruction { .. })
    ));
    assert!(kn.is_halted());
}

#[test]
fn waiting_for_an_interrupt_is_reported_as_idle() {
    let mut kn = host_interrupt_machine();
    program(
        &mut kn,
        0o2000,
        &[
            Instruction::io(DeviceCode::PI, IoFunction::Cono, false, 0, PI_LEVELS_ON | 0o177)
                .word(),
            op(opcodes::JRST, 0, 0o2001),
        ],
    );
    assert_eq!(kn.run(None), Ok(StopReason::Idle));
    assert_eq!(kn.pc(), VirtualAddress::new(0, 0o2001));
}

#[test]
fn host_ticks_advance_the_time_base() {
    let mut kn = host_interrupt_machine();
    let ticker = kn.host_ticker();
    for _ in 0..5 {
        ticker.tick();
    }
    assert!(kn.needs_sync());
    kn.sync().expect("nothing to deliver");
    assert_eq!(kn.time_base_usec(), 50);
    assert!(!kn.needs_sync());
}

#[test]
fn host_clock_needs_the_host_interrupt_model() {
    let mut host = FakeHost::default();
    let counting = machine(Variant::Flat);
    assert!(matches!(
        counting.start_host_clock(&mut host),
        Err(HostError::WrongTickModel)
    ));

    let kn = host_interrupt_machine();
    kn.start_host_clock(&mut host)
        .expect("host clock should start");
    assert_eq!(host.period, Some(Duration::from_micros(10)));
}
