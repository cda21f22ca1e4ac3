use test_strategy::{proptest, Arbitrary};

use super::{TimerAction, TimerError, TimerHandle, TimerKind, TimerScheduler, TimerState};

/// A stand-in for the emulator which owns a scheduler and records
/// which callouts ran, and when.
#[derive(Debug)]
struct Recorder {
    timers: TimerScheduler<Recorder>,
    now: u64,
    fired: Vec<(u64, u64)>,
    victim: Option<TimerHandle>,
}

impl Recorder {
    fn new(capacity: usize, usec_per_tick: u64, subticks_per_interval: u64) -> Recorder {
        Recorder {
            timers: TimerScheduler::new(capacity, usec_per_tick, subticks_per_interval)
                .expect("valid scheduler parameters"),
            now: 0,
            fired: Vec::new(),
            victim: None,
        }
    }

    fn advance(&mut self, n: u64) {
        for _ in 0..n {
            self.now += 1;
            TimerScheduler::advance(self, timers_of);
        }
    }

    fn fire_times(&self, arg: u64) -> Vec<u64> {
        self.fired
            .iter()
            .filter(|(_, a)| *a == arg)
            .map(|(t, _)| *t)
            .collect()
    }
}

fn timers_of(r: &mut Recorder) -> &mut TimerScheduler<Recorder> {
    &mut r.timers
}

fn record_and_kill(r: &mut Recorder, arg: u64) -> TimerAction {
    r.fired.push((r.now, arg));
    TimerAction::Kill
}

fn record_and_repeat(r: &mut Recorder, arg: u64) -> TimerAction {
    r.fired.push((r.now, arg));
    TimerAction::Repeat
}

fn record_and_quiesce(r: &mut Recorder, arg: u64) -> TimerAction {
    r.fired.push((r.now, arg));
    TimerAction::Quiesce
}

fn kill_the_victim(r: &mut Recorder, arg: u64) -> TimerAction {
    r.fired.push((r.now, arg));
    if let Some(victim) = r.victim.take() {
        r.timers.kill(victim).expect("victim should be live");
    }
    TimerAction::Kill
}

fn check(r: &Recorder) {
    if let Err(e) = r.timers.check_invariants() {
        panic!("invariant violated: {e}");
    }
}

#[test]
fn thousand_microseconds_fire_after_exactly_thousand_ticks() {
    // Long enough to go on the multi-tick queue.
    let mut r = Recorder::new(8, 1, 100);
    r.timers
        .get_timer(record_and_kill, 1, 1000)
        .expect("pool has room");
    r.advance(999);
    assert!(r.fired.is_empty(), "timer fired early: {:?}", r.fired);
    r.advance(1);
    assert_eq!(r.fire_times(1), vec![1000]);
    check(&r);
}

#[test]
fn thousand_microseconds_on_the_sub_tick_queue() {
    let mut r = Recorder::new(8, 1, 10_000);
    r.timers
        .get_timer(record_and_kill, 1, 1000)
        .expect("pool has room");
    assert_eq!(r.timers.statistics().sub_tick, 1);
    r.advance(999);
    assert!(r.fired.is_empty());
    r.advance(1);
    assert_eq!(r.fire_times(1), vec![1000]);
}

#[test]
fn countdown_fires_exactly_once() {
    let mut r = Recorder::new(4, 10, 50);
    // 95us rounds up to 10 ticks.
    let h = r
        .timers
        .get_timer(record_and_kill, 7, 95)
        .expect("pool has room");
    r.advance(10);
    assert_eq!(r.fire_times(7), vec![10]);
    r.advance(500);
    assert_eq!(r.fire_times(7), vec![10]);
    assert!(!r.timers.is_live(h));
    assert_eq!(r.timers.statistics().free, 4);
    check(&r);
}

#[test]
fn mid_interval_request_fires_on_time() {
    let mut r = Recorder::new(4, 1, 100);
    r.advance(37);
    r.timers
        .get_timer(record_and_kill, 2, 250)
        .expect("pool has room");
    assert_eq!(r.timers.statistics().multi_tick, 1);
    r.advance(250 - 1);
    assert!(r.fired.is_empty(), "timer fired early: {:?}", r.fired);
    r.advance(1);
    assert_eq!(r.fire_times(2), vec![37 + 250]);
    r.advance(300);
    assert_eq!(r.fire_times(2), vec![37 + 250]);
    check(&r);
}

#[test]
fn repeating_multi_tick_timer_keeps_its_period() {
    let mut r = Recorder::new(4, 1, 100);
    r.advance(13);
    r.timers
        .get_timer(record_and_repeat, 8, 150)
        .expect("pool has room");
    r.advance(460);
    assert_eq!(r.fire_times(8), vec![163, 313, 463]);
    check(&r);
}

#[proptest]
fn countdown_fires_exactly_on_its_tick(
    #[strategy(0_u64..300)] start: u64,
    #[strategy(1_u64..1000)] ticks: u64,
) {
    let mut r = Recorder::new(2, 1, 64);
    r.advance(start);
    r.timers
        .get_timer(record_and_kill, 1, ticks)
        .expect("pool has room");
    r.advance(ticks - 1);
    proptest::prop_assert!(r.fired.is_empty(), "fired early: {:?}", r.fired);
    r.advance(1);
    proptest::prop_assert_eq!(r.fire_times(1), vec![start + ticks]);
    proptest::prop_assert!(r.timers.check_invariants().is_ok());
}

#[test]
fn repeating_timer() {
    let mut r = Recorder::new(4, 1, 1000);
    r.timers
        .get_timer(record_and_repeat, 3, 5)
        .expect("pool has room");
    r.advance(21);
    assert_eq!(r.fire_times(3), vec![5, 10, 15, 20]);
    check(&r);
}

#[test]
fn quiesce_and_activate_restart_from_full_interval() {
    let mut r = Recorder::new(4, 1, 1000);
    let h = r
        .timers
        .get_timer(record_and_quiesce, 4, 10)
        .expect("pool has room");
    r.advance(6);
    r.timers.quiesce(h).expect("live handle");
    assert_eq!(
        r.timers.state(h),
        Ok(TimerState::Quiescent(TimerKind::Countdown))
    );
    r.advance(100);
    assert!(r.fired.is_empty());
    r.timers.activate(h).expect("live handle");
    r.advance(9);
    assert!(r.fired.is_empty());
    r.advance(1);
    assert_eq!(r.fire_times(4), vec![116]);
    // The callout asked for the entry to be quiesced.
    assert_eq!(
        r.timers.state(h),
        Ok(TimerState::Quiescent(TimerKind::Countdown))
    );
    check(&r);
}

#[test]
fn pool_exhaustion_is_reported() {
    let mut r = Recorder::new(2, 1, 10);
    r.timers
        .get_timer(record_and_kill, 0, 5)
        .expect("pool has room");
    r.timers
        .get_interval_timer(record_and_kill, 0)
        .expect("pool has room");
    assert_eq!(
        r.timers.get_timer(record_and_kill, 0, 5),
        Err(TimerError::PoolExhausted { capacity: 2 })
    );
    check(&r);
}

#[test]
fn killed_handles_are_stale() {
    let mut r = Recorder::new(1, 1, 10);
    let h = r
        .timers
        .get_timer(record_and_kill, 0, 5)
        .expect("pool has room");
    r.timers.kill(h).expect("live handle");
    assert_eq!(r.timers.kill(h), Err(TimerError::StaleHandle(h)));
    // The entry is reused, but the old handle still does not work.
    let h2 = r
        .timers
        .get_timer(record_and_kill, 0, 5)
        .expect("pool has room");
    assert_ne!(h, h2);
    assert_eq!(r.timers.activate(h), Err(TimerError::StaleHandle(h)));
    assert!(r.timers.is_live(h2));
}

#[test]
fn interval_timers_run_every_interval() {
    let mut r = Recorder::new(2, 1, 10);
    let h = r
        .timers
        .get_interval_timer(record_and_kill, 9)
        .expect("pool has room");
    r.advance(35);
    // The return value of an every-interval callout is ignored.
    assert_eq!(r.fire_times(9), vec![10, 20, 30]);
    assert!(matches!(
        r.timers.set_interval(h, 100),
        Err(TimerError::WrongState { .. })
    ));
    r.timers.quiesce(h).expect("live handle");
    r.advance(20);
    assert_eq!(r.fire_times(9).len(), 3);
    r.timers.activate(h).expect("live handle");
    r.advance(20);
    assert_eq!(r.fire_times(9).len(), 5);
}

#[test]
fn set_interval_reschedules_active_timer() {
    let mut r = Recorder::new(2, 1, 1000);
    let h = r
        .timers
        .get_timer(record_and_kill, 5, 100)
        .expect("pool has room");
    r.advance(10);
    r.timers.set_interval(h, 20).expect("live handle");
    r.advance(19);
    assert!(r.fired.is_empty());
    r.advance(1);
    assert_eq!(r.fire_times(5), vec![30]);
}

#[test]
fn changing_tick_length_preserves_remaining_time() {
    let mut r = Recorder::new(4, 2, 1000);
    // 200us at 2us/tick is 100 ticks.
    r.timers
        .get_timer(record_and_kill, 6, 200)
        .expect("pool has room");
    r.advance(50);
    // 100us remain; at 1us/tick that is 100 more ticks.
    r.timers.set_usec_per_tick(1).expect("non-zero tick length");
    check(&r);
    r.advance(99);
    assert!(r.fired.is_empty());
    r.advance(1);
    assert_eq!(r.fire_times(6), vec![150]);
    assert_eq!(r.timers.set_usec_per_tick(0), Err(TimerError::ZeroTickLength));
}

#[test]
fn callout_may_kill_another_timer_due_at_the_same_time() {
    let mut r = Recorder::new(4, 1, 1000);
    r.timers
        .get_timer(kill_the_victim, 1, 5)
        .expect("pool has room");
    let victim = r
        .timers
        .get_timer(record_and_kill, 2, 5)
        .expect("pool has room");
    r.victim = Some(victim);
    r.advance(5);
    assert_eq!(r.fire_times(1), vec![5]);
    assert!(r.fire_times(2).is_empty());
    assert_eq!(r.timers.statistics().free, 4);
    check(&r);
}

#[derive(Debug, Clone, Arbitrary)]
enum Op {
    Get(#[strategy(1_u64..3000)] u64),
    GetRepeating(#[strategy(1_u64..3000)] u64),
    GetInterval,
    Activate(#[strategy(0_usize..8)] usize),
    Quiesce(#[strategy(0_usize..8)] usize),
    Kill(#[strategy(0_usize..8)] usize),
    SetInterval(#[strategy(0_usize..8)] usize, #[strategy(1_u64..3000)] u64),
    Advance(#[strategy(1_u64..400)] u64),
    SetTickLength(#[strategy(1_u64..4)] u64),
}

fn pick(handles: &[TimerHandle], i: usize) -> Option<TimerHandle> {
    handles.get(i % handles.len().max(1)).copied()
}

#[proptest]
fn every_entry_is_always_in_exactly_one_pool(
    #[strategy(proptest::collection::vec(proptest::prelude::any::<Op>(), 0..60))] ops: Vec<Op>,
) {
    let mut r = Recorder::new(6, 1, 50);
    let mut handles: Vec<TimerHandle> = Vec::new();
    for op in ops {
        let desc = format!("{op:?}");
        match op {
            Op::Get(usec) => {
                if let Ok(h) = r.timers.get_timer(record_and_kill, 0, usec) {
                    handles.push(h);
                }
            }
            Op::GetRepeating(usec) => {
                if let Ok(h) = r.timers.get_timer(record_and_repeat, 0, usec) {
                    handles.push(h);
                }
            }
            Op::GetInterval => {
                if let Ok(h) = r.timers.get_interval_timer(record_and_kill, 0) {
                    handles.push(h);
                }
            }
            // Errors (stale handles, wrong states) are expected here;
            // what matters is that the pools stay consistent.
            Op::Activate(i) => {
                if let Some(h) = pick(&handles, i) {
                    let _ = r.timers.activate(h);
                }
            }
            Op::Quiesce(i) => {
                if let Some(h) = pick(&handles, i) {
                    let _ = r.timers.quiesce(h);
                }
            }
            Op::Kill(i) => {
                if let Some(h) = pick(&handles, i) {
                    let _ = r.timers.kill(h);
                }
            }
            Op::SetInterval(i, usec) => {
                if let Some(h) = pick(&handles, i) {
                    let _ = r.timers.set_interval(h, usec);
                }
            }
            Op::Advance(n) => r.advance(n),
            Op::SetTickLength(n) => {
                let _ = r.timers.set_usec_per_tick(n);
            }
        }
        let outcome = r.timers.check_invariants();
        proptest::prop_assert!(outcome.is_ok(), "after {}: {:?}", desc, outcome);
    }
}
