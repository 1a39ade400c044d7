//! Host-side stand-ins for the hardware and the kernel port, plus a
//! tick-driven simulation of the whole blinker on the real scheduler.

use std::cell::Cell;
use std::convert::Infallible;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::app::{Consumer, Message, Producer};
use crate::boot::{boot, BootError, BootMemory};
use crate::config::{
    BLINK_PERIOD, IDLE_STACK_WORDS, LED_INITIAL, LED_TOGGLE_MASK, RECEIVE_TIMEOUT,
    TASK_STACK_WORDS,
};
use crate::hal::{HardwarePort, PortError, PortSlot, PowerControl};
use crate::idle::{IdleHook, IdlePolicy};
use crate::kernel::{Rtos, TaskContext};
use crate::queue::{Item, QueueError, QueueHandle};
use crate::scheduler::{KernelError, Scheduler};
use crate::task::{StackWord, TaskHandle, TaskSpec, TaskState, Wait};
use crate::time::{CadencePolicy, Ticks, Timeout};

pub(crate) fn leak_stack(words: usize) -> &'static mut [StackWord] {
    Box::leak(vec![0; words].into_boxed_slice())
}

pub(crate) fn leak_bytes(len: usize) -> &'static mut [u8] {
    Box::leak(vec![0; len].into_boxed_slice())
}

/// Entry point for tasks that are never actually run on the host.
pub(crate) extern "C" fn parked(_: usize) -> ! {
    loop {
        std::thread::park();
    }
}

// ---------------------------------------------------------------------------
// Hardware
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PortCall {
    Watchdog,
    Clock,
    Direction(u8),
    Write(u8),
    Toggle(u8),
    Delay(u32),
}

/// Records every call; `writes` also remembers the tick of each pin write.
#[derive(Debug, Clone)]
pub(crate) struct MockPort {
    pub calls: Vec<PortCall>,
    pub writes: Vec<(Ticks, u8)>,
    pub pins: u8,
    pub now: Ticks,
    pub clock_result: Result<(), PortError>,
}

impl MockPort {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            writes: Vec::new(),
            pins: 0,
            now: 0,
            clock_result: Ok(()),
        }
    }

    /// Values written with `write_pins`, in order.
    pub fn written(&self) -> Vec<u8> {
        self.writes.iter().map(|&(_, v)| v).collect()
    }
}

impl HardwarePort for MockPort {
    fn configure_watchdog(&mut self) -> Result<(), PortError> {
        self.calls.push(PortCall::Watchdog);
        Ok(())
    }

    fn configure_clock(&mut self) -> Result<(), PortError> {
        self.calls.push(PortCall::Clock);
        self.clock_result
    }

    fn set_pin_direction(&mut self, mask: u8) {
        self.calls.push(PortCall::Direction(mask));
    }

    fn write_pins(&mut self, value: u8) {
        self.calls.push(PortCall::Write(value));
        self.writes.push((self.now, value));
        self.pins = value;
    }

    fn toggle_pins(&mut self, mask: u8) {
        self.calls.push(PortCall::Toggle(mask));
        self.pins ^= mask;
    }

    fn delay_cycles(&mut self, cycles: u32) {
        self.calls.push(PortCall::Delay(cycles));
    }
}

/// Counts sleeps instead of sleeping.
#[derive(Debug, Default)]
pub(crate) struct MockPower {
    sleeps: Cell<u32>,
}

impl MockPower {
    pub fn sleeps(&self) -> u32 {
        self.sleeps.get()
    }
}

impl PowerControl for MockPower {
    fn wait_for_interrupt(&self) {
        self.sleeps.set(self.sleeps.get() + 1);
    }
}

// ---------------------------------------------------------------------------
// Kernel
// ---------------------------------------------------------------------------

/// [`Rtos`] over a private [`Scheduler`]. Starting prepares the scheduler
/// exactly as the real kernel does, then reports that control came back.
pub(crate) struct RecordingRtos {
    pub scheduler: Scheduler,
    pub starts: usize,
    pub idle_memory: bool,
}

impl RecordingRtos {
    pub fn new() -> Self {
        Self {
            scheduler: Scheduler::new(),
            starts: 0,
            idle_memory: true,
        }
    }
}

impl Rtos for RecordingRtos {
    fn create_task(&mut self, spec: TaskSpec) -> Result<TaskHandle, KernelError> {
        self.scheduler.create_task(spec)
    }

    fn create_channel(
        &mut self,
        capacity: usize,
        item_size: usize,
        storage: &'static mut [u8],
    ) -> Result<QueueHandle, QueueError> {
        self.scheduler.create_queue(capacity, item_size, storage)
    }

    fn start_scheduler(&mut self) -> Result<Infallible, KernelError> {
        self.starts += 1;
        let idle_stack = self.idle_memory.then(|| leak_stack(IDLE_STACK_WORDS));
        self.scheduler.prepare_start(parked, idle_stack)?;
        Err(KernelError::AlreadyStarted)
    }
}

/// One task of priority 1 alone with the idle task, driven from the test
/// thread. Giving up the CPU runs the clock until the task is picked again;
/// any other task that gets the CPU meanwhile runs once and then sleeps
/// forever.
pub(crate) struct SoloTask {
    pub scheduler: Scheduler,
    pub switches: usize,
    /// Other tasks that got the CPU, in order.
    pub ran: Vec<usize>,
}

const SOLO: usize = 0;

/// Ticks a [`SoloTask`] may wait before the test is declared stuck.
const SOLO_CLOCK_LIMIT: usize = 10_000;

impl SoloTask {
    /// A started scheduler with the task running and one queue of
    /// `capacity` one-byte items.
    pub fn with_queue(capacity: usize) -> (Self, QueueHandle) {
        let mut scheduler = Scheduler::new();
        scheduler
            .create_task(TaskSpec {
                name: "solo",
                entry: parked,
                stack: leak_stack(TASK_STACK_WORDS),
                priority: 1,
                param: 0,
            })
            .unwrap();
        let queue = scheduler
            .create_queue(capacity, 1, leak_bytes(capacity))
            .unwrap();
        scheduler
            .prepare_start(parked, Some(leak_stack(IDLE_STACK_WORDS)))
            .unwrap();
        assert_eq!(scheduler.current_task, SOLO);

        let task = Self {
            scheduler,
            switches: 0,
            ran: Vec::new(),
        };
        (task, queue)
    }

    /// Adds a priority-2 task already blocked receiving on `queue`.
    pub fn add_waiter(&mut self, queue: QueueHandle) -> TaskHandle {
        let handle = self
            .scheduler
            .create_task(TaskSpec {
                name: "waiter",
                entry: parked,
                stack: leak_stack(TASK_STACK_WORDS),
                priority: 2,
                param: 0,
            })
            .unwrap();
        let tcb = &mut self.scheduler.tasks[handle.index()];
        tcb.state = TaskState::Blocked;
        tcb.wait = Wait::Queue {
            queue,
            deadline: None,
        };
        handle
    }
}

impl TaskContext for SoloTask {
    fn with_scheduler<R>(&mut self, f: impl FnOnce(&mut Scheduler) -> R) -> R {
        f(&mut self.scheduler)
    }

    fn switch_out(&mut self) {
        self.switches += 1;
        self.scheduler.switch_context();
        for _ in 0..SOLO_CLOCK_LIMIT {
            let current = self.scheduler.current();
            if current.index() == SOLO {
                return;
            }
            if Some(current) == self.scheduler.idle_task() {
                if self.scheduler.tick() {
                    self.scheduler.switch_context();
                }
            } else {
                self.ran.push(current.index());
                self.scheduler.block_current(Wait::Until(Ticks::MAX));
                self.scheduler.switch_context();
            }
        }
        panic!("task was never resumed");
    }
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// How long the clock waits for the tasks before the simulation is declared
/// stuck.
const STALL: Duration = Duration::from_secs(5);

/// Who may advance: the task holding the CPU, or the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    Tasks,
    Clock,
}

/// Counters the task threads publish after every loop pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Report {
    pub published: u32,
    pub dropped: u32,
    pub applied: u32,
    pub anomalies: u32,
}

struct World {
    scheduler: Scheduler,
    port: MockPort,
    turn: Turn,
    report: Report,
}

impl World {
    fn idle_is_current(&self) -> bool {
        self.scheduler.idle_task() == Some(self.scheduler.current())
    }
}

/// The simulated core: one lock for all kernel and port state, and a
/// condition variable that passes the CPU between threads.
struct Machine {
    world: Mutex<World>,
    cpu: Condvar,
}

impl Machine {
    fn lock(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until `task` is the scheduler's current task and the clock is
    /// not moving.
    fn wait_for_cpu<'a>(
        &'a self,
        world: MutexGuard<'a, World>,
        task: usize,
    ) -> MutexGuard<'a, World> {
        self.cpu
            .wait_while(world, |w| w.turn != Turn::Tasks || w.scheduler.current_task != task)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// A task thread's view of the kernel. Switching out hands the CPU to the
/// thread of whichever task the scheduler picks.
struct SimTask {
    machine: Arc<Machine>,
    index: usize,
}

impl SimTask {
    fn new(machine: Arc<Machine>, index: usize) -> Self {
        let world = machine.lock();
        drop(machine.wait_for_cpu(world, index));
        Self { machine, index }
    }

    /// Keeps the CPU, as a task doing work would, until the tick count
    /// reaches `until`. The clock can still preempt it.
    fn busy_until(&mut self, until: Ticks) {
        let mut world = self.machine.lock();
        while world.scheduler.tick_count < until {
            world.turn = Turn::Clock;
            self.machine.cpu.notify_all();
            world = self.machine.wait_for_cpu(world, self.index);
        }
    }

    fn report(&self, update: impl FnOnce(&mut Report)) {
        update(&mut self.machine.lock().report);
    }
}

impl TaskContext for SimTask {
    fn with_scheduler<R>(&mut self, f: impl FnOnce(&mut Scheduler) -> R) -> R {
        f(&mut self.machine.lock().scheduler)
    }

    fn switch_out(&mut self) {
        let mut world = self.machine.lock();
        world.scheduler.switch_context();
        self.machine.cpu.notify_all();
        drop(self.machine.wait_for_cpu(world, self.index));
    }
}

/// Output port of the simulated board. Writes are stamped with the tick
/// count at the time of the write.
pub(crate) struct SimPins(Arc<Machine>);

impl HardwarePort for SimPins {
    fn configure_watchdog(&mut self) -> Result<(), PortError> {
        self.0.lock().port.configure_watchdog()
    }

    fn configure_clock(&mut self) -> Result<(), PortError> {
        self.0.lock().port.configure_clock()
    }

    fn set_pin_direction(&mut self, mask: u8) {
        self.0.lock().port.set_pin_direction(mask);
    }

    fn write_pins(&mut self, value: u8) {
        let mut world = self.0.lock();
        let world = &mut *world;
        world.port.now = world.scheduler.tick_count;
        world.port.write_pins(value);
    }

    fn toggle_pins(&mut self, mask: u8) {
        self.0.lock().port.toggle_pins(mask);
    }

    fn delay_cycles(&mut self, cycles: u32) {
        self.0.lock().port.delay_cycles(cycles);
    }
}

/// Build-time choices a simulation runs with.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SimConfig {
    pub idle: IdlePolicy,
    pub cadence: CadencePolicy,
    pub period: Ticks,
    pub receive_timeout: Timeout,
    /// Ticks the Producer keeps the CPU after each publish.
    pub work: Ticks,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            idle: IdlePolicy::Diagnostic,
            cadence: CadencePolicy::Periodic,
            period: BLINK_PERIOD,
            receive_timeout: RECEIVE_TIMEOUT,
            work: 0,
        }
    }
}

/// The blinker booted through [`boot`] and run on the real scheduler, one
/// tick at a time.
///
/// Each task runs on its own thread and executes the same loop body as the
/// firmware entry point ([`Producer::step`], [`Consumer::step`]). Only the
/// thread of the scheduler's current task may proceed. The test thread is
/// the clock: it lets the tasks run until they all block (or one is busy),
/// runs the idle hook once if the idle task has the CPU, then ticks.
pub(crate) struct Simulation {
    machine: Arc<Machine>,
    pub power: MockPower,
    pub idle: IdleHook,
}

impl Simulation {
    pub fn start(config: SimConfig) -> Self {
        let machine = Arc::new(Machine {
            world: Mutex::new(World {
                scheduler: Scheduler::new(),
                port: MockPort::new(),
                turn: Turn::Clock,
                report: Report::default(),
            }),
            cpu: Condvar::new(),
        });

        let mut rtos = RecordingRtos::new();
        let slot = PortSlot::new();
        let memory = BootMemory {
            queue_storage: leak_bytes(Message::SIZE),
            producer_stack: leak_stack(TASK_STACK_WORDS),
            consumer_stack: leak_stack(TASK_STACK_WORDS),
        };
        let result = boot(&mut rtos, SimPins(Arc::clone(&machine)), &slot, memory);
        assert!(matches!(
            result,
            Err(BootError::Scheduler(KernelError::AlreadyStarted))
        ));
        let pins = slot.take().expect("boot keeps the port in the slot");

        {
            let mut world = machine.lock();
            world.scheduler = rtos.scheduler;
            world.port.calls.clear();
        }

        let queue = QueueHandle::new(0);
        Self::spawn(&machine, 0, move |mut task| {
            let start = task.tick_count();
            let mut producer = Producer::new(
                LED_INITIAL,
                LED_TOGGLE_MASK,
                config.cadence,
                config.period,
                start,
            );
            loop {
                producer.step(&mut task, queue);
                task.report(|r| {
                    r.published = producer.published();
                    r.dropped = producer.dropped();
                });
                let until = task.tick_count() + config.work;
                task.busy_until(until);
            }
        });
        Self::spawn(&machine, 1, move |mut task| {
            let mut pins = pins;
            let mut consumer = Consumer::new();
            loop {
                consumer.step(&mut task, &mut pins, queue, config.receive_timeout);
                task.report(|r| {
                    r.applied = consumer.applied();
                    r.anomalies = consumer.anomalies();
                });
            }
        });

        Self {
            machine,
            power: MockPower::default(),
            idle: IdleHook::new(config.idle),
        }
    }

    fn spawn(
        machine: &Arc<Machine>,
        index: usize,
        body: impl FnOnce(SimTask) + Send + 'static,
    ) {
        let machine = Arc::clone(machine);
        thread::spawn(move || body(SimTask::new(machine, index)));
    }

    /// Run `n` ticks. The tasks are frozen again when this returns.
    pub fn run(&mut self, n: Ticks) {
        for _ in 0..n {
            let mut world = self.machine.lock();
            world.turn = Turn::Tasks;
            self.machine.cpu.notify_all();

            let (mut world, waited) = self
                .machine
                .cpu
                .wait_timeout_while(world, STALL, |w| w.turn == Turn::Tasks && !w.idle_is_current())
                .unwrap_or_else(PoisonError::into_inner);
            assert!(!waited.timed_out(), "tasks stopped handing back the CPU");

            world.turn = Turn::Clock;
            if world.idle_is_current() {
                self.idle.run(&self.power);
            }
            if world.scheduler.tick() {
                world.scheduler.switch_context();
            }
        }
    }

    /// Pin writes so far, with the tick of each.
    pub fn writes(&self) -> Vec<(Ticks, u8)> {
        self.machine.lock().port.writes.clone()
    }

    /// Port calls made after boot.
    pub fn calls(&self) -> Vec<PortCall> {
        self.machine.lock().port.calls.clone()
    }

    pub fn report(&self) -> Report {
        self.machine.lock().report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_gaps(writes: &[(Ticks, u8)]) -> Vec<Ticks> {
        writes.windows(2).map(|w| w[1].0 - w[0].0).collect()
    }

    #[test]
    fn pins_follow_the_producer() {
        let mut sim = Simulation::start(SimConfig::default());
        sim.run(301);

        assert_eq!(sim.writes(), [(100, 0x01), (200, 0x40), (300, 0x01)]);
        assert!(sim.calls().iter().all(|c| matches!(c, PortCall::Write(_))));

        let report = sim.report();
        assert_eq!(report.published, 3);
        assert_eq!(report.dropped, 0);
        assert_eq!(report.applied, 3);
    }

    #[test]
    fn idle_counts_every_quiet_tick() {
        let mut sim = Simulation::start(SimConfig::default());
        sim.run(50);
        assert_eq!(sim.idle.loops(), 50);

        sim.run(250);
        assert_eq!(sim.idle.loops(), 300);
        assert_eq!(sim.power.sleeps(), 0);
    }

    #[test]
    fn low_power_idle_sleeps_instead() {
        let mut sim = Simulation::start(SimConfig {
            idle: IdlePolicy::LowPower,
            ..SimConfig::default()
        });
        sim.run(201);
        assert_eq!(sim.power.sleeps(), 201);
        assert_eq!(sim.idle.loops(), 0);
        assert_eq!(sim.writes(), [(100, 0x01), (200, 0x40)]);
    }

    #[test]
    fn periodic_cadence_absorbs_work_time() {
        let mut sim = Simulation::start(SimConfig {
            work: 30,
            ..SimConfig::default()
        });
        sim.run(450);

        // Each write lands one tick after the publish, once the time slice
        // hands the CPU to the Consumer.
        let writes = sim.writes();
        assert_eq!(writes[0], (101, 0x01));
        assert_eq!(write_gaps(&writes), [100, 100, 100]);
    }

    #[test]
    fn relative_cadence_stretches_by_work_time() {
        let mut sim = Simulation::start(SimConfig {
            cadence: CadencePolicy::Relative,
            work: 30,
            ..SimConfig::default()
        });
        sim.run(450);

        let writes = sim.writes();
        assert_eq!(writes[0], (101, 0x01));
        assert_eq!(write_gaps(&writes), [130, 130]);
    }

    #[test]
    fn consumer_timeouts_are_counted_and_data_still_wins() {
        let mut sim = Simulation::start(SimConfig {
            receive_timeout: Timeout::Ticks(50),
            ..SimConfig::default()
        });
        sim.run(201);

        assert_eq!(sim.writes(), [(100, 0x01), (200, 0x40)]);
        assert_eq!(sim.report().anomalies, 2);
    }

    #[test]
    fn mock_port_tracks_pin_state() {
        let mut port = MockPort::new();
        port.write_pins(0x41);
        port.toggle_pins(0x40);
        assert_eq!(port.pins, 0x01);
        assert_eq!(port.written(), [0x41]);
    }
}
