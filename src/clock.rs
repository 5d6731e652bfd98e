//! Musical clock and task scheduler.
//!
//! The clock only moves when the owning context renders. Before each block
//! the context asks the clock to run every task due before the block ends;
//! tasks receive the exact time of their occurrence and schedule graph events
//! against it, so timing is sample-accurate whatever the block size.
//!
//! Transport tasks follow the tempo, swing and play state. Free tasks run on
//! a fixed period in seconds regardless of the transport.

use crate::graph::Graph;

/// Handle to a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Started,
    Paused,
}

/// Note value a transport task repeats on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subdivision {
    Sixteenth,
    Eighth,
    Quarter,
    Bar,
}

impl Subdivision {
    pub fn sixteenths(self) -> u64 {
        match self {
            Subdivision::Sixteenth => 1,
            Subdivision::Eighth => 2,
            Subdivision::Quarter => 4,
            Subdivision::Bar => 16,
        }
    }
}

/// One occurrence of a task.
pub struct Tick<'a> {
    /// Context time the occurrence belongs to.
    pub time: f64,
    /// Transport tasks: occurrences since transport position zero.
    /// Free tasks: occurrences since the task was scheduled.
    pub index: u64,
    pub graph: &'a mut Graph,
}

pub type TaskFn = Box<dyn FnMut(&mut Tick<'_>) + Send>;

enum Schedule {
    Transport { every: u64, next_pos: u64 },
    Free { period: f64, next_time: f64, fired: u64 },
    Once { time: f64 },
}

struct Task {
    id: TaskId,
    schedule: Schedule,
    callback: TaskFn,
}

pub struct Clock {
    bpm: f64,
    swing: f64,
    state: TransportState,
    now: f64,
    /// Transport position (in sixteenths) at `anchor_time`.
    anchor_pos: f64,
    anchor_time: f64,
    tasks: Vec<Task>,
    next_id: u64,
}

impl Clock {
    pub fn new(bpm: f64) -> Self {
        Clock {
            bpm: bpm.max(1.0),
            swing: 0.0,
            state: TransportState::Stopped,
            now: 0.0,
            anchor_pos: 0.0,
            anchor_time: 0.0,
            tasks: Vec::new(),
            next_id: 0,
        }
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn swing(&self) -> f64 {
        self.swing
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Length of a sixteenth note in seconds.
    pub fn sixteenth(&self) -> f64 {
        60.0 / self.bpm / 4.0
    }

    /// Change tempo from now on. Ticks already fired keep their times.
    pub fn set_bpm(&mut self, bpm: f64) {
        self.reanchor();
        self.bpm = bpm.max(1.0);
    }

    /// Delay applied to odd sixteenths, as a fraction of the way to the
    /// next eighth-note triplet position.
    pub fn set_swing(&mut self, swing: f64) {
        self.swing = swing.clamp(0.0, 1.0);
    }

    /// Transport position in sixteenths, ignoring swing.
    pub fn position(&self) -> f64 {
        match self.state {
            TransportState::Started => {
                self.anchor_pos + (self.now - self.anchor_time) / self.sixteenth()
            }
            _ => self.anchor_pos,
        }
    }

    pub fn start(&mut self) {
        if self.state == TransportState::Started {
            return;
        }
        self.anchor_time = self.now;
        self.state = TransportState::Started;
        log::debug!("transport started at {:.3}s, position {:.2}", self.now, self.anchor_pos);
    }

    /// Freeze the transport at its current position.
    pub fn pause(&mut self) {
        if self.state != TransportState::Started {
            return;
        }
        self.reanchor();
        self.state = TransportState::Paused;
        log::debug!("transport paused at position {:.2}", self.anchor_pos);
    }

    /// Halt and rewind to position zero.
    pub fn stop(&mut self) {
        self.state = TransportState::Stopped;
        self.anchor_pos = 0.0;
        self.anchor_time = self.now;
        for task in &mut self.tasks {
            if let Schedule::Transport { next_pos, .. } = &mut task.schedule {
                *next_pos = 0;
            }
        }
        log::debug!("transport stopped");
    }

    /// Run `callback` on every `subdivision` of the transport.
    pub fn schedule_repeat(&mut self, subdivision: Subdivision, callback: TaskFn) -> TaskId {
        let every = subdivision.sixteenths();
        let pos = self.position().ceil() as u64;
        let next_pos = pos.div_ceil(every) * every;
        self.push(Schedule::Transport { every, next_pos }, callback)
    }

    /// Run `callback` every `period` seconds, first at `first`.
    pub fn schedule_free(&mut self, first: f64, period: f64, callback: TaskFn) -> TaskId {
        let schedule = Schedule::Free {
            period: period.max(1e-3),
            next_time: first,
            fired: 0,
        };
        self.push(schedule, callback)
    }

    /// Run `callback` once at `time`.
    pub fn schedule_once(&mut self, time: f64, callback: TaskFn) -> TaskId {
        self.push(Schedule::Once { time }, callback)
    }

    /// Cancel a task. Returns `false` if it was already gone.
    pub fn clear(&mut self, id: TaskId) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|task| task.id != id);
        before != self.tasks.len()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Run every occurrence due before `until`.
    pub fn run_due(&mut self, until: f64, graph: &mut Graph) {
        let started = self.state == TransportState::Started;
        let timing = self.timing();
        let mut finished = Vec::new();

        for task in &mut self.tasks {
            match &mut task.schedule {
                Schedule::Transport { every, next_pos } => {
                    if !started {
                        continue;
                    }
                    loop {
                        let time = timing.time_of(*next_pos);
                        if time >= until {
                            break;
                        }
                        let mut tick = Tick {
                            time,
                            index: *next_pos / *every,
                            graph: &mut *graph,
                        };
                        (task.callback)(&mut tick);
                        *next_pos += *every;
                    }
                }
                Schedule::Free {
                    period,
                    next_time,
                    fired,
                } => {
                    while *next_time < until {
                        let mut tick = Tick {
                            time: *next_time,
                            index: *fired,
                            graph: &mut *graph,
                        };
                        (task.callback)(&mut tick);
                        *fired += 1;
                        *next_time += *period;
                    }
                }
                Schedule::Once { time } => {
                    if *time < until {
                        let mut tick = Tick {
                            time: *time,
                            index: 0,
                            graph: &mut *graph,
                        };
                        (task.callback)(&mut tick);
                        finished.push(task.id);
                    }
                }
            }
        }

        if !finished.is_empty() {
            self.tasks.retain(|task| !finished.contains(&task.id));
        }
    }

    /// Move the clock to `time`. Only the owning context calls this.
    pub(crate) fn advance_to(&mut self, time: f64) {
        self.now = time;
    }

    fn push(&mut self, schedule: Schedule, callback: TaskFn) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.tasks.push(Task {
            id,
            schedule,
            callback,
        });
        id
    }

    fn reanchor(&mut self) {
        self.anchor_pos = self.position();
        self.anchor_time = self.now;
    }

    fn timing(&self) -> Timing {
        Timing {
            anchor_pos: self.anchor_pos,
            anchor_time: self.anchor_time,
            sixteenth: self.sixteenth(),
            swing: self.swing,
        }
    }
}

/// Snapshot of the transport mapping used while running tasks.
struct Timing {
    anchor_pos: f64,
    anchor_time: f64,
    sixteenth: f64,
    swing: f64,
}

impl Timing {
    fn time_of(&self, pos: u64) -> f64 {
        let straight = self.anchor_time + (pos as f64 - self.anchor_pos) * self.sixteenth;
        if pos % 2 == 1 {
            straight + self.swing * self.sixteenth * 2.0 / 3.0
        } else {
            straight
        }
    }
}
