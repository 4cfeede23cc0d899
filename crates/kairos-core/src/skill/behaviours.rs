//! Ready-made behaviour kinds and a closure-backed handler.
//!
//! - `OneShotBehaviour` acts once, then reports done
//! - `CyclicBehaviour` acts every tick until the agent stops
//! - `TickerBehaviour` acts once per interval, optionally from a start time,
//!   however often it is invoked
//! - `SequenceBehaviour` runs child behaviours one after another
//! - `FsmBehaviour` (in [`super::fsm`]) runs states connected by events
//! - `FnHandler` handles messages of one protocol with a closure

use std::time::Duration;

use chrono::{DateTime, Utc};
use kairos_types::Message;

use super::behaviour::Behaviour;
use super::handler::Handler;

type ActFn = Box<dyn FnMut() -> anyhow::Result<()> + Send>;
type HandleFn = Box<dyn FnMut(&Message) -> anyhow::Result<()> + Send>;

pub(crate) const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Timer jitter tolerated by `TickerBehaviour` between two scheduled calls.
const TICK_SLACK: Duration = Duration::from_millis(5);

// ---------------------------------------------------------------------------
// OneShotBehaviour
// ---------------------------------------------------------------------------

/// Acts exactly once.
pub struct OneShotBehaviour {
    name: String,
    act: ActFn,
    executed: bool,
}

impl OneShotBehaviour {
    pub fn new<F>(name: impl Into<String>, act: F) -> Self
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            name: name.into(),
            act: Box::new(act),
            executed: false,
        }
    }
}

impl Behaviour for OneShotBehaviour {
    fn name(&self) -> &str {
        &self.name
    }

    fn act(&mut self) -> anyhow::Result<()> {
        if self.executed {
            return Ok(());
        }
        // Marked before the call: a failing one-shot is not retried.
        self.executed = true;
        (self.act)()
    }

    fn is_done(&self) -> bool {
        self.executed
    }

    fn tick_interval(&self) -> Duration {
        Duration::ZERO
    }
}

// ---------------------------------------------------------------------------
// CyclicBehaviour
// ---------------------------------------------------------------------------

/// Acts on every tick and counts its executions.
pub struct CyclicBehaviour {
    name: String,
    act: ActFn,
    tick_interval: Duration,
    executions: u64,
}

impl CyclicBehaviour {
    pub fn new<F>(name: impl Into<String>, act: F) -> Self
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            name: name.into(),
            act: Box::new(act),
            tick_interval: DEFAULT_TICK,
            executions: 0,
        }
    }

    pub fn every(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn executions(&self) -> u64 {
        self.executions
    }
}

impl Behaviour for CyclicBehaviour {
    fn name(&self) -> &str {
        &self.name
    }

    fn act(&mut self) -> anyhow::Result<()> {
        self.executions += 1;
        (self.act)()
    }

    fn tick_interval(&self) -> Duration {
        self.tick_interval
    }
}

// ---------------------------------------------------------------------------
// TickerBehaviour
// ---------------------------------------------------------------------------

/// Acts every `tick_interval`, first at `start_at` (or immediately).
///
/// The time gate lives in the behaviour itself, so a ticker keeps its pace
/// under the blocking loop too, where behaviours are invoked every spin.
pub struct TickerBehaviour {
    name: String,
    act: ActFn,
    tick_interval: Duration,
    start_at: Option<DateTime<Utc>>,
    last_act_time: Option<DateTime<Utc>>,
}

impl TickerBehaviour {
    pub fn new<F>(name: impl Into<String>, tick_interval: Duration, act: F) -> Self
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            name: name.into(),
            act: Box::new(act),
            tick_interval,
            start_at: None,
            last_act_time: None,
        }
    }

    pub fn starting_at(mut self, start_at: DateTime<Utc>) -> Self {
        self.start_at = Some(start_at);
        self
    }

    pub fn last_act_time(&self) -> Option<DateTime<Utc>> {
        self.last_act_time
    }

    /// Past `start_at`, and at least one interval since the last act.
    pub fn is_time_to_act(&self, now: DateTime<Utc>) -> bool {
        let slack = TICK_SLACK.min(self.tick_interval / 2);
        if let Some(start_at) = self.start_at {
            let until_start = (start_at - now).to_std().unwrap_or(Duration::ZERO);
            if until_start > slack {
                return false;
            }
        }
        let Some(last) = self.last_act_time else {
            return true;
        };
        let since = (now - last).to_std().unwrap_or(Duration::ZERO);
        since + slack >= self.tick_interval
    }
}

impl Behaviour for TickerBehaviour {
    fn name(&self) -> &str {
        &self.name
    }

    fn act(&mut self) -> anyhow::Result<()> {
        let now = Utc::now();
        if !self.is_time_to_act(now) {
            return Ok(());
        }
        self.last_act_time = Some(now);
        (self.act)()
    }

    fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    fn start_at(&self) -> Option<DateTime<Utc>> {
        self.start_at
    }
}

// ---------------------------------------------------------------------------
// SequenceBehaviour
// ---------------------------------------------------------------------------

/// Runs child behaviours serially: each tick acts the first child that is
/// not yet done. Done once every child is done.
pub struct SequenceBehaviour {
    name: String,
    children: Vec<Box<dyn Behaviour>>,
    index: usize,
    tick_interval: Duration,
}

impl SequenceBehaviour {
    pub fn new(name: impl Into<String>, children: Vec<Box<dyn Behaviour>>) -> Self {
        Self {
            name: name.into(),
            children,
            index: 0,
            tick_interval: DEFAULT_TICK,
        }
    }

    pub fn every(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    /// Name of the child that will act next, if any.
    pub fn current(&self) -> Option<&str> {
        self.children.get(self.index).map(|c| c.name())
    }

    fn skip_done_children(&mut self) {
        while self
            .children
            .get(self.index)
            .is_some_and(|child| child.is_done())
        {
            self.index += 1;
        }
    }
}

impl Behaviour for SequenceBehaviour {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self) -> anyhow::Result<()> {
        self.children.iter_mut().try_for_each(|c| c.setup())
    }

    fn act(&mut self) -> anyhow::Result<()> {
        self.skip_done_children();
        match self.children.get_mut(self.index) {
            Some(child) => {
                child.act()?;
                self.skip_done_children();
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn teardown(&mut self) -> anyhow::Result<()> {
        self.children.iter_mut().try_for_each(|c| c.teardown())
    }

    fn is_done(&self) -> bool {
        self.children[self.index.min(self.children.len())..]
            .iter()
            .all(|c| c.is_done())
    }

    fn tick_interval(&self) -> Duration {
        self.tick_interval
    }
}

// ---------------------------------------------------------------------------
// FnHandler
// ---------------------------------------------------------------------------

/// Handler backed by a closure.
pub struct FnHandler {
    name: String,
    protocol: String,
    handle: HandleFn,
}

impl FnHandler {
    pub fn new<F>(name: impl Into<String>, protocol: impl Into<String>, handle: F) -> Self
    where
        F: FnMut(&Message) -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            name: name.into(),
            protocol: protocol.into(),
            handle: Box::new(handle),
        }
    }
}

impl Handler for FnHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_protocol(&self) -> &str {
        &self.protocol
    }

    fn handle(&mut self, message: &Message) -> anyhow::Result<()> {
        (self.handle)(message)
    }
}
