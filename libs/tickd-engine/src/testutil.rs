//! Scripted fakes behind the `tickd-api` seams, shared by the engine tests.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use tickd_api::{IngestError, NodeClient, StartFrom, TickRecord, TickSubscription};

type SubItem = Result<Option<TickRecord>, IngestError>;

pub fn rec(tick: u64) -> TickRecord {
    TickRecord {
        tick,
        epoch: 0,
        ts_ms: tick as i64 * 1_000,
        transactions: Vec::new(),
        events: Vec::new(),
        is_catch_up: false,
    }
}

pub fn catchup(tick: u64) -> TickRecord {
    TickRecord { is_catch_up: true, ..rec(tick) }
}

/// Subscription replaying a scripted item sequence; hangs once the
/// script runs out.
struct ScriptedSub {
    items: VecDeque<SubItem>,
}

impl TickSubscription for ScriptedSub {
    fn next(&mut self) -> Pin<Box<dyn Future<Output = SubItem> + Send + '_>> {
        match self.items.pop_front() {
            Some(item) => Box::pin(async move { item }),
            None => Box::pin(std::future::pending()),
        }
    }
}

enum Attempt {
    Stream(Vec<SubItem>),
    Fail(IngestError),
}

/// NodeClient handing out scripted connection attempts in push order and
/// recording every `(node, start)` call. Exhausted scripts produce a
/// subscription that never yields.
pub struct ScriptedClient {
    attempts: Mutex<VecDeque<Attempt>>,
    calls: Mutex<Vec<(String, StartFrom)>>,
    times: Mutex<Vec<tokio::time::Instant>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            attempts: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            times: Mutex::new(Vec::new()),
        }
    }

    pub fn push_subscription(&self, items: Vec<SubItem>) {
        self.attempts.lock().unwrap().push_back(Attempt::Stream(items));
    }

    pub fn push_failure(&self, err: IngestError) {
        self.attempts.lock().unwrap().push_back(Attempt::Fail(err));
    }

    pub fn calls(&self) -> Vec<(String, StartFrom)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_times(&self) -> Vec<tokio::time::Instant> {
        self.times.lock().unwrap().clone()
    }
}

impl NodeClient for ScriptedClient {
    #[allow(clippy::type_complexity)]
    fn subscribe(
        &self,
        node: &str,
        start: StartFrom,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn TickSubscription>, IngestError>> + Send + '_>>
    {
        self.calls.lock().unwrap().push((node.to_string(), start));
        self.times.lock().unwrap().push(tokio::time::Instant::now());
        let attempt = self.attempts.lock().unwrap().pop_front();
        Box::pin(async move {
            match attempt {
                Some(Attempt::Stream(items)) => {
                    Ok(Box::new(ScriptedSub { items: items.into() }) as Box<dyn TickSubscription>)
                }
                Some(Attempt::Fail(e)) => Err(e),
                None => Ok(Box::new(ScriptedSub { items: VecDeque::new() })
                    as Box<dyn TickSubscription>),
            }
        })
    }
}
