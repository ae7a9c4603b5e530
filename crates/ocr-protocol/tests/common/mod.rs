//! Deterministic in-process cluster for protocol tests.
//!
//! Messages are delivered in FIFO order, data source fetches are answered
//! immediately, and timers only fire when a test asks for them.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use ocr_core::{Committee, KeyPair, Message, MessageFinal, MessageKind, ObservationValue, OracleId, OracleSigner};
use ocr_protocol::{
    Action, AssertionViolation, ConfigContext, Destination, Event, MedianCanonicalizer, Oracle,
    ProtocolConfig, TelemetrySink, TimerId,
};

#[derive(Default)]
pub struct RecordingTelemetry {
    pub violations: Mutex<Vec<AssertionViolation>>,
}

impl RecordingTelemetry {
    pub fn kinds(&self) -> Vec<MessageKind> {
        self.violations.lock().unwrap().iter().map(|v| v.kind).collect()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn on_violation(&self, violation: &AssertionViolation) {
        self.violations.lock().unwrap().push(violation.clone());
    }
}

pub type Filter = Box<dyn FnMut(OracleId, OracleId, Message) -> Option<Message>>;

pub struct Cluster {
    pub oracles: Vec<Oracle>,
    pub telemetry: Vec<Arc<RecordingTelemetry>>,
    pub crashed: Vec<bool>,
    /// Reading each oracle's data source returns; `None` abstains
    pub readings: Vec<Option<i64>>,
    pub delivered: Vec<Vec<MessageFinal>>,
    /// Every message handed to the network: (sender, destination, message)
    pub sent: Vec<(OracleId, Destination, Message)>,
    queue: VecDeque<(OracleId, Event)>,
    timers: Vec<(OracleId, TimerId)>,
    filter: Option<Filter>,
}

impl Cluster {
    pub fn new(n: usize, f: usize) -> Self {
        Self::with_config(n, f, "cluster", ProtocolConfig::default())
    }

    pub fn with_config(n: usize, f: usize, label: &str, config: ProtocolConfig) -> Self {
        let pairs: Vec<_> = (0..n as u32)
            .map(|i| KeyPair::deterministic("cluster", i))
            .collect();
        let committee = Committee::new(pairs.iter().map(|p| p.public).collect());

        let mut oracles = Vec::new();
        let mut telemetry = Vec::new();
        for (i, pair) in pairs.iter().enumerate() {
            let id = OracleId(i as u8);
            let ctx = ConfigContext::new(committee.clone(), f, id, label).unwrap();
            let sink = Arc::new(RecordingTelemetry::default());
            let oracle = Oracle::new(
                Arc::new(ctx),
                config.clone(),
                OracleSigner::new(id, pair.secret.clone()),
                Arc::new(MedianCanonicalizer),
                sink.clone(),
            )
            .unwrap();
            oracles.push(oracle);
            telemetry.push(sink);
        }

        Cluster {
            oracles,
            telemetry,
            crashed: vec![false; n],
            readings: (0..n).map(|i| Some(100 + i as i64)).collect(),
            delivered: vec![Vec::new(); n],
            sent: Vec::new(),
            queue: VecDeque::new(),
            timers: Vec::new(),
            filter: None,
        }
    }

    pub fn n(&self) -> usize {
        self.oracles.len()
    }

    /// Leader of the current epoch as seen by the first live oracle
    pub fn leader(&self) -> OracleId {
        let live = self.live().next().unwrap_or(0);
        self.oracles[live].leader()
    }

    pub fn live(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.n()).filter(|i| !self.crashed[*i])
    }

    /// Some oracle that is neither `a` nor `b`
    pub fn other_than(&self, a: OracleId, b: OracleId) -> OracleId {
        (0..self.n() as u8)
            .map(OracleId)
            .find(|id| *id != a && *id != b)
            .unwrap()
    }

    pub fn crash(&mut self, id: OracleId) {
        self.crashed[id.index()] = true;
    }

    pub fn set_filter(&mut self, filter: impl FnMut(OracleId, OracleId, Message) -> Option<Message> + 'static) {
        self.filter = Some(Box::new(filter));
    }

    pub fn clear_filter(&mut self) {
        self.filter = None;
    }

    pub fn start(&mut self) {
        for i in 0..self.n() {
            if self.crashed[i] {
                continue;
            }
            let actions = self.oracles[i].start();
            self.apply(OracleId(i as u8), actions);
        }
        self.run();
    }

    /// Deliver queued events until the network is quiet
    pub fn run(&mut self) {
        let mut steps = 0;
        while let Some((id, event)) = self.queue.pop_front() {
            steps += 1;
            assert!(steps < 100_000, "cluster did not quiesce");
            if self.crashed[id.index()] {
                continue;
            }
            let actions = self.oracles[id.index()].handle(event);
            self.apply(id, actions);
        }
    }

    /// Fire every pending timer matching `pred`, then run to quiescence
    pub fn fire(&mut self, mut pred: impl FnMut(OracleId, &TimerId) -> bool) {
        let (fire, keep): (Vec<_>, Vec<_>) = self
            .timers
            .drain(..)
            .partition(|(id, timer)| pred(*id, timer));
        self.timers = keep;

        for (id, timer) in fire {
            if self.crashed[id.index()] {
                continue;
            }
            let actions = self.oracles[id.index()].handle(Event::Timer(timer));
            self.apply(id, actions);
        }
        self.run();
    }

    pub fn fire_progress(&mut self) {
        self.fire(|_, t| matches!(t, TimerId::Progress { .. }));
    }

    /// Queue a message without passing it through the filter
    pub fn inject(&mut self, from: OracleId, to: OracleId, message: Message) {
        self.queue.push_back((to, Event::Message { from, message }));
    }

    pub fn sent_count(&self, kind: MessageKind) -> usize {
        self.sent.iter().filter(|(_, _, m)| m.kind() == kind).count()
    }

    pub fn sent_by(&self, from: OracleId, kind: MessageKind) -> usize {
        self.sent
            .iter()
            .filter(|(sender, _, m)| *sender == from && m.kind() == kind)
            .count()
    }

    fn apply(&mut self, id: OracleId, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send { to, message } => {
                    self.sent.push((id, to, message.clone()));
                    let targets: Vec<OracleId> = match to {
                        Destination::Broadcast => (0..self.n() as u8).map(OracleId).collect(),
                        Destination::To(target) => vec![target],
                    };
                    for target in targets {
                        let message = match self.filter.as_mut() {
                            Some(filter) => match filter(id, target, message.clone()) {
                                Some(m) => m,
                                None => continue,
                            },
                            None => message.clone(),
                        };
                        self.queue
                            .push_back((target, Event::Message { from: id, message }));
                    }
                }
                Action::SetTimer { timer, .. } => self.timers.push((id, timer)),
                Action::FetchObservation { context } => {
                    let value = self.readings[id.index()].map(ObservationValue::from_i64);
                    self.queue
                        .push_back((id, Event::ObservationFetched { context, value }));
                }
                Action::Deliver(final_message) => self.delivered[id.index()].push(final_message),
            }
        }
    }
}
