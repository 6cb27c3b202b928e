//! Scripted mock instruments.
//!
//! The mock stands in for both instruments so the orchestrator can be run and
//! tested without hardware. It provides:
//! - A call journal shared by both instruments (global command order)
//! - Controllable failure injection, per command prefix or per connection
//! - A busy-acquisition script: after the arm command, the running query
//!   answers `1` a configurable number of times before answering `0`
//! - Command hooks, to act (e.g. request an abort) when a command is seen

use super::{DigitizerCommands, InstrumentLink, InstrumentRole, LinkConnector, IDENTIFY};
use crate::error::{ConnectError, LinkError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Kind of call recorded in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// `write`.
    Write,
    /// `query`.
    Query,
}

/// One journal entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    /// Instrument that received the call.
    pub role: InstrumentRole,
    /// Write or query.
    pub kind: CallKind,
    /// Command text as sent.
    pub command: String,
}

/// Journal shared between mock instruments.
pub type CallJournal = Arc<Mutex<Vec<MockCall>>>;

type Hook = Arc<dyn Fn(&str) + Send + Sync>;

struct BusyScript {
    arm_command: String,
    running_query: String,
    polls_per_capture: u32,
    remaining: u32,
}

struct MockState {
    identity: String,
    responses: HashMap<String, String>,
    failing_prefixes: Vec<String>,
    busy: Option<BusyScript>,
    hooks: Vec<(String, Hook)>,
}

/// A scripted instrument. Clones share state.
#[derive(Clone)]
pub struct MockInstrument {
    role: InstrumentRole,
    journal: CallJournal,
    state: Arc<Mutex<MockState>>,
}

impl MockInstrument {
    /// Creates a mock with its own journal.
    pub fn new(role: InstrumentRole, identity: impl Into<String>) -> Self {
        Self::with_journal(role, identity, CallJournal::default())
    }

    /// Creates a mock writing into `journal`.
    pub fn with_journal(
        role: InstrumentRole,
        identity: impl Into<String>,
        journal: CallJournal,
    ) -> Self {
        Self {
            role,
            journal,
            state: Arc::new(Mutex::new(MockState {
                identity: identity.into(),
                responses: HashMap::new(),
                failing_prefixes: Vec::new(),
                busy: None,
                hooks: Vec::new(),
            })),
        }
    }

    /// Mock digitizer speaking the default vocabulary; each capture reports
    /// running for `polls_per_capture` polls.
    pub fn digitizer(journal: CallJournal, polls_per_capture: u32) -> Self {
        let mock = Self::with_journal(
            InstrumentRole::Digitizer,
            "TEKTRONIX,MSO58,MOCK0001,CF:91.1CT FV:1.0",
            journal,
        );
        let cmds = DigitizerCommands::default();
        mock.script_busy(&cmds.run, &cmds.running_query, polls_per_capture);
        mock
    }

    /// Mock generator.
    pub fn generator(journal: CallJournal) -> Self {
        Self::with_journal(
            InstrumentRole::Generator,
            "TEKTRONIX,AFG31252,MOCK0002,SCPI:99.0 FV:1.0",
            journal,
        )
    }

    /// Makes `running_query` answer `1` for `polls` queries after every
    /// `arm_command`, then `0`.
    pub fn script_busy(&self, arm_command: &str, running_query: &str, polls: u32) {
        self.state.lock().busy = Some(BusyScript {
            arm_command: arm_command.to_string(),
            running_query: running_query.to_string(),
            polls_per_capture: polls,
            remaining: 0,
        });
    }

    /// Fixed response for `query`.
    pub fn respond(&self, query: &str, response: impl Into<String>) {
        self.state
            .lock()
            .responses
            .insert(query.to_string(), response.into());
    }

    /// Every command starting with `prefix` fails with [`LinkError::Rejected`].
    pub fn fail_on(&self, prefix: &str) {
        self.state.lock().failing_prefixes.push(prefix.to_string());
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        self.state.lock().failing_prefixes.clear();
    }

    /// Calls `hook` whenever a command starting with `prefix` is received.
    pub fn on_command(&self, prefix: &str, hook: impl Fn(&str) + Send + Sync + 'static) {
        self.state
            .lock()
            .hooks
            .push((prefix.to_string(), Arc::new(hook)));
    }

    /// Journal this mock writes into.
    pub fn journal(&self) -> CallJournal {
        self.journal.clone()
    }

    /// Commands received by this instrument, in order.
    pub fn commands(&self) -> Vec<String> {
        self.journal
            .lock()
            .iter()
            .filter(|c| c.role == self.role)
            .map(|c| c.command.clone())
            .collect()
    }

    /// Writes received by this instrument, in order.
    pub fn writes(&self) -> Vec<String> {
        self.journal
            .lock()
            .iter()
            .filter(|c| c.role == self.role && c.kind == CallKind::Write)
            .map(|c| c.command.clone())
            .collect()
    }

    fn record(&self, kind: CallKind, command: &str) -> Result<(), LinkError> {
        self.journal.lock().push(MockCall {
            role: self.role,
            kind,
            command: command.to_string(),
        });

        // Hooks run outside the state lock so they may touch this mock.
        let (hooks, failing) = {
            let state = self.state.lock();
            let hooks: Vec<Hook> = state
                .hooks
                .iter()
                .filter(|(prefix, _)| command.starts_with(prefix.as_str()))
                .map(|(_, hook)| hook.clone())
                .collect();
            let failing = state
                .failing_prefixes
                .iter()
                .any(|prefix| command.starts_with(prefix.as_str()));
            (hooks, failing)
        };
        for hook in hooks {
            hook(command);
        }

        if failing {
            return Err(LinkError::Rejected(command.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl InstrumentLink for MockInstrument {
    async fn write(&mut self, command: &str) -> Result<(), LinkError> {
        self.record(CallKind::Write, command)?;
        debug!("mock {} <- {}", self.role, command);

        let mut state = self.state.lock();
        if let Some(busy) = state.busy.as_mut() {
            if command == busy.arm_command {
                busy.remaining = busy.polls_per_capture;
            }
        }
        Ok(())
    }

    async fn query(&mut self, command: &str) -> Result<String, LinkError> {
        self.record(CallKind::Query, command)?;

        let mut state = self.state.lock();
        if command == IDENTIFY {
            return Ok(state.identity.clone());
        }
        if let Some(busy) = state.busy.as_mut() {
            if command == busy.running_query {
                if busy.remaining > 0 {
                    busy.remaining -= 1;
                    return Ok("1".to_string());
                }
                return Ok("0".to_string());
            }
        }
        Ok(state
            .responses
            .get(command)
            .cloned()
            .unwrap_or_else(|| "0".to_string()))
    }

    fn describe(&self) -> String {
        format!("mock {}", self.role)
    }
}

/// Connector handing out the two mock instruments.
#[derive(Clone)]
pub struct MockConnector {
    generator: MockInstrument,
    digitizer: MockInstrument,
    refused: Arc<Mutex<HashSet<InstrumentRole>>>,
    connections: Arc<Mutex<Vec<(InstrumentRole, String)>>>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    /// Generator and digitizer sharing one journal; captures finish after one
    /// busy poll.
    pub fn new() -> Self {
        Self::with_busy_polls(1)
    }

    /// Like [`MockConnector::new`], with `polls` busy answers per capture.
    pub fn with_busy_polls(polls: u32) -> Self {
        let journal = CallJournal::default();
        Self {
            generator: MockInstrument::generator(journal.clone()),
            digitizer: MockInstrument::digitizer(journal, polls),
            refused: Arc::default(),
            connections: Arc::default(),
        }
    }

    /// The mock generator (shared state).
    pub fn generator(&self) -> &MockInstrument {
        &self.generator
    }

    /// The mock digitizer (shared state).
    pub fn digitizer(&self) -> &MockInstrument {
        &self.digitizer
    }

    /// Makes connections to `role` fail.
    pub fn refuse(&self, role: InstrumentRole) {
        self.refused.lock().insert(role);
    }

    /// Every call on both instruments, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.generator.journal.lock().clone()
    }

    /// Connection attempts `(role, address)`, in order.
    pub fn connections(&self) -> Vec<(InstrumentRole, String)> {
        self.connections.lock().clone()
    }
}

#[async_trait]
impl LinkConnector for MockConnector {
    async fn connect(
        &self,
        role: InstrumentRole,
        address: &str,
    ) -> Result<Box<dyn InstrumentLink>, ConnectError> {
        self.connections.lock().push((role, address.to_string()));
        if self.refused.lock().contains(&role) {
            return Err(ConnectError::new(
                role,
                address,
                "Insufficient location information or the requested device or resource is not present in the system",
                Some(-1_073_807_343),
            ));
        }
        let link: Box<dyn InstrumentLink> = match role {
            InstrumentRole::Generator => Box::new(self.generator.clone()),
            InstrumentRole::Digitizer => Box::new(self.digitizer.clone()),
        };
        Ok(link)
    }
}
